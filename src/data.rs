use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Read;

use crate::aes::Channel;

/// A single cell value.
///
/// Temporal values are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Time(i64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Number(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Numeric view used by continuous and temporal scales.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Time(ms) => Some(*ms as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Stable string key used for grouping and categorical lookup.
    ///
    /// Times key on their raw milliseconds so sub-second values stay distinct.
    pub fn key(&self) -> String {
        match self {
            Value::Time(ms) => format!("t:{}", ms),
            _ => self.to_string(),
        }
    }

    /// Total order over values of the same variant; mixed variants order by
    /// variant rank.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::Time(_) => 3,
            Value::Text(_) => 4,
        }
    }

    /// Parse a raw text cell.
    pub fn parse(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("nan") {
            return Value::Null;
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return Value::Number(n);
        }
        match trimmed {
            "true" | "TRUE" | "True" => return Value::Bool(true),
            "false" | "FALSE" | "False" => return Value::Bool(false),
            _ => {}
        }
        if let Some(ms) = parse_timestamp(trimmed) {
            return Value::Time(ms);
        }
        Value::Text(trimmed.to_string())
    }
}

fn parse_timestamp(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str(""),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::Time(ms) => match DateTime::<Utc>::from_timestamp_millis(*ms) {
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
                None => write!(f, "{}", ms),
            },
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

/// Declared column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Numeric,
    Temporal,
    Boolean,
    Categorical,
    Text,
}

impl DType {
    /// Infer the narrowest type that fits every non-null value.
    pub fn infer(values: &[Value]) -> DType {
        let mut present = values.iter().filter(|v| !v.is_null()).peekable();
        if present.peek().is_none() {
            return DType::Numeric;
        }
        let mut dtype = None;
        for v in present {
            let this = match v {
                Value::Number(_) => DType::Numeric,
                Value::Time(_) => DType::Temporal,
                Value::Bool(_) => DType::Boolean,
                _ => DType::Text,
            };
            match dtype {
                None => dtype = Some(this),
                Some(d) if d == this => {}
                Some(_) => return DType::Text,
            }
        }
        dtype.unwrap_or(DType::Text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub dtype: DType,
    pub values: Vec<Value>,
}

/// An immutable, column-oriented table.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Dataset {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a column, inferring its dtype. Mixed-type columns are stored as text.
    pub fn with_column<V: Into<Value>>(self, name: &str, values: Vec<V>) -> Result<Self> {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let dtype = DType::infer(&values);
        let values = if dtype == DType::Text {
            values
                .into_iter()
                .map(|v| if v.is_null() { v } else { Value::Text(v.to_string()) })
                .collect()
        } else {
            values
        };
        self.push_column(Column { name: name.to_string(), dtype, values })
    }

    fn push_column(mut self, column: Column) -> Result<Self> {
        if !self.columns.is_empty() && column.values.len() != self.n_rows {
            return Err(anyhow!(
                "Column '{}' has {} rows, expected {}",
                column.name,
                column.values.len(),
                self.n_rows
            ));
        }
        self.n_rows = column.values.len();
        self.columns.retain(|c| c.name != column.name);
        self.columns.push(column);
        Ok(self)
    }

    /// Override the inferred dtype of a column (e.g. treat integers as categories).
    pub fn declare(mut self, name: &str, dtype: DType) -> Result<Self> {
        let column = self
            .columns
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| anyhow!("Column '{}' not found", name))?;
        column.dtype = dtype;
        Ok(self)
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Exact name match first, then case-insensitive.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    pub fn dtype(&self, name: &str) -> Option<DType> {
        self.column(name).map(|c| c.dtype)
    }

    /// Row subset by boolean mask.
    pub fn filter(&self, mask: &[bool]) -> Dataset {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| i)
            .collect();
        self.take(&indices)
    }

    pub fn take(&self, indices: &[usize]) -> Dataset {
        Dataset {
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    dtype: c.dtype,
                    values: indices.iter().map(|&i| c.values[i].clone()).collect(),
                })
                .collect(),
            n_rows: indices.len(),
        }
    }

    /// Row indices grouped by the values of `keys`, in first-seen order.
    pub fn group_by(&self, keys: &[&str]) -> Result<Vec<(Vec<Value>, Vec<usize>)>> {
        let columns = keys
            .iter()
            .map(|k| self.column(k).ok_or_else(|| anyhow!("Column '{}' not found", k)))
            .collect::<Result<Vec<_>>>()?;
        let rows: Vec<Vec<Value>> = (0..self.n_rows)
            .map(|i| columns.iter().map(|c| c.values[i].clone()).collect())
            .collect();
        Ok(group_rows(&rows))
    }

    /// Load a CSV table with a header row.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()
            .context("Failed to read CSV headers")?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut cells: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];
        for (row_idx, record) in rdr.records().enumerate() {
            let record = record.with_context(|| format!("Failed to read CSV row {}", row_idx + 1))?;
            for (i, raw) in record.iter().enumerate().take(headers.len()) {
                cells[i].push(Value::parse(raw));
            }
        }

        let mut dataset = Dataset::new();
        for (name, values) in headers.iter().zip(cells) {
            dataset = dataset.with_column(name, values)?;
        }
        Ok(dataset)
    }

    /// Create a Dataset from a JSON Array of Objects
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let array = value.as_array().ok_or_else(|| anyhow!("Input data must be a JSON array of objects"))?;

        if array.is_empty() {
            return Err(anyhow!("Input data array is empty"));
        }

        // Extract headers from the first object
        let first_obj = array[0].as_object().ok_or_else(|| anyhow!("Items in array must be objects"))?;
        let headers: Vec<String> = first_obj.keys().cloned().collect();

        let mut cells: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];
        for item in array {
            let obj = item.as_object().ok_or_else(|| anyhow!("Items in array must be objects"))?;
            for (i, header) in headers.iter().enumerate() {
                let value = match obj.get(header) {
                    Some(JsonValue::String(s)) => Value::parse(s),
                    Some(JsonValue::Number(n)) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
                    Some(JsonValue::Bool(b)) => Value::Bool(*b),
                    Some(JsonValue::Null) | None => Value::Null,
                    _ => return Err(anyhow!("Unsupported value type for field '{}'", header)),
                };
                cells[i].push(value);
            }
        }

        let mut dataset = Dataset::new();
        for (name, values) in headers.iter().zip(cells) {
            dataset = dataset.with_column(name, values)?;
        }
        Ok(dataset)
    }
}

/// Stable first-seen grouping of row keys.
pub(crate) fn group_rows(rows: &[Vec<Value>]) -> Vec<(Vec<Value>, Vec<usize>)> {
    let mut index: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<(Vec<Value>, Vec<usize>)> = Vec::new();
    for (i, key) in rows.iter().enumerate() {
        let k: Vec<String> = key.iter().map(Value::key).collect();
        match index.get(&k) {
            Some(&g) => groups[g].1.push(i),
            None => {
                index.insert(k, groups.len());
                groups.push((key.clone(), vec![i]));
            }
        }
    }
    groups
}

/// Channel-keyed subframe flowing through the stat phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Frame {
    columns: BTreeMap<Channel, Vec<Value>>,
    len: usize,
}

impl Frame {
    pub fn new(len: usize) -> Self {
        Frame { columns: BTreeMap::new(), len }
    }

    pub fn with(mut self, channel: Channel, values: Vec<Value>) -> Self {
        self.insert(channel, values);
        self
    }

    /// Insert a column. The first column fixes the frame length.
    pub fn insert(&mut self, channel: Channel, values: Vec<Value>) {
        if self.columns.is_empty() {
            self.len = values.len();
        }
        debug_assert_eq!(values.len(), self.len);
        self.columns.insert(channel, values);
    }

    pub fn get(&self, channel: Channel) -> Option<&[Value]> {
        self.columns.get(&channel).map(|v| v.as_slice())
    }

    pub fn remove(&mut self, channel: Channel) -> Option<Vec<Value>> {
        self.columns.remove(&channel)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.columns.contains_key(&channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.columns.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Numeric view of a column; non-numeric cells become NaN.
    pub fn numbers(&self, channel: Channel) -> Option<Vec<f64>> {
        self.get(channel)
            .map(|values| values.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect())
    }

    pub fn take(&self, indices: &[usize]) -> Frame {
        Frame {
            columns: self
                .columns
                .iter()
                .map(|(c, values)| (*c, indices.iter().map(|&i| values[i].clone()).collect()))
                .collect(),
            len: indices.len(),
        }
    }

    pub fn filter(&self, mask: &[bool]) -> Frame {
        let indices: Vec<usize> = (0..self.len).filter(|&i| mask[i]).collect();
        self.take(&indices)
    }

    /// Row indices grouped by the given channels, first-seen order.
    pub fn group_by(&self, channels: &[Channel]) -> Vec<(Vec<Value>, Vec<usize>)> {
        let present: Vec<&Vec<Value>> = channels.iter().filter_map(|c| self.columns.get(c)).collect();
        let rows: Vec<Vec<Value>> = (0..self.len)
            .map(|i| present.iter().map(|col| col[i].clone()).collect())
            .collect();
        group_rows(&rows)
    }

    /// Row-wise concatenation; channels missing from a part are filled with nulls.
    pub fn concat(parts: Vec<Frame>) -> Frame {
        let mut channels: Vec<Channel> = Vec::new();
        for part in &parts {
            for c in part.channels() {
                if !channels.contains(&c) {
                    channels.push(c);
                }
            }
        }
        let len: usize = parts.iter().map(|p| p.len).sum();
        let mut columns: BTreeMap<Channel, Vec<Value>> =
            channels.iter().map(|c| (*c, Vec::with_capacity(len))).collect();
        for part in parts {
            for c in &channels {
                let column = columns.entry(*c).or_default();
                match part.columns.get(c) {
                    Some(values) => column.extend(values.iter().cloned()),
                    None => column.extend(std::iter::repeat(Value::Null).take(part.len)),
                }
            }
        }
        Frame { columns, len }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cells() {
        assert_eq!(Value::parse("1.5"), Value::Number(1.5));
        assert_eq!(Value::parse(""), Value::Null);
        assert_eq!(Value::parse("NA"), Value::Null);
        assert_eq!(Value::parse("true"), Value::Bool(true));
        assert_eq!(Value::parse("apple"), Value::Text("apple".into()));
        assert!(matches!(Value::parse("2024-01-02"), Value::Time(_)));
    }

    #[test]
    fn test_time_keys_keep_milliseconds() {
        assert_ne!(Value::Time(1_000).key(), Value::Time(1_001).key());
        let rows = vec![vec![Value::Time(1_000)], vec![Value::Time(1_001)], vec![Value::Time(1_000)]];
        let groups = group_rows(&rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].1, vec![0, 2]);
    }

    #[test]
    fn test_dtype_inference() {
        let ds = Dataset::new()
            .with_column("n", vec![1.0, 2.0])
            .unwrap()
            .with_column("s", vec!["a", "b"])
            .unwrap();
        assert_eq!(ds.dtype("n"), Some(DType::Numeric));
        assert_eq!(ds.dtype("s"), Some(DType::Text));
        let ds = ds.declare("n", DType::Categorical).unwrap();
        assert_eq!(ds.dtype("n"), Some(DType::Categorical));
    }

    #[test]
    fn test_mixed_column_becomes_text() {
        let ds = Dataset::new()
            .with_column("m", vec![Value::Number(1.0), Value::Text("a".into()), Value::Null])
            .unwrap();
        let col = ds.column("m").unwrap();
        assert_eq!(col.dtype, DType::Text);
        assert_eq!(col.values[0], Value::Text("1".into()));
        assert_eq!(col.values[2], Value::Null);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let res = Dataset::new()
            .with_column("a", vec![1.0, 2.0])
            .unwrap()
            .with_column("b", vec![1.0]);
        assert!(res.is_err());
    }

    #[test]
    fn test_from_csv() {
        let csv = "category,value,day\nA,1,2024-01-01\nB,2,2024-01-02\nA,,2024-01-03\n";
        let ds = Dataset::from_csv(csv.as_bytes()).unwrap();
        assert_eq!(ds.n_rows(), 3);
        assert_eq!(ds.dtype("category"), Some(DType::Text));
        assert_eq!(ds.dtype("value"), Some(DType::Numeric));
        assert_eq!(ds.dtype("day"), Some(DType::Temporal));
        assert!(ds.column("value").unwrap().values[2].is_null());
    }

    #[test]
    fn test_from_json() {
        let json = serde_json::json!([{"a": 1, "b": "x"}, {"a": 2, "b": "y"}]);
        let ds = Dataset::from_json(&json).unwrap();
        assert_eq!(ds.n_rows(), 2);
        assert_eq!(ds.column("a").unwrap().values[1], Value::Number(2.0));
        assert!(Dataset::from_json(&serde_json::json!([])).is_err());
    }

    #[test]
    fn test_filter_and_group_by() {
        let ds = Dataset::new()
            .with_column("g", vec!["b", "a", "b"])
            .unwrap()
            .with_column("v", vec![1.0, 2.0, 3.0])
            .unwrap();
        let groups = ds.group_by(&["g"]).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, vec![Value::Text("b".into())]);
        assert_eq!(groups[0].1, vec![0, 2]);

        let filtered = ds.filter(&[true, false, true]);
        assert_eq!(filtered.n_rows(), 2);
        assert_eq!(filtered.column("v").unwrap().values, vec![Value::Number(1.0), Value::Number(3.0)]);
    }

    #[test]
    fn test_frame_concat_fills_missing() {
        let a = Frame::new(0).with(Channel::X, vec![Value::from(1.0)]);
        let b = Frame::new(0)
            .with(Channel::X, vec![Value::from(2.0)])
            .with(Channel::Y, vec![Value::from(3.0)]);
        let c = Frame::concat(vec![a, b]);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(Channel::Y).unwrap()[0], Value::Null);
    }
}
