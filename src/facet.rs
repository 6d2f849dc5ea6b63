//! Facet layout: splits rows into a grid of panels and decides which panels
//! share position scales.

use serde::Serialize;
use std::collections::HashSet;

use crate::data::{Dataset, Value};
use crate::error::{PlotError, Result};

/// Which panels share one position scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Share {
    #[default]
    All,
    Row,
    Col,
    None,
}

impl Share {
    pub fn parse(name: &str) -> Option<Share> {
        Some(match name {
            "all" | "true" | "fixed" => Share::All,
            "row" => Share::Row,
            "col" | "column" => Share::Col,
            "none" | "false" | "free" => Share::None,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FacetSpec {
    pub row: Option<String>,
    pub col: Option<String>,
    /// Reflow a single facet variable into this many columns.
    pub wrap: Option<usize>,
    pub share_x: Share,
    pub share_y: Share,
    pub drop_empty: bool,
    pub row_order: Option<Vec<Value>>,
    pub col_order: Option<Vec<Value>>,
}

impl FacetSpec {
    pub fn cols(column: &str) -> Self {
        FacetSpec { col: Some(column.to_string()), ..Default::default() }
    }

    pub fn rows(column: &str) -> Self {
        FacetSpec { row: Some(column.to_string()), ..Default::default() }
    }

    pub fn grid(row: &str, col: &str) -> Self {
        FacetSpec { row: Some(row.to_string()), col: Some(col.to_string()), ..Default::default() }
    }

    pub fn wrap(mut self, ncol: usize) -> Self {
        self.wrap = Some(ncol.max(1));
        self
    }

    pub fn share(mut self, x: Share, y: Share) -> Self {
        self.share_x = x;
        self.share_y = y;
        self
    }

    pub fn drop_empty(mut self) -> Self {
        self.drop_empty = true;
        self
    }

    /// Columns the facet reads.
    pub fn columns(&self) -> Vec<&str> {
        self.row.iter().chain(self.col.iter()).map(|s| s.as_str()).collect()
    }

    fn is_wrapped(&self) -> bool {
        self.wrap.is_some() && (self.row.is_none() || self.col.is_none())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Panel {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub title: Option<String>,
    #[serde(skip)]
    pub row_key: Option<Value>,
    #[serde(skip)]
    pub col_key: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetLayout {
    pub nrow: usize,
    pub ncol: usize,
    pub panels: Vec<Panel>,
    #[serde(skip)]
    wrap: Option<usize>,
}

impl FacetLayout {
    /// A single unfaceted panel.
    pub fn single() -> Self {
        FacetLayout {
            nrow: 1,
            ncol: 1,
            panels: vec![Panel { index: 0, row: 0, col: 0, title: None, row_key: None, col_key: None }],
            wrap: None,
        }
    }

    /// Build the panel grid from the facet variables' levels across `datasets`.
    pub fn build(spec: Option<&FacetSpec>, datasets: &[&Dataset]) -> Result<Self> {
        let Some(spec) = spec else {
            return Ok(FacetLayout::single());
        };
        let row_levels = match &spec.row {
            Some(column) => Some(facet_levels(column, spec.row_order.as_deref(), datasets)?),
            None => None,
        };
        let col_levels = match &spec.col {
            Some(column) => Some(facet_levels(column, spec.col_order.as_deref(), datasets)?),
            None => None,
        };

        if spec.is_wrapped() {
            let (column, levels) = match (&spec.col, col_levels, &spec.row, row_levels) {
                (Some(c), Some(levels), _, _) => (c.as_str(), levels),
                (_, _, Some(r), Some(levels)) => (r.as_str(), levels),
                _ => return Ok(FacetLayout::single()),
            };
            let panels = levels
                .into_iter()
                .enumerate()
                .map(|(i, key)| Panel {
                    index: i,
                    row: 0,
                    col: 0,
                    title: Some(format!("{} = {}", column, key)),
                    row_key: None,
                    col_key: Some(key),
                })
                .collect();
            let mut layout = FacetLayout { nrow: 0, ncol: 0, panels, wrap: spec.wrap };
            layout.reflow();
            return Ok(layout);
        }

        let rows = row_levels.map(|l| l.into_iter().map(Some).collect()).unwrap_or_else(|| vec![None]);
        let cols = col_levels.map(|l| l.into_iter().map(Some).collect()).unwrap_or_else(|| vec![None]);
        let mut panels = Vec::new();
        for (r, row_key) in rows.iter().enumerate() {
            for (c, col_key) in cols.iter().enumerate() {
                let mut title = Vec::new();
                if let (Some(name), Some(key)) = (&spec.row, row_key) {
                    title.push(format!("{} = {}", name, key));
                }
                if let (Some(name), Some(key)) = (&spec.col, col_key) {
                    title.push(format!("{} = {}", name, key));
                }
                panels.push(Panel {
                    index: panels.len(),
                    row: r,
                    col: c,
                    title: if title.is_empty() { None } else { Some(title.join(" | ")) },
                    row_key: row_key.clone(),
                    col_key: col_key.clone(),
                });
            }
        }
        Ok(FacetLayout { nrow: rows.len(), ncol: cols.len(), panels, wrap: None })
    }

    fn reflow(&mut self) {
        let Some(ncol) = self.wrap else { return };
        let ncol = ncol.min(self.panels.len()).max(1);
        for (i, panel) in self.panels.iter_mut().enumerate() {
            panel.index = i;
            panel.row = i / ncol;
            panel.col = i % ncol;
        }
        self.ncol = ncol;
        self.nrow = self.panels.len().div_ceil(ncol).max(1);
    }

    /// Keep only panels whose flag is set, reflowing wrapped layouts.
    pub fn retain(&mut self, keep: &[bool]) {
        let mut i = 0;
        self.panels.retain(|_| {
            let k = keep.get(i).copied().unwrap_or(true);
            i += 1;
            k
        });
        if self.wrap.is_some() {
            self.reflow();
        } else {
            for (i, panel) in self.panels.iter_mut().enumerate() {
                panel.index = i;
            }
        }
    }

    /// Rows of `data` falling in each panel.
    ///
    /// A dataset without a facet column contributes all of its rows to every
    /// panel; rows with a missing facet value fall in no panel.
    pub fn assign(&self, spec: Option<&FacetSpec>, data: &Dataset) -> Vec<Vec<usize>> {
        let all: Vec<usize> = (0..data.n_rows()).collect();
        let Some(spec) = spec else {
            return vec![all; self.panels.len()];
        };
        let (row_col, col_col) = if spec.is_wrapped() {
            (None, spec.col.as_ref().or(spec.row.as_ref()))
        } else {
            (spec.row.as_ref(), spec.col.as_ref())
        };
        let row_values = row_col.and_then(|c| data.column(c)).map(|c| &c.values);
        let col_values = col_col.and_then(|c| data.column(c)).map(|c| &c.values);

        self.panels
            .iter()
            .map(|panel| {
                all.iter()
                    .copied()
                    .filter(|&i| {
                        let matches = |values: Option<&Vec<Value>>, key: &Option<Value>| match (values, key) {
                            (Some(values), Some(key)) => values[i].key() == key.key() && !values[i].is_null(),
                            _ => true,
                        };
                        matches(row_values, &panel.row_key) && matches(col_values, &panel.col_key)
                    })
                    .collect()
            })
            .collect()
    }

    /// Sharing cell of each panel for a share policy.
    pub fn cells(&self, share: Share) -> Vec<usize> {
        self.panels
            .iter()
            .map(|p| match share {
                Share::All => 0,
                Share::Row => p.row,
                Share::Col => p.col,
                Share::None => p.index,
            })
            .collect()
    }
}

/// Facet levels: explicit order, else sorted for numbers and booleans and
/// first-seen otherwise.
fn facet_levels(column: &str, order: Option<&[Value]>, datasets: &[&Dataset]) -> Result<Vec<Value>> {
    if let Some(order) = order {
        return Ok(order.to_vec());
    }
    let columns: Vec<_> = datasets.iter().filter_map(|d| d.column(column)).collect();
    if columns.is_empty() {
        return Err(PlotError::ColumnNotFound { column: column.to_string(), layer: None });
    }
    let mut seen = HashSet::new();
    let mut levels = Vec::new();
    for value in columns.iter().flat_map(|c| c.values.iter()) {
        if !value.is_null() && seen.insert(value.key()) {
            levels.push(value.clone());
        }
    }
    if levels.iter().all(|v| matches!(v, Value::Number(_) | Value::Bool(_))) {
        levels.sort_by(|a, b| a.total_cmp(b));
    }
    Ok(levels)
}
