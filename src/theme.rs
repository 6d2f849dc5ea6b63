//! Presentation defaults threaded into mark drawing.
//!
//! Nothing in here influences stats, scale domains or moves: a theme only
//! fills in visual properties that no mapping provides, and supplies the
//! output ranges (palettes, size ranges) of visual scales.

use serde::{Deserialize, Serialize, Serializer};

/// An opaque sRGB colour. Serialises as `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// Parse any CSS colour string ("red", "#1f77b4", "rgb(0,0,0)").
    pub fn parse(s: &str) -> Option<Rgb> {
        let [r, g, b, _] = csscolorparser::parse(s).ok()?.to_rgba8();
        Some(Rgb(r, g, b))
    }

    /// Linear interpolation in sRGB space, `t` in [0, 1].
    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

const BLACK: Rgb = Rgb(0, 0, 0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    /// Categorical colour cycle.
    pub palette: Vec<String>,
    /// Endpoints of the continuous colour gradient.
    pub gradient: (String, String),
    /// Colour of marks without a colour mapping.
    pub color: String,
    pub point_size: f64,
    pub size_range: (f64, f64),
    pub line_width: f64,
    pub alpha: f64,
    pub alpha_range: (f64, f64),
    pub fill_alpha: f64,
    pub band_alpha: f64,
    pub shapes: Vec<String>,
    /// Width of bars and dodge slots as a fraction of the categorical spacing.
    pub bar_width: f64,
    pub text_size: f64,
}

impl Default for Theme {
    fn default() -> Self {
        Theme {
            palette: [
                "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f", "#bcbd22",
                "#17becf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            gradient: ("#132b43".to_string(), "#56b1f7".to_string()),
            color: "#1f77b4".to_string(),
            point_size: 6.0,
            size_range: (2.0, 12.0),
            line_width: 1.5,
            alpha: 1.0,
            alpha_range: (0.2, 1.0),
            fill_alpha: 0.8,
            band_alpha: 0.2,
            shapes: ["circle", "square", "triangle", "diamond", "cross", "plus"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            bar_width: 0.8,
            text_size: 10.0,
        }
    }
}

impl Theme {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn default_color(&self) -> Rgb {
        Rgb::parse(&self.color).unwrap_or(BLACK)
    }

    /// Colour for the `i`-th category, cycling through the palette.
    pub fn palette_color(&self, i: usize) -> Rgb {
        if self.palette.is_empty() {
            return self.default_color();
        }
        Rgb::parse(&self.palette[i % self.palette.len()]).unwrap_or(BLACK)
    }

    pub fn gradient_color(&self, t: f64) -> Rgb {
        let low = Rgb::parse(&self.gradient.0).unwrap_or(BLACK);
        let high = Rgb::parse(&self.gradient.1).unwrap_or(BLACK);
        low.lerp(high, t)
    }

    pub fn shape(&self, i: usize) -> String {
        if self.shapes.is_empty() {
            return "circle".to_string();
        }
        self.shapes[i % self.shapes.len()].clone()
    }
}
