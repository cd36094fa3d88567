//! Features: a polygonal geometry plus an attribute row.

use std::collections::BTreeMap;
use std::fmt;

use geo::{Area, MultiPolygon};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// A scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    /// Canonical string used for grouping and hashing.
    ///
    /// Distinct variants never collide (`Int(1)` vs `Text("1")`).
    pub fn canonical(&self) -> String {
        match self {
            Self::Null => "n:".to_string(),
            Self::Bool(v) => format!("b:{}", v),
            Self::Int(v) => format!("i:{}", v),
            Self::Float(v) => format!("f:{}", v.to_bits()),
            Self::Text(v) => format!("s:{}", v),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Ordered attribute row.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A geometry in the reference grid's CRS plus its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: Option<MultiPolygon<f64>>,
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(geometry: Option<MultiPolygon<f64>>, attributes: Attributes) -> Self {
        Self {
            geometry,
            attributes,
        }
    }

    /// Look up a column, failing with a `MissingColumn` error naming this feature.
    pub fn require(&self, column: &str, key_columns: &[String]) -> Result<&AttributeValue> {
        self.attributes
            .get(column)
            .ok_or_else(|| PipelineError::missing_column(column, self.describe(key_columns)))
    }

    /// Human-readable identity: `col=value` pairs for `key_columns`,
    /// or every attribute when no key columns are given.
    pub fn describe(&self, key_columns: &[String]) -> String {
        let pairs: Vec<String> = if key_columns.is_empty() {
            self.attributes
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect()
        } else {
            key_columns
                .iter()
                .map(|k| match self.attributes.get(k) {
                    Some(v) => format!("{}={}", k, v),
                    None => format!("{}=<missing>", k),
                })
                .collect()
        };
        pairs.join(", ")
    }

    /// The geometry if it is usable for burning, otherwise the reason it is not.
    pub fn valid_geometry(&self) -> std::result::Result<&MultiPolygon<f64>, &'static str> {
        let geometry = self.geometry.as_ref().ok_or("geometry is null")?;
        check_geometry(geometry)?;
        Ok(geometry)
    }
}

/// Reject empty, non-finite or zero-area geometries.
pub fn check_geometry(geometry: &MultiPolygon<f64>) -> std::result::Result<(), &'static str> {
    if geometry.0.is_empty() {
        return Err("geometry is empty");
    }
    let finite = geometry.0.iter().all(|p| {
        std::iter::once(p.exterior())
            .chain(p.interiors())
            .flat_map(|ring| ring.0.iter())
            .all(|c| c.x.is_finite() && c.y.is_finite())
    });
    if !finite {
        return Err("geometry has non-finite coordinates");
    }
    if geometry.unsigned_area() <= 0.0 {
        return Err("geometry has zero area");
    }
    Ok(())
}

/// Ordered, read-only sequence of features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureSource {
    features: Vec<Feature>,
}

impl FeatureSource {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }

    /// Column names in first-seen order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for feature in &self.features {
            for name in feature.attributes.keys() {
                if !columns.iter().any(|c| c == name) {
                    columns.push(name.clone());
                }
            }
        }
        columns
    }

    /// Columns starting with any of `prefixes`, followed by `extra` columns.
    pub fn select_columns(&self, prefixes: &[String], extra: &[String]) -> Vec<String> {
        let mut selected: Vec<String> = self
            .columns()
            .into_iter()
            .filter(|c| prefixes.iter().any(|p| c.starts_with(p.as_str())))
            .filter(|c| !extra.contains(c))
            .collect();
        selected.extend(extra.iter().cloned());
        selected
    }
}

impl From<Vec<Feature>> for FeatureSource {
    fn from(features: Vec<Feature>) -> Self {
        Self::new(features)
    }
}

impl IntoIterator for FeatureSource {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}
