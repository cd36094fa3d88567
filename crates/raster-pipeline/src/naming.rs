//! Output path construction for per-feature rasters.
//!
//! Paths look like `<category>/<Name>_<RANK>.zarr`, relative to the output
//! directory. Name components have `/` and whitespace replaced by `_`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::feature::Feature;
use crate::rank::PresenceRank;

/// Make a single path component safe: every `/` and whitespace character,
/// leading and trailing ones included, becomes `_`.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| if c == '/' || c.is_whitespace() { '_' } else { c })
        .collect();

    match cleaned.as_str() {
        "" => "unnamed".to_string(),
        "." | ".." => cleaned.replace('.', "_"),
        _ => cleaned,
    }
}

/// Derives a relative output path from a feature's attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathNamer {
    /// Human-readable name column (e.g. scientific name).
    pub name_column: String,
    /// Coarse category column used as a subdirectory, if any.
    pub category_column: Option<String>,
    /// Rank column whose label becomes the filename suffix, if any.
    pub rank_column: Option<String>,
    /// File extension without the dot.
    pub extension: String,
}

impl Default for PathNamer {
    fn default() -> Self {
        Self {
            name_column: "SCIENTIFIC_NAME".to_string(),
            category_column: Some("TAXON_GROUP".to_string()),
            rank_column: Some("PRESENCE_CATEGORY".to_string()),
            extension: "zarr".to_string(),
        }
    }
}

impl PathNamer {
    /// Columns the namer reads; used to identify features in errors.
    pub fn columns(&self) -> Vec<String> {
        let mut cols = Vec::new();
        cols.extend(self.category_column.iter().cloned());
        cols.push(self.name_column.clone());
        cols.extend(self.rank_column.iter().cloned());
        cols
    }

    /// Relative output path for `feature`.
    pub fn path_for(&self, feature: &Feature) -> Result<PathBuf> {
        let key_columns = self.columns();
        let mut path = PathBuf::new();

        if let Some(column) = &self.category_column {
            if let Some(value) = feature.attributes.get(column) {
                if !value.is_null() {
                    path.push(sanitize_component(&value.to_string()));
                }
            }
        }

        let name = feature.require(&self.name_column, &key_columns)?;
        let mut file_stem = sanitize_component(&name.to_string());

        if let Some(column) = &self.rank_column {
            let rank = PresenceRank::resolve(feature, column, &key_columns)?;
            file_stem.push('_');
            file_stem.push_str(rank.label());
        }

        path.push(format!("{}.{}", file_stem, self.extension));
        Ok(path)
    }
}

/// Reject the batch if any two entries share a path.
///
/// `entries` pairs each path with a description of the feature that claims it.
pub fn ensure_unique(entries: &[(PathBuf, String)]) -> Result<()> {
    let mut seen: HashMap<&PathBuf, &str> = HashMap::with_capacity(entries.len());
    for (path, owner) in entries {
        if let Some(first) = seen.insert(path, owner.as_str()) {
            return Err(PipelineError::PathCollision {
                path: path.clone(),
                first: first.to_string(),
                second: owner.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{AttributeValue, Attributes};

    fn feature(name: &str, group: Option<&str>, rank: i64) -> Feature {
        let mut attributes = Attributes::new();
        attributes.insert("SCIENTIFIC_NAME".to_string(), AttributeValue::from(name));
        if let Some(group) = group {
            attributes.insert("TAXON_GROUP".to_string(), AttributeValue::from(group));
        }
        attributes.insert("PRESENCE_CATEGORY".to_string(), AttributeValue::Int(rank));
        Feature::new(None, attributes)
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Phascolarctos cinereus"), "Phascolarctos_cinereus");
        assert_eq!(sanitize_component("a/b\tc"), "a_b_c");
        assert_eq!(sanitize_component(" Koala\n"), "_Koala_");
        assert_eq!(sanitize_component("  "), "__");
        assert_eq!(sanitize_component(""), "unnamed");
        assert_eq!(sanitize_component(".."), "__");
    }

    #[test]
    fn test_path_layout() {
        let namer = PathNamer::default();
        let path = namer
            .path_for(&feature("Phascolarctos cinereus", Some("mammals"), 2))
            .unwrap();
        assert_eq!(path, PathBuf::from("mammals/Phascolarctos_cinereus_LIKELY.zarr"));

        let path = namer.path_for(&feature("Acacia sp/x", None, 1)).unwrap();
        assert_eq!(path, PathBuf::from("Acacia_sp_x_MAYBE.zarr"));
    }

    #[test]
    fn test_unknown_rank_fails() {
        let err = PathNamer::default()
            .path_for(&feature("x", None, 7))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownRank { .. }));
    }

    #[test]
    fn test_ensure_unique() {
        let ok = vec![
            (PathBuf::from("a/x_MAYBE.zarr"), "x".to_string()),
            (PathBuf::from("a/x_LIKELY.zarr"), "x".to_string()),
        ];
        assert!(ensure_unique(&ok).is_ok());

        // "a b" and "a_b" sanitize to the same stem.
        let namer = PathNamer::default();
        let clash = vec![
            (namer.path_for(&feature("a b", None, 1)).unwrap(), "first".to_string()),
            (namer.path_for(&feature("a_b", None, 1)).unwrap(), "second".to_string()),
        ];
        match ensure_unique(&clash).unwrap_err() {
            PipelineError::PathCollision { first, second, .. } => {
                assert_eq!(first, "first");
                assert_eq!(second, "second");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
