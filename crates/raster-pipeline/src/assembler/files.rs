//! File assembly: one raster per feature plus a catalog sidecar.
//!
//! Paths for the whole batch are planned up front and checked for
//! collisions before anything is written. Write failures are recorded on
//! the affected row and do not stop the remaining features.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::feature::{AttributeValue, Feature};
use crate::grid::ReferenceGrid;
use crate::naming::{ensure_unique, PathNamer};
use crate::sparse::SparseTile;
use crate::writer::ZarrWriter;

/// File name of the metadata sidecar inside the output directory.
pub const CATALOG_FILE: &str = "catalog.csv";

/// Outcome of one feature's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum RowStatus {
    /// Path planned, raster not written yet.
    Pending,
    Written,
    /// Naming, rasterization or write failure.
    Failed(String),
}

impl RowStatus {
    fn as_csv(&self) -> String {
        match self {
            Self::Pending => "pending".to_string(),
            Self::Written => "written".to_string(),
            Self::Failed(msg) => format!("failed: {}", msg),
        }
    }
}

/// One feature's entry in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    /// Position of the feature in the (dissolved) feature source.
    pub source_index: usize,
    /// Identifying attributes of the feature.
    pub key: String,
    /// Output path relative to the output directory.
    pub path: Option<PathBuf>,
    /// Retained attribute values, aligned with [`OutputCatalog::columns`].
    pub attributes: Vec<AttributeValue>,
    pub status: RowStatus,
}

impl CatalogRow {
    /// Failure reason, or the status label.
    pub fn status_message(&self) -> String {
        match &self.status {
            RowStatus::Failed(msg) => msg.clone(),
            other => other.as_csv(),
        }
    }
}

/// Feature → output path table for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputCatalog {
    pub columns: Vec<String>,
    /// Sorted by `source_index`.
    pub rows: Vec<CatalogRow>,
}

impl OutputCatalog {
    /// Rows whose path was planned successfully.
    pub fn planned(&self) -> impl Iterator<Item = &CatalogRow> {
        self.rows.iter().filter(|r| r.path.is_some())
    }

    pub fn written(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.status == RowStatus::Written)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r.status, RowStatus::Failed(_)))
            .count()
    }

    /// Row for a given source index.
    pub fn row_mut(&mut self, source_index: usize) -> Option<&mut CatalogRow> {
        let pos = self
            .rows
            .binary_search_by_key(&source_index, |r| r.source_index)
            .ok()?;
        self.rows.get_mut(pos)
    }

    /// Render the catalog as CSV: retained columns, then `path` and `status`.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .map(|c| csv_field(c))
            .chain(["path".to_string(), "status".to_string()])
            .collect();
        let _ = writeln!(out, "{}", header.join(","));

        for row in &self.rows {
            let path = row
                .path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            let fields: Vec<String> = row
                .attributes
                .iter()
                .map(|v| csv_field(&v.to_string()))
                .chain([csv_field(&path), csv_field(&row.status.as_csv())])
                .collect();
            let _ = writeln!(out, "{}", fields.join(","));
        }
        out
    }
}

/// Quote a CSV field when it contains a delimiter, quote or newline.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// Summary of a file assembly.
#[derive(Debug, Clone)]
pub struct FileAssembly {
    pub catalog: OutputCatalog,
    pub catalog_path: PathBuf,
    pub written: usize,
    pub failed: usize,
}

/// Writes one raster per feature under an output directory.
#[derive(Debug, Clone)]
pub struct FileAssembler {
    output_dir: PathBuf,
    namer: PathNamer,
    columns: Vec<String>,
    writer: ZarrWriter,
}

impl FileAssembler {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        namer: PathNamer,
        columns: Vec<String>,
        writer: ZarrWriter,
    ) -> Self {
        Self {
            output_dir: output_dir.into(),
            namer,
            columns,
            writer,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Pre-flight: resolve every path and reject collisions before any write.
    ///
    /// Naming failures (unknown rank, missing name column) fail only that row.
    pub fn plan<'a, I>(&self, features: I) -> Result<OutputCatalog>
    where
        I: IntoIterator<Item = (usize, &'a Feature)>,
    {
        let key_columns = self.namer.columns();
        let mut rows = Vec::new();

        for (source_index, feature) in features {
            let key = feature.describe(&key_columns);
            let attributes = self
                .columns
                .iter()
                .map(|c| feature.attributes.get(c).cloned().unwrap_or(AttributeValue::Null))
                .collect();

            let (path, status) = match self.namer.path_for(feature) {
                Ok(path) => (Some(path), RowStatus::Pending),
                Err(e) => {
                    warn!(feature = %key, error = %e, "Cannot name output");
                    (None, RowStatus::Failed(e.to_string()))
                }
            };

            rows.push(CatalogRow {
                source_index,
                key,
                path,
                attributes,
                status,
            });
        }

        rows.sort_by_key(|r| r.source_index);

        let claimed: Vec<(PathBuf, String)> = rows
            .iter()
            .filter_map(|r| r.path.clone().map(|p| (p, r.key.clone())))
            .collect();
        ensure_unique(&claimed)?;

        Ok(OutputCatalog {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Create each distinct parent directory of the planned paths once.
    ///
    /// Returns the directories that could not be created with the reason.
    /// Only a failure on the output directory itself is an error.
    fn create_directories(&self, catalog: &OutputCatalog) -> Result<BTreeMap<PathBuf, String>> {
        let parents: BTreeSet<PathBuf> = catalog
            .planned()
            .filter_map(|r| r.path.as_ref())
            .filter_map(|p| self.output_dir.join(p).parent().map(Path::to_path_buf))
            .collect();

        std::fs::create_dir_all(&self.output_dir)?;
        let mut failed = BTreeMap::new();
        for dir in parents {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %e, "Cannot create output directory");
                failed.insert(dir, format!("cannot create directory: {}", e));
            }
        }
        Ok(failed)
    }

    /// Write the rasters of `tiles` (keyed by source index) and persist the catalog.
    ///
    /// Directory and raster write failures fail only the affected rows.
    /// Planned rows without a tile are marked failed as not rasterized.
    pub fn write<'a, I>(
        &self,
        grid: &ReferenceGrid,
        nodata: u8,
        mut catalog: OutputCatalog,
        tiles: I,
    ) -> Result<FileAssembly>
    where
        I: IntoIterator<Item = (usize, &'a Feature, &'a SparseTile)>,
    {
        let failed_dirs = self.create_directories(&catalog)?;
        if !failed_dirs.is_empty() {
            for row in catalog.rows.iter_mut() {
                if row.status != RowStatus::Pending {
                    continue;
                }
                let Some(relative) = &row.path else {
                    continue;
                };
                let target = self.output_dir.join(relative);
                if let Some(reason) = target.parent().and_then(|dir| failed_dirs.get(dir)) {
                    row.status = RowStatus::Failed(reason.clone());
                }
            }
        }

        for (source_index, feature, tile) in tiles {
            let Some(row) = catalog.row_mut(source_index) else {
                continue;
            };
            if row.status != RowStatus::Pending {
                continue;
            }
            let Some(relative) = row.path.clone() else {
                continue;
            };

            let dense = tile.to_dense(grid.validity_mask.as_deref(), nodata);
            let target = self.output_dir.join(&relative);
            match self
                .writer
                .write_raster(&target, &dense, grid, nodata, &feature.attributes)
            {
                Ok(_) => row.status = RowStatus::Written,
                Err(e) => {
                    warn!(feature = %row.key, path = %target.display(), error = %e, "Raster write failed");
                    row.status = RowStatus::Failed(e.to_string());
                }
            }
        }

        for row in catalog.rows.iter_mut() {
            if row.status == RowStatus::Pending {
                row.status = RowStatus::Failed("not rasterized".to_string());
            }
        }

        let catalog_path = self.output_dir.join(CATALOG_FILE);
        std::fs::write(&catalog_path, catalog.to_csv())?;

        let written = catalog.written();
        let failed = catalog.failed();
        info!(
            written,
            failed,
            catalog = %catalog_path.display(),
            "Wrote per-feature rasters"
        );

        Ok(FileAssembly {
            catalog,
            catalog_path,
            written,
            failed,
        })
    }

    /// Mark a planned row as failed (e.g. its rasterization task failed).
    pub fn mark_failed(catalog: &mut OutputCatalog, source_index: usize, reason: impl Into<String>) {
        if let Some(row) = catalog.row_mut(source_index) {
            row.status = RowStatus::Failed(reason.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_catalog_csv() {
        let catalog = OutputCatalog {
            columns: vec!["TAXON_ID".to_string(), "SCIENTIFIC_NAME".to_string()],
            rows: vec![
                CatalogRow {
                    source_index: 0,
                    key: "k".to_string(),
                    path: Some(PathBuf::from("mammals/Koala_LIKELY.zarr")),
                    attributes: vec![AttributeValue::Int(1), AttributeValue::from("Koala, grey")],
                    status: RowStatus::Written,
                },
                CatalogRow {
                    source_index: 1,
                    key: "k2".to_string(),
                    path: None,
                    attributes: vec![AttributeValue::Int(2), AttributeValue::Null],
                    status: RowStatus::Failed("unknown rank".to_string()),
                },
            ],
        };

        let csv = catalog.to_csv();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "TAXON_ID,SCIENTIFIC_NAME,path,status");
        assert_eq!(lines[1], "1,\"Koala, grey\",mammals/Koala_LIKELY.zarr,written");
        assert_eq!(lines[2], "2,,,failed: unknown rank");
        assert_eq!(catalog.written(), 1);
        assert_eq!(catalog.failed(), 1);
    }

    #[test]
    fn test_row_lookup_by_source_index() {
        let row = |source_index: usize| CatalogRow {
            source_index,
            key: format!("k{}", source_index),
            path: None,
            attributes: vec![],
            status: RowStatus::Pending,
        };
        let mut catalog = OutputCatalog {
            columns: vec![],
            rows: vec![row(0), row(3), row(7), row(12)],
        };

        FileAssembler::mark_failed(&mut catalog, 7, "boom");
        FileAssembler::mark_failed(&mut catalog, 5, "absent");

        assert_eq!(catalog.row_mut(7).unwrap().status, RowStatus::Failed("boom".to_string()));
        assert_eq!(catalog.row_mut(12).unwrap().key, "k12");
        assert!(catalog.row_mut(5).is_none());
        assert_eq!(catalog.failed(), 1);
    }
}
