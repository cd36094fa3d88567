//! Dissolve: one feature per distinct combination of grouping-column values.
//!
//! Geometries inside a group are unioned and only attributes shared by every
//! member survive. Output order is the order in which each key first appears.
//!
//! [`DissolveCache`] stores dissolved outputs under a content-addressed key
//! (grouping columns + input features), so a changed grouping definition or
//! input can never reuse a stale artifact.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use geo::{BooleanOps, MultiPolygon};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::feature::{check_geometry, Attributes, Feature, FeatureSource};

/// A group that produced no output feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedGroup {
    /// `col=value` description of the group key.
    pub key: String,
    /// Number of input features in the group.
    pub members: usize,
}

/// An input feature left out of every group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedFeature {
    /// Position in the input feature source.
    pub index: usize,
    pub key: String,
    pub reason: String,
}

/// Result of a dissolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DissolveOutput {
    pub group_by: Vec<String>,
    pub features: FeatureSource,
    pub dropped: Vec<DroppedGroup>,
    /// Features whose group key could not be read (e.g. a missing column).
    #[serde(default)]
    pub rejected: Vec<RejectedFeature>,
}

/// Groups features by attribute columns and unions their geometries.
#[derive(Debug, Clone)]
pub struct Dissolver {
    group_by: Vec<String>,
}

struct Group<'a> {
    members: Vec<&'a Feature>,
}

impl Dissolver {
    pub fn new(group_by: Vec<String>) -> Result<Self> {
        if group_by.is_empty() {
            return Err(PipelineError::config("dissolve requires at least one grouping column"));
        }
        Ok(Self { group_by })
    }

    pub fn group_by(&self) -> &[String] {
        &self.group_by
    }

    /// Dissolve `source` into one feature per distinct group key.
    ///
    /// A feature missing a grouping column is rejected on its own; the
    /// remaining features are still grouped.
    pub fn dissolve(&self, source: &FeatureSource) -> Result<DissolveOutput> {
        let mut order: Vec<Vec<String>> = Vec::new();
        let mut groups: HashMap<Vec<String>, Group<'_>> = HashMap::new();
        let mut rejected = Vec::new();

        for (index, feature) in source.iter().enumerate() {
            let key = match self
                .group_by
                .iter()
                .map(|col| feature.require(col, &self.group_by).map(|v| v.canonical()))
                .collect::<Result<Vec<String>>>()
            {
                Ok(key) => key,
                Err(e) => {
                    let key = feature.describe(&self.group_by);
                    warn!(feature = %key, error = %e, "Feature has no group key");
                    rejected.push(RejectedFeature {
                        index,
                        key,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Group {
                        members: Vec::new(),
                    }
                })
                .members
                .push(feature);
        }

        let mut features = Vec::with_capacity(order.len());
        let mut dropped = Vec::new();

        for key in &order {
            let group = &groups[key];
            let first = group.members[0];
            let description = first.describe(&self.group_by);

            let valid: Vec<&MultiPolygon<f64>> = group
                .members
                .iter()
                .filter_map(|f| f.valid_geometry().ok())
                .collect();

            if valid.is_empty() {
                warn!(
                    group = %description,
                    members = group.members.len(),
                    "Dropping group with no valid geometry"
                );
                dropped.push(DroppedGroup {
                    key: description,
                    members: group.members.len(),
                });
                continue;
            }
            if valid.len() < group.members.len() {
                debug!(
                    group = %description,
                    skipped = group.members.len() - valid.len(),
                    "Ignoring invalid member geometries"
                );
            }

            let geometry = union_all(&valid, &description);
            features.push(Feature::new(Some(geometry), shared_attributes(&group.members)));
        }

        info!(
            input = source.len(),
            output = features.len(),
            dropped = dropped.len(),
            rejected = rejected.len(),
            group_by = ?self.group_by,
            "Dissolved features"
        );

        Ok(DissolveOutput {
            group_by: self.group_by.clone(),
            features: FeatureSource::new(features),
            dropped,
            rejected,
        })
    }
}

/// Attributes whose value is identical across every member.
fn shared_attributes(members: &[&Feature]) -> Attributes {
    let first = members[0];
    first
        .attributes
        .iter()
        .filter(|(name, value)| {
            members[1..].iter().all(|m| {
                m.attributes
                    .get(*name)
                    .map(|v| v.canonical() == value.canonical())
                    .unwrap_or(false)
            })
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Union of all geometries in a group.
///
/// If the boolean-ops engine fails on degenerate input the member polygons
/// are kept side by side, which covers the same point set.
fn union_all(geometries: &[&MultiPolygon<f64>], group: &str) -> MultiPolygon<f64> {
    if geometries.len() == 1 {
        return geometries[0].clone();
    }

    let result = catch_unwind(AssertUnwindSafe(|| {
        geometries[1..]
            .iter()
            .fold(geometries[0].clone(), |acc, g| acc.union(*g))
    }));

    match result {
        Ok(union) if check_geometry(&union).is_ok() => union,
        _ => {
            warn!(group = %group, "Polygon union failed, keeping member polygons unmerged");
            MultiPolygon::new(
                geometries
                    .iter()
                    .flat_map(|g| g.0.iter().cloned())
                    .collect(),
            )
        }
    }
}

/// Content-addressed on-disk cache of dissolve outputs.
#[derive(Debug, Clone)]
pub struct DissolveCache {
    dir: PathBuf,
}

impl DissolveCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Deterministic key over the grouping definition and the input features.
    pub fn cache_key(group_by: &[String], source: &FeatureSource) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(group_by)?);
        hasher.update(b"\n");
        for feature in source.iter() {
            hasher.update(serde_json::to_vec(feature)?);
            hasher.update(b"\n");
        }
        let digest = format!("{:x}", hasher.finalize());
        Ok(digest[..16].to_string())
    }

    /// Path of the artifact for a given key.
    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("dissolve-{}.json", key))
    }

    /// Load a cached output if present.
    pub fn load(&self, key: &str) -> Result<Option<DissolveOutput>> {
        let path = self.artifact_path(key);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let output: DissolveOutput = serde_json::from_slice(&bytes)?;
        Ok(Some(output))
    }

    /// Store an output, writing to a temporary file first so readers never
    /// observe a partial artifact.
    pub fn store(&self, key: &str, output: &DissolveOutput) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.artifact_path(key);
        let tmp = self.dir.join(format!(".dissolve-{}.json.tmp", key));
        std::fs::write(&tmp, serde_json::to_vec(output)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Dissolve through the cache: reuse an existing artifact or compute and store.
    pub fn dissolve(&self, dissolver: &Dissolver, source: &FeatureSource) -> Result<DissolveOutput> {
        let key = Self::cache_key(dissolver.group_by(), source)?;

        if let Some(output) = self.load(&key)? {
            info!(
                key = %key,
                features = output.features.len(),
                "Reusing cached dissolve output"
            );
            return Ok(output);
        }

        let output = dissolver.dissolve(source)?;
        let path = self.store(&key, &output)?;
        info!(key = %key, path = %path.display(), "Stored dissolve output");
        Ok(output)
    }
}
