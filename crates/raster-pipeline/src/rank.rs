//! Presence-rank lookup: maps a feature's rank attribute to a burn value.

use std::fmt;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::feature::{AttributeValue, Feature};

/// Presence category of a species or community distribution polygon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PresenceRank {
    /// "May occur" within the polygon.
    Maybe,
    /// "Likely to occur" within the polygon.
    Likely,
}

impl PresenceRank {
    /// All ranks in code order.
    pub const ALL: [PresenceRank; 2] = [PresenceRank::Maybe, PresenceRank::Likely];

    /// Numeric rank code as found in the source attribute table.
    pub fn code(&self) -> i64 {
        match self {
            Self::Maybe => 1,
            Self::Likely => 2,
        }
    }

    /// Value written into raster cells covered by a polygon of this rank.
    pub fn burn_value(&self) -> u8 {
        match self {
            Self::Maybe => 1,
            Self::Likely => 2,
        }
    }

    /// Label used as the output filename suffix.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Maybe => "MAYBE",
            Self::Likely => "LIKELY",
        }
    }

    /// Resolve a rank from its numeric code.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    /// Resolve a rank from an attribute: numeric codes, numeric strings
    /// or the textual category names are accepted.
    pub fn from_attribute(value: &AttributeValue) -> Option<Self> {
        if let Some(code) = value.as_i64() {
            return Self::from_code(code);
        }

        let text = value.as_str()?.trim().to_lowercase();
        if let Ok(code) = text.parse::<i64>() {
            return Self::from_code(code);
        }
        match text.as_str() {
            "maybe" | "may occur" | "species or species habitat may occur within area" => {
                Some(Self::Maybe)
            }
            "likely" | "likely to occur" | "species or species habitat likely to occur within area" => {
                Some(Self::Likely)
            }
            _ => None,
        }
    }

    /// Resolve the rank of `feature` from `column`.
    ///
    /// A missing column or an unknown value is a hard error naming the feature.
    pub fn resolve(feature: &Feature, column: &str, key_columns: &[String]) -> Result<Self> {
        let value = feature.require(column, key_columns)?;
        Self::from_attribute(value).ok_or_else(|| {
            PipelineError::unknown_rank(value.to_string(), feature.describe(key_columns))
        })
    }
}

impl fmt::Display for PresenceRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// How burn values are derived from features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnMode {
    /// Every feature burns 1 (presence/absence masks).
    #[default]
    Presence,
    /// Burn the feature's presence rank value.
    Rank,
}

impl BurnMode {
    /// Parse from string (case-insensitive); `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "presence" => Some(Self::Presence),
            "rank" => Some(Self::Rank),
            _ => None,
        }
    }

    /// Parse from string, falling back to the default for unknown names.
    pub fn from_str(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            warn!(value = s, "Unknown burn mode, using presence");
            Self::default()
        })
    }

    /// Largest value this mode can burn.
    pub fn max_burn_value(&self) -> u8 {
        match self {
            Self::Presence => 1,
            Self::Rank => PresenceRank::ALL
                .iter()
                .map(|r| r.burn_value())
                .max()
                .unwrap_or(1),
        }
    }

    /// Check every burn value this mode can produce against the nodata sentinel.
    pub fn validate(&self, nodata: u8) -> Result<()> {
        let values: Vec<u8> = match self {
            Self::Presence => vec![1],
            Self::Rank => PresenceRank::ALL.iter().map(|r| r.burn_value()).collect(),
        };
        for value in values {
            if value == 0 {
                return Err(PipelineError::config("burn value 0 collides with background"));
            }
            if value == nodata {
                return Err(PipelineError::config(format!(
                    "burn value {} collides with nodata sentinel",
                    value
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for BurnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presence => write!(f, "presence"),
            Self::Rank => write!(f, "rank"),
        }
    }
}

/// A geometry paired with the value it burns.
#[derive(Debug, Clone, PartialEq)]
pub struct BurnSpec {
    pub geometry: MultiPolygon<f64>,
    pub burn_value: u8,
}

impl BurnSpec {
    pub fn new(geometry: MultiPolygon<f64>, burn_value: u8) -> Self {
        Self {
            geometry,
            burn_value,
        }
    }

    /// Derive the burn spec for a feature.
    ///
    /// Invalid geometry and rank lookup failures are reported as feature-scoped errors.
    pub fn from_feature(
        feature: &Feature,
        mode: BurnMode,
        rank_column: &str,
        key_columns: &[String],
    ) -> Result<Self> {
        let geometry = feature
            .valid_geometry()
            .map_err(|reason| PipelineError::invalid_geometry(feature.describe(key_columns), reason))?;

        let burn_value = match mode {
            BurnMode::Presence => 1,
            BurnMode::Rank => PresenceRank::resolve(feature, rank_column, key_columns)?.burn_value(),
        };

        Ok(Self::new(geometry.clone(), burn_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Attributes;
    use geo::polygon;

    fn feature_with_rank(rank: AttributeValue) -> Feature {
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        let mut attributes = Attributes::new();
        attributes.insert("TAXON_ID".to_string(), AttributeValue::Int(42));
        attributes.insert("PRESENCE_CATEGORY".to_string(), rank);
        Feature::new(Some(MultiPolygon::new(vec![square])), attributes)
    }

    #[test]
    fn test_rank_lookup() {
        assert_eq!(PresenceRank::from_code(1), Some(PresenceRank::Maybe));
        assert_eq!(PresenceRank::from_code(2), Some(PresenceRank::Likely));
        assert_eq!(PresenceRank::from_code(3), None);

        assert_eq!(
            PresenceRank::from_attribute(&AttributeValue::Text("Likely to occur".into())),
            Some(PresenceRank::Likely)
        );
        assert_eq!(
            PresenceRank::from_attribute(&AttributeValue::Text(" 1 ".into())),
            Some(PresenceRank::Maybe)
        );
        assert_eq!(
            PresenceRank::from_attribute(&AttributeValue::Float(2.0)),
            Some(PresenceRank::Likely)
        );
        assert_eq!(PresenceRank::from_attribute(&AttributeValue::Null), None);
    }

    #[test]
    fn test_labels() {
        assert_eq!(PresenceRank::Maybe.label(), "MAYBE");
        assert_eq!(PresenceRank::Likely.to_string(), "LIKELY");
    }

    #[test]
    fn test_unknown_rank_is_named_error() {
        let feature = feature_with_rank(AttributeValue::Int(9));
        let err = BurnSpec::from_feature(
            &feature,
            BurnMode::Rank,
            "PRESENCE_CATEGORY",
            &["TAXON_ID".to_string()],
        )
        .unwrap_err();

        match err {
            PipelineError::UnknownRank { value, feature } => {
                assert_eq!(value, "9");
                assert_eq!(feature, "TAXON_ID=42");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_presence_mode_ignores_rank() {
        let feature = feature_with_rank(AttributeValue::Int(9));
        let spec = BurnSpec::from_feature(&feature, BurnMode::Presence, "PRESENCE_CATEGORY", &[])
            .unwrap();
        assert_eq!(spec.burn_value, 1);
    }

    #[test]
    fn test_burn_mode_validation() {
        assert!(BurnMode::Rank.validate(255).is_ok());
        assert!(BurnMode::Rank.validate(2).is_err());
        assert!(BurnMode::Presence.validate(1).is_err());
        assert_eq!(BurnMode::Rank.max_burn_value(), 2);
    }
}
