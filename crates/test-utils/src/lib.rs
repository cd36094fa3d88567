//! Fixtures and helpers for habitat-raster tests and benches.
//!
//! Kept free of a `raster-pipeline` dependency: grids are [`GridSpec`]s,
//! features are plain `geo` geometries, and masks are `Vec<bool>` / `Vec<f64>`
//! bands. Tests convert them into pipeline types themselves.
//!
//! ```ignore
//! use test_utils::fixtures::grid::UNIT_4X4;
//! use test_utils::{assert_coords_eq, rect};
//! ```

pub mod fixtures;
pub mod generators;
pub mod paths;

pub use fixtures::grid::GridSpec;
pub use generators::*;
pub use paths::*;

/// Resolve a sample file via [`find_test_file`], or skip the calling test.
///
/// ```ignore
/// let grid = require_test_file!("sample_grid.yaml");
/// ```
#[macro_export]
macro_rules! require_test_file {
    ($name:expr) => {{
        match $crate::find_test_file($name) {
            Some(path) => path,
            None => {
                eprintln!(
                    "SKIPPED: Test file '{}' not found. Set TEST_DATA_DIR to the sample data.",
                    $name
                );
                return;
            }
        }
    }};
}

/// Compare two coordinate vectors element-wise within `eps`.
///
/// Lengths must match; the message names the first differing position.
#[macro_export]
macro_rules! assert_coords_eq {
    ($actual:expr, $expected:expr, $eps:expr) => {{
        let actual: &[f64] = &$actual;
        let expected: &[f64] = &$expected;
        let eps: f64 = $eps;
        assert_eq!(
            actual.len(),
            expected.len(),
            "coordinate vectors differ in length"
        );
        for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
            assert!(
                (a - e).abs() <= eps,
                "coordinate {} differs: {} vs {} (eps {})",
                i,
                a,
                e,
                eps
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_coords_within_tolerance() {
        assert_coords_eq!(vec![0.5, 1.5000001], [0.5, 1.5], 1e-6);
    }

    #[test]
    #[should_panic(expected = "coordinate 1 differs")]
    fn test_coords_outside_tolerance() {
        assert_coords_eq!(vec![0.5, 1.6], [0.5, 1.5], 1e-6);
    }

    #[test]
    #[should_panic(expected = "differ in length")]
    fn test_coords_length_mismatch() {
        assert_coords_eq!(vec![0.5], [0.5, 1.5], 1e-6);
    }
}
