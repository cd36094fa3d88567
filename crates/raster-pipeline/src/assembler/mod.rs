//! Result assembly strategies.

pub mod files;
pub mod stack;

pub use files::{CatalogRow, FileAssembler, FileAssembly, OutputCatalog, RowStatus, CATALOG_FILE};
pub use stack::{CoordinateVector, FeatureStack, StackAssembler, STACK_DIMS};
