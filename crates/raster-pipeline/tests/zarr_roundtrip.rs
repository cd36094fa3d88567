//! Persisted stacks and rasters read back losslessly.

mod common;

use common::{cells, grid_from, rank_config, taxon_feature};
use raster_pipeline::{
    FeatureSource, PipelineOutput, RasterPipeline, ZarrCompression, ZarrConfig, ZarrWriter,
};
use test_utils::fixtures::grid::UNIT_100;
use test_utils::fixtures::taxa::{GANG_GANG, KOALA, LIKELY, MAYBE, PLATYPUS};

fn sample_source() -> FeatureSource {
    FeatureSource::new(vec![
        taxon_feature(Some(cells(UNIT_100, 10, 40, 10, 25)), KOALA, MAYBE),
        taxon_feature(Some(test_utils::circle(60.0, 30.0, 12.5, 48)), PLATYPUS, LIKELY),
        taxon_feature(
            Some(test_utils::rect_with_hole((5.0, 5.0, 45.0, 45.0), (15.0, 15.0, 35.0, 35.0))),
            GANG_GANG,
            LIKELY,
        ),
    ])
}

#[test]
fn test_stack_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let grid = grid_from(UNIT_100)
        .with_mask(test_utils::border_mask(100, 100, 2))
        .unwrap();

    let mut config = rank_config(dir.path());
    config.zarr.list_chunk_size = 256;
    let run = RasterPipeline::new(config).unwrap().run(&grid, sample_source()).unwrap();

    let (stack, path) = match run.output {
        PipelineOutput::Stack { stack, path } => (stack, path),
        PipelineOutput::Files(_) => panic!("expected stack output"),
    };
    assert!(stack.nnz() > 256, "coordinate lists should span several chunks");

    let restored = ZarrWriter::read_stack(&path).expect("Failed to read stack");
    assert_eq!(restored, stack);

    for i in 0..stack.len() {
        assert_eq!(restored.tile(i), stack.tile(i));
    }
}

#[test]
fn test_stack_roundtrip_uncompressed_without_mask() {
    let dir = tempfile::tempdir().unwrap();
    let grid = grid_from(UNIT_100);

    let mut config = rank_config(dir.path());
    config.zarr = ZarrConfig {
        compression: ZarrCompression::None,
        ..Default::default()
    };
    let run = RasterPipeline::new(config).unwrap().run(&grid, sample_source()).unwrap();

    let PipelineOutput::Stack { stack, path } = run.output else {
        panic!("expected stack output");
    };
    let restored = ZarrWriter::read_stack(&path).expect("Failed to read stack");
    assert!(restored.mask.is_none());
    assert_eq!(restored, stack);
}
