//! Per-feature file output: path planning, collisions and the catalog.

mod common;

use common::{cells, grid_from, rank_config, taxon_feature};
use raster_pipeline::{
    AssemblerStrategy, FailureStage, FeatureSource, PipelineError, PipelineOutput, RasterPipeline,
    RowStatus, ZarrWriter, CATALOG_FILE,
};
use test_utils::fixtures::grid::UNIT_4X4;
use test_utils::fixtures::taxa::{GANG_GANG, KOALA, LIKELY, MAYBE, PLATYPUS};

fn files_pipeline(dir: &std::path::Path) -> RasterPipeline {
    let mut config = rank_config(dir);
    config.assembler = AssemblerStrategy::Files;
    RasterPipeline::new(config).unwrap()
}

#[test]
fn test_one_raster_per_feature() {
    let dir = tempfile::tempdir().unwrap();
    let grid = grid_from(UNIT_4X4);
    let source = FeatureSource::new(vec![
        taxon_feature(Some(cells(UNIT_4X4, 1, 2, 1, 2)), KOALA, MAYBE),
        taxon_feature(Some(cells(UNIT_4X4, 2, 3, 2, 3)), PLATYPUS, LIKELY),
        taxon_feature(Some(cells(UNIT_4X4, 0, 1, 0, 4)), GANG_GANG, LIKELY),
    ]);

    let run = files_pipeline(dir.path()).run(&grid, source).unwrap();
    let PipelineOutput::Files(assembly) = run.output else {
        panic!("expected file output");
    };
    assert_eq!(assembly.written, 3);
    assert_eq!(assembly.failed, 0);

    let koala = dir.path().join("mammals/Phascolarctos_cinereus_MAYBE.zarr");
    let platypus = dir.path().join("mammals/Ornithorhynchus_anatinus_LIKELY.zarr");
    let gang_gang = dir.path().join("birds/Callocephalon_fimbriatum_LIKELY.zarr");

    let (tile, metadata) = ZarrWriter::read_raster(&koala).unwrap();
    assert_eq!(tile.get(1, 1), Some(1));
    assert_eq!(tile.count_non_background(), 1);
    assert_eq!(metadata.nodata, 255);
    assert_eq!(metadata.crs, "EPSG:3577");
    assert_eq!(
        metadata.attributes.get("SCIENTIFIC_NAME").and_then(|v| v.as_str()),
        Some("Phascolarctos cinereus")
    );

    let (tile, _) = ZarrWriter::read_raster(&platypus).unwrap();
    assert_eq!(tile.get(2, 2), Some(2));

    let (tile, _) = ZarrWriter::read_raster(&gang_gang).unwrap();
    assert_eq!(tile.count_value(2), 4);

    let csv = std::fs::read_to_string(dir.path().join(CATALOG_FILE)).unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].ends_with("path,status"));
    assert!(lines[1].contains("mammals/Phascolarctos_cinereus_MAYBE.zarr"));
    assert!(lines[1].ends_with("written"));
    assert!(lines[3].contains("birds/Callocephalon_fimbriatum_LIKELY.zarr"));
}

#[test]
fn test_collision_aborts_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let grid = grid_from(UNIT_4X4);

    // Same name and rank, distinct taxon ids.
    let duplicate = (9999, KOALA.1, KOALA.2);
    let source = FeatureSource::new(vec![
        taxon_feature(Some(cells(UNIT_4X4, 1, 2, 1, 2)), KOALA, MAYBE),
        taxon_feature(Some(cells(UNIT_4X4, 2, 3, 2, 3)), PLATYPUS, LIKELY),
        taxon_feature(Some(cells(UNIT_4X4, 0, 1, 0, 1)), duplicate, MAYBE),
    ]);

    let err = files_pipeline(dir.path()).run(&grid, source).unwrap_err();
    match err {
        PipelineError::PathCollision { path, .. } => {
            assert_eq!(path, std::path::PathBuf::from("mammals/Phascolarctos_cinereus_MAYBE.zarr"));
        }
        other => panic!("expected PathCollision, got {other}"),
    }

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0, "nothing may be written");
}

#[test]
fn test_naming_failure_marks_row() {
    let dir = tempfile::tempdir().unwrap();
    let grid = grid_from(UNIT_4X4);

    let mut nameless = taxon_feature(Some(cells(UNIT_4X4, 3, 4, 3, 4)), PLATYPUS, LIKELY);
    nameless.attributes.remove("SCIENTIFIC_NAME");
    let source = FeatureSource::new(vec![
        taxon_feature(Some(cells(UNIT_4X4, 1, 2, 1, 2)), KOALA, MAYBE),
        nameless,
    ]);

    let run = files_pipeline(dir.path()).run(&grid, source).unwrap();
    let PipelineOutput::Files(assembly) = run.output else {
        panic!("expected file output");
    };

    assert_eq!(assembly.written, 1);
    assert_eq!(assembly.failed, 1);
    let row = &assembly.catalog.rows[1];
    assert!(row.path.is_none());
    assert!(matches!(&row.status, RowStatus::Failed(msg) if msg.contains("SCIENTIFIC_NAME")));
    assert_eq!(run.report.failures.len(), 1);
}

// =============================================================================
// Write failures
// =============================================================================

#[test]
fn test_blocked_category_directory_fails_only_its_rows() {
    let dir = tempfile::tempdir().unwrap();
    let grid = grid_from(UNIT_4X4);
    // A plain file where the birds directory should go.
    std::fs::write(dir.path().join("birds"), b"").unwrap();

    let source = FeatureSource::new(vec![
        taxon_feature(Some(cells(UNIT_4X4, 1, 2, 1, 2)), KOALA, MAYBE),
        taxon_feature(Some(cells(UNIT_4X4, 0, 1, 0, 4)), GANG_GANG, LIKELY),
        taxon_feature(Some(cells(UNIT_4X4, 2, 3, 2, 3)), PLATYPUS, LIKELY),
    ]);

    let run = files_pipeline(dir.path()).run(&grid, source).unwrap();
    let PipelineOutput::Files(assembly) = run.output else {
        panic!("expected file output");
    };

    assert_eq!(assembly.written, 2);
    assert_eq!(assembly.failed, 1);
    assert!(matches!(
        &assembly.catalog.rows[1].status,
        RowStatus::Failed(msg) if msg.contains("cannot create directory")
    ));

    let (tile, _) =
        ZarrWriter::read_raster(&dir.path().join("mammals/Phascolarctos_cinereus_MAYBE.zarr")).unwrap();
    assert_eq!(tile.get(1, 1), Some(1));
    assert!(dir.path().join("mammals/Ornithorhynchus_anatinus_LIKELY.zarr").exists());

    let csv = std::fs::read_to_string(dir.path().join(CATALOG_FILE)).unwrap();
    assert_eq!(csv.lines().count(), 4);
    assert!(csv.lines().nth(2).unwrap().contains("failed: cannot create directory"));

    let failures: Vec<_> = run.report.failures_at(FailureStage::Write).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
}

#[test]
fn test_raster_write_failure_spares_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let grid = grid_from(UNIT_4X4);
    // A plain file occupying one raster's target path.
    std::fs::create_dir_all(dir.path().join("mammals")).unwrap();
    std::fs::write(dir.path().join("mammals/Ornithorhynchus_anatinus_LIKELY.zarr"), b"").unwrap();

    let source = FeatureSource::new(vec![
        taxon_feature(Some(cells(UNIT_4X4, 1, 2, 1, 2)), KOALA, MAYBE),
        taxon_feature(Some(cells(UNIT_4X4, 2, 3, 2, 3)), PLATYPUS, LIKELY),
        taxon_feature(Some(cells(UNIT_4X4, 0, 1, 0, 4)), GANG_GANG, LIKELY),
    ]);

    let run = files_pipeline(dir.path()).run(&grid, source).unwrap();
    let PipelineOutput::Files(assembly) = run.output else {
        panic!("expected file output");
    };

    assert_eq!(assembly.written, 2);
    assert_eq!(assembly.failed, 1);
    assert_eq!(assembly.catalog.rows[0].status, RowStatus::Written);
    assert!(matches!(assembly.catalog.rows[1].status, RowStatus::Failed(_)));
    assert_eq!(assembly.catalog.rows[2].status, RowStatus::Written);
    assert!(ZarrWriter::read_raster(&dir.path().join("birds/Callocephalon_fimbriatum_LIKELY.zarr")).is_ok());
    assert!(dir.path().join(CATALOG_FILE).exists());
    assert_eq!(run.report.failures_at(FailureStage::Write).count(), 1);
}
