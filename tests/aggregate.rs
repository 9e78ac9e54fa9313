mod common;

use common::{TOPIC, write_cloud_bag};
use lidarset::{AggOp, AggSpec, Aggregation, BagReadOptions, Dataset, Depth, Error};

fn column(table: &lidarset::PointTable, name: &str) -> Vec<f64> {
    table.require(name).unwrap().to_f64_vec()
}

#[test]
fn point_min_returns_the_lower_frame() {
    let dir = tempfile::tempdir().unwrap();
    let bag = write_cloud_bag(dir.path(), "two.bag", 2);
    let ds = Dataset::from_file(&bag, &BagReadOptions::new(TOPIC)).unwrap();
    let first = ds.get(0).unwrap();

    let agg = ds.aggregate(AggOp::Min, Depth::Point).unwrap();
    let table = agg.table().unwrap();
    for name in ["x", "y", "z", "intensity"] {
        assert_eq!(
            column(table, &format!("{name} min")),
            first.data().require(name).unwrap().to_f64_vec()
        );
    }
    assert_eq!(column(table, "N"), vec![2.0, 2.0, 2.0]);
    assert_eq!(column(table, "original_id"), vec![0.0, 2.0, 3.0]);
}

#[test]
fn dataset_depth_collapses_point_depth() {
    let dir = tempfile::tempdir().unwrap();
    let bag = write_cloud_bag(dir.path(), "three.bag", 3);
    let ds = Dataset::from_file(&bag, &BagReadOptions::new(TOPIC)).unwrap();

    for op in [AggOp::Min, AggOp::Max, AggOp::Mean, AggOp::Sum] {
        let points = ds.aggregate(op, Depth::Point).unwrap();
        let whole = ds.aggregate(op, Depth::Dataset).unwrap();
        for name in ["x", "y", "z", "intensity"] {
            let label = format!("{name} {op}");
            let per_point = column(points.table().unwrap(), &label);
            let expected = match op {
                AggOp::Min => per_point.iter().copied().fold(f64::INFINITY, f64::min),
                AggOp::Max => per_point.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                AggOp::Mean => per_point.iter().sum::<f64>() / per_point.len() as f64,
                _ => per_point.iter().sum::<f64>(),
            };
            let got = whole.value(&label).unwrap();
            assert!((got - expected).abs() < 1e-9, "{label}: {got} != {expected}");
        }
    }

    // x of points 0, 2, 3 over offsets 0, 1, 2
    assert_eq!(ds.min(Depth::Dataset).unwrap().value("x min"), Some(1.0));
    assert_eq!(ds.max(Depth::Dataset).unwrap().value("x max"), Some(9.0));
}

#[test]
fn frame_depth_has_one_row_per_frame() {
    let dir = tempfile::tempdir().unwrap();
    let bag = write_cloud_bag(dir.path(), "frames.bag", 2);
    let ds = Dataset::from_file(&bag, &BagReadOptions::new(TOPIC)).unwrap();

    let Aggregation::Frame { table, timestamps } = ds.mean(Depth::Frame).unwrap() else {
        panic!("expected a frame aggregation");
    };
    assert_eq!(timestamps, ds.timestamps());
    assert_eq!(column(&table, "x mean"), vec![4.0, 5.0]);
    assert!(!table.has_column("original_id mean"));
}

#[test]
fn point_depth_needs_original_id() {
    let dir = tempfile::tempdir().unwrap();
    let bag = write_cloud_bag(dir.path(), "zeros.bag", 2);
    let ds = Dataset::from_file(&bag, &BagReadOptions::new(TOPIC).keep_zeros(true)).unwrap();

    assert!(matches!(
        ds.aggregate(AggOp::Min, Depth::Point),
        Err(Error::MissingOriginalId(_))
    ));
    // without ids the dataset depth runs over every row, zeros included
    let whole = ds.aggregate(AggSpec::Many(vec![AggOp::Min, AggOp::Count]), Depth::Dataset).unwrap();
    assert_eq!(whole.value("x min"), Some(0.0));
    assert_eq!(whole.value("x count"), Some(8.0));
}

#[test]
fn per_column_operations() {
    let dir = tempfile::tempdir().unwrap();
    let bag = write_cloud_bag(dir.path(), "cols.bag", 2);
    let ds = Dataset::from_file(&bag, &BagReadOptions::new(TOPIC)).unwrap();

    let spec = AggSpec::PerColumn(vec![
        ("x".to_string(), vec![AggOp::Max]),
        ("intensity".to_string(), vec![AggOp::Mean, AggOp::Std]),
    ]);
    let table = ds.aggregate(spec, Depth::Point).unwrap();
    let table = table.table().unwrap();
    assert_eq!(column(table, "x max"), vec![2.0, 5.0, 8.0]);
    assert_eq!(column(table, "intensity mean"), vec![10.5, 20.5, 30.5]);
    let std = column(table, "intensity std");
    assert!((std[0] - 0.5f64.sqrt()).abs() < 1e-12);
    assert!(!table.has_column("y max"));

    assert!(matches!(
        ds.aggregate(
            AggSpec::PerColumn(vec![("missing".to_string(), vec![AggOp::Min])]),
            Depth::Point
        ),
        Err(Error::UnknownColumn { .. })
    ));
}
