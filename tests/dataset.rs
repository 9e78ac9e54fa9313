use chrono::{DateTime, TimeZone, Utc};
use lidarset::{Column, Dataset, Diff, Error, Frame, Meta, PointTable};

fn ts(sec: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + sec, 0).unwrap()
}

fn frame(offset: f32, sec: i64) -> Frame {
    let table = PointTable::new(vec![
        ("x".to_string(), Column::Float32(vec![1.0 + offset, 2.0 + offset])),
        ("y".to_string(), Column::Float32(vec![0.0, 1.0])),
        ("z".to_string(), Column::Float32(vec![offset, offset])),
        ("original_id".to_string(), Column::UInt32(vec![0, 1])),
    ])
    .unwrap();
    Frame::new(table, ts(sec), "").unwrap()
}

fn dataset(offsets: &[(f32, i64)]) -> Dataset {
    Dataset::from_frames(offsets.iter().map(|(o, s)| frame(*o, *s)).collect()).unwrap()
}

#[test]
fn slices_materialize_the_same_frames() {
    let ds = dataset(&[(0.0, 0), (1.0, 1), (2.0, 2), (3.0, 3)]);
    for a in 0..=ds.len() {
        for b in a..=ds.len() {
            let sub = ds.slice(a..b).unwrap();
            assert_eq!(sub.len(), b - a);
            for i in 0..sub.len() {
                assert_eq!(sub.get(i).unwrap(), ds.get(a + i).unwrap());
            }
        }
    }
    assert!(matches!(ds.slice(2..5), Err(Error::SliceOutOfRange { .. })));
    assert!(matches!(ds.get(4), Err(Error::OutOfRange { index: 4, len: 4 })));
}

#[test]
fn extend_appends_partitions_and_records_meta() {
    let mut a = dataset(&[(0.0, 0), (1.0, 1)]);
    let mut b = dataset(&[(2.0, 2), (3.0, 3)]);
    b = Dataset::new(
        b.partitions().to_vec(),
        b.timestamps().to_vec(),
        Meta::new("second.bag").with_topic("/points"),
    )
    .unwrap();

    a.extend(&b).unwrap();
    assert_eq!(a.len(), 4);
    assert_eq!(&a.timestamps()[..2], &[ts(0), ts(1)]);
    assert_eq!(&a.timestamps()[2..], b.timestamps());
    assert_eq!(a.meta().extended, vec![b.meta().clone()]);
    assert_eq!(a.meta().orig_file, "from frames list");

    a.extend(&b).unwrap();
    assert_eq!(a.meta().extended.len(), 2);
}

#[test]
fn mismatched_lengths_are_rejected() {
    let ds = dataset(&[(0.0, 0), (1.0, 1)]);
    assert!(matches!(
        Dataset::new(ds.partitions().to_vec(), vec![ts(0)], Meta::default()),
        Err(Error::LengthMismatch { timestamps: 1, partitions: 2 })
    ));
}

#[test]
fn non_monotonic_timestamps_only_warn() {
    let ds = dataset(&[(0.0, 5), (1.0, 1)]);
    assert_eq!(ds.len(), 2);
    assert!(!ds.is_monotonic());
}

#[test]
fn time_queries() {
    let ds = dataset(&[(0.0, 0), (1.0, 10), (2.0, 20), (3.0, 30)]);
    assert_eq!(ds.duration().unwrap().num_seconds(), 30);
    assert_eq!(ds.nearest_index(ts(12)).unwrap(), 1);
    // exact tie goes to the earlier frame
    assert_eq!(ds.nearest_index(ts(15)).unwrap(), 1);

    let between = ds.frames_between(ts(9), ts(21)).unwrap();
    assert_eq!(between.timestamps(), &[ts(10), ts(20)]);

    assert!(matches!(ds.frames_between(ts(20), ts(10)), Err(Error::TimeOrder)));
    assert!(matches!(
        ds.frames_between(ts(0), ts(40)),
        Err(Error::TimeOutOfRange { .. })
    ));
}

#[test]
fn iteration_restarts_and_stops_at_len() {
    let ds = dataset(&[(0.0, 0), (1.0, 1), (2.0, 2)]);
    let first: Vec<Frame> = ds.iter().collect::<Result<_, _>>().unwrap();
    let second: Vec<Frame> = (&ds).into_iter().collect::<Result<_, _>>().unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    assert_eq!(ds.iter().len(), 3);
}

#[test]
fn map_is_lazy_and_apply_keeps_order() {
    let ds = dataset(&[(0.0, 0), (1.0, 1), (2.0, 2)]);
    let mapped = ds.map(|mut f| {
        f.diff(&Diff::Origin)?;
        Ok(f)
    });
    assert_eq!(mapped.len(), 3);
    assert_eq!(mapped.timestamps(), ds.timestamps());
    assert!(mapped.get(2).unwrap().data().has_column("distance to origin"));
    assert!(!ds.get(2).unwrap().data().has_column("distance to origin"));

    let first_x = ds
        .apply(|f| f.data().require("x").map(|c| c.get_f64(0)).unwrap_or(f64::NAN))
        .unwrap();
    assert_eq!(first_x, vec![1.0, 2.0, 3.0]);

    let bbox = ds.bounding_box().unwrap().unwrap();
    assert_eq!(bbox.min, [1.0, 0.0, 0.0]);
    assert_eq!(bbox.max, [4.0, 1.0, 2.0]);
}
