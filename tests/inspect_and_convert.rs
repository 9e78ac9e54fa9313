mod common;

use assert_cmd::Command;
use common::{TOPIC, write_cloud_bag};
use lidarset::{BagReadOptions, Dataset};
use predicates::prelude::*;

#[test]
fn inspect_lists_topics() {
    let dir = tempfile::tempdir().unwrap();
    let bag = write_cloud_bag(dir.path(), "drive.bag", 2);

    Command::cargo_bin("lidarset")
        .unwrap()
        .arg("inspect")
        .arg(&bag)
        .assert()
        .success()
        .stdout(predicate::str::contains("Topic"))
        .stdout(predicate::str::contains(TOPIC))
        .stdout(predicate::str::contains("sensor_msgs/PointCloud2"));
}

#[test]
fn convert_writes_numbered_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let bag = write_cloud_bag(dir.path(), "drive.bag", 5);
    let out = dir.path().join("out");

    Command::cargo_bin("lidarset")
        .unwrap()
        .env("LIDARSET_MAX_CHUNK", "2")
        .args(["convert", bag.to_str().unwrap(), "-t", TOPIC, "-d", out.to_str().unwrap()])
        .assert()
        .success();

    let target = out.join("drive_lidarset");
    for chunk in ["0", "1", "2"] {
        assert!(target.join(chunk).join("meta.json").is_file(), "chunk {chunk}");
    }
    assert!(!target.join("3").exists());

    let converted = Dataset::from_file(&target, &BagReadOptions::default()).unwrap();
    let direct = Dataset::from_file(&bag, &BagReadOptions::new(TOPIC)).unwrap();
    assert_eq!(converted.len(), 5);
    assert_eq!(converted.timestamps(), direct.timestamps());
    for i in 0..5 {
        assert_eq!(converted.get(i).unwrap().data(), direct.get(i).unwrap().data());
    }
}

#[test]
fn convert_csv_writes_one_file_per_frame() {
    let dir = tempfile::tempdir().unwrap();
    write_cloud_bag(dir.path(), "a.bag", 3);
    write_cloud_bag(dir.path(), "b.bag", 1);

    Command::cargo_bin("lidarset")
        .unwrap()
        .current_dir(dir.path())
        .args(["convert", ".", "-o", "csv", "-s", "0", "-e", "1", "--keep-zeros"])
        .assert()
        .success();

    let a = dir.path().join("a_lidarset").join("a_0.csv");
    let b = dir.path().join("b_lidarset").join("b_0.csv");
    assert!(a.is_file());
    assert!(b.is_file());
    assert!(!dir.path().join("a_lidarset").join("a_1.csv").exists());

    let text = std::fs::read_to_string(a).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("x,y,z,intensity"));
    // header plus four points, origin kept
    assert_eq!(text.lines().count(), 5);
}

#[test]
fn convert_rejects_frames_past_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let bag = write_cloud_bag(dir.path(), "short.bag", 2);

    Command::cargo_bin("lidarset")
        .unwrap()
        .current_dir(dir.path())
        .args(["convert", bag.to_str().unwrap(), "-e", "5"])
        .assert()
        .failure();
}
