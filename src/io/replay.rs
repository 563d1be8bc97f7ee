//! CSV loaders for offline replay: frame timestamp indexes and raw IMU
//! streams in the EuRoC column layout.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use csv::ReaderBuilder;
use nalgebra::Vector3;
use serde::Deserialize;

use crate::imu::ImuSample;

/// One entry of a frame index file (`timestamp [ns], filename`).
#[derive(Debug, Clone)]
pub struct FrameEntry {
    pub timestamp_ns: u64,
    pub filename: String,
}

#[derive(Debug, Deserialize)]
struct FrameRecord {
    timestamp_ns: u64,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct ImuRecord {
    timestamp_ns: u64,
    gyro_x: f64,
    gyro_y: f64,
    gyro_z: f64,
    accel_x: f64,
    accel_y: f64,
    accel_z: f64,
}

/// Load a frame index CSV (`#timestamp [ns], filename`).
pub fn load_frame_index<P: AsRef<Path>>(path: P) -> Result<Vec<FrameEntry>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("opening frame index {}", path.display()))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut entries = Vec::new();
    for record in reader.deserialize() {
        let record: FrameRecord =
            record.with_context(|| format!("parsing frame index {}", path.display()))?;
        entries.push(FrameEntry {
            timestamp_ns: record.timestamp_ns,
            filename: record.filename,
        });
    }
    Ok(entries)
}

/// Load an IMU CSV (`#timestamp [ns], gyro xyz [rad/s], accel xyz [m/s^2]`).
pub fn load_imu_csv<P: AsRef<Path>>(path: P) -> Result<Vec<ImuSample>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening IMU data {}", path.display()))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut samples = Vec::new();
    for record in reader.deserialize() {
        let record: ImuRecord =
            record.with_context(|| format!("parsing IMU data {}", path.display()))?;
        samples.push(ImuSample {
            timestamp_s: record.timestamp_ns as f64 / 1e9,
            gyro: Vector3::new(record.gyro_x, record.gyro_y, record.gyro_z),
            accel: Vector3::new(record.accel_x, record.accel_y, record.accel_z),
        });
    }
    Ok(samples)
}

/// Samples from `samples` with timestamps inside `(from_ns, to_ns]`,
/// assuming the input is time-ordered.
pub fn samples_in_interval(samples: &[ImuSample], from_ns: u64, to_ns: u64) -> &[ImuSample] {
    let from_s = from_ns as f64 / 1e9;
    let to_s = to_ns as f64 / 1e9;
    let start = samples.partition_point(|s| s.timestamp_s <= from_s);
    let end = samples.partition_point(|s| s.timestamp_s <= to_s);
    &samples[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("rust_dsvio_test_{name}"));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_frame_index() {
        let path = temp_file(
            "frames.csv",
            "timestamp_ns,filename\n1403636579763555584,1403636579763555584.png\n1403636579813555456,next.png\n",
        );
        let entries = load_frame_index(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp_ns, 1403636579763555584);
        assert_eq!(entries[1].filename, "next.png");
    }

    #[test]
    fn test_load_imu_csv() {
        let path = temp_file(
            "imu.csv",
            "timestamp_ns,gyro_x,gyro_y,gyro_z,accel_x,accel_y,accel_z\n\
             1000000000,0.01,-0.02,0.03,0.1,9.8,-0.1\n",
        );
        let samples = load_imu_csv(&path).unwrap();
        assert_eq!(samples.len(), 1);
        assert!((samples[0].timestamp_s - 1.0).abs() < 1e-9);
        assert!((samples[0].accel.y - 9.8).abs() < 1e-12);
    }

    #[test]
    fn test_samples_in_interval() {
        let samples: Vec<ImuSample> = (0..10)
            .map(|i| ImuSample {
                timestamp_s: i as f64 * 0.1,
                gyro: Vector3::zeros(),
                accel: Vector3::zeros(),
            })
            .collect();
        let slice = samples_in_interval(&samples, 200_000_000, 500_000_000);
        assert_eq!(slice.len(), 3);
        assert!((slice[0].timestamp_s - 0.3).abs() < 1e-12);
    }
}
