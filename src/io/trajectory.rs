//! Trajectory export: the full frame history as line-oriented text, one
//! pose per line (`timestamp tx ty tz qx qy qz qw`, TUM convention).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::geometry::SE3;
use crate::window::FrameHistory;

/// Which pose each line carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoseConvention {
    /// `cam_to_world`: the globally consistent trajectory.
    #[default]
    CamToWorld,
    /// `cam_to_ref`: pose relative to the frame's tracking reference,
    /// unaffected by later window optimization.
    CamToTrackingRef,
}

/// Export options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExportOptions {
    pub keyframes_only: bool,
    pub convention: PoseConvention,
}

/// One exported line.
#[derive(Debug, Clone)]
pub struct TrajectoryEntry {
    pub timestamp_ns: u64,
    pub pose: SE3,
    pub is_keyframe: bool,
}

/// Collect the ordered (timestamp, pose) list for the full history.
pub fn collect(history: &FrameHistory, options: &ExportOptions) -> Vec<TrajectoryEntry> {
    history
        .iter()
        .filter(|shell| !options.keyframes_only || shell.is_keyframe())
        .map(|shell| TrajectoryEntry {
            timestamp_ns: shell.timestamp_ns,
            pose: match options.convention {
                PoseConvention::CamToWorld => shell.cam_to_world.clone(),
                PoseConvention::CamToTrackingRef => shell.cam_to_ref.clone(),
            },
            is_keyframe: shell.is_keyframe(),
        })
        .collect()
}

/// Write entries in TUM format to any writer.
pub fn write_entries<W: Write>(entries: &[TrajectoryEntry], mut writer: W) -> Result<()> {
    for entry in entries {
        let t = entry.pose.translation;
        let q = entry.pose.rotation;
        writeln!(
            writer,
            "{:.9} {} {} {} {} {} {} {}",
            entry.timestamp_ns as f64 / 1e9,
            t.x,
            t.y,
            t.z,
            q.i,
            q.j,
            q.k,
            q.w,
        )?;
    }
    Ok(())
}

/// Export the history straight to a file.
pub fn write_file<P: AsRef<Path>>(
    history: &FrameHistory,
    options: &ExportOptions,
    path: P,
) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)
        .with_context(|| format!("creating trajectory file {}", path.display()))?;
    write_entries(&collect(history, options), BufWriter::new(file))
}
