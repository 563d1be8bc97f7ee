//! Window - the bounded container of active keyframes, points, and
//! residual edges.
//!
//! All mutation happens on the mapping side under a single lock (see
//! `system::SharedState`); the container itself is single-threaded. Frames,
//! points, and residuals are keyed by stable ids so removal never
//! invalidates unrelated references.
//!
//! Removal is transactional: taking out a frame removes every residual that
//! references it and every point it hosts in the same call, so a consistency
//! check passes at every public-method boundary.

use std::collections::HashMap;

use crate::geometry::SE3;

use super::frame::{AffineLight, Keyframe};
use super::point::{ActivePoint, Candidate, PointStatus};
use super::residual::{Residual, ResidualState};
use super::types::{KeyframeId, PointId, ResidualId};

/// Cached relative state between an ordered pair of active frames.
///
/// Recomputed whenever any active pose or affine parameter changes; read by
/// the tracer and the backend during linearization.
#[derive(Debug, Clone)]
pub struct FramePrecalc {
    /// Transform taking host-camera coordinates into target-camera
    /// coordinates.
    pub target_from_host: SE3,

    /// Translation distance between the two camera centers.
    pub distance: f64,

    /// Brightness transfer (scale, offset) from host to target.
    pub affine_scale: f64,
    pub affine_offset: f64,
}

/// The bounded active window.
#[derive(Debug)]
pub struct Window {
    capacity: usize,

    frames: HashMap<KeyframeId, Keyframe>,
    /// Insertion order, oldest first. The last entry is the current frame.
    order: Vec<KeyframeId>,

    /// Host lookup for activated points.
    point_hosts: HashMap<PointId, KeyframeId>,

    residuals: HashMap<ResidualId, Residual>,

    /// Relative-state cache for all ordered pairs of active frames.
    precalc: HashMap<(KeyframeId, KeyframeId), FramePrecalc>,

    next_keyframe_id: u64,
    next_point_id: u64,
    next_residual_id: u64,
}

impl Window {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 3, "window capacity must hold at least 3 frames");
        Self {
            capacity,
            frames: HashMap::new(),
            order: Vec::new(),
            point_hosts: HashMap::new(),
            residuals: HashMap::new(),
            precalc: HashMap::new(),
            next_keyframe_id: 0,
            next_point_id: 0,
            next_residual_id: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.order.len() >= self.capacity
    }

    pub fn next_keyframe_id(&self) -> KeyframeId {
        KeyframeId(self.next_keyframe_id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Frames
    // ─────────────────────────────────────────────────────────────────────

    /// Insert a promoted frame. The caller must have marginalized first if
    /// the window was full; exceeding capacity is a lifecycle bug.
    pub fn insert_frame(&mut self, frame: Keyframe) -> KeyframeId {
        assert!(
            self.order.len() < self.capacity,
            "window over capacity: marginalize before inserting"
        );
        assert_eq!(
            frame.id.0, self.next_keyframe_id,
            "keyframe ids must be assigned in sequence"
        );
        let id = frame.id;
        self.next_keyframe_id += 1;
        for pid in frame.points.keys() {
            self.point_hosts.insert(*pid, id);
        }
        self.frames.insert(id, frame);
        self.order.push(id);
        id
    }

    pub fn get(&self, id: KeyframeId) -> Option<&Keyframe> {
        self.frames.get(&id)
    }

    pub fn get_mut(&mut self, id: KeyframeId) -> Option<&mut Keyframe> {
        self.frames.get_mut(&id)
    }

    pub fn contains(&self, id: KeyframeId) -> bool {
        self.frames.contains_key(&id)
    }

    /// Active frames, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = &Keyframe> {
        self.order.iter().map(|id| &self.frames[id])
    }

    /// Frame ids, oldest first.
    pub fn order(&self) -> &[KeyframeId] {
        &self.order
    }

    /// The most recent keyframe (the "current" frame).
    pub fn newest(&self) -> Option<&Keyframe> {
        self.order.last().map(|id| &self.frames[id])
    }

    pub fn newest_id(&self) -> Option<KeyframeId> {
        self.order.last().copied()
    }

    /// Remove a frame and everything referencing it in one transaction:
    /// all residuals with either endpoint on it, and all points it hosts.
    /// Returns the removed frame and its points for prior bookkeeping.
    pub fn remove_frame(&mut self, id: KeyframeId) -> Option<(Keyframe, Vec<ActivePoint>)> {
        let pos = self.order.iter().position(|&f| f == id)?;
        self.order.remove(pos);

        // Residuals touching the frame, in the same transaction.
        let dead: Vec<ResidualId> = self
            .residuals
            .values()
            .filter(|r| r.references(id))
            .map(|r| r.id)
            .collect();
        for rid in dead {
            self.remove_residual(rid);
        }

        let mut frame = self.frames.remove(&id).expect("ordered frame must exist");
        let mut points = Vec::with_capacity(frame.points.len());
        for (pid, point) in frame.points.drain() {
            self.point_hosts.remove(&pid);
            points.push(point);
        }

        self.precalc.retain(|(a, b), _| *a != id && *b != id);
        Some((frame, points))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Points
    // ─────────────────────────────────────────────────────────────────────

    /// Activate a candidate into a point hosted on `host`.
    pub fn create_point(&mut self, host: KeyframeId, candidate: &Candidate) -> PointId {
        let id = PointId(self.next_point_id);
        self.next_point_id += 1;

        let created_at = self.newest_id().unwrap_or(host);
        let point = ActivePoint {
            id,
            host,
            u: candidate.u,
            v: candidate.v,
            idepth: candidate.estimated_idepth(),
            idepth_confidence: 0.0,
            status: PointStatus::Active,
            residuals: Vec::new(),
            created_at,
        };

        self.point_hosts.insert(id, host);
        self.frames
            .get_mut(&host)
            .expect("point host must be an active frame")
            .points
            .insert(id, point);
        id
    }

    pub fn point(&self, id: PointId) -> Option<&ActivePoint> {
        let host = self.point_hosts.get(&id)?;
        self.frames.get(host)?.points.get(&id)
    }

    pub fn point_mut(&mut self, id: PointId) -> Option<&mut ActivePoint> {
        let host = self.point_hosts.get(&id)?;
        self.frames.get_mut(host)?.points.get_mut(&id)
    }

    pub fn point_host(&self, id: PointId) -> Option<KeyframeId> {
        self.point_hosts.get(&id).copied()
    }

    /// All activated points across the window.
    pub fn points(&self) -> impl Iterator<Item = &ActivePoint> {
        self.order
            .iter()
            .flat_map(|id| self.frames[id].points.values())
    }

    pub fn num_points(&self) -> usize {
        self.point_hosts.len()
    }

    /// Remove a point and its residual edges in one transaction, recording
    /// the terminal status. Returns the point for prior bookkeeping.
    pub fn remove_point(&mut self, id: PointId, status: PointStatus) -> Option<ActivePoint> {
        let host = self.point_hosts.remove(&id)?;
        let mut point = self
            .frames
            .get_mut(&host)
            .expect("point host must be an active frame")
            .points
            .remove(&id)
            .expect("host lookup out of sync with frame points");

        for rid in point.residuals.drain(..) {
            self.residuals.remove(&rid);
        }
        point.status = status;
        Some(point)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Residuals
    // ─────────────────────────────────────────────────────────────────────

    /// Add an observation edge for `point` in `target`. Both endpoints must
    /// be active-window members.
    pub fn add_residual(&mut self, point: PointId, target: KeyframeId) -> ResidualId {
        let host = *self
            .point_hosts
            .get(&point)
            .expect("residual for unknown point");
        assert!(
            self.frames.contains_key(&target),
            "residual target must be an active frame"
        );
        assert_ne!(host, target, "residual endpoints must differ");

        let id = ResidualId(self.next_residual_id);
        self.next_residual_id += 1;

        self.residuals.insert(
            id,
            Residual {
                id,
                point,
                host,
                target,
                state: ResidualState::Active,
                energy: 0.0,
            },
        );
        self.frames
            .get_mut(&host)
            .expect("checked above")
            .points
            .get_mut(&point)
            .expect("checked above")
            .residuals
            .push(id);
        id
    }

    pub fn residual(&self, id: ResidualId) -> Option<&Residual> {
        self.residuals.get(&id)
    }

    pub fn residual_mut(&mut self, id: ResidualId) -> Option<&mut Residual> {
        self.residuals.get_mut(&id)
    }

    pub fn residuals(&self) -> impl Iterator<Item = &Residual> {
        self.residuals.values()
    }

    pub fn num_residuals(&self) -> usize {
        self.residuals.len()
    }

    /// Remove one residual edge and detach it from its point.
    pub fn remove_residual(&mut self, id: ResidualId) -> Option<Residual> {
        let residual = self.residuals.remove(&id)?;
        if let Some(frame) = self.frames.get_mut(&residual.host) {
            if let Some(point) = frame.points.get_mut(&residual.point) {
                point.residuals.retain(|&r| r != id);
            }
        }
        Some(residual)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Relative-state cache
    // ─────────────────────────────────────────────────────────────────────

    /// Recompute the relative-state cache for all ordered frame pairs.
    /// Must be called after any accepted or rolled-back pose change.
    pub fn set_precalc(&mut self) {
        self.precalc.clear();
        for &host in &self.order {
            for &target in &self.order {
                if host == target {
                    continue;
                }
                let h = &self.frames[&host];
                let t = &self.frames[&target];
                let target_from_host = t.cam_to_world.inverse().compose(&h.cam_to_world);
                let distance =
                    (h.cam_to_world.translation - t.cam_to_world.translation).norm();
                let (affine_scale, affine_offset) = AffineLight::host_to_target(
                    &h.affine,
                    h.image.exposure_ms,
                    &t.affine,
                    t.image.exposure_ms,
                );
                self.precalc.insert(
                    (host, target),
                    FramePrecalc {
                        target_from_host,
                        distance,
                        affine_scale,
                        affine_offset,
                    },
                );
            }
        }
    }

    pub fn precalc(&self, host: KeyframeId, target: KeyframeId) -> Option<&FramePrecalc> {
        self.precalc.get(&(host, target))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Consistency
    // ─────────────────────────────────────────────────────────────────────

    /// Verify the ownership-closure invariants; violations are lifecycle
    /// bugs, not runtime conditions.
    ///
    /// - the window is within capacity,
    /// - every point's host is an active frame and the host lookup agrees,
    /// - every residual's endpoints are active frames and its point exists,
    /// - every point's residual list matches the residual table.
    pub fn check_consistent(&self) -> Result<(), String> {
        if self.order.len() > self.capacity {
            return Err(format!(
                "window holds {} frames, capacity {}",
                self.order.len(),
                self.capacity
            ));
        }
        if self.order.len() != self.frames.len() {
            return Err("frame order and frame table out of sync".to_string());
        }

        for (pid, host) in &self.point_hosts {
            let frame = self
                .frames
                .get(host)
                .ok_or_else(|| format!("{pid} hosted on non-active {host}"))?;
            if !frame.points.contains_key(pid) {
                return Err(format!("{pid} missing from host {host}"));
            }
        }
        for frame in self.frames.values() {
            for (pid, point) in &frame.points {
                if self.point_hosts.get(pid) != Some(&frame.id) {
                    return Err(format!("{pid} host lookup disagrees with {}", frame.id));
                }
                for rid in &point.residuals {
                    if !self.residuals.contains_key(rid) {
                        return Err(format!("{pid} lists stale residual {rid}"));
                    }
                }
                if point.host != frame.id {
                    return Err(format!("{pid} records wrong host"));
                }
            }
        }

        for residual in self.residuals.values() {
            if !self.frames.contains_key(&residual.host) {
                return Err(format!("{} references removed host frame", residual.id));
            }
            if !self.frames.contains_key(&residual.target) {
                return Err(format!("{} references removed target frame", residual.id));
            }
            let point = self
                .point(residual.point)
                .ok_or_else(|| format!("{} references removed {}", residual.id, residual.point))?;
            if !point.residuals.contains(&residual.id) {
                return Err(format!(
                    "{} not listed by its point {}",
                    residual.id, residual.point
                ));
            }
        }
        Ok(())
    }
}
