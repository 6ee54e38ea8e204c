use std::sync::{
    Arc,
    atomic::{
        AtomicU32,
        AtomicU8,
        Ordering,
    },
};

use bevy::prelude::*;

use crate::ingest::IngestStatus;


#[derive(Default)]
struct SplatStatsInner {
    status: AtomicU8,
    point_count: AtomicU32,
    visible: AtomicU32,
}

/// Ingest status and splat counts, shared between the main and render worlds.
#[derive(Resource, Clone, Default)]
pub struct SplatStats(Arc<SplatStatsInner>);

impl SplatStats {
    pub fn status(&self) -> IngestStatus {
        IngestStatus::from_u8(self.0.status.load(Ordering::Relaxed))
    }

    pub fn point_count(&self) -> u32 {
        self.0.point_count.load(Ordering::Relaxed)
    }

    /// Visible splats as of the most recent completed readback.
    pub fn visible(&self) -> u32 {
        self.0.visible.load(Ordering::Relaxed)
    }

    pub(crate) fn set_status(&self, status: IngestStatus) {
        self.0.status.store(status as u8, Ordering::Relaxed);
    }

    pub(crate) fn set_point_count(&self, point_count: u32) {
        self.0.point_count.store(point_count, Ordering::Relaxed);
    }

    pub(crate) fn set_visible(&self, visible: u32) {
        self.0.visible.store(visible, Ordering::Relaxed);
    }
}
