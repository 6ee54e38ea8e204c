use bevy::prelude::*;

use crate::utils::dispatch_size;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestStep {
    /// staging buffer -> raw scene buffer
    CopyStaging {
        bytes: u64,
    },
    ParseScene {
        point_count: u32,
        workgroups: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewStep {
    ClearVisibleCount,
    Rank {
        workgroups: u32,
    },
    PropagateVisibleCount,
    ReadbackVisibleCount,
    Sort {
        dispatch_bound: u32,
    },
    Draw,
}


#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestDispatch {
    pub copy_bytes: u64,
    pub point_count: u32,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FrameInputs {
    pub ingest: Option<IngestDispatch>,
    pub point_count: u32,
    pub workgroup_size: u32,
    pub ingest_ready: bool,
    pub view_ready: bool,
    pub readback_idle: bool,
}


/// Ordered command steps of one frame.
///
/// A frame either parses a freshly staged scene or renders the resident one,
/// never both.
#[derive(Resource, Clone, Debug, Default, PartialEq, Eq)]
pub struct FramePlan {
    pub ingest: Vec<IngestStep>,
    pub view: Vec<ViewStep>,
}

impl FramePlan {
    pub fn build(inputs: &FrameInputs) -> Self {
        if let Some(dispatch) = inputs.ingest {
            if !inputs.ingest_ready {
                return Self::default();
            }

            return Self {
                ingest: vec![
                    IngestStep::CopyStaging {
                        bytes: dispatch.copy_bytes,
                    },
                    IngestStep::ParseScene {
                        point_count: dispatch.point_count,
                        workgroups: dispatch_size(dispatch.point_count, inputs.workgroup_size),
                    },
                ],
                view: vec![],
            };
        }

        if inputs.point_count == 0 || !inputs.view_ready {
            return Self::default();
        }

        let mut view = vec![
            ViewStep::ClearVisibleCount,
            ViewStep::Rank {
                workgroups: dispatch_size(inputs.point_count, inputs.workgroup_size),
            },
            ViewStep::PropagateVisibleCount,
        ];

        if inputs.readback_idle {
            view.push(ViewStep::ReadbackVisibleCount);
        }

        view.push(ViewStep::Sort {
            dispatch_bound: inputs.point_count,
        });
        view.push(ViewStep::Draw);

        Self {
            ingest: vec![],
            view,
        }
    }

    pub fn has_ingest(&self) -> bool {
        !self.ingest.is_empty()
    }

    pub fn draws(&self) -> bool {
        self.view.contains(&ViewStep::Draw)
    }

    pub fn reads_back(&self) -> bool {
        self.view.contains(&ViewStep::ReadbackVisibleCount)
    }
}
