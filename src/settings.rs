use bevy::{
    prelude::*,
    render::extract_resource::ExtractResource,
};
use serde::{
    Deserialize,
    Serialize,
};
use thiserror::Error;
use wgpu::Limits;

pub use crate::io::schema::SchemaMode;
use crate::{
    render::{
        bind_sets::{
            visibility_members,
            ReadOnly,
            ReadWrite,
        },
        pool::{
            BufferLimits,
            CapacityError,
            BufferKind,
        },
    },
    utils::dispatch_size,
};


pub const DEFAULT_MAX_SPLAT_COUNT: u32 = 1 << 23;
pub const DEFAULT_WORKGROUP_SIZE: u32 = 256;
pub const DEFAULT_STAGING_FLOOR_BYTES: u64 = 64 * 1024 * 1024;


#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("workgroup size {size} exceeds device limit {limit}")]
    WorkgroupSize {
        size: u32,
        limit: u32,
    },

    #[error("{workgroups} workgroups exceed the per-dimension dispatch limit {limit}")]
    DispatchSize {
        workgroups: u32,
        limit: u32,
    },

    #[error("{count} storage buffers per stage exceed device limit {limit}")]
    StorageBuffers {
        count: u32,
        limit: u32,
    },

    #[error(transparent)]
    Capacity(#[from] CapacityError),
}


/// Session configuration, fixed once the plugin is built.
#[derive(Resource, Clone, Debug, Reflect, Serialize, Deserialize)]
pub struct StreamSettings {
    pub schema_mode: SchemaMode,
    pub debug: bool,
    pub max_splat_count: u32,
    pub workgroup_size: u32,
    pub staging_floor_bytes: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            schema_mode: SchemaMode::default(),
            debug: false,
            max_splat_count: DEFAULT_MAX_SPLAT_COUNT,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            staging_floor_bytes: DEFAULT_STAGING_FLOOR_BYTES,
        }
    }
}

impl StreamSettings {
    pub fn validate(&self, limits: &Limits) -> Result<(), SettingsError> {
        let workgroup_limit = limits.max_compute_invocations_per_workgroup
            .min(limits.max_compute_workgroup_size_x);
        if self.workgroup_size == 0 || self.workgroup_size > workgroup_limit {
            return Err(SettingsError::WorkgroupSize {
                size: self.workgroup_size,
                limit: workgroup_limit,
            });
        }

        let workgroups = dispatch_size(self.max_splat_count, self.workgroup_size);
        if workgroups > limits.max_compute_workgroups_per_dimension {
            return Err(SettingsError::DispatchSize {
                workgroups,
                limit: limits.max_compute_workgroups_per_dimension,
            });
        }

        let storage_buffers = storage_buffers_per_stage(self.schema_mode);
        if storage_buffers > limits.max_storage_buffers_per_shader_stage {
            return Err(SettingsError::StorageBuffers {
                count: storage_buffers,
                limit: limits.max_storage_buffers_per_shader_stage,
            });
        }

        let buffer_limits = BufferLimits::from(limits);
        let capacity = self.max_splat_count as u64;
        for attribute in self.schema_mode.attributes() {
            check_storage(buffer_limits, attribute.kind, attribute.bytes(self.max_splat_count))?;
        }
        check_storage(buffer_limits, BufferKind::SortKeys, capacity * 4)?;
        check_storage(buffer_limits, BufferKind::SortIndices, capacity * 4)?;

        Ok(())
    }
}

/// Most storage buffers a single pipeline binds into one shader stage.
pub fn storage_buffers_per_stage(mode: SchemaMode) -> u32 {
    let attributes = mode.attributes().len();

    // scene header and records
    let parse = attributes + 2;
    let rank = attributes + visibility_members::<ReadWrite>().len();
    let draw = attributes + visibility_members::<ReadOnly>().len();

    parse.max(rank).max(draw) as u32
}

fn check_storage(limits: BufferLimits, kind: BufferKind, bytes: u64) -> Result<(), CapacityError> {
    if bytes > limits.max_buffer_size {
        return Err(CapacityError::BufferSize {
            kind,
            requested: bytes,
            limit: limits.max_buffer_size,
        });
    }

    if bytes > limits.max_storage_binding_size {
        return Err(CapacityError::BindingSize {
            kind,
            requested: bytes,
            limit: limits.max_storage_binding_size,
        });
    }

    Ok(())
}


/// Per-frame scalars, extracted into the render world every frame.
#[derive(Resource, ExtractResource, Clone, Debug, Reflect)]
#[reflect(Resource)]
pub struct SplatTuning {
    pub scale_modifier: f32,
    pub frustum_dilation: f32,
    pub alpha_cull_threshold: f32,
    pub time: f32,
    pub time_period: f32,
    pub paused: bool,
}

impl Default for SplatTuning {
    fn default() -> Self {
        Self {
            scale_modifier: 1.0,
            frustum_dilation: 0.05,
            alpha_cull_threshold: 0.0,
            time: 0.0,
            time_period: 1.0,
            paused: false,
        }
    }
}

impl SplatTuning {
    /// Advances time, wrapping to zero past the period.
    pub fn advance(&mut self, delta_seconds: f32) {
        if self.paused {
            return;
        }

        self.time += delta_seconds;
        if self.time > self.time_period {
            self.time = 0.0;
        }
    }
}
