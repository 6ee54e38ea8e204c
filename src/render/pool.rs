use std::collections::HashMap;

use bevy::render::{
    render_resource::{
        Buffer,
        BufferDescriptor,
        BufferUsages,
    },
    renderer::RenderDevice,
};
use thiserror::Error;
use wgpu::Limits;

use crate::utils::align_up;


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Position,
    Covariance,
    Color,
    SphericalHarmonics,
    Motion,
    Scale,
    Rotation,
    Temporal,
    Feature,
    VisibleCount,
    SortKeys,
    SortIndices,
    IndirectArgs,
    QuadIndices,
    SortScratch,
    Staging,
    RawScene,
    Readback,
}

impl BufferKind {
    pub fn label(&self) -> &'static str {
        match self {
            BufferKind::Position => "splat_position_buffer",
            BufferKind::Covariance => "splat_covariance_buffer",
            BufferKind::Color => "splat_color_buffer",
            BufferKind::SphericalHarmonics => "splat_sh_buffer",
            BufferKind::Motion => "splat_motion_buffer",
            BufferKind::Scale => "splat_scale_buffer",
            BufferKind::Rotation => "splat_rotation_buffer",
            BufferKind::Temporal => "splat_temporal_buffer",
            BufferKind::Feature => "splat_feature_buffer",
            BufferKind::VisibleCount => "splat_visible_count_buffer",
            BufferKind::SortKeys => "splat_sort_key_buffer",
            BufferKind::SortIndices => "splat_sort_index_buffer",
            BufferKind::IndirectArgs => "splat_indirect_args_buffer",
            BufferKind::QuadIndices => "splat_quad_index_buffer",
            BufferKind::SortScratch => "splat_sort_scratch_buffer",
            BufferKind::Staging => "splat_staging_buffer",
            BufferKind::RawScene => "splat_raw_scene_buffer",
            BufferKind::Readback => "splat_readback_buffer",
        }
    }

    pub fn usage(&self) -> BufferUsages {
        match self {
            BufferKind::VisibleCount => BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
            BufferKind::IndirectArgs => BufferUsages::INDIRECT | BufferUsages::COPY_DST,
            BufferKind::QuadIndices => BufferUsages::INDEX | BufferUsages::COPY_DST,
            // overridden by the sorter's storage requirements
            BufferKind::SortScratch => BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            BufferKind::Staging => BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC,
            BufferKind::RawScene => BufferUsages::STORAGE | BufferUsages::COPY_DST,
            BufferKind::Readback => BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            _ => BufferUsages::STORAGE,
        }
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLimits {
    pub max_buffer_size: u64,
    pub max_storage_binding_size: u64,
}

impl From<&Limits> for BufferLimits {
    fn from(limits: &Limits) -> Self {
        Self {
            max_buffer_size: limits.max_buffer_size,
            max_storage_binding_size: limits.max_storage_buffer_binding_size as u64,
        }
    }
}


#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapacityError {
    #[error("{kind:?} needs {requested} bytes, device max buffer size is {limit}")]
    BufferSize {
        kind: BufferKind,
        requested: u64,
        limit: u64,
    },

    #[error("{kind:?} needs {requested} bytes, device max storage binding size is {limit}")]
    BindingSize {
        kind: BufferKind,
        requested: u64,
        limit: u64,
    },
}


pub trait BufferAllocator {
    type Buffer;

    fn allocate(&self, kind: BufferKind, size: u64, usage: BufferUsages) -> Self::Buffer;
    fn release(&self, buffer: Self::Buffer);
}

impl BufferAllocator for RenderDevice {
    type Buffer = Buffer;

    fn allocate(&self, kind: BufferKind, size: u64, usage: BufferUsages) -> Buffer {
        self.create_buffer(&BufferDescriptor {
            label: Some(kind.label()),
            size,
            usage,
            mapped_at_creation: false,
        })
    }

    fn release(&self, buffer: Buffer) {
        buffer.destroy();
    }
}


#[derive(Debug)]
pub struct PooledBuffer<B> {
    pub buffer: B,
    pub size: u64,
    pub usage: BufferUsages,
    pub generation: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Growth {
    Reused,
    Allocated {
        previous_size: u64,
    },
}


/// Semantic device buffers with generation-counted identity.
///
/// Every (re)allocation draws a fresh pool-wide generation and marks the pool
/// dirty until the bind sets consume the flag.
pub struct BufferPool<B> {
    limits: BufferLimits,
    slots: HashMap<BufferKind, PooledBuffer<B>>,
    next_generation: u64,
    dirty: bool,
}

impl<B> BufferPool<B> {
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            limits,
            slots: HashMap::new(),
            next_generation: 1,
            dirty: false,
        }
    }

    pub fn limits(&self) -> BufferLimits {
        self.limits
    }

    pub fn check_limits(&self, kind: BufferKind, usage: BufferUsages, bytes: u64) -> Result<(), CapacityError> {
        if bytes > self.limits.max_buffer_size {
            return Err(CapacityError::BufferSize {
                kind,
                requested: bytes,
                limit: self.limits.max_buffer_size,
            });
        }

        if usage.contains(BufferUsages::STORAGE) && bytes > self.limits.max_storage_binding_size {
            return Err(CapacityError::BindingSize {
                kind,
                requested: bytes,
                limit: self.limits.max_storage_binding_size,
            });
        }

        Ok(())
    }

    pub fn ensure_capacity<A>(
        &mut self,
        allocator: &A,
        kind: BufferKind,
        bytes: u64,
    ) -> Result<Growth, CapacityError>
    where
        A: BufferAllocator<Buffer = B>,
    {
        let usage = self.slots
            .get(&kind)
            .map(|slot| slot.usage)
            .unwrap_or_else(|| kind.usage());

        self.ensure_capacity_with_usage(allocator, kind, bytes, usage)
    }

    pub fn ensure_capacity_with_usage<A>(
        &mut self,
        allocator: &A,
        kind: BufferKind,
        bytes: u64,
        usage: BufferUsages,
    ) -> Result<Growth, CapacityError>
    where
        A: BufferAllocator<Buffer = B>,
    {
        if let Some(slot) = self.slots.get(&kind) {
            if slot.size >= bytes && slot.usage.contains(usage) {
                return Ok(Growth::Reused);
            }
        }

        let size = align_up(bytes.max(wgpu::COPY_BUFFER_ALIGNMENT), wgpu::COPY_BUFFER_ALIGNMENT);
        self.check_limits(kind, usage, size)?;

        let buffer = allocator.allocate(kind, size, usage);
        let generation = self.next_generation;
        self.next_generation += 1;
        self.dirty = true;

        let previous = self.slots.insert(kind, PooledBuffer {
            buffer,
            size,
            usage,
            generation,
        });

        Ok(match previous {
            Some(previous) => {
                let previous_size = previous.size;
                allocator.release(previous.buffer);
                Growth::Allocated { previous_size }
            }
            None => Growth::Allocated { previous_size: 0 },
        })
    }

    /// Creates a startup buffer that is never resized afterwards.
    pub fn allocate_fixed<A>(
        &mut self,
        allocator: &A,
        kind: BufferKind,
        bytes: u64,
    ) -> Result<(), CapacityError>
    where
        A: BufferAllocator<Buffer = B>,
    {
        self.ensure_capacity_with_usage(allocator, kind, bytes, kind.usage())
            .map(|_| ())
    }

    pub fn get(&self, kind: BufferKind) -> Option<&PooledBuffer<B>> {
        self.slots.get(&kind)
    }

    pub fn buffer(&self, kind: BufferKind) -> Option<&B> {
        self.slots.get(&kind).map(|slot| &slot.buffer)
    }

    pub fn generation(&self, kind: BufferKind) -> Option<u64> {
        self.slots.get(&kind).map(|slot| slot.generation)
    }

    pub fn size(&self, kind: BufferKind) -> u64 {
        self.slots.get(&kind).map_or(0, |slot| slot.size)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}


/// Size for an on-demand buffer: at least `required`, never below the floor
/// unless the floor itself exceeds what the device can bind.
pub fn staging_size(required: u64, floor: u64, limits: BufferLimits) -> u64 {
    let ceiling = limits.max_buffer_size.min(limits.max_storage_binding_size);
    required.max(floor.min(ceiling))
}
