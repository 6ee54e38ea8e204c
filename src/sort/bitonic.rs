use bevy::{
    prelude::*,
    asset::{
        load_internal_asset,
        weak_handle,
    },
    render::{
        render_resource::*,
        renderer::{
            RenderDevice,
            RenderQueue,
        },
        RenderApp,
    },
};
use bytemuck::{
    Pod,
    Zeroable,
};
use static_assertions::const_assert_eq;

use crate::{
    settings::StreamSettings,
    sort::{
        ActiveSorter,
        SortBuffers,
        SortStorageRequirements,
        SplatSorter,
    },
    utils::dispatch_size,
};


pub const BITONIC_SHADER_HANDLE: Handle<Shader> = weak_handle!("3f0c2a51-7d4e-4b8a-9a6e-2c1d5b7e8f90");

/// Byte stride between step parameters in the scratch buffer (dynamic uniform offset).
pub const STEP_STRIDE: u64 = 256;


#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct BitonicStep {
    /// compare block size, a power of two
    pub block: u32,
    /// 1 for a flip step, 0 for a disperse step
    pub flip: u32,
    pub _padding: [u32; 2],
}

const_assert_eq!(std::mem::size_of::<BitonicStep>(), 16);

impl BitonicStep {
    pub fn flip(block: u32) -> Self {
        Self {
            block,
            flip: 1,
            ..default()
        }
    }

    pub fn disperse(block: u32) -> Self {
        Self {
            block,
            flip: 0,
            ..default()
        }
    }

    /// Slot pair compared by `thread`; the first slot is always the lower one.
    pub fn pair(&self, thread: u32) -> (u32, u32) {
        let half = self.block / 2;
        let base = (thread / half) * self.block;
        let offset = thread % half;

        if self.flip != 0 {
            (base + offset, base + self.block - 1 - offset)
        } else {
            (base + offset, base + offset + half)
        }
    }
}


pub fn schedule_len(count: u32) -> usize {
    let levels = count.max(1).next_power_of_two().trailing_zeros() as usize;
    levels * (levels + 1) / 2
}

/// Flip/disperse steps sorting `count` slots, padded to the next power of two.
///
/// The schedule for a smaller count is a prefix of the schedule for a larger one.
pub fn bitonic_schedule(count: u32) -> Vec<BitonicStep> {
    let n = count.max(1).next_power_of_two();
    let mut steps = Vec::with_capacity(schedule_len(count));

    let mut block = 2;
    while block <= n {
        steps.push(BitonicStep::flip(block));

        let mut disperse = block / 2;
        while disperse >= 2 {
            steps.push(BitonicStep::disperse(disperse));
            disperse /= 2;
        }

        block *= 2;
    }

    steps
}

/// Host mirror of the sort network; slots at or beyond `count` act as `+inf`.
pub fn sort_reference(keys: &mut [u32], values: &mut [u32], count: usize) {
    let count = count.min(keys.len()).min(values.len());
    let threads = (count as u32).max(1).next_power_of_two() / 2;

    for step in bitonic_schedule(count as u32) {
        for thread in 0..threads {
            let (i, j) = step.pair(thread);
            let (i, j) = (i as usize, j as usize);
            if j >= count {
                continue;
            }

            if keys[i] > keys[j] {
                keys.swap(i, j);
                values.swap(i, j);
            }
        }
    }
}

/// Splits `workgroups` over x and y when it exceeds the per-dimension limit.
pub fn dispatch_grid(workgroups: u32, max_per_dimension: u32) -> (u32, u32) {
    if workgroups <= max_per_dimension {
        return (workgroups, 1);
    }

    (max_per_dimension, workgroups.div_ceil(max_per_dimension))
}

pub fn encode_schedule(steps: &[BitonicStep]) -> Vec<u8> {
    let mut bytes = vec![0u8; steps.len() * STEP_STRIDE as usize];
    for (chunk, step) in bytes.chunks_exact_mut(STEP_STRIDE as usize).zip(steps) {
        chunk[..std::mem::size_of::<BitonicStep>()].copy_from_slice(bytemuck::bytes_of(step));
    }
    bytes
}


#[derive(Default)]
pub struct BitonicSortPlugin;

impl Plugin for BitonicSortPlugin {
    fn build(&self, app: &mut App) {
        load_internal_asset!(
            app,
            BITONIC_SHADER_HANDLE,
            "bitonic.wgsl",
            Shader::from_wgsl
        );
    }

    fn finish(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        let world = render_app.world_mut();
        if !world.contains_resource::<ActiveSorter>() {
            let sorter = BitonicSorter::from_world(world);
            world.insert_resource(ActiveSorter::new(sorter));
        }
    }
}


pub struct BitonicSorter {
    layout: BindGroupLayout,
    pipeline: CachedComputePipelineId,
    workgroup_size: u32,
    max_workgroups_per_dimension: u32,
    max_count: u32,
    bind_group: Option<BindGroup>,
}

impl FromWorld for BitonicSorter {
    fn from_world(render_world: &mut World) -> Self {
        let render_device = render_world.resource::<RenderDevice>();
        let workgroup_size = render_world
            .get_resource::<StreamSettings>()
            .map_or(crate::settings::DEFAULT_WORKGROUP_SIZE, |settings| settings.workgroup_size);

        let layout = render_device.create_bind_group_layout(
            "bitonic_sort_layout",
            &[
                BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: BufferSize::new(std::mem::size_of::<BitonicStep>() as u64),
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 1,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: BufferSize::new(std::mem::size_of::<u32>() as u64),
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 2,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: 3,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        );

        let max_workgroups_per_dimension = render_device.limits().max_compute_workgroups_per_dimension;

        let pipeline_cache = render_world.resource::<PipelineCache>();
        let pipeline = pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
            label: Some("bitonic_sort_step".into()),
            layout: vec![layout.clone()],
            push_constant_ranges: vec![],
            shader: BITONIC_SHADER_HANDLE,
            shader_defs: vec![
                ShaderDefVal::UInt("WORKGROUP_SIZE".into(), workgroup_size),
            ],
            entry_point: "bitonic_step".into(),
            zero_initialize_workgroup_memory: false,
        });

        BitonicSorter {
            layout,
            pipeline,
            workgroup_size,
            max_workgroups_per_dimension,
            max_count: 0,
            bind_group: None,
        }
    }
}

impl SplatSorter for BitonicSorter {
    fn storage_requirements(&self, max_count: u32) -> SortStorageRequirements {
        SortStorageRequirements {
            size: (schedule_len(max_count).max(1) as u64) * STEP_STRIDE,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        }
    }

    fn register_buffers(
        &mut self,
        render_device: &RenderDevice,
        render_queue: &RenderQueue,
        buffers: SortBuffers<'_>,
    ) {
        let schedule = bitonic_schedule(buffers.max_count);
        render_queue.write_buffer(buffers.scratch, 0, &encode_schedule(&schedule));

        self.bind_group = Some(render_device.create_bind_group(
            "bitonic_sort_bind_group",
            &self.layout,
            &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::Buffer(BufferBinding {
                        buffer: buffers.scratch,
                        offset: 0,
                        size: BufferSize::new(std::mem::size_of::<BitonicStep>() as u64),
                    }),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: buffers.counter.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 2,
                    resource: buffers.keys.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: 3,
                    resource: buffers.values.as_entire_binding(),
                },
            ],
        ));
        self.max_count = buffers.max_count;

        debug!("bitonic sorter registered: {} steps for {} slots", schedule.len(), buffers.max_count);
    }

    fn is_ready(&self, pipeline_cache: &PipelineCache) -> bool {
        self.bind_group.is_some() && pipeline_cache.get_compute_pipeline(self.pipeline).is_some()
    }

    fn sort(
        &self,
        encoder: &mut CommandEncoder,
        pipeline_cache: &PipelineCache,
        dispatch_bound: u32,
        _scratch: &Buffer,
    ) {
        let Some(bind_group) = &self.bind_group else {
            return;
        };

        let Some(pipeline) = pipeline_cache.get_compute_pipeline(self.pipeline) else {
            return;
        };

        let bound = dispatch_bound.min(self.max_count);
        let steps = schedule_len(bound);
        if steps == 0 {
            return;
        }

        let threads = bound.next_power_of_two() / 2;
        let (x, y) = dispatch_grid(
            dispatch_size(threads, self.workgroup_size),
            self.max_workgroups_per_dimension,
        );

        let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: Some("bitonic_sort_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(pipeline);

        for step in 0..steps {
            pass.set_bind_group(0, &**bind_group, &[(step as u64 * STEP_STRIDE) as u32]);
            pass.dispatch_workgroups(x, y, 1);
        }
    }
}
