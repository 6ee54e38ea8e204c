use bevy::{
    prelude::*,
    asset::{
        load_internal_asset,
        weak_handle,
    },
    core_pipeline::core_3d::graph::{
        Core3d,
        Node3d,
    },
    ecs::query::QueryItem,
    render::{
        graph::CameraDriverLabel,
        render_graph::{
            Node,
            NodeRunError,
            RenderGraph,
            RenderGraphApp,
            RenderGraphContext,
            RenderLabel,
            ViewNode,
            ViewNodeRunner,
        },
        render_phase::TrackedRenderPass,
        render_resource::*,
        renderer::{
            RenderContext,
            RenderDevice,
            RenderQueue,
        },
        view::{
            ExtractedView,
            ViewTarget,
        },
        MainWorld,
        Render,
        RenderApp,
        RenderSet,
    },
    tasks::{
        block_on,
        futures_lite::future,
    },
};
use futures_intrusive::channel::shared::{
    oneshot_channel,
    OneshotReceiver,
};

use crate::{
    ingest::{
        staging::{
            GpuStaging,
            MapTicket,
        },
        SceneIngest,
    },
    io::schema::HEADER_BLOCK_BYTES,
    render::{
        bind_sets::{
            FamilyBindGroup,
            ReadOnly,
            ReadWrite,
            SplatBindSets,
            SplatLayouts,
        },
        draw::{
            initial_indirect_args,
            SplatPipelineKey,
            SplatRenderPipeline,
            INSTANCE_COUNT_OFFSET,
            QUAD_INDICES,
        },
        frame::{
            FrameInputs,
            FramePlan,
            IngestDispatch,
            IngestStep,
            ViewStep,
        },
        pool::{
            staging_size,
            BufferKind,
            BufferLimits,
            BufferPool,
            CapacityError,
        },
    },
    settings::{
        SplatTuning,
        StreamSettings,
    },
    sort::{
        ActiveSorter,
        SortBuffers,
        SortStorageRequirements,
    },
    stats::SplatStats,
    utils::align_up,
    SceneRequests,
    SplatCamera,
};

pub mod bind_sets;
pub mod draw;
pub mod frame;
pub mod pool;
pub mod rank;


pub const BINDINGS_SHADER_HANDLE: Handle<Shader> = weak_handle!("9b2e4c1a-5f3d-4e7b-8a1c-0d6f2b3e4a51");
pub const PARSE_SHADER_HANDLE: Handle<Shader> = weak_handle!("1c7d3e9f-2a4b-4c6d-8e0f-a1b2c3d4e5f6");
pub const RANK_SHADER_HANDLE: Handle<Shader> = weak_handle!("5e8a2b7c-9d1f-4a3e-b6c0-7f2d4e1a9b38");
pub const SPLAT_SHADER_HANDLE: Handle<Shader> = weak_handle!("c4f1a6d2-3b8e-4f9a-a7d5-2e6b9c0f1d47");


#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct SplatIngestLabel;

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct SplatDrawLabel;


pub struct RenderPipelinePlugin;

impl Plugin for RenderPipelinePlugin {
    fn build(&self, app: &mut App) {
        load_internal_asset!(
            app,
            BINDINGS_SHADER_HANDLE,
            "bindings.wgsl",
            Shader::from_wgsl
        );

        load_internal_asset!(
            app,
            PARSE_SHADER_HANDLE,
            "parse.wgsl",
            Shader::from_wgsl
        );

        load_internal_asset!(
            app,
            RANK_SHADER_HANDLE,
            "rank.wgsl",
            Shader::from_wgsl
        );

        load_internal_asset!(
            app,
            SPLAT_SHADER_HANDLE,
            "splat.wgsl",
            Shader::from_wgsl
        );

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .init_resource::<FramePlan>()
            .init_resource::<PendingIngest>()
            .init_resource::<SplatCameraUniforms>()
            .init_resource::<VisibleReadback>()
            .add_systems(ExtractSchedule, extract_scene_requests)
            .add_systems(
                Render,
                (
                    (
                        poll_visible_readback,
                        advance_ingest,
                        prepare_camera_uniforms,
                        prepare_view_pipelines,
                    )
                        .chain()
                        .in_set(RenderSet::Prepare),
                    prepare_frame.in_set(RenderSet::PrepareBindGroups),
                    map_visible_readback.in_set(RenderSet::Cleanup),
                )
                    .run_if(resource_exists::<SplatBuffers>),
            );

        render_app
            .add_render_graph_node::<ViewNodeRunner<SplatDrawNode>>(
                Core3d,
                SplatDrawLabel,
            )
            .add_render_graph_edges(
                Core3d,
                (
                    Node3d::MainTransparentPass,
                    SplatDrawLabel,
                    Node3d::EndMainPass,
                ),
            );

        let mut render_graph = render_app.world_mut().resource_mut::<RenderGraph>();
        render_graph.add_node(SplatIngestLabel, SplatIngestNode);
        render_graph.add_node_edge(SplatIngestLabel, CameraDriverLabel);
    }

    fn finish(&self, app: &mut App) {
        let Some(settings) = app.world().get_resource::<StreamSettings>().cloned() else {
            return;
        };

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        let world = render_app.world_mut();
        let render_device = world.resource::<RenderDevice>().clone();
        let render_queue = world.resource::<RenderQueue>().clone();
        let limits = render_device.limits();

        if let Err(err) = settings.validate(&limits) {
            error!("gaussian stream disabled, settings exceed device limits: {err}");
            return;
        }

        let mode = settings.schema_mode;
        let header_block_bytes = align_up(
            HEADER_BLOCK_BYTES,
            limits.min_storage_buffer_offset_alignment as u64,
        );

        let layouts = SplatLayouts::new(&render_device, mode);
        let camera_layout = camera_layout(&render_device);
        let render_pipeline = SplatRenderPipeline::new(&camera_layout, &layouts, mode);
        let compute_pipelines = SplatComputePipelines::new(
            world.resource::<PipelineCache>(),
            camera_layout,
            &layouts,
            &settings,
        );

        world.insert_resource(layouts);
        world.insert_resource(compute_pipelines);
        world.insert_resource(render_pipeline);
        world.init_resource::<SpecializedRenderPipelines<SplatRenderPipeline>>();
        world.insert_resource(SplatBindSets::new(mode));
        world.insert_resource(SceneIngest::<MapTicket>::new(
            mode,
            settings.max_splat_count,
            header_block_bytes,
        ));

        let sort_storage = world
            .get_resource::<ActiveSorter>()
            .map(|active| active.sorter.storage_requirements(settings.max_splat_count));

        match SplatBuffers::new(&render_device, &render_queue, &settings, sort_storage, header_block_bytes) {
            Ok(buffers) => {
                info!(
                    "gaussian stream ready: {:?}, {} splat capacity",
                    mode,
                    settings.max_splat_count,
                );
                world.insert_resource(buffers);
            }
            Err(err) => error!("gaussian stream disabled, buffer allocation failed: {err}"),
        }
    }
}


#[derive(Clone, Copy, Debug, Default, ShaderType)]
pub struct SplatCameraUniform {
    pub clip_from_view: Mat4,
    pub view_from_world: Mat4,
    pub camera_position: Vec3,
    pub point_count: u32,
    pub focal: Vec2,
    pub viewport: Vec2,
    pub inverse_viewport: Vec2,
    pub scale_modifier: f32,
    pub frustum_dilation: f32,
    pub alpha_cull_threshold: f32,
    pub time: f32,
}

impl SplatCameraUniform {
    pub fn new(
        view: &ExtractedView,
        tuning: &SplatTuning,
        point_count: u32,
    ) -> Self {
        let viewport = UVec2::new(view.viewport.z, view.viewport.w).as_vec2().max(Vec2::ONE);
        let clip_from_view = view.clip_from_view;

        Self {
            clip_from_view,
            view_from_world: view.world_from_view.compute_matrix().inverse(),
            camera_position: view.world_from_view.translation(),
            point_count,
            focal: Vec2::new(
                clip_from_view.x_axis.x * viewport.x * 0.5,
                clip_from_view.y_axis.y * viewport.y * 0.5,
            ),
            viewport,
            inverse_viewport: viewport.recip(),
            scale_modifier: tuning.scale_modifier,
            frustum_dilation: tuning.frustum_dilation,
            alpha_cull_threshold: tuning.alpha_cull_threshold,
            time: tuning.time,
        }
    }
}

fn camera_layout(render_device: &RenderDevice) -> BindGroupLayout {
    render_device.create_bind_group_layout(
        "splat_camera_layout",
        &[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::COMPUTE | ShaderStages::VERTEX_FRAGMENT,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: Some(SplatCameraUniform::min_size()),
            },
            count: None,
        }],
    )
}


#[derive(Resource)]
pub struct SplatComputePipelines {
    pub camera_layout: BindGroupLayout,
    pub parse: CachedComputePipelineId,
    pub rank: CachedComputePipelineId,
}

impl SplatComputePipelines {
    pub fn new(
        pipeline_cache: &PipelineCache,
        camera_layout: BindGroupLayout,
        layouts: &SplatLayouts,
        settings: &StreamSettings,
    ) -> Self {
        let mut shader_defs = settings.schema_mode.shader_defs();
        shader_defs.push(ShaderDefVal::UInt("WORKGROUP_SIZE".into(), settings.workgroup_size));

        let parse = pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
            label: Some("splat_parse_pipeline".into()),
            layout: vec![
                layouts.attributes_read_write.clone(),
                layouts.raw_scene.clone(),
            ],
            push_constant_ranges: vec![],
            shader: PARSE_SHADER_HANDLE,
            shader_defs: shader_defs.clone(),
            entry_point: "parse_scene".into(),
            zero_initialize_workgroup_memory: false,
        });

        let rank = pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
            label: Some("splat_rank_pipeline".into()),
            layout: vec![
                camera_layout.clone(),
                layouts.attributes_read_only.clone(),
                layouts.visibility_read_write.clone(),
            ],
            push_constant_ranges: vec![],
            shader: RANK_SHADER_HANDLE,
            shader_defs,
            entry_point: "rank_splats".into(),
            zero_initialize_workgroup_memory: false,
        });

        Self {
            camera_layout,
            parse,
            rank,
        }
    }
}


#[derive(Resource)]
pub struct SplatBuffers {
    pub pool: BufferPool<Buffer>,
    /// raw records start at this offset in the staging and raw scene buffers
    pub header_block_bytes: u64,
}

impl SplatBuffers {
    pub fn new(
        render_device: &RenderDevice,
        render_queue: &RenderQueue,
        settings: &StreamSettings,
        sort_storage: Option<SortStorageRequirements>,
        header_block_bytes: u64,
    ) -> Result<Self, CapacityError> {
        let mut pool = BufferPool::new(BufferLimits::from(&render_device.limits()));
        let capacity = settings.max_splat_count;

        for attribute in settings.schema_mode.attributes() {
            pool.allocate_fixed(render_device, attribute.kind, attribute.bytes(capacity))?;
        }

        pool.allocate_fixed(render_device, BufferKind::VisibleCount, 4)?;
        pool.allocate_fixed(render_device, BufferKind::SortKeys, capacity as u64 * 4)?;
        pool.allocate_fixed(render_device, BufferKind::SortIndices, capacity as u64 * 4)?;
        pool.allocate_fixed(render_device, BufferKind::IndirectArgs, std::mem::size_of::<wgpu::util::DrawIndexedIndirectArgs>() as u64)?;
        pool.allocate_fixed(render_device, BufferKind::QuadIndices, std::mem::size_of_val(&QUAD_INDICES) as u64)?;
        pool.allocate_fixed(render_device, BufferKind::Readback, 4)?;

        if let Some(sort_storage) = sort_storage {
            pool.ensure_capacity_with_usage(
                render_device,
                BufferKind::SortScratch,
                sort_storage.size,
                sort_storage.usage,
            )?;
        }

        let initial_staging = staging_size(
            header_block_bytes + 4,
            settings.staging_floor_bytes,
            pool.limits(),
        );
        pool.ensure_capacity(render_device, BufferKind::RawScene, initial_staging)?;
        pool.ensure_capacity(render_device, BufferKind::Staging, initial_staging)?;

        if let Some(indices) = pool.buffer(BufferKind::QuadIndices) {
            render_queue.write_buffer(indices, 0, bytemuck::cast_slice(&QUAD_INDICES));
        }

        if let Some(indirect) = pool.buffer(BufferKind::IndirectArgs) {
            render_queue.write_buffer(indirect, 0, initial_indirect_args().as_bytes());
        }

        Ok(Self {
            pool,
            header_block_bytes,
        })
    }
}


#[derive(Resource, Default)]
pub struct PendingIngest(pub Option<IngestDispatch>);

#[derive(Resource, Default)]
pub struct SplatCameraUniforms {
    pub buffer: DynamicUniformBuffer<SplatCameraUniform>,
    pub bind_group: Option<BindGroup>,
}

#[derive(Component)]
pub struct SplatViewUniformOffset {
    pub offset: u32,
}

#[derive(Component)]
pub struct SplatViewPipeline(pub CachedRenderPipelineId);


#[derive(Default)]
enum ReadbackState {
    #[default]
    Idle,
    Mapping(OneshotReceiver<Result<(), wgpu::BufferAsyncError>>),
}

/// Single in-flight copy of the visible counter to host memory.
#[derive(Resource, Default)]
pub struct VisibleReadback {
    state: ReadbackState,
}

impl VisibleReadback {
    pub fn is_idle(&self) -> bool {
        matches!(self.state, ReadbackState::Idle)
    }
}


fn extract_scene_requests(
    mut main_world: ResMut<MainWorld>,
    ingest: Option<ResMut<SceneIngest<MapTicket>>>,
) {
    let Some(mut requests) = main_world.get_resource_mut::<SceneRequests>() else {
        return;
    };

    let Some(source) = requests.take() else {
        return;
    };

    match ingest {
        Some(mut ingest) => ingest.request(source),
        None => warn!("gaussian stream is disabled, dropping scene request"),
    }
}


fn advance_ingest(
    render_device: Res<RenderDevice>,
    settings: Res<StreamSettings>,
    stats: Res<SplatStats>,
    mut buffers: ResMut<SplatBuffers>,
    mut ingest: ResMut<SceneIngest<MapTicket>>,
    mut pending: ResMut<PendingIngest>,
) {
    let mut staging = GpuStaging {
        render_device: &render_device,
        pool: &mut buffers.pool,
        floor_bytes: settings.staging_floor_bytes,
    };

    pending.0 = ingest.advance(&mut staging);

    stats.set_status(ingest.status());
    stats.set_point_count(ingest.point_count());
}


fn prepare_camera_uniforms(
    mut commands: Commands,
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    tuning: Res<SplatTuning>,
    ingest: Res<SceneIngest<MapTicket>>,
    mut uniforms: ResMut<SplatCameraUniforms>,
    views: Query<(Entity, &ExtractedView), With<SplatCamera>>,
) {
    uniforms.buffer.clear();

    for (entity, view) in &views {
        let offset = uniforms.buffer.push(&SplatCameraUniform::new(
            view,
            &tuning,
            ingest.point_count(),
        ));

        commands.entity(entity).insert(SplatViewUniformOffset { offset });
    }

    uniforms.buffer.write_buffer(&render_device, &render_queue);
}


fn prepare_view_pipelines(
    mut commands: Commands,
    pipeline_cache: Res<PipelineCache>,
    splat_pipeline: Res<SplatRenderPipeline>,
    mut pipelines: ResMut<SpecializedRenderPipelines<SplatRenderPipeline>>,
    views: Query<(Entity, &ViewTarget, &Msaa), With<SplatCamera>>,
) {
    for (entity, target, msaa) in &views {
        let key = SplatPipelineKey {
            format: target.main_texture_format(),
            samples: msaa.samples(),
        };

        let pipeline = pipelines.specialize(&pipeline_cache, &splat_pipeline, key);
        commands.entity(entity).insert(SplatViewPipeline(pipeline));
    }
}


fn register_sorter(
    render_device: &RenderDevice,
    render_queue: &RenderQueue,
    pool: &BufferPool<Buffer>,
    active: &mut ActiveSorter,
    max_count: u32,
) {
    let kinds = [
        BufferKind::VisibleCount,
        BufferKind::SortKeys,
        BufferKind::SortIndices,
        BufferKind::SortScratch,
    ];

    let Some(generations) = kinds
        .iter()
        .map(|kind| pool.generation(*kind))
        .collect::<Option<Vec<_>>>()
    else {
        return;
    };

    if !active.needs_registration(&generations) {
        return;
    }

    let (
        Some(counter),
        Some(keys),
        Some(values),
        Some(scratch),
    ) = (
        pool.buffer(BufferKind::VisibleCount),
        pool.buffer(BufferKind::SortKeys),
        pool.buffer(BufferKind::SortIndices),
        pool.buffer(BufferKind::SortScratch),
    ) else {
        return;
    };

    active.sorter.register_buffers(
        render_device,
        render_queue,
        SortBuffers {
            max_count,
            counter,
            keys,
            values,
            scratch,
        },
    );
    active.registered = Some(generations);
}


#[allow(clippy::too_many_arguments)]
fn prepare_frame(
    render_device: Res<RenderDevice>,
    render_queue: Res<RenderQueue>,
    pipeline_cache: Res<PipelineCache>,
    settings: Res<StreamSettings>,
    layouts: Res<SplatLayouts>,
    compute_pipelines: Res<SplatComputePipelines>,
    pending: Res<PendingIngest>,
    readback: Res<VisibleReadback>,
    sorter: Option<ResMut<ActiveSorter>>,
    mut buffers: ResMut<SplatBuffers>,
    mut bind_sets: ResMut<SplatBindSets>,
    mut uniforms: ResMut<SplatCameraUniforms>,
    mut ingest: ResMut<SceneIngest<MapTicket>>,
    mut plan: ResMut<FramePlan>,
) {
    let buffers = &mut *buffers;
    bind_sets.rebuild(
        &mut buffers.pool,
        &render_device,
        &layouts,
        buffers.header_block_bytes,
    );

    let camera_bind_group = uniforms.buffer.binding().map(|binding| {
        render_device.create_bind_group(
            "splat_camera_bind_group",
            &compute_pipelines.camera_layout,
            &[BindGroupEntry {
                binding: 0,
                resource: binding,
            }],
        )
    });
    uniforms.bind_group = camera_bind_group;

    let sorter_ready = match sorter {
        Some(mut sorter) => {
            register_sorter(
                &render_device,
                &render_queue,
                &buffers.pool,
                &mut sorter,
                settings.max_splat_count,
            );
            sorter.sorter.is_ready(&pipeline_cache)
        }
        None => false,
    };

    let pool = &buffers.pool;
    let inputs = FrameInputs {
        ingest: pending.0,
        point_count: ingest.point_count(),
        workgroup_size: settings.workgroup_size,
        ingest_ready: bind_sets.ingest_ready(pool)
            && pipeline_cache.get_compute_pipeline(compute_pipelines.parse).is_some(),
        view_ready: bind_sets.view_ready(pool)
            && uniforms.bind_group.is_some()
            && pipeline_cache.get_compute_pipeline(compute_pipelines.rank).is_some()
            && sorter_ready,
        readback_idle: readback.is_idle(),
    };

    *plan = FramePlan::build(&inputs);

    if plan.has_ingest() {
        ingest.mark_dispatched();
    }
}


fn map_visible_readback(
    plan: Res<FramePlan>,
    buffers: Res<SplatBuffers>,
    mut readback: ResMut<VisibleReadback>,
) {
    if !plan.reads_back() || !readback.is_idle() {
        return;
    }

    let Some(buffer) = buffers.pool.buffer(BufferKind::Readback) else {
        return;
    };

    let (sender, receiver) = oneshot_channel();
    buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    readback.state = ReadbackState::Mapping(receiver);
}

fn poll_visible_readback(
    render_device: Res<RenderDevice>,
    settings: Res<StreamSettings>,
    stats: Res<SplatStats>,
    buffers: Res<SplatBuffers>,
    mut readback: ResMut<VisibleReadback>,
) {
    let ReadbackState::Mapping(receiver) = &readback.state else {
        return;
    };

    render_device.poll(wgpu::Maintain::Poll);

    let Some(result) = block_on(future::poll_once(receiver.receive())) else {
        return;
    };

    let Some(buffer) = buffers.pool.buffer(BufferKind::Readback) else {
        readback.state = ReadbackState::Idle;
        return;
    };

    match result {
        Some(Ok(())) => {
            let visible = {
                let view = buffer.slice(..).get_mapped_range();
                bytemuck::pod_read_unaligned::<u32>(&view[..4])
            };
            buffer.unmap();

            stats.set_visible(visible);

            if settings.debug {
                info!("visible splats: {}/{}", visible, stats.point_count());
            }
        }
        Some(Err(err)) => warn!("visible count readback failed: {err}"),
        None => warn!("visible count readback was cancelled"),
    }

    readback.state = ReadbackState::Idle;
}


pub fn bind_parse(
    pass: &mut wgpu::ComputePass,
    attributes: &FamilyBindGroup<ReadWrite>,
    raw_scene: &FamilyBindGroup<ReadOnly>,
) {
    pass.set_bind_group(0, &**attributes.bind_group(), &[]);
    pass.set_bind_group(1, &**raw_scene.bind_group(), &[]);
}

pub fn bind_rank(
    pass: &mut wgpu::ComputePass,
    camera: &BindGroup,
    camera_offset: u32,
    attributes: &FamilyBindGroup<ReadOnly>,
    visibility: &FamilyBindGroup<ReadWrite>,
) {
    pass.set_bind_group(0, &**camera, &[camera_offset]);
    pass.set_bind_group(1, &**attributes.bind_group(), &[]);
    pass.set_bind_group(2, &**visibility.bind_group(), &[]);
}

pub fn bind_draw<'a>(
    pass: &mut TrackedRenderPass<'a>,
    camera: &'a BindGroup,
    camera_offset: u32,
    attributes: &'a FamilyBindGroup<ReadOnly>,
    visibility: &'a FamilyBindGroup<ReadOnly>,
) {
    pass.set_bind_group(0, camera, &[camera_offset]);
    pass.set_bind_group(1, attributes.bind_group(), &[]);
    pass.set_bind_group(2, visibility.bind_group(), &[]);
}


struct SplatIngestNode;

impl Node for SplatIngestNode {
    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> Result<(), NodeRunError> {
        let plan = world.resource::<FramePlan>();
        if !plan.has_ingest() {
            return Ok(());
        }

        let (
            Some(buffers),
            Some(bind_sets),
            Some(compute_pipelines),
        ) = (
            world.get_resource::<SplatBuffers>(),
            world.get_resource::<SplatBindSets>(),
            world.get_resource::<SplatComputePipelines>(),
        ) else {
            return Ok(());
        };

        let pool = &buffers.pool;
        let (
            Some(attributes),
            Some(raw_scene),
            Some(staging),
            Some(raw),
        ) = (
            bind_sets.attributes_read_write.get(pool),
            bind_sets.raw_scene.get(pool),
            pool.buffer(BufferKind::Staging),
            pool.buffer(BufferKind::RawScene),
        ) else {
            return Ok(());
        };

        let pipeline_cache = world.resource::<PipelineCache>();
        let Some(parse_pipeline) = pipeline_cache.get_compute_pipeline(compute_pipelines.parse) else {
            return Ok(());
        };

        let command_encoder = render_context.command_encoder();
        for step in &plan.ingest {
            match *step {
                IngestStep::CopyStaging { bytes } => {
                    command_encoder.copy_buffer_to_buffer(staging, 0, raw, 0, bytes);
                }
                IngestStep::ParseScene { workgroups, .. } => {
                    let mut pass = command_encoder.begin_compute_pass(&ComputePassDescriptor {
                        label: Some("splat_parse_pass"),
                        timestamp_writes: None,
                    });

                    pass.set_pipeline(parse_pipeline);
                    bind_parse(&mut pass, attributes, raw_scene);
                    pass.dispatch_workgroups(workgroups, 1, 1);
                }
            }
        }

        Ok(())
    }
}


#[derive(Default)]
pub struct SplatDrawNode;

impl ViewNode for SplatDrawNode {
    type ViewQuery = (
        &'static ViewTarget,
        &'static SplatViewUniformOffset,
        &'static SplatViewPipeline,
    );

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        (
            target,
            uniform_offset,
            view_pipeline,
        ): QueryItem<'w, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let plan = world.resource::<FramePlan>();
        if !plan.draws() {
            return Ok(());
        }

        let (
            Some(buffers),
            Some(bind_sets),
            Some(compute_pipelines),
            Some(sorter),
        ) = (
            world.get_resource::<SplatBuffers>(),
            world.get_resource::<SplatBindSets>(),
            world.get_resource::<SplatComputePipelines>(),
            world.get_resource::<ActiveSorter>(),
        ) else {
            return Ok(());
        };

        let pool = &buffers.pool;
        let (
            Some(camera),
            Some(attributes),
            Some(visibility_read_write),
            Some(visibility_read_only),
        ) = (
            world.resource::<SplatCameraUniforms>().bind_group.as_ref(),
            bind_sets.attributes_read_only.get(pool),
            bind_sets.visibility_read_write.get(pool),
            bind_sets.visibility_read_only.get(pool),
        ) else {
            return Ok(());
        };

        let (
            Some(counter),
            Some(indirect),
            Some(indices),
            Some(readback),
            Some(scratch),
        ) = (
            pool.buffer(BufferKind::VisibleCount),
            pool.buffer(BufferKind::IndirectArgs),
            pool.buffer(BufferKind::QuadIndices),
            pool.buffer(BufferKind::Readback),
            pool.buffer(BufferKind::SortScratch),
        ) else {
            return Ok(());
        };

        let pipeline_cache = world.resource::<PipelineCache>();

        for step in &plan.view {
            match *step {
                ViewStep::ClearVisibleCount => {
                    render_context.command_encoder().clear_buffer(counter, 0, None);
                }
                ViewStep::Rank { workgroups } => {
                    let Some(rank_pipeline) = pipeline_cache.get_compute_pipeline(compute_pipelines.rank) else {
                        return Ok(());
                    };

                    let mut pass = render_context.command_encoder().begin_compute_pass(&ComputePassDescriptor {
                        label: Some("splat_rank_pass"),
                        timestamp_writes: None,
                    });

                    pass.set_pipeline(rank_pipeline);
                    bind_rank(&mut pass, camera, uniform_offset.offset, attributes, visibility_read_write);
                    pass.dispatch_workgroups(workgroups, 1, 1);
                }
                ViewStep::PropagateVisibleCount => {
                    render_context.command_encoder().copy_buffer_to_buffer(
                        counter,
                        0,
                        indirect,
                        INSTANCE_COUNT_OFFSET,
                        4,
                    );
                }
                ViewStep::ReadbackVisibleCount => {
                    render_context.command_encoder().copy_buffer_to_buffer(counter, 0, readback, 0, 4);
                }
                ViewStep::Sort { dispatch_bound } => {
                    sorter.sorter.sort(
                        render_context.command_encoder(),
                        pipeline_cache,
                        dispatch_bound,
                        scratch,
                    );
                }
                ViewStep::Draw => {
                    let Some(render_pipeline) = pipeline_cache.get_render_pipeline(view_pipeline.0) else {
                        return Ok(());
                    };

                    let mut pass = render_context.begin_tracked_render_pass(RenderPassDescriptor {
                        label: Some("splat_draw_pass"),
                        color_attachments: &[Some(target.get_color_attachment())],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });

                    pass.set_render_pipeline(render_pipeline);
                    bind_draw(&mut pass, camera, uniform_offset.offset, attributes, visibility_read_only);
                    pass.set_index_buffer(indices.slice(..), 0, IndexFormat::Uint32);
                    pass.draw_indexed_indirect(indirect, 0);
                }
            }
        }

        Ok(())
    }
}
