use std::sync::{
    Arc,
    Mutex,
};

use bevy::{
    prelude::*,
    app::AppExit,
    core_pipeline::{
        core_3d::graph::{
            Core3d,
            Node3d,
        },
        tonemapping::Tonemapping,
    },
    ecs::query::QueryItem,
    render::{
        render_graph::{
            NodeRunError,
            RenderGraphApp,
            RenderGraphContext,
            RenderLabel,
            ViewNode,
            ViewNodeRunner,
        },
        render_resource::{
            Buffer,
            BufferDescriptor,
            BufferUsages,
        },
        renderer::{
            RenderContext,
            RenderDevice,
        },
        view::ExtractedView,
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

use bevy_gaussian_stream::{
    IngestStatus,
    LoadSplatScene,
    SplatCamera,
    SplatStats,
    SplatTuning,
    StreamSettings,
    io::random::{
        encode_ply,
        random_scene_ply,
        random_scene_values,
    },
    render::{
        frame::FramePlan,
        pool::BufferKind,
        rank::{
            frustum_test,
            project,
            rank,
        },
        SplatBuffers,
        SplatDrawLabel,
    },
};

use _harness::{
    TestHarness,
    test_harness_app,
};

mod _harness;


const FIRST_COUNT: usize = 10_000;
const SECOND_COUNT: usize = 2_500;
const MAX_FRAMES: u32 = 1200;
const SETTLE_FRAMES: u32 = 10;


// run with `cargo run --bin test_stream --features="testing"`
fn main() {
    let settings = StreamSettings {
        max_splat_count: 1 << 16,
        debug: true,
        ..default()
    };

    let (names, values) = random_scene_values(FIRST_COUNT, settings.schema_mode, 7);
    let positions = values
        .chunks_exact(names.len())
        .map(|record| Vec3::new(record[0], record[1], record[2]))
        .collect::<Vec<_>>();

    let sort_check = SortCheck {
        state: Arc::new(Mutex::new(SortCheckState::default())),
        positions: Arc::new(positions),
    };

    let mut app = test_harness_app(TestHarness {
        resolution: (512.0, 512.0),
        settings,
    });

    app.insert_resource(FirstScene(encode_ply(&names, &values)));
    app.insert_resource(sort_check.clone());
    app.add_systems(Startup, setup);
    app.add_systems(Update, check_stream);

    let render_app = app.sub_app_mut(RenderApp);
    render_app
        .insert_resource(sort_check)
        .add_systems(
            Render,
            (poll_sort_check, map_sort_check)
                .chain()
                .in_set(RenderSet::Cleanup),
        )
        .add_render_graph_node::<ViewNodeRunner<SortCheckNode>>(Core3d, SortCheckLabel)
        .add_render_graph_edges(
            Core3d,
            (
                SplatDrawLabel,
                SortCheckLabel,
                Node3d::EndMainPass,
            ),
        );

    app.run();
}


#[derive(Resource)]
struct FirstScene(Vec<u8>);

fn setup(
    mut commands: Commands,
    scene: Res<FirstScene>,
    mut loads: EventWriter<LoadSplatScene>,
) {
    loads.write(LoadSplatScene::bytes(scene.0.clone()));

    commands.spawn((
        Transform::from_translation(Vec3::new(0.0, 1.5, 5.0)).looking_at(Vec3::ZERO, Vec3::Y),
        Camera3d::default(),
        Tonemapping::None,
        SplatCamera,
    ));
}


#[derive(Default)]
enum SortCheckState {
    #[default]
    Waiting,
    Settling(u32),
    Recorded {
        buffer: Buffer,
        clip_from_world: Mat4,
        dilation: f32,
    },
    Mapping {
        buffer: Buffer,
        clip_from_world: Mat4,
        dilation: f32,
        receiver: OneshotReceiver<Result<(), wgpu::BufferAsyncError>>,
    },
    Passed(u32),
    Failed(String),
}

/// Device-side rank and sort results for the first scene, read back once.
#[derive(Resource, Clone)]
struct SortCheck {
    state: Arc<Mutex<SortCheckState>>,
    positions: Arc<Vec<Vec3>>,
}

impl SortCheck {
    fn outcome(&self) -> Option<Result<u32, String>> {
        match &*self.state.lock().unwrap() {
            SortCheckState::Passed(visible) => Some(Ok(*visible)),
            SortCheckState::Failed(reason) => Some(Err(reason.clone())),
            _ => None,
        }
    }
}


#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
struct SortCheckLabel;

#[derive(Default)]
struct SortCheckNode;

impl ViewNode for SortCheckNode {
    type ViewQuery = &'static ExtractedView;

    fn run<'w>(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext<'w>,
        view: QueryItem<'w, Self::ViewQuery>,
        world: &'w World,
    ) -> Result<(), NodeRunError> {
        let check = world.resource::<SortCheck>();
        let stats = world.resource::<SplatStats>();
        let plan = world.resource::<FramePlan>();

        let mut state = check.state.lock().unwrap();
        let resident = stats.status() == IngestStatus::Idle
            && stats.point_count() == FIRST_COUNT as u32
            && plan.draws();

        match &*state {
            SortCheckState::Waiting if resident => {
                *state = SortCheckState::Settling(0);
                return Ok(());
            }
            SortCheckState::Settling(frames) if *frames < SETTLE_FRAMES => {
                *state = SortCheckState::Settling(frames + 1);
                return Ok(());
            }
            SortCheckState::Settling(_) if resident => {}
            _ => return Ok(()),
        }

        let buffers = world.resource::<SplatBuffers>();
        let (Some(counter), Some(keys), Some(indices)) = (
            buffers.pool.buffer(BufferKind::VisibleCount),
            buffers.pool.buffer(BufferKind::SortKeys),
            buffers.pool.buffer(BufferKind::SortIndices),
        ) else {
            return Ok(());
        };

        let span = FIRST_COUNT as u64 * 4;
        let buffer = render_context.render_device().create_buffer(&BufferDescriptor {
            label: Some("sort_check_readback"),
            size: 4 + 2 * span,
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let encoder = render_context.command_encoder();
        encoder.copy_buffer_to_buffer(counter, 0, &buffer, 0, 4);
        encoder.copy_buffer_to_buffer(keys, 0, &buffer, 4, span);
        encoder.copy_buffer_to_buffer(indices, 0, &buffer, 4 + span, span);

        *state = SortCheckState::Recorded {
            buffer,
            clip_from_world: view.clip_from_view * view.world_from_view.compute_matrix().inverse(),
            dilation: world.resource::<SplatTuning>().frustum_dilation,
        };

        Ok(())
    }
}


fn map_sort_check(check: Res<SortCheck>) {
    let mut state = check.state.lock().unwrap();
    if !matches!(*state, SortCheckState::Recorded { .. }) {
        return;
    }

    let SortCheckState::Recorded { buffer, clip_from_world, dilation } = std::mem::take(&mut *state) else {
        unreachable!();
    };

    let (sender, receiver) = oneshot_channel();
    buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    *state = SortCheckState::Mapping {
        buffer,
        clip_from_world,
        dilation,
        receiver,
    };
}

fn poll_sort_check(
    render_device: Res<RenderDevice>,
    check: Res<SortCheck>,
) {
    let mut state = check.state.lock().unwrap();
    let SortCheckState::Mapping { receiver, .. } = &*state else {
        return;
    };

    render_device.poll(wgpu::Maintain::Poll);

    let Some(result) = block_on(future::poll_once(receiver.receive())) else {
        return;
    };

    let SortCheckState::Mapping { buffer, clip_from_world, dilation, .. } = std::mem::take(&mut *state) else {
        unreachable!();
    };

    *state = match result {
        Some(Ok(())) => {
            let words = {
                let view = buffer.slice(..).get_mapped_range();
                view.chunks_exact(4)
                    .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
                    .collect::<Vec<_>>()
            };
            buffer.unmap();

            match verify_sorted(&words, &check.positions, &clip_from_world, dilation) {
                Ok(visible) => SortCheckState::Passed(visible),
                Err(reason) => SortCheckState::Failed(reason),
            }
        }
        Some(Err(err)) => SortCheckState::Failed(format!("readback map failed: {err}")),
        None => SortCheckState::Failed("readback map was cancelled".to_string()),
    };
}

/// `words` is the counter followed by the key and index arrays.
fn verify_sorted(
    words: &[u32],
    positions: &[Vec3],
    clip_from_world: &Mat4,
    dilation: f32,
) -> Result<u32, String> {
    let count = positions.len();
    let visible = words[0] as usize;
    if visible == 0 || visible > count {
        return Err(format!("visible count {visible} outside 1..={count}"));
    }

    let keys = &words[1..1 + visible];
    let indices = &words[1 + count..1 + count + visible];

    if let Some(at) = keys.windows(2).position(|pair| pair[0] > pair[1]) {
        return Err(format!("keys decrease at {at}: {:#010x} > {:#010x}", keys[at], keys[at + 1]));
    }

    let mut seen = vec![false; count];
    for (key, &index) in keys.iter().zip(indices) {
        let index = index as usize;
        if index >= count || std::mem::replace(&mut seen[index], true) {
            return Err(format!("index {index} is out of range or repeated"));
        }

        // device and host projections differ in the last few bits
        let ndc = project(clip_from_world, positions[index]);
        if !frustum_test(ndc, dilation + 1e-3) {
            return Err(format!("splat {index} at ndc {ndc} is outside the frustum"));
        }

        let expected = 1.0 - ndc.z;
        let actual = f32::from_bits(*key);
        if (actual - expected).abs() > 1e-4 {
            return Err(format!("splat {index} key {actual} does not match 1 - depth {expected}"));
        }
    }

    let host_visible = rank(clip_from_world, positions, dilation).visible_count as usize;
    if visible.abs_diff(host_visible) > count / 100 {
        return Err(format!("device ranked {visible} visible, host ranked {host_visible}"));
    }

    Ok(visible as u32)
}


#[derive(Default)]
enum Stage {
    #[default]
    First,
    Second,
}

fn check_stream(
    stats: Res<SplatStats>,
    sort_check: Res<SortCheck>,
    mut loads: EventWriter<LoadSplatScene>,
    mut exit: EventWriter<AppExit>,
    mut frames: Local<u32>,
    mut stage: Local<Stage>,
) {
    *frames += 1;
    if *frames > MAX_FRAMES {
        error!(
            "stream test timed out: status {:?}, {}/{} visible",
            stats.status(),
            stats.visible(),
            stats.point_count(),
        );
        exit.write(AppExit::error());
        return;
    }

    let settled = stats.status() == IngestStatus::Idle;
    let visible = stats.visible();

    match *stage {
        Stage::First => {
            if stats.status() == IngestStatus::Failed {
                error!("first scene failed to load");
                exit.write(AppExit::error());
                return;
            }

            let sorted_visible = match sort_check.outcome() {
                None => return,
                Some(Err(reason)) => {
                    error!("device sort check failed: {reason}");
                    exit.write(AppExit::error());
                    return;
                }
                Some(Ok(sorted_visible)) => sorted_visible,
            };

            if settled && stats.point_count() == FIRST_COUNT as u32 && visible > 0 {
                assert!(visible <= FIRST_COUNT as u32);
                info!("first scene streamed: {visible}/{FIRST_COUNT} visible, {sorted_visible} sorted far to near");

                loads.write(LoadSplatScene::bytes(random_scene_ply(SECOND_COUNT, StreamSettings::default().schema_mode)));
                *stage = Stage::Second;
            }
        }
        Stage::Second => {
            // the resident scene is replaced only once the new one is on the device
            let point_count = stats.point_count();
            assert!(point_count == FIRST_COUNT as u32 || point_count == SECOND_COUNT as u32);

            if settled && point_count == SECOND_COUNT as u32 && visible > 0 && visible <= SECOND_COUNT as u32 {
                info!("second scene streamed: {visible}/{SECOND_COUNT} visible");
                exit.write(AppExit::Success);
            }
        }
    }
}
