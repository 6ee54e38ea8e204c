use bevy::{
    prelude::*,
    app::AppExit,
    core_pipeline::tonemapping::Tonemapping,
    window::PrimaryWindow,
};
use bevy_args::{
    BevyArgsPlugin,
    parse_args,
};
use bevy_panorbit_camera::{
    PanOrbitCamera,
    PanOrbitCameraPlugin,
};

use bevy_gaussian_stream::{
    GaussianStreamPlugin,
    LoadSplatScene,
    SplatCamera,
    SplatStats,
    SplatTuning,
    StreamSettings,
    io::random::random_scene_ply,
    utils::GaussianStreamViewer,
};


fn setup_stream_scene(
    mut commands: Commands,
    args: Res<GaussianStreamViewer>,
    mut tuning: ResMut<SplatTuning>,
    mut loads: EventWriter<LoadSplatScene>,
) {
    tuning.frustum_dilation = args.frustum_dilation;

    if !args.input_file.is_empty() {
        info!("loading {}", args.input_file);
        loads.write(LoadSplatScene::path(args.input_file.clone()));
    } else if args.gaussian_count > 0 {
        info!("generating {} gaussians", args.gaussian_count);
        loads.write(LoadSplatScene::bytes(random_scene_ply(args.gaussian_count, args.schema_mode)));
    } else {
        info!("drop a .ply file onto the window to load it");
    }

    commands.spawn((
        Transform::from_translation(Vec3::new(0.0, 1.5, 5.0)),
        Camera3d::default(),
        Tonemapping::None,
        Msaa::from_samples(args.msaa_samples as u32),
        PanOrbitCamera {
            allow_upside_down: true,
            ..default()
        },
        SplatCamera,
    ));
}


fn load_dropped_files(
    mut drops: EventReader<FileDragAndDrop>,
    mut loads: EventWriter<LoadSplatScene>,
) {
    for drop in drops.read() {
        if let FileDragAndDrop::DroppedFile { path_buf, .. } = drop {
            info!("loading {}", path_buf.display());
            loads.write(LoadSplatScene::path(path_buf.clone()));
        }
    }
}

fn press_space_pause(
    keys: Res<ButtonInput<KeyCode>>,
    mut tuning: ResMut<SplatTuning>,
) {
    if keys.just_pressed(KeyCode::Space) {
        tuning.paused = !tuning.paused;
    }
}

pub fn esc_close(
    keys: Res<ButtonInput<KeyCode>>,
    mut exit: EventWriter<AppExit>,
) {
    if keys.just_pressed(KeyCode::Escape) {
        exit.write(AppExit::Success);
    }
}

fn stats_title(
    args: Res<GaussianStreamViewer>,
    stats: Res<SplatStats>,
    mut window: Query<&mut Window, With<PrimaryWindow>>,
) {
    let Ok(mut window) = window.single_mut() else {
        return;
    };

    let title = format!(
        "{} | {}/{} splats | {:?}",
        args.name,
        stats.visible(),
        stats.point_count(),
        stats.status(),
    );

    if window.title != title {
        window.title = title;
    }
}


fn viewer_app() {
    let config = parse_args::<GaussianStreamViewer>();
    let mut app = App::new();

    let primary_window = Some(Window {
        mode: bevy::window::WindowMode::Windowed,
        present_mode: bevy::window::PresentMode::AutoVsync,
        prevent_default_event_handling: false,
        resolution: (config.width, config.height).into(),
        title: config.name.clone(),
        ..default()
    });

    app.insert_resource(ClearColor(Color::srgb_u8(0, 0, 0)));
    app.add_plugins(
        DefaultPlugins
            .set(WindowPlugin {
                primary_window,
                ..default()
            }),
    );
    app.add_plugins(BevyArgsPlugin::<GaussianStreamViewer>::default());
    app.add_plugins(PanOrbitCameraPlugin);

    if config.press_esc_close {
        app.add_systems(Update, esc_close);
    }

    if config.show_stats {
        app.add_systems(Update, stats_title);
    }

    app.add_plugins(GaussianStreamPlugin {
        settings: StreamSettings {
            schema_mode: config.schema_mode,
            debug: config.debug,
            max_splat_count: config.max_splat_count,
            ..default()
        },
    });
    app.add_systems(Startup, setup_stream_scene);
    app.add_systems(Update, (
        load_dropped_files,
        press_space_pause,
    ));

    app.run();
}

pub fn main() {
    viewer_app();
}
