use bevy::prelude::*;

use bevy_gaussian_stream::{
    GaussianStreamPlugin,
    StreamSettings,
};

// scraping this in CI for now until bevy ci testing is more stable
// #[test] + main thread, and windowless limitations exist

#[derive(Resource)]
pub struct TestHarness {
    pub resolution: (f32, f32),
    pub settings: StreamSettings,
}

pub fn test_harness_app(harness: TestHarness) -> App {
    let mut app = App::new();

    app.insert_resource(ClearColor(Color::srgb_u8(0, 0, 0)));
    app.add_plugins(DefaultPlugins.set(WindowPlugin {
        primary_window: Some(Window {
            mode: bevy::window::WindowMode::Windowed,
            present_mode: bevy::window::PresentMode::AutoVsync,
            prevent_default_event_handling: false,
            resolution: harness.resolution.into(),
            title: "bevy_gaussian_stream pipeline test".to_string(),
            ..default()
        }),
        ..default()
    }));

    app.add_plugins(GaussianStreamPlugin {
        settings: harness.settings.clone(),
    });

    app.insert_resource(harness);

    app
}
