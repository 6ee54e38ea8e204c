use bevy::{
    prelude::*,
    render::{
        extract_component::{
            ExtractComponent,
            ExtractComponentPlugin,
        },
        extract_resource::ExtractResourcePlugin,
        RenderApp,
    },
};

pub use ingest::{
    IngestStatus,
    SceneSource,
};
pub use io::{
    IngestError,
    SchemaMode,
};
pub use settings::{
    SplatTuning,
    StreamSettings,
};
pub use stats::SplatStats;

use render::RenderPipelinePlugin;
use sort::BitonicSortPlugin;

pub mod ingest;
pub mod io;
pub mod render;
pub mod settings;
pub mod sort;
pub mod stats;
pub mod utils;


/// Cameras rendering the streamed scene.
#[derive(Component, Clone, Default, ExtractComponent, Reflect)]
#[reflect(Component)]
pub struct SplatCamera;


/// Requests a scene load; supersedes any load not yet on the device.
#[derive(Event, Clone, Debug)]
pub struct LoadSplatScene(pub SceneSource);

impl LoadSplatScene {
    pub fn path(path: impl Into<std::path::PathBuf>) -> Self {
        Self(SceneSource::Path(path.into()))
    }

    pub fn bytes(bytes: Vec<u8>) -> Self {
        Self(SceneSource::Bytes(bytes.into()))
    }
}


/// Latest load request awaiting extraction into the render world.
#[derive(Resource, Default)]
pub struct SceneRequests {
    latest: Option<SceneSource>,
}

impl SceneRequests {
    pub fn take(&mut self) -> Option<SceneSource> {
        self.latest.take()
    }
}


#[derive(Default)]
pub struct GaussianStreamPlugin {
    pub settings: StreamSettings,
}

impl Plugin for GaussianStreamPlugin {
    fn build(&self, app: &mut App) {
        let stats = SplatStats::default();

        app.insert_resource(self.settings.clone());
        app.insert_resource(stats.clone());
        app.init_resource::<SplatTuning>();
        app.init_resource::<SceneRequests>();
        app.add_event::<LoadSplatScene>();

        app.register_type::<SplatCamera>();
        app.register_type::<SplatTuning>();

        app.add_systems(Update, (
            queue_scene_requests,
            advance_splat_time,
        ));

        if let Some(render_app) = app.get_sub_app_mut(RenderApp) {
            render_app.insert_resource(self.settings.clone());
            render_app.insert_resource(stats);
        }

        app.add_plugins((
            ExtractResourcePlugin::<SplatTuning>::default(),
            ExtractComponentPlugin::<SplatCamera>::default(),
            BitonicSortPlugin,
            RenderPipelinePlugin,
        ));
    }
}


fn queue_scene_requests(
    mut events: EventReader<LoadSplatScene>,
    mut requests: ResMut<SceneRequests>,
) {
    for LoadSplatScene(source) in events.read() {
        if requests.latest.replace(source.clone()).is_some() {
            debug!("superseded scene request before extraction");
        }
    }
}

fn advance_splat_time(
    time: Res<Time>,
    mut tuning: ResMut<SplatTuning>,
) {
    tuning.advance(time.delta_secs());
}
