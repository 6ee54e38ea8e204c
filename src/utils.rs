use bevy::prelude::*;
use bevy_args::{
    Deserialize,
    Parser,
    Serialize,
};

use crate::io::schema::SchemaMode;


/// Number of workgroups needed to cover `n` invocations.
pub fn dispatch_size(n: u32, workgroup_size: u32) -> u32 {
    n.div_ceil(workgroup_size)
}

/// Rounds `a` up to the next multiple of `alignment`.
pub fn align_up(a: u64, alignment: u64) -> u64 {
    a.div_ceil(alignment) * alignment
}


#[derive(
    Debug,
    Resource,
    Serialize,
    Deserialize,
    Parser,
)]
#[command(about = "bevy_gaussian_stream viewer", version, long_about = None)]
pub struct GaussianStreamViewer {
    #[arg(long, default_value = "true")]
    pub press_esc_close: bool,

    #[arg(long, default_value = "true")]
    pub show_stats: bool,

    #[arg(long, default_value = "false")]
    pub debug: bool,

    #[arg(long, default_value = "1920.0")]
    pub width: f32,

    #[arg(long, default_value = "1080.0")]
    pub height: f32,

    #[arg(long, default_value = "bevy_gaussian_stream")]
    pub name: String,

    #[arg(long, default_value = "1")]
    pub msaa_samples: u8,

    #[arg(long, default_value = "")]
    pub input_file: String,

    #[arg(long, default_value = "0")]
    pub gaussian_count: usize,

    #[arg(long, value_enum, default_value_t = SchemaMode::Gaussian3d)]
    pub schema_mode: SchemaMode,

    #[arg(long, default_value_t = crate::settings::DEFAULT_MAX_SPLAT_COUNT)]
    pub max_splat_count: u32,

    #[arg(long, default_value = "0.05")]
    pub frustum_dilation: f32,
}

impl Default for GaussianStreamViewer {
    fn default() -> GaussianStreamViewer {
        GaussianStreamViewer {
            press_esc_close: true,
            show_stats: true,
            debug: false,
            width: 1920.0,
            height: 1080.0,
            name: "bevy_gaussian_stream".to_string(),
            msaa_samples: 1,
            input_file: "".to_string(),
            gaussian_count: 0,
            schema_mode: SchemaMode::Gaussian3d,
            max_splat_count: crate::settings::DEFAULT_MAX_SPLAT_COUNT,
            frustum_dilation: 0.05,
        }
    }
}
