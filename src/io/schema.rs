use bevy::{
    prelude::*,
    render::render_resource::ShaderDefVal,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::render::pool::BufferKind;


pub const OFFSET_TABLE_SLOTS: usize = 60;
pub const STRIDE_SLOT: usize = 59;

/// offset table followed by `point_count`, sh rest per channel and two reserved words
pub const HEADER_BLOCK_WORDS: usize = OFFSET_TABLE_SLOTS + 4;
pub const HEADER_BLOCK_BYTES: u64 = (HEADER_BLOCK_WORDS * 4) as u64;

pub const SH_CHANNELS: usize = 3;
pub const SH_COEFF_COUNT_PER_CHANNEL: usize = 16;
pub const SH_REST_COUNT: usize = SH_CHANNELS * (SH_COEFF_COUNT_PER_CHANNEL - 1);
pub const SPACETIME_MOTION_COUNT: usize = 9;
pub const SPACETIME_FEATURE_COUNT: usize = 9;


#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    Reflect,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
pub enum SchemaMode {
    #[default]
    Gaussian3d,
    SpaceTimeFull,
    SpaceTimeLite,
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttributeLayout {
    pub kind: BufferKind,
    pub words_per_splat: u32,
}

impl AttributeLayout {
    pub const fn new(kind: BufferKind, words_per_splat: u32) -> Self {
        Self { kind, words_per_splat }
    }

    pub fn bytes(&self, capacity: u32) -> u64 {
        self.words_per_splat as u64 * 4 * capacity as u64
    }
}


const GAUSSIAN_3D_ATTRIBUTES: &[AttributeLayout] = &[
    AttributeLayout::new(BufferKind::Position, 3),
    AttributeLayout::new(BufferKind::Covariance, 6),
    AttributeLayout::new(BufferKind::Color, 4),
    AttributeLayout::new(BufferKind::SphericalHarmonics, 24),
];

const SPACETIME_FULL_ATTRIBUTES: &[AttributeLayout] = &[
    AttributeLayout::new(BufferKind::Position, 3),
    AttributeLayout::new(BufferKind::Color, 4),
    AttributeLayout::new(BufferKind::Motion, 9),
    AttributeLayout::new(BufferKind::Scale, 3),
    AttributeLayout::new(BufferKind::Rotation, 8),
    AttributeLayout::new(BufferKind::Temporal, 2),
    AttributeLayout::new(BufferKind::Feature, 9),
];

const SPACETIME_LITE_ATTRIBUTES: &[AttributeLayout] = &[
    AttributeLayout::new(BufferKind::Position, 3),
    AttributeLayout::new(BufferKind::Color, 4),
    AttributeLayout::new(BufferKind::Motion, 9),
    AttributeLayout::new(BufferKind::Scale, 3),
    AttributeLayout::new(BufferKind::Rotation, 8),
    AttributeLayout::new(BufferKind::Temporal, 2),
];


impl SchemaMode {
    /// Per-splat attribute buffers, in binding order.
    pub fn attributes(&self) -> &'static [AttributeLayout] {
        match self {
            SchemaMode::Gaussian3d => GAUSSIAN_3D_ATTRIBUTES,
            SchemaMode::SpaceTimeFull => SPACETIME_FULL_ATTRIBUTES,
            SchemaMode::SpaceTimeLite => SPACETIME_LITE_ATTRIBUTES,
        }
    }

    pub fn is_spacetime(&self) -> bool {
        !matches!(self, SchemaMode::Gaussian3d)
    }

    pub fn shader_defs(&self) -> Vec<ShaderDefVal> {
        match self {
            SchemaMode::Gaussian3d => vec!["GAUSSIAN_3D".into()],
            SchemaMode::SpaceTimeFull => vec![
                "SPACETIME".into(),
                "SPACETIME_FULL".into(),
            ],
            SchemaMode::SpaceTimeLite => vec!["SPACETIME".into()],
        }
    }

    /// Offset-table slot a declared vertex property feeds, if any.
    pub fn slot_for(&self, name: &str) -> Option<usize> {
        match self {
            SchemaMode::Gaussian3d => gaussian_3d_slot(name),
            SchemaMode::SpaceTimeFull => spacetime_slot(name, true),
            SchemaMode::SpaceTimeLite => spacetime_slot(name, false),
        }
    }
}


fn indexed(name: &str, prefix: &str, count: usize) -> Option<usize> {
    let index = name.strip_prefix(prefix)?.parse::<usize>().ok()?;
    (index < count).then_some(index)
}

fn common_slot(name: &str) -> Option<usize> {
    match name {
        "x" => Some(0),
        "y" => Some(1),
        "z" => Some(2),
        "scale_0" => Some(3),
        "scale_1" => Some(4),
        "scale_2" => Some(5),
        // quaternion stored xyzw, rot_0 is w
        "rot_1" => Some(6),
        "rot_2" => Some(7),
        "rot_3" => Some(8),
        "rot_0" => Some(9),
        _ => None,
    }
}

fn gaussian_3d_slot(name: &str) -> Option<usize> {
    if let Some(slot) = common_slot(name) {
        return Some(slot);
    }

    if name == "opacity" {
        return Some(58);
    }

    if let Some(channel) = indexed(name, "f_dc_", SH_CHANNELS) {
        return Some(10 + SH_COEFF_COUNT_PER_CHANNEL * channel);
    }

    // f_rest is channel-major, 15 coefficients per channel after the dc term
    let rest = indexed(name, "f_rest_", SH_REST_COUNT)?;
    let per_channel = SH_COEFF_COUNT_PER_CHANNEL - 1;
    let channel = rest / per_channel;
    let coefficient = rest % per_channel + 1;

    Some(10 + SH_COEFF_COUNT_PER_CHANNEL * channel + coefficient)
}

fn spacetime_slot(name: &str, full: bool) -> Option<usize> {
    if let Some(slot) = common_slot(name) {
        return Some(slot);
    }

    match name {
        "omega_1" => return Some(10),
        "omega_2" => return Some(11),
        "omega_3" => return Some(12),
        "omega_0" => return Some(13),
        "trbf_center" => return Some(23),
        "trbf_scale" => return Some(24),
        "opacity" => return Some(25),
        _ => {}
    }

    if let Some(k) = indexed(name, "motion_", SPACETIME_MOTION_COUNT) {
        return Some(14 + k);
    }

    if let Some(channel) = indexed(name, "f_dc_", SH_CHANNELS) {
        return Some(26 + channel);
    }

    if full {
        return indexed(name, "f_", SPACETIME_FEATURE_COUNT).map(|k| 29 + k);
    }

    None
}


/// Float offsets of each semantic field within one source record.
///
/// The table persists across loads: fields a scene does not declare keep
/// whatever value the previous scene left in their slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OffsetTable(pub [u32; OFFSET_TABLE_SLOTS]);

impl Default for OffsetTable {
    fn default() -> Self {
        Self([0; OFFSET_TABLE_SLOTS])
    }
}

impl OffsetTable {
    pub fn get(&self, slot: usize) -> u32 {
        self.0[slot]
    }

    pub fn stride(&self) -> u32 {
        self.0[STRIDE_SLOT]
    }

    pub fn apply(&mut self, assignments: &[(usize, u32)]) {
        for &(slot, offset) in assignments {
            self.0[slot] = offset;
        }
    }

    /// Bytes of the staging header block: the table, then the record header.
    pub fn header_block(
        &self,
        point_count: u32,
        sh_rest_per_channel: u32,
    ) -> [u32; HEADER_BLOCK_WORDS] {
        let mut block = [0u32; HEADER_BLOCK_WORDS];
        block[..OFFSET_TABLE_SLOTS].copy_from_slice(&self.0);
        block[OFFSET_TABLE_SLOTS] = point_count;
        block[OFFSET_TABLE_SLOTS + 1] = sh_rest_per_channel;
        block
    }
}
