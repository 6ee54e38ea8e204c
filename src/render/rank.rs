use bevy::math::{
    Mat4,
    Vec3,
    Vec4Swizzles,
};


/// Normalized depth (0 at near, 1 at far) from a reverse-z ndc depth.
pub fn normalized_depth(ndc_z: f32) -> f32 {
    1.0 - ndc_z
}

pub fn sort_key(depth: f32) -> u32 {
    (1.0 - depth).to_bits()
}

/// `ndc` is (x, y, normalized depth). Bounds are inclusive.
pub fn frustum_test(ndc: Vec3, dilation: f32) -> bool {
    let bound = 1.0 + dilation;

    ndc.x.abs() <= bound
        && ndc.y.abs() <= bound
        && ndc.z >= 0.0
        && ndc.z <= 1.0
}

pub fn project(clip_from_world: &Mat4, position: Vec3) -> Vec3 {
    let clip = *clip_from_world * position.extend(1.0);
    let ndc = clip.xyz() / clip.w;

    Vec3::new(ndc.x, ndc.y, normalized_depth(ndc.z))
}


#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RankOutput {
    pub visible_count: u32,
    pub keys: Vec<u32>,
    pub indices: Vec<u32>,
}

/// Host mirror of the rank pass, compacting in id order.
pub fn rank(
    clip_from_world: &Mat4,
    positions: &[Vec3],
    dilation: f32,
) -> RankOutput {
    let mut output = RankOutput::default();

    for (id, position) in positions.iter().enumerate() {
        let ndc = project(clip_from_world, *position);
        if !frustum_test(ndc, dilation) {
            continue;
        }

        output.visible_count += 1;
        output.keys.push(sort_key(ndc.z));
        output.indices.push(id as u32);
    }

    output
}
