use rand::{
    Rng,
    rngs::StdRng,
    SeedableRng,
};

use crate::io::schema::{
    SchemaMode,
    SH_REST_COUNT,
    SPACETIME_FEATURE_COUNT,
    SPACETIME_MOTION_COUNT,
};


/// Property names of a typical scene exported for `mode`, in file order.
pub fn scene_properties(mode: SchemaMode) -> Vec<String> {
    let mut names: Vec<String> = ["x", "y", "z"]
        .into_iter()
        .map(str::to_string)
        .collect();

    match mode {
        SchemaMode::Gaussian3d => {
            names.extend(["nx", "ny", "nz"].map(str::to_string));
            names.extend((0..3).map(|c| format!("f_dc_{c}")));
            names.extend((0..SH_REST_COUNT).map(|i| format!("f_rest_{i}")));
            names.push("opacity".to_string());
            names.extend((0..3).map(|i| format!("scale_{i}")));
            names.extend((0..4).map(|i| format!("rot_{i}")));
        }
        SchemaMode::SpaceTimeFull | SchemaMode::SpaceTimeLite => {
            names.push("trbf_center".to_string());
            names.push("trbf_scale".to_string());
            names.extend((0..SPACETIME_MOTION_COUNT).map(|k| format!("motion_{k}")));
            names.extend((0..3).map(|c| format!("f_dc_{c}")));
            if mode == SchemaMode::SpaceTimeFull {
                names.extend((0..SPACETIME_FEATURE_COUNT).map(|k| format!("f_{k}")));
            }
            names.push("opacity".to_string());
            names.extend((0..3).map(|i| format!("scale_{i}")));
            names.extend((0..4).map(|i| format!("rot_{i}")));
            names.extend((0..4).map(|i| format!("omega_{i}")));
        }
    }

    names
}


/// Encodes float vertex records as a binary little-endian PLY file.
pub fn encode_ply<S: AsRef<str>>(
    property_names: &[S],
    values: &[f32],
) -> Vec<u8> {
    let count = if property_names.is_empty() {
        0
    } else {
        values.len() / property_names.len()
    };

    let mut header = String::from("ply\nformat binary_little_endian 1.0\n");
    header.push_str(&format!("element vertex {count}\n"));
    for name in property_names {
        header.push_str(&format!("property float {}\n", name.as_ref()));
    }
    header.push_str("end_header\n");

    let mut bytes = header.into_bytes();
    bytes.extend_from_slice(bytemuck::cast_slice(&values[..count * property_names.len()]));
    bytes
}


pub fn random_scene_values(
    count: usize,
    mode: SchemaMode,
    seed: u64,
) -> (Vec<String>, Vec<f32>) {
    let names = scene_properties(mode);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut values = Vec::with_capacity(count * names.len());
    for _ in 0..count {
        for name in &names {
            let value = match name.as_str() {
                "x" | "y" | "z" => rng.gen_range(-4.0..4.0),
                "nx" | "ny" | "nz" => 0.0,
                "opacity" => rng.gen_range(-1.0..4.0),
                "trbf_center" => rng.gen_range(0.0..1.0),
                "trbf_scale" => rng.gen_range(-2.0..0.0),
                name if name.starts_with("scale_") => rng.gen_range(-5.0..-2.5),
                name if name.starts_with("rot_") => rng.gen_range(-1.0..1.0),
                name if name.starts_with("f_dc_") => rng.gen_range(-1.5..1.5),
                name if name.starts_with("motion_") || name.starts_with("omega_") => {
                    rng.gen_range(-0.1..0.1)
                }
                _ => rng.gen_range(-0.2..0.2),
            };
            values.push(value);
        }
    }

    (names, values)
}

pub fn random_scene_ply(count: usize, mode: SchemaMode) -> Vec<u8> {
    let (names, values) = random_scene_values(count, mode, 0x5eed);
    encode_ply(&names, &values)
}
