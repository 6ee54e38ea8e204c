use clap::Parser;

use bevy_gaussian_stream::io::{
    parse_layout,
    parse_scene,
    schema::{
        OFFSET_TABLE_SLOTS,
        STRIDE_SLOT,
    },
    OffsetTable,
    SchemaMode,
};


#[derive(Debug, Parser)]
#[command(about = "print the vertex layout and offset table a ply scene would stream with", version, long_about = None)]
struct PlyInspect {
    input_file: String,

    #[arg(long, value_enum, default_value_t = SchemaMode::Gaussian3d)]
    schema_mode: SchemaMode,

    #[arg(long, default_value_t = bevy_gaussian_stream::settings::DEFAULT_MAX_SPLAT_COUNT)]
    max_splat_count: u32,
}


fn main() {
    let args = PlyInspect::parse();

    let bytes = std::fs::read(&args.input_file).expect("failed to read file");

    let layout = match parse_layout(&bytes) {
        Ok(layout) => layout,
        Err(err) => {
            eprintln!("{}: {err}", args.input_file);
            std::process::exit(1);
        }
    };

    println!("{} points, {} byte records, data at byte {}", layout.point_count, layout.record_size, layout.data_offset);
    for property in &layout.properties {
        let slot = args.schema_mode.slot_for(&property.name)
            .map(|slot| slot.to_string())
            .unwrap_or_else(|| "-".to_string());

        println!("  {:>4}  {:<16} {:?}  slot {}", property.byte_offset, property.name, property.scalar, slot);
    }

    let scene = match parse_scene(&bytes, args.schema_mode, args.max_splat_count) {
        Ok(scene) => scene,
        Err(err) => {
            eprintln!("{}: {err}", args.input_file);
            std::process::exit(1);
        }
    };

    let mut offsets = OffsetTable::default();
    offsets.apply(&scene.assignments);

    println!("offset table ({:?}, stride {} floats):", args.schema_mode, offsets.stride());
    for slot in 0..OFFSET_TABLE_SLOTS {
        if slot == STRIDE_SLOT {
            continue;
        }

        let assigned = scene.assignments.iter().any(|&(assigned, _)| assigned == slot);
        if assigned {
            println!("  [{slot:>2}] {}", offsets.get(slot));
        }
    }

    println!("sh rest coefficients per channel: {}", scene.sh_rest_per_channel);
}
