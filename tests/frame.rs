use bevy::math::{
    Mat4,
    Vec3,
};

use bevy_gaussian_stream::{
    render::{
        frame::{
            FrameInputs,
            FramePlan,
            IngestDispatch,
            IngestStep,
            ViewStep,
        },
        rank::{
            frustum_test,
            project,
            rank,
            sort_key,
        },
    },
    sort::bitonic::{
        bitonic_schedule,
        dispatch_grid,
        encode_schedule,
        schedule_len,
        sort_reference,
        BitonicStep,
        STEP_STRIDE,
    },
    utils::{
        align_up,
        dispatch_size,
    },
};


fn view_inputs(point_count: u32) -> FrameInputs {
    FrameInputs {
        ingest: None,
        point_count,
        workgroup_size: 256,
        ingest_ready: true,
        view_ready: true,
        readback_idle: true,
    }
}


#[test]
fn test_dispatch_and_alignment() {
    assert_eq!(dispatch_size(1_000_000, 512), 1954);
    assert_eq!(dispatch_size(512, 512), 1);
    assert_eq!(dispatch_size(513, 512), 2);
    assert_eq!(dispatch_size(0, 256), 0);

    assert_eq!(align_up(240, 256), 256);
    assert_eq!(align_up(256, 256), 256);
    assert_eq!(align_up(257, 256), 512);
    assert_eq!(align_up(256, 64), 256);
    assert_eq!(align_up(0, 4), 0);

    assert_eq!(dispatch_grid(100, 65535), (100, 1));
    assert_eq!(dispatch_grid(65536, 65535), (65535, 2));
}

#[test]
fn test_view_plan_order() {
    let plan = FramePlan::build(&view_inputs(1000));

    assert!(plan.ingest.is_empty());
    assert_eq!(plan.view, vec![
        ViewStep::ClearVisibleCount,
        ViewStep::Rank { workgroups: 4 },
        ViewStep::PropagateVisibleCount,
        ViewStep::ReadbackVisibleCount,
        ViewStep::Sort { dispatch_bound: 1000 },
        ViewStep::Draw,
    ]);
    assert!(plan.draws());
    assert!(plan.reads_back());
}

#[test]
fn test_readback_skipped_while_in_flight() {
    let plan = FramePlan::build(&FrameInputs {
        readback_idle: false,
        ..view_inputs(10)
    });

    assert!(plan.draws());
    assert!(!plan.reads_back());
}

#[test]
fn test_empty_scene_records_nothing() {
    assert_eq!(FramePlan::build(&view_inputs(0)), FramePlan::default());

    let stale = FramePlan::build(&FrameInputs {
        view_ready: false,
        ..view_inputs(10)
    });
    assert_eq!(stale, FramePlan::default());
}

#[test]
fn test_ingest_frame_suppresses_view() {
    let dispatch = IngestDispatch {
        copy_bytes: 256 + 3 * 28,
        point_count: 3,
    };

    let plan = FramePlan::build(&FrameInputs {
        ingest: Some(dispatch),
        ..view_inputs(1000)
    });

    assert_eq!(plan.ingest, vec![
        IngestStep::CopyStaging { bytes: 340 },
        IngestStep::ParseScene { point_count: 3, workgroups: 1 },
    ]);
    assert!(plan.view.is_empty());
    assert!(plan.has_ingest());

    let waiting = FramePlan::build(&FrameInputs {
        ingest: Some(dispatch),
        ingest_ready: false,
        ..view_inputs(1000)
    });
    assert_eq!(waiting, FramePlan::default());
}


#[test]
fn test_schedule_length_and_prefix() {
    assert_eq!(schedule_len(0), 0);
    assert_eq!(schedule_len(1), 0);
    assert_eq!(schedule_len(2), 1);
    assert_eq!(schedule_len(5), 6);
    assert_eq!(schedule_len(1 << 20), 210);

    let small = bitonic_schedule(1000);
    let large = bitonic_schedule(1 << 16);
    assert_eq!(small.len(), schedule_len(1000));
    assert_eq!(&large[..small.len()], small.as_slice());

    assert_eq!(&small[..4], &[
        BitonicStep::flip(2),
        BitonicStep::flip(4),
        BitonicStep::disperse(2),
        BitonicStep::flip(8),
    ]);
}

#[test]
fn test_schedule_encoding_stride() {
    let steps = bitonic_schedule(16);
    let bytes = encode_schedule(&steps);
    assert_eq!(bytes.len(), steps.len() * STEP_STRIDE as usize);

    let second: BitonicStep = bytemuck::pod_read_unaligned(&bytes[STEP_STRIDE as usize..STEP_STRIDE as usize + 16]);
    assert_eq!(second, steps[1]);
}

#[test]
fn test_sort_reference_non_power_of_two() {
    let count = 13;
    let mut keys = vec![9, 3, 7, 3, 12, 0, 5, 8, 1, 11, 4, 2, 6, 99, 98, 97];
    let mut values = (0..16).collect::<Vec<u32>>();
    let original = keys.clone();

    sort_reference(&mut keys, &mut values, count);

    assert!(keys[..count].windows(2).all(|pair| pair[0] <= pair[1]));
    for (key, value) in keys[..count].iter().zip(&values[..count]) {
        assert_eq!(original[*value as usize], *key);
    }

    let mut sorted_values = values[..count].to_vec();
    sorted_values.sort_unstable();
    assert_eq!(sorted_values, (0..count as u32).collect::<Vec<_>>());

    // slots past the count are never touched
    assert_eq!(&keys[count..], &[99, 98, 97]);
}


#[test]
fn test_frustum_test_bounds() {
    assert!(frustum_test(Vec3::new(1.0, -1.0, 0.0), 0.0));
    assert!(frustum_test(Vec3::new(1.04, 0.0, 1.0), 0.05));
    assert!(!frustum_test(Vec3::new(1.04, 0.0, 0.5), 0.0));
    assert!(!frustum_test(Vec3::new(0.0, 0.0, -0.01), 0.05));
    assert!(!frustum_test(Vec3::new(0.0, 0.0, 1.01), 0.05));
    assert!(!frustum_test(Vec3::new(f32::NAN, 0.0, 0.5), 0.05));
    assert!(!frustum_test(Vec3::new(0.0, 0.0, f32::NAN), 0.05));
}

#[test]
fn test_rank_then_sort_back_to_front() {
    let clip_from_world = Mat4::perspective_infinite_reverse_rh(
        std::f32::consts::FRAC_PI_2,
        1.0,
        0.1,
    );

    let positions = [
        Vec3::new(0.0, 0.0, -5.0),
        Vec3::new(0.5, 0.0, -2.0),
        Vec3::new(0.0, 0.0, 5.0),
        Vec3::new(100.0, 0.0, -5.0),
        Vec3::new(0.0, -1.0, -10.0),
        Vec3::new(0.0, 0.0, -0.05),
    ];

    let ranked = rank(&clip_from_world, &positions, 0.05);
    assert_eq!(ranked.visible_count, 3);
    assert_eq!(ranked.indices, vec![0, 1, 4]);

    let depth = project(&clip_from_world, positions[0]).z;
    assert_eq!(ranked.keys[0], sort_key(depth));

    let mut keys = ranked.keys.clone();
    let mut values = ranked.indices.clone();
    sort_reference(&mut keys, &mut values, ranked.visible_count as usize);

    // farthest first
    assert_eq!(values, vec![4, 0, 1]);
}
