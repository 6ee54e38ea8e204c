use std::cell::{
    Cell,
    RefCell,
};

use bevy::render::render_resource::BufferUsages;

use bevy_gaussian_stream::render::{
    bind_sets::TrackedBindSet,
    pool::{
        staging_size,
        BufferAllocator,
        BufferKind,
        BufferLimits,
        BufferPool,
        CapacityError,
        Growth,
    },
};


#[derive(Debug, PartialEq)]
struct FakeBuffer {
    id: u32,
    size: u64,
}

#[derive(Default)]
struct FakeDevice {
    next_id: Cell<u32>,
    released: RefCell<Vec<u32>>,
}

impl BufferAllocator for FakeDevice {
    type Buffer = FakeBuffer;

    fn allocate(&self, _kind: BufferKind, size: u64, _usage: BufferUsages) -> FakeBuffer {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        FakeBuffer { id, size }
    }

    fn release(&self, buffer: FakeBuffer) {
        self.released.borrow_mut().push(buffer.id);
    }
}

fn limits() -> BufferLimits {
    BufferLimits {
        max_buffer_size: 1 << 20,
        max_storage_binding_size: 1 << 16,
    }
}


#[test]
fn test_growth_is_monotonic() {
    let device = FakeDevice::default();
    let mut pool = BufferPool::new(limits());

    let growth = pool.ensure_capacity(&device, BufferKind::SortKeys, 1000).unwrap();
    assert_eq!(growth, Growth::Allocated { previous_size: 0 });
    assert_eq!(pool.size(BufferKind::SortKeys), 1000);

    assert_eq!(pool.ensure_capacity(&device, BufferKind::SortKeys, 400).unwrap(), Growth::Reused);
    assert_eq!(pool.ensure_capacity(&device, BufferKind::SortKeys, 1000).unwrap(), Growth::Reused);
    assert_eq!(pool.size(BufferKind::SortKeys), 1000);

    let growth = pool.ensure_capacity(&device, BufferKind::SortKeys, 1001).unwrap();
    assert_eq!(growth, Growth::Allocated { previous_size: 1000 });
    assert_eq!(pool.size(BufferKind::SortKeys), 1004);

    assert_eq!(*device.released.borrow(), vec![0]);
}

#[test]
fn test_generation_changes_only_on_reallocation() {
    let device = FakeDevice::default();
    let mut pool = BufferPool::new(limits());

    assert_eq!(pool.generation(BufferKind::Position), None);

    pool.ensure_capacity(&device, BufferKind::Position, 64).unwrap();
    let first = pool.generation(BufferKind::Position).unwrap();

    pool.ensure_capacity(&device, BufferKind::Position, 32).unwrap();
    assert_eq!(pool.generation(BufferKind::Position), Some(first));

    pool.ensure_capacity(&device, BufferKind::Color, 64).unwrap();
    pool.ensure_capacity(&device, BufferKind::Position, 128).unwrap();
    let second = pool.generation(BufferKind::Position).unwrap();
    assert_ne!(first, second);
    assert_ne!(pool.generation(BufferKind::Color), Some(second));
}

#[test]
fn test_dirty_flag_consumed_once() {
    let device = FakeDevice::default();
    let mut pool = BufferPool::new(limits());
    assert!(!pool.is_dirty());

    pool.ensure_capacity(&device, BufferKind::Staging, 16).unwrap();
    assert!(pool.take_dirty());
    assert!(!pool.take_dirty());

    pool.ensure_capacity(&device, BufferKind::Staging, 8).unwrap();
    assert!(!pool.is_dirty());
}

#[test]
fn test_capacity_error_keeps_previous_buffer() {
    let device = FakeDevice::default();
    let mut pool = BufferPool::new(limits());

    pool.ensure_capacity(&device, BufferKind::RawScene, 1024).unwrap();
    let generation = pool.generation(BufferKind::RawScene);
    pool.take_dirty();

    let err = pool.ensure_capacity(&device, BufferKind::RawScene, (1 << 16) + 4).unwrap_err();
    assert_eq!(err, CapacityError::BindingSize {
        kind: BufferKind::RawScene,
        requested: (1 << 16) + 4,
        limit: 1 << 16,
    });

    assert_eq!(pool.generation(BufferKind::RawScene), generation);
    assert_eq!(pool.buffer(BufferKind::RawScene), Some(&FakeBuffer { id: 0, size: 1024 }));
    assert!(!pool.is_dirty());
    assert!(device.released.borrow().is_empty());
}

#[test]
fn test_non_storage_buffers_only_bounded_by_buffer_size() {
    let device = FakeDevice::default();
    let mut pool = BufferPool::new(limits());

    pool.ensure_capacity(&device, BufferKind::Staging, 1 << 18).unwrap();

    assert!(matches!(
        pool.ensure_capacity(&device, BufferKind::Staging, (1 << 20) + 4),
        Err(CapacityError::BufferSize { .. }),
    ));
}

#[test]
fn test_usage_change_reallocates() {
    let device = FakeDevice::default();
    let mut pool = BufferPool::new(limits());

    pool.ensure_capacity(&device, BufferKind::SortScratch, 256).unwrap();
    let generation = pool.generation(BufferKind::SortScratch);

    let usage = BufferUsages::STORAGE | BufferUsages::COPY_DST;
    let growth = pool.ensure_capacity_with_usage(&device, BufferKind::SortScratch, 256, usage).unwrap();

    assert_eq!(growth, Growth::Allocated { previous_size: 256 });
    assert_ne!(pool.generation(BufferKind::SortScratch), generation);
    assert!(pool.get(BufferKind::SortScratch).unwrap().usage.contains(usage));
}

#[test]
fn test_tracked_bind_set_staleness() {
    let device = FakeDevice::default();
    let mut pool = BufferPool::new(limits());
    let mut set: TrackedBindSet<String> = TrackedBindSet::new(vec![
        BufferKind::SortKeys,
        BufferKind::SortIndices,
    ]);

    pool.ensure_capacity(&device, BufferKind::SortKeys, 64).unwrap();
    assert!(set.is_stale(&pool));
    assert!(!set.rebuild_with(&pool, |_| "partial".to_string()));
    assert!(set.get(&pool).is_none());

    pool.ensure_capacity(&device, BufferKind::SortIndices, 64).unwrap();
    assert!(set.rebuild_with(&pool, |_| "first".to_string()));
    assert_eq!(set.get(&pool).map(String::as_str), Some("first"));
    assert!(!set.rebuild_with(&pool, |_| "unchanged".to_string()));

    pool.ensure_capacity(&device, BufferKind::SortIndices, 128).unwrap();
    assert!(set.is_stale(&pool));
    assert!(set.get(&pool).is_none());

    assert!(set.rebuild_with(&pool, |_| "second".to_string()));
    assert_eq!(set.get(&pool).map(String::as_str), Some("second"));
}

#[test]
fn test_staging_size_floor() {
    let limits = limits();

    assert_eq!(staging_size(100, 4096, limits), 4096);
    assert_eq!(staging_size(8192, 4096, limits), 8192);

    // floors past the device ceiling are clamped to it
    assert_eq!(staging_size(100, 1 << 30, limits), 1 << 16);
    assert_eq!(staging_size(1 << 17, 1 << 30, limits), 1 << 17);
}

#[test]
fn test_raw_scene_growth_only_stales_raw_set() {
    let device = FakeDevice::default();
    let mut pool = BufferPool::new(limits());

    for kind in [BufferKind::Position, BufferKind::Color, BufferKind::RawScene] {
        pool.ensure_capacity(&device, kind, 256).unwrap();
    }

    let mut attributes: TrackedBindSet<u32> = TrackedBindSet::new(vec![
        BufferKind::Position,
        BufferKind::Color,
    ]);
    let mut raw_scene: TrackedBindSet<u32> = TrackedBindSet::new(vec![BufferKind::RawScene]);

    assert!(attributes.rebuild_with(&pool, |_| 1));
    assert!(raw_scene.rebuild_with(&pool, |_| 1));

    pool.ensure_capacity(&device, BufferKind::RawScene, 4096).unwrap();
    assert!(!attributes.is_stale(&pool));
    assert!(raw_scene.is_stale(&pool));

    assert!(!attributes.rebuild_with(&pool, |_| 2));
    assert!(raw_scene.rebuild_with(&pool, |_| 2));
    assert_eq!(attributes.get(&pool), Some(&1));
    assert_eq!(raw_scene.get(&pool), Some(&2));
}
