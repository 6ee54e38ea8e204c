use bevy::{
    prelude::*,
    render::{
        render_resource::*,
        renderer::{
            RenderDevice,
            RenderQueue,
        },
    },
};

pub mod bitonic;

pub use bitonic::{
    BitonicSortPlugin,
    BitonicSorter,
};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortStorageRequirements {
    pub size: u64,
    pub usage: BufferUsages,
}

pub struct SortBuffers<'a> {
    pub max_count: u32,
    /// visible count written by the rank pass, read on device
    pub counter: &'a Buffer,
    pub keys: &'a Buffer,
    pub values: &'a Buffer,
    pub scratch: &'a Buffer,
}


/// GPU key/value sort over the ranked visibility buffers.
///
/// After `sort`, `values[0..visible)` is a permutation of the ranked indices
/// ordered by non-decreasing key, where `visible` is read from the counter.
pub trait SplatSorter: Send + Sync + 'static {
    fn storage_requirements(&self, max_count: u32) -> SortStorageRequirements;

    fn register_buffers(
        &mut self,
        render_device: &RenderDevice,
        render_queue: &RenderQueue,
        buffers: SortBuffers<'_>,
    );

    fn is_ready(&self, pipeline_cache: &PipelineCache) -> bool;

    fn sort(
        &self,
        encoder: &mut CommandEncoder,
        pipeline_cache: &PipelineCache,
        dispatch_bound: u32,
        scratch: &Buffer,
    );
}


#[derive(Resource)]
pub struct ActiveSorter {
    pub sorter: Box<dyn SplatSorter>,
    /// generations of the buffers the sorter was registered with
    pub registered: Option<Vec<u64>>,
}

impl ActiveSorter {
    pub fn new(sorter: impl SplatSorter) -> Self {
        Self {
            sorter: Box::new(sorter),
            registered: None,
        }
    }

    pub fn needs_registration(&self, generations: &[u64]) -> bool {
        self.registered.as_deref() != Some(generations)
    }
}
