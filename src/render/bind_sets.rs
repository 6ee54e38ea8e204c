use std::marker::PhantomData;

use bevy::{
    prelude::*,
    render::{
        render_resource::{
            BindGroup,
            BindGroupEntry,
            BindGroupLayout,
            BindGroupLayoutEntry,
            BindingResource,
            BindingType,
            Buffer,
            BufferBinding,
            BufferBindingType,
            BufferSize,
            ShaderStages,
        },
        renderer::RenderDevice,
    },
};

use crate::{
    io::schema::SchemaMode,
    render::pool::{
        BufferKind,
        BufferPool,
    },
};


pub trait BindFamily: Send + Sync + 'static {
    const READ_ONLY: bool;
    const NAME: &'static str;
}

/// Bound by the pass that produces the buffers' contents.
pub struct ReadWrite;

/// Bound by passes that only consume the buffers.
pub struct ReadOnly;

impl BindFamily for ReadWrite {
    const READ_ONLY: bool = false;
    const NAME: &'static str = "read_write";
}

impl BindFamily for ReadOnly {
    const READ_ONLY: bool = true;
    const NAME: &'static str = "read_only";
}


pub struct FamilyBindGroup<F: BindFamily> {
    bind_group: BindGroup,
    _family: PhantomData<F>,
}

impl<F: BindFamily> FamilyBindGroup<F> {
    pub fn new(bind_group: BindGroup) -> Self {
        Self {
            bind_group,
            _family: PhantomData,
        }
    }

    pub fn bind_group(&self) -> &BindGroup {
        &self.bind_group
    }
}


/// A bind set remembering the pool generations of its member buffers.
///
/// A set whose recorded generations differ from the pool's is stale and is
/// never returned by `get`.
pub struct TrackedBindSet<G> {
    members: Vec<BufferKind>,
    built: Option<(Vec<u64>, G)>,
}

impl<G> TrackedBindSet<G> {
    pub fn new(members: Vec<BufferKind>) -> Self {
        Self {
            members,
            built: None,
        }
    }

    pub fn members(&self) -> &[BufferKind] {
        &self.members
    }

    fn current_generations<B>(&self, pool: &BufferPool<B>) -> Option<Vec<u64>> {
        self.members
            .iter()
            .map(|kind| pool.generation(*kind))
            .collect()
    }

    pub fn is_stale<B>(&self, pool: &BufferPool<B>) -> bool {
        match (&self.built, self.current_generations(pool)) {
            (Some((built, _)), Some(current)) => *built != current,
            _ => true,
        }
    }

    pub fn get<B>(&self, pool: &BufferPool<B>) -> Option<&G> {
        if self.is_stale(pool) {
            return None;
        }

        self.built.as_ref().map(|(_, group)| group)
    }

    /// Rebuilds the set if stale. Returns whether `build` ran.
    pub fn rebuild_with<B>(
        &mut self,
        pool: &BufferPool<B>,
        build: impl FnOnce(&BufferPool<B>) -> G,
    ) -> bool {
        if !self.is_stale(pool) {
            return false;
        }

        let Some(generations) = self.current_generations(pool) else {
            self.built = None;
            return false;
        };

        self.built = Some((generations, build(pool)));
        true
    }
}


pub fn storage_layout_entry(
    binding: u32,
    read_only: bool,
    visibility: ShaderStages,
) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn family_visibility<F: BindFamily>() -> ShaderStages {
    if F::READ_ONLY {
        ShaderStages::COMPUTE | ShaderStages::VERTEX
    } else {
        ShaderStages::COMPUTE
    }
}

pub fn family_layout<F: BindFamily>(
    render_device: &RenderDevice,
    label: &str,
    member_count: usize,
) -> BindGroupLayout {
    let entries = (0..member_count as u32)
        .map(|binding| storage_layout_entry(binding, F::READ_ONLY, family_visibility::<F>()))
        .collect::<Vec<_>>();

    render_device.create_bind_group_layout(
        format!("{label}_{}_layout", F::NAME).as_str(),
        &entries,
    )
}

pub fn visibility_members<F: BindFamily>() -> Vec<BufferKind> {
    if F::READ_ONLY {
        vec![BufferKind::SortIndices]
    } else {
        vec![
            BufferKind::VisibleCount,
            BufferKind::SortKeys,
            BufferKind::SortIndices,
        ]
    }
}

fn whole_buffer(buffer: &Buffer) -> BindingResource {
    BindingResource::Buffer(BufferBinding {
        buffer,
        offset: 0,
        size: None,
    })
}

fn family_bind_group<F: BindFamily>(
    render_device: &RenderDevice,
    label: &str,
    layout: &BindGroupLayout,
    pool: &BufferPool<Buffer>,
    members: &[BufferKind],
) -> FamilyBindGroup<F> {
    let entries = members
        .iter()
        .enumerate()
        .filter_map(|(binding, kind)| {
            pool.buffer(*kind).map(|buffer| BindGroupEntry {
                binding: binding as u32,
                resource: whole_buffer(buffer),
            })
        })
        .collect::<Vec<_>>();

    FamilyBindGroup::new(render_device.create_bind_group(
        format!("{label}_{}_bind_group", F::NAME).as_str(),
        layout,
        &entries,
    ))
}


#[derive(Resource)]
pub struct SplatLayouts {
    pub attributes_read_write: BindGroupLayout,
    pub attributes_read_only: BindGroupLayout,
    pub visibility_read_write: BindGroupLayout,
    pub visibility_read_only: BindGroupLayout,
    pub raw_scene: BindGroupLayout,
}

impl SplatLayouts {
    pub fn new(render_device: &RenderDevice, mode: SchemaMode) -> Self {
        let attribute_count = mode.attributes().len();

        let raw_scene = render_device.create_bind_group_layout(
            "splat_raw_scene_layout",
            &[
                storage_layout_entry(0, true, ShaderStages::COMPUTE),
                storage_layout_entry(1, true, ShaderStages::COMPUTE),
            ],
        );

        Self {
            attributes_read_write: family_layout::<ReadWrite>(render_device, "splat_attributes", attribute_count),
            attributes_read_only: family_layout::<ReadOnly>(render_device, "splat_attributes", attribute_count),
            visibility_read_write: family_layout::<ReadWrite>(render_device, "splat_visibility", visibility_members::<ReadWrite>().len()),
            visibility_read_only: family_layout::<ReadOnly>(render_device, "splat_visibility", visibility_members::<ReadOnly>().len()),
            raw_scene,
        }
    }
}


#[derive(Resource)]
pub struct SplatBindSets {
    pub attributes_read_write: TrackedBindSet<FamilyBindGroup<ReadWrite>>,
    pub attributes_read_only: TrackedBindSet<FamilyBindGroup<ReadOnly>>,
    pub visibility_read_write: TrackedBindSet<FamilyBindGroup<ReadWrite>>,
    pub visibility_read_only: TrackedBindSet<FamilyBindGroup<ReadOnly>>,
    pub raw_scene: TrackedBindSet<FamilyBindGroup<ReadOnly>>,
}

impl SplatBindSets {
    pub fn new(mode: SchemaMode) -> Self {
        let attributes = mode.attributes()
            .iter()
            .map(|attribute| attribute.kind)
            .collect::<Vec<_>>();

        Self {
            attributes_read_write: TrackedBindSet::new(attributes.clone()),
            attributes_read_only: TrackedBindSet::new(attributes),
            visibility_read_write: TrackedBindSet::new(visibility_members::<ReadWrite>()),
            visibility_read_only: TrackedBindSet::new(visibility_members::<ReadOnly>()),
            raw_scene: TrackedBindSet::new(vec![BufferKind::RawScene]),
        }
    }

    /// Recreates every set whose buffers changed generation. Returns how many were rebuilt.
    pub fn rebuild(
        &mut self,
        pool: &mut BufferPool<Buffer>,
        render_device: &RenderDevice,
        layouts: &SplatLayouts,
        header_block_bytes: u64,
    ) -> usize {
        if !pool.take_dirty() && !self.any_stale(pool) {
            return 0;
        }

        let pool = &*pool;
        let mut rebuilt = 0;

        let members = self.attributes_read_write.members().to_vec();
        rebuilt += self.attributes_read_write.rebuild_with(pool, |pool| {
            family_bind_group(render_device, "splat_attributes", &layouts.attributes_read_write, pool, &members)
        }) as usize;

        let members = self.attributes_read_only.members().to_vec();
        rebuilt += self.attributes_read_only.rebuild_with(pool, |pool| {
            family_bind_group(render_device, "splat_attributes", &layouts.attributes_read_only, pool, &members)
        }) as usize;

        let members = self.visibility_read_write.members().to_vec();
        rebuilt += self.visibility_read_write.rebuild_with(pool, |pool| {
            family_bind_group(render_device, "splat_visibility", &layouts.visibility_read_write, pool, &members)
        }) as usize;

        let members = self.visibility_read_only.members().to_vec();
        rebuilt += self.visibility_read_only.rebuild_with(pool, |pool| {
            family_bind_group(render_device, "splat_visibility", &layouts.visibility_read_only, pool, &members)
        }) as usize;

        rebuilt += self.raw_scene.rebuild_with(pool, |pool| {
            raw_scene_bind_group(render_device, &layouts.raw_scene, pool, header_block_bytes)
        }) as usize;

        if rebuilt > 0 {
            debug!("rebuilt {} splat bind sets", rebuilt);
        }

        rebuilt
    }

    pub fn any_stale<B>(&self, pool: &BufferPool<B>) -> bool {
        self.attributes_read_write.is_stale(pool)
            || self.attributes_read_only.is_stale(pool)
            || self.visibility_read_write.is_stale(pool)
            || self.visibility_read_only.is_stale(pool)
            || self.raw_scene.is_stale(pool)
    }

    pub fn ingest_ready<B>(&self, pool: &BufferPool<B>) -> bool {
        !self.attributes_read_write.is_stale(pool) && !self.raw_scene.is_stale(pool)
    }

    pub fn view_ready<B>(&self, pool: &BufferPool<B>) -> bool {
        !self.attributes_read_only.is_stale(pool)
            && !self.visibility_read_write.is_stale(pool)
            && !self.visibility_read_only.is_stale(pool)
    }
}


fn raw_scene_bind_group(
    render_device: &RenderDevice,
    layout: &BindGroupLayout,
    pool: &BufferPool<Buffer>,
    header_block_bytes: u64,
) -> FamilyBindGroup<ReadOnly> {
    let mut entries = Vec::with_capacity(2);
    if let Some(raw) = pool.get(BufferKind::RawScene) {
        entries.push(BindGroupEntry {
            binding: 0,
            resource: BindingResource::Buffer(BufferBinding {
                buffer: &raw.buffer,
                offset: 0,
                size: BufferSize::new(crate::io::schema::HEADER_BLOCK_BYTES),
            }),
        });
        entries.push(BindGroupEntry {
            binding: 1,
            resource: BindingResource::Buffer(BufferBinding {
                buffer: &raw.buffer,
                offset: header_block_bytes,
                size: None,
            }),
        });
    }

    FamilyBindGroup::new(render_device.create_bind_group(
        "splat_raw_scene_bind_group",
        layout,
        &entries,
    ))
}
