use bevy::{
    prelude::*,
    render::render_resource::*,
};
use static_assertions::const_assert_eq;
use wgpu::util::DrawIndexedIndirectArgs;

use crate::{
    io::schema::SchemaMode,
    render::{
        bind_sets::SplatLayouts,
        SPLAT_SHADER_HANDLE,
    },
};


pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 1, 3];

/// Byte offset of `instance_count` within the indirect arguments.
pub const INSTANCE_COUNT_OFFSET: u64 = 4;

const_assert_eq!(std::mem::size_of::<DrawIndexedIndirectArgs>(), 20);


/// Indirect arguments with the instance count left for the device-side copy.
pub fn initial_indirect_args() -> DrawIndexedIndirectArgs {
    DrawIndexedIndirectArgs {
        index_count: QUAD_INDICES.len() as u32,
        instance_count: 0,
        first_index: 0,
        base_vertex: 0,
        first_instance: 0,
    }
}


#[derive(Resource)]
pub struct SplatRenderPipeline {
    pub camera_layout: BindGroupLayout,
    pub attributes_layout: BindGroupLayout,
    pub visibility_layout: BindGroupLayout,
    pub shader_defs: Vec<ShaderDefVal>,
}

impl SplatRenderPipeline {
    pub fn new(
        camera_layout: &BindGroupLayout,
        layouts: &SplatLayouts,
        mode: SchemaMode,
    ) -> Self {
        Self {
            camera_layout: camera_layout.clone(),
            attributes_layout: layouts.attributes_read_only.clone(),
            visibility_layout: layouts.visibility_read_only.clone(),
            shader_defs: mode.shader_defs(),
        }
    }
}

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub struct SplatPipelineKey {
    pub format: TextureFormat,
    pub samples: u32,
}

impl SpecializedRenderPipeline for SplatRenderPipeline {
    type Key = SplatPipelineKey;

    fn specialize(&self, key: Self::Key) -> RenderPipelineDescriptor {
        RenderPipelineDescriptor {
            label: Some("splat_render_pipeline".into()),
            layout: vec![
                self.camera_layout.clone(),
                self.attributes_layout.clone(),
                self.visibility_layout.clone(),
            ],
            vertex: VertexState {
                shader: SPLAT_SHADER_HANDLE,
                shader_defs: self.shader_defs.clone(),
                entry_point: "vs_splat".into(),
                buffers: vec![],
            },
            fragment: Some(FragmentState {
                shader: SPLAT_SHADER_HANDLE,
                shader_defs: self.shader_defs.clone(),
                entry_point: "fs_splat".into(),
                targets: vec![Some(ColorTargetState {
                    format: key.format,
                    blend: Some(BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: ColorWrites::ALL,
                })],
            }),
            primitive: PrimitiveState {
                topology: PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: FrontFace::Ccw,
                unclipped_depth: false,
                cull_mode: None,
                conservative: false,
                polygon_mode: PolygonMode::Fill,
            },
            depth_stencil: None,
            multisample: MultisampleState {
                count: key.samples,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            push_constant_ranges: Vec::new(),
            zero_initialize_workgroup_memory: false,
        }
    }
}

