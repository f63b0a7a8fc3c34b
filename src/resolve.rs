use std::borrow::Cow;

use crate::context::Context;
use crate::resources::{self, ConstState, RenderState, SceneState, TransientState};
use crate::slots;

/// Turns the visibility buffer into the color buffer, 8×8
/// threads per tile. Also hosts the id-visualization debug modes.
pub struct ResolvePhase {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
}

impl ResolvePhase {
    pub fn new(
        context: &mut Context,
        scene_state: &SceneState,
        render_state: &RenderState,
        transient: &TransientState,
        cluster_table: Option<&wgpu::Buffer>,
    ) -> Self {
        let module = context.create_shader_module(
            include_str!("shaders/resolve.wgsl"),
            "shaders/resolve.wgsl",
            &[],
        );

        let shader = context
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("resolve"),
                source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
            });

        let bind_group_layout =
            context
                .device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("resolve"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: slots::RESOLVE_VISIBILITY,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Uint,
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: slots::RESOLVE_DEPTH,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Depth,
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: slots::RESOLVE_COLOR,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::StorageTexture {
                                format: resources::COLOR_BUFFER_FORMAT,
                                view_dimension: wgpu::TextureViewDimension::D2,
                                access: wgpu::StorageTextureAccess::WriteOnly,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: slots::RESOLVE_VISIBLE_CLUSTERS,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Storage { read_only: true },
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: slots::RESOLVE_CLUSTER_TABLE,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Storage { read_only: true },
                                has_dynamic_offset: false,
                                min_binding_size: None,
                            },
                            count: None,
                        },
                    ],
                });

        let bind_group = create_bind_group(
            context,
            render_state,
            transient,
            cluster_table,
            &bind_group_layout,
        );

        let pipeline_layout =
            context
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("resolve"),
                    push_constant_ranges: &[],
                    bind_group_layouts: &[
                        ConstState::bind_group_layout(context),
                        &scene_state.bind_group_layout,
                        &bind_group_layout,
                    ],
                });

        let pipeline = context
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some("resolve"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("resolve"),
                compilation_options: Default::default(),
                cache: None,
            });

        Self {
            pipeline,
            bind_group_layout,
            bind_group,
        }
    }

    pub fn resize_surface(
        &mut self,
        context: &Context,
        render_state: &RenderState,
        transient: &TransientState,
        cluster_table: Option<&wgpu::Buffer>,
    ) {
        self.bind_group = create_bind_group(
            context,
            render_state,
            transient,
            cluster_table,
            &self.bind_group_layout,
        );
    }

    pub fn record(
        &self,
        context: &Context,
        encoder: &mut wgpu::CommandEncoder,
        const_state: &ConstState,
        const_offset: u32,
        scene_state: &SceneState,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("resolve"),
            timestamp_writes: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(slots::GROUP_CONSTANTS, &const_state.bind_group, &[const_offset]);
        pass.set_bind_group(slots::GROUP_SCENE, &scene_state.bind_group, &[]);
        pass.set_bind_group(slots::GROUP_PASS, &self.bind_group, &[]);

        pass.dispatch_workgroups(
            context.surface_size.width.div_ceil(8),
            context.surface_size.height.div_ceil(8),
            1,
        );
    }
}

fn create_bind_group(
    context: &Context,
    render_state: &RenderState,
    transient: &TransientState,
    cluster_table: Option<&wgpu::Buffer>,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::BindGroup {
    // Without acceleration structures there is no cluster-instance table;
    // the slot is satisfied with the visible-cluster list, which the shader
    // then never reads through.
    let cluster_table = cluster_table.unwrap_or(&transient.visible_clusters);

    context
        .device
        .create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("resolve"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: slots::RESOLVE_VISIBILITY,
                    resource: wgpu::BindingResource::TextureView(&render_state.visibility.view),
                },
                wgpu::BindGroupEntry {
                    binding: slots::RESOLVE_DEPTH,
                    resource: wgpu::BindingResource::TextureView(&render_state.depth.view),
                },
                wgpu::BindGroupEntry {
                    binding: slots::RESOLVE_COLOR,
                    resource: wgpu::BindingResource::TextureView(&render_state.color.view),
                },
                wgpu::BindGroupEntry {
                    binding: slots::RESOLVE_VISIBLE_CLUSTERS,
                    resource: transient.visible_clusters.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: slots::RESOLVE_CLUSTER_TABLE,
                    resource: cluster_table.as_entire_binding(),
                },
            ],
        })
}
