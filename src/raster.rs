use std::borrow::Cow;

use crate::context::Context;
use crate::resources::{
    self, ConstState, RenderState, SceneState, TransientState,
};
use crate::slots;

/// The indirect visibility raster. Every draw instance expands
/// one visible-cluster entry in the vertex shader; the pixel shader writes
/// the packed visibility word.
pub struct RasterPhase {
    pipeline: wgpu::RenderPipeline,
    bind_group: wgpu::BindGroup,
}

impl RasterPhase {
    pub fn new(
        context: &mut Context,
        scene_state: &SceneState,
        transient: &TransientState,
    ) -> Self {
        let module = context.create_shader_module(
            include_str!("shaders/visibility.wgsl"),
            "shaders/visibility.wgsl",
            &[],
        );

        let shader = context
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("visibility"),
                source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
            });

        let bind_group_layout =
            context
                .device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("visibility raster"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: slots::RASTER_VISIBLE_CLUSTERS,
                        visibility: wgpu::ShaderStages::VERTEX,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    }],
                });

        let bind_group = context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("visibility raster"),
                layout: &bind_group_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: slots::RASTER_VISIBLE_CLUSTERS,
                    resource: transient.visible_clusters.as_entire_binding(),
                }],
            });

        let pipeline_layout =
            context
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("visibility raster"),
                    push_constant_ranges: &[],
                    bind_group_layouts: &[
                        ConstState::bind_group_layout(context),
                        &scene_state.bind_group_layout,
                        &bind_group_layout,
                    ],
                });

        let pipeline = context
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("visibility raster"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    entry_point: Some("vertex"),
                    module: &shader,
                    compilation_options: Default::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    entry_point: Some("fragment"),
                    module: &shader,
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: resources::VISIBILITY_BUFFER_FORMAT,
                        write_mask: wgpu::ColorWrites::ALL,
                        blend: None,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    cull_mode: Some(wgpu::Face::Back),
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: resources::DEPTH_BUFFER_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        Self {
            pipeline,
            bind_group,
        }
    }

    /// Visibility cleared to zero, depth to one, then one indirect draw
    /// whose size the cluster-culling pass decided.
    pub fn record(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        const_state: &ConstState,
        const_offset: u32,
        scene_state: &SceneState,
        render_state: &RenderState,
        transient: &TransientState,
        use_records: bool,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("visibility raster"),
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &render_state.depth.view,
                stencil_ops: None,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
            }),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &render_state.visibility.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(slots::GROUP_CONSTANTS, &const_state.bind_group, &[const_offset]);
        pass.set_bind_group(slots::GROUP_SCENE, &scene_state.bind_group, &[]);
        pass.set_bind_group(slots::GROUP_PASS, &self.bind_group, &[]);

        if use_records {
            // Record path: the per-cluster draw records and the draw count
            // straight from lane zero of the cluster counter.
            pass.multi_draw_indirect_count(
                &transient.draw_records,
                0,
                &transient.visible_cluster_counter,
                0,
                transient.max_cluster_slots,
            );
        } else {
            pass.draw_indirect(&transient.draw_args, 0);
        }
    }
}
