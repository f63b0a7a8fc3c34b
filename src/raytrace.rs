use std::borrow::Cow;

use crate::accel::AccelState;
use crate::context::Context;
use crate::resources::{ConstState, RenderState, SceneState};
use crate::slots;

/// Alternative visibility path: replaces instance culling, cluster culling,
/// and the raster with one ray per pixel against the cluster TLAS. The
/// resolve pass afterwards is unchanged.
pub struct RaytracePhase {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
}

impl RaytracePhase {
    pub fn new(
        context: &mut Context,
        scene_state: &SceneState,
        render_state: &RenderState,
        accel: &AccelState,
    ) -> Self {
        let module = context.create_shader_module(
            include_str!("shaders/raytrace.wgsl"),
            "shaders/raytrace.wgsl",
            &[],
        );

        let shader = context
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("raytrace"),
                source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
            });

        let bind_group_layout =
            context
                .device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("raytrace"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: slots::TRACE_TLAS,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::AccelerationStructure,
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: slots::TRACE_VISIBILITY,
                            visibility: wgpu::ShaderStages::COMPUTE,
                            ty: wgpu::BindingType::StorageTexture {
                                format: wgpu::TextureFormat::R32Uint,
                                view_dimension: wgpu::TextureViewDimension::D2,
                                access: wgpu::StorageTextureAccess::WriteOnly,
                            },
                            count: None,
                        },
                    ],
                });

        let bind_group = create_bind_group(context, render_state, accel, &bind_group_layout);

        let pipeline_layout =
            context
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("raytrace"),
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
                label: Some("raytrace"),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some("trace"),
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
        accel: &AccelState,
    ) {
        self.bind_group = create_bind_group(context, render_state, accel, &self.bind_group_layout);
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
            label: Some("raytrace"),
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
    accel: &AccelState,
    layout: &wgpu::BindGroupLayout,
) -> wgpu::BindGroup {
    context
        .device
        .create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("raytrace"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: slots::TRACE_TLAS,
                    resource: wgpu::BindingResource::AccelerationStructure(accel.tlas()),
                },
                wgpu::BindGroupEntry {
                    binding: slots::TRACE_VISIBILITY,
                    resource: wgpu::BindingResource::TextureView(&render_state.visibility.view),
                },
            ],
        })
}
