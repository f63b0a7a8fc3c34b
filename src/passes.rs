use std::borrow::Cow;

use crate::context::Context;
use crate::resources::{ConstState, SceneState, TransientState};
use crate::scene::CULL_WORKGROUP_SIZE;
use crate::slots;

/// The front of the frame: counter setup, instance culling, cluster
/// culling. The discrete path records one compute pass per stage so every
/// producer's writes drain before its consumer runs; the fused path chains
/// all three in a single pass and sizes the cluster grid on the GPU.
pub struct CullPhase {
    setup: wgpu::ComputePipeline,
    instance_cull: wgpu::ComputePipeline,
    cluster_cull: wgpu::ComputePipeline,
    cluster_prepare: wgpu::ComputePipeline,
    setup_bind_group: wgpu::BindGroup,
    instance_bind_group: wgpu::BindGroup,
    cluster_bind_group: wgpu::BindGroup,
    prepare_bind_group: wgpu::BindGroup,
}

fn compute_buffer_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn buffer_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

impl CullPhase {
    pub fn new(
        context: &mut Context,
        scene_state: &SceneState,
        transient: &TransientState,
    ) -> Self {
        let device = &context.device;

        let setup_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame setup"),
            entries: &[
                compute_buffer_entry(slots::SETUP_INSTANCE_COUNTER, false),
                compute_buffer_entry(slots::SETUP_CLUSTER_COUNTER, false),
                compute_buffer_entry(slots::SETUP_DRAW_ARGS, false),
            ],
        });
        let setup_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame setup"),
            layout: &setup_layout,
            entries: &[
                buffer_entry(slots::SETUP_INSTANCE_COUNTER, &transient.visible_instance_counter),
                buffer_entry(slots::SETUP_CLUSTER_COUNTER, &transient.visible_cluster_counter),
                buffer_entry(slots::SETUP_DRAW_ARGS, &transient.draw_args),
            ],
        });

        let instance_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("instance cull"),
            entries: &[
                compute_buffer_entry(slots::ICULL_VISIBLE_INSTANCES, false),
                compute_buffer_entry(slots::ICULL_INSTANCE_COUNTER, false),
            ],
        });
        let instance_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("instance cull"),
            layout: &instance_layout,
            entries: &[
                buffer_entry(slots::ICULL_VISIBLE_INSTANCES, &transient.visible_instances),
                buffer_entry(slots::ICULL_INSTANCE_COUNTER, &transient.visible_instance_counter),
            ],
        });

        let cluster_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cluster cull"),
            entries: &[
                compute_buffer_entry(slots::CCULL_VISIBLE_INSTANCES, true),
                compute_buffer_entry(slots::CCULL_INSTANCE_COUNTER, true),
                compute_buffer_entry(slots::CCULL_VISIBLE_CLUSTERS, false),
                compute_buffer_entry(slots::CCULL_CLUSTER_COUNTER, false),
                compute_buffer_entry(slots::CCULL_DRAW_ARGS, false),
                compute_buffer_entry(slots::CCULL_DRAW_RECORDS, false),
            ],
        });
        let cluster_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cluster cull"),
            layout: &cluster_layout,
            entries: &[
                buffer_entry(slots::CCULL_VISIBLE_INSTANCES, &transient.visible_instances),
                buffer_entry(slots::CCULL_INSTANCE_COUNTER, &transient.visible_instance_counter),
                buffer_entry(slots::CCULL_VISIBLE_CLUSTERS, &transient.visible_clusters),
                buffer_entry(slots::CCULL_CLUSTER_COUNTER, &transient.visible_cluster_counter),
                buffer_entry(slots::CCULL_DRAW_ARGS, &transient.draw_args),
                buffer_entry(slots::CCULL_DRAW_RECORDS, &transient.draw_records),
            ],
        });

        let prepare_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cluster prepare"),
            entries: &[
                compute_buffer_entry(slots::PREPARE_INSTANCE_COUNTER, true),
                compute_buffer_entry(slots::PREPARE_DISPATCH_ARGS, false),
            ],
        });
        let prepare_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cluster prepare"),
            layout: &prepare_layout,
            entries: &[
                buffer_entry(slots::PREPARE_INSTANCE_COUNTER, &transient.visible_instance_counter),
                buffer_entry(slots::PREPARE_DISPATCH_ARGS, &transient.cluster_dispatch),
            ],
        });

        let const_layout = ConstState::bind_group_layout(context);
        let make_pipeline = |context: &mut Context,
                             source: &str,
                             path: &str,
                             entry: &str,
                             pass_layout: &wgpu::BindGroupLayout| {
            let module = context.create_shader_module(source, path, &[]);
            let shader = context
                .device
                .create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(entry),
                    source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
                });

            let layout = context
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(entry),
                    push_constant_ranges: &[],
                    bind_group_layouts: &[
                        const_layout,
                        &scene_state.bind_group_layout,
                        pass_layout,
                    ],
                });

            context
                .device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry),
                    layout: Some(&layout),
                    module: &shader,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    cache: None,
                })
        };

        let setup = make_pipeline(
            context,
            include_str!("shaders/frame_setup.wgsl"),
            "shaders/frame_setup.wgsl",
            "frame_setup",
            &setup_layout,
        );
        let instance_cull = make_pipeline(
            context,
            include_str!("shaders/instance_cull.wgsl"),
            "shaders/instance_cull.wgsl",
            "instance_cull",
            &instance_layout,
        );
        let cluster_cull = make_pipeline(
            context,
            include_str!("shaders/cluster_cull.wgsl"),
            "shaders/cluster_cull.wgsl",
            "cluster_cull",
            &cluster_layout,
        );
        let cluster_prepare = make_pipeline(
            context,
            include_str!("shaders/cluster_prepare.wgsl"),
            "shaders/cluster_prepare.wgsl",
            "cluster_prepare",
            &prepare_layout,
        );

        Self {
            setup,
            instance_cull,
            cluster_cull,
            cluster_prepare,
            setup_bind_group,
            instance_bind_group,
            cluster_bind_group,
            prepare_bind_group,
        }
    }

    fn bind_common(
        &self,
        pass: &mut wgpu::ComputePass<'_>,
        const_state: &ConstState,
        const_offset: u32,
        scene_state: &SceneState,
    ) {
        pass.set_bind_group(slots::GROUP_CONSTANTS, &const_state.bind_group, &[const_offset]);
        pass.set_bind_group(slots::GROUP_SCENE, &scene_state.bind_group, &[]);
    }

    /// Only seed the counters. Used when the ray path replaces culling and
    /// raster: the lists stay empty and the readback reports zero.
    pub fn record_setup_only(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        const_state: &ConstState,
        const_offset: u32,
        scene_state: &SceneState,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("frame setup"),
            timestamp_writes: None,
        });
        self.bind_common(&mut pass, const_state, const_offset, scene_state);
        pass.set_pipeline(&self.setup);
        pass.set_bind_group(slots::GROUP_PASS, &self.setup_bind_group, &[]);
        pass.dispatch_workgroups(1, 1, 1);
    }

    /// Discrete path: one named pass per stage. The pass boundaries are the
    /// barriers between each producer and its consumer.
    pub fn record_discrete(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        const_state: &ConstState,
        const_offset: u32,
        scene_state: &SceneState,
        transient: &TransientState,
    ) {
        self.record_setup_only(encoder, const_state, const_offset, scene_state);

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("instance cull"),
                timestamp_writes: None,
            });
            self.bind_common(&mut pass, const_state, const_offset, scene_state);
            pass.set_pipeline(&self.instance_cull);
            pass.set_bind_group(slots::GROUP_PASS, &self.instance_bind_group, &[]);
            pass.dispatch_workgroups(
                scene_state.instance_count.div_ceil(CULL_WORKGROUP_SIZE),
                1,
                1,
            );
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("cluster cull"),
                timestamp_writes: None,
            });
            self.bind_common(&mut pass, const_state, const_offset, scene_state);
            pass.set_pipeline(&self.cluster_cull);
            pass.set_bind_group(slots::GROUP_PASS, &self.cluster_bind_group, &[]);
            pass.dispatch_workgroups(
                transient.max_cluster_slots.div_ceil(CULL_WORKGROUP_SIZE),
                1,
                1,
            );
        }
    }

    /// Fused producer/consumer path: the whole chain in one pass, with the
    /// cluster grid sized from the surviving instance count instead of the
    /// CPU-side worst case.
    pub fn record_fused(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        const_state: &ConstState,
        const_offset: u32,
        scene_state: &SceneState,
        transient: &TransientState,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("cull chain"),
            timestamp_writes: None,
        });
        self.bind_common(&mut pass, const_state, const_offset, scene_state);

        pass.set_pipeline(&self.setup);
        pass.set_bind_group(slots::GROUP_PASS, &self.setup_bind_group, &[]);
        pass.dispatch_workgroups(1, 1, 1);

        pass.set_pipeline(&self.instance_cull);
        pass.set_bind_group(slots::GROUP_PASS, &self.instance_bind_group, &[]);
        pass.dispatch_workgroups(
            scene_state.instance_count.div_ceil(CULL_WORKGROUP_SIZE),
            1,
            1,
        );

        pass.set_pipeline(&self.cluster_prepare);
        pass.set_bind_group(slots::GROUP_PASS, &self.prepare_bind_group, &[]);
        pass.dispatch_workgroups(1, 1, 1);

        pass.set_pipeline(&self.cluster_cull);
        pass.set_bind_group(slots::GROUP_PASS, &self.cluster_bind_group, &[]);
        pass.dispatch_workgroups_indirect(&transient.cluster_dispatch, 0);
    }
}
