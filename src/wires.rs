use std::borrow::Cow;
use std::mem;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::camera::Frustum;
use crate::context::Context;
use crate::resources::{self, ConstState, RenderState};
use crate::scene::{Aabb, SceneData};
use crate::slots;

#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct WireVertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

pub const MAX_WIRE_VERTICES: usize = 1 << 18;
pub const WIRE_BUFFER_BYTES: u64 = (MAX_WIRE_VERTICES * mem::size_of::<WireVertex>()) as u64;

const FRUSTUM_COLOR: [f32; 4] = [1.0, 0.85, 0.1, 1.0];
const INSTANCE_COLOR: [f32; 4] = [0.2, 1.0, 0.3, 1.0];
const CLUSTER_COLOR: [f32; 4] = [0.3, 0.9, 1.0, 1.0];

/// Box edges in the corner ordering of [`Aabb::corners`].
const BOX_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 3),
    (3, 2),
    (2, 0),
    (4, 5),
    (5, 7),
    (7, 6),
    (6, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

/// What the wire overlay should show this frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct WireRequest {
    pub instance_bounds: bool,
    pub cluster_bounds: bool,
    /// Inverse view-projection of the locked culling camera, when locked.
    pub locked_frustum: Option<Mat4>,
}

/// Builds the frame's debug lines on the CPU: the locked cull camera's
/// frustum, and the instance and cluster boxes that survive a CPU run of
/// the same plane test the culling shaders use.
pub fn build_wires(
    scene: &SceneData,
    cull_frustum: &Frustum,
    request: WireRequest,
) -> Vec<WireVertex> {
    let mut vertices = Vec::new();

    if let Some(inverse_view_proj) = request.locked_frustum {
        push_frustum(&mut vertices, inverse_view_proj);
    }

    if !request.instance_bounds && !request.cluster_bounds {
        return vertices;
    }

    for instance in &scene.instances {
        if !cull_frustum.contains_aabb(instance.center, instance.extents) {
            continue;
        }

        if request.instance_bounds {
            push_box(&mut vertices, instance.aabb(), INSTANCE_COLOR);
        }

        if request.cluster_bounds {
            let mesh = &scene.meshes[instance.mesh_index as usize];
            let range = mesh.cluster_start as usize..(mesh.cluster_start + mesh.cluster_count) as usize;
            for cluster in &scene.clusters[range] {
                let bounds = cluster.aabb().transformed(instance.model);
                if cull_frustum.contains_aabb(bounds.center, bounds.extents) {
                    push_box(&mut vertices, bounds, CLUSTER_COLOR);
                }
            }
        }

        if vertices.len() >= MAX_WIRE_VERTICES {
            break;
        }
    }

    vertices.truncate(MAX_WIRE_VERTICES);
    vertices
}

/// The visible-cluster set a correct GPU cull must produce, in per-instance
/// order. The tests pin the culling contract against it.
#[allow(unused)]
pub fn cpu_visible_clusters(scene: &SceneData, cull_frustum: &Frustum) -> Vec<u32> {
    let mut entries = Vec::new();

    for (instance_id, instance) in scene.instances.iter().enumerate() {
        if !cull_frustum.contains_aabb(instance.center, instance.extents) {
            continue;
        }

        let mesh = &scene.meshes[instance.mesh_index as usize];
        for cluster_local in 0..mesh.cluster_count {
            let cluster = &scene.clusters[(mesh.cluster_start + cluster_local) as usize];
            let bounds = cluster.aabb().transformed(instance.model);
            if cull_frustum.contains_aabb(bounds.center, bounds.extents) {
                entries.push(crate::scene::pack_cluster_entry(
                    instance_id as u32,
                    cluster_local,
                ));
            }
        }
    }

    entries
}

fn push_box(vertices: &mut Vec<WireVertex>, aabb: Aabb, color: [f32; 4]) {
    let corners = aabb.corners();
    push_edges(vertices, &corners, color);
}

fn push_frustum(vertices: &mut Vec<WireVertex>, inverse_view_proj: Mat4) {
    let mut corners = [Vec3::ZERO; 8];
    for (index, corner) in corners.iter_mut().enumerate() {
        let x = if index & 1 == 0 { -1.0 } else { 1.0 };
        let y = if index & 2 == 0 { -1.0 } else { 1.0 };
        let z = if index & 4 == 0 { 0.0 } else { 1.0 };

        let point = inverse_view_proj * Vec4::new(x, y, z, 1.0);
        *corner = point.truncate() / point.w;
    }
    push_edges(vertices, &corners, FRUSTUM_COLOR);
}

fn push_edges(vertices: &mut Vec<WireVertex>, corners: &[Vec3; 8], color: [f32; 4]) {
    for (a, b) in BOX_EDGES {
        vertices.push(WireVertex {
            position: corners[a].to_array(),
            color,
        });
        vertices.push(WireVertex {
            position: corners[b].to_array(),
            color,
        });
    }
}

/// Line-list pass over the shaded color buffer.
pub struct WirePhase {
    pipeline: wgpu::RenderPipeline,
}

impl WirePhase {
    pub fn new(context: &mut Context) -> Self {
        let module = context.create_shader_module(
            include_str!("shaders/wires.wgsl"),
            "shaders/wires.wgsl",
            &[],
        );

        let shader = context
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("wires"),
                source: wgpu::ShaderSource::Naga(Cow::Owned(module)),
            });

        let pipeline_layout =
            context
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("wires"),
                    push_constant_ranges: &[],
                    bind_group_layouts: &[ConstState::bind_group_layout(context)],
                });

        let pipeline = context
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("wires"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    entry_point: Some("vertex"),
                    module: &shader,
                    compilation_options: Default::default(),
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: mem::size_of::<WireVertex>() as u64,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x4],
                    }],
                },
                fragment: Some(wgpu::FragmentState {
                    entry_point: Some("fragment"),
                    module: &shader,
                    compilation_options: Default::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: resources::COLOR_BUFFER_FORMAT,
                        write_mask: wgpu::ColorWrites::ALL,
                        blend: None,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::LineList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });

        Self { pipeline }
    }

    pub fn record(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        const_state: &ConstState,
        const_offset: u32,
        render_state: &RenderState,
        wire_buffer: &wgpu::Buffer,
        vertex_count: u32,
    ) {
        if vertex_count == 0 {
            return;
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("wires"),
            depth_stencil_attachment: None,
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &render_state.color.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(slots::GROUP_CONSTANTS, &const_state.bind_group, &[const_offset]);
        pass.set_vertex_buffer(0, wire_buffer.slice(..));
        pass.draw(0..vertex_count, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Camera, CameraDelta};
    use crate::generator;
    use crate::scene::{entry_cluster as unpack_cluster, entry_instance as unpack_instance};

    fn grid_camera() -> Camera {
        // Looking down negative z from the origin at the generated grid.
        let mut camera = Camera::new(16.0 / 9.0);
        camera.pos = Vec3::ZERO;
        camera.yaw = -90.0;
        camera.move_by_delta(CameraDelta::default());
        camera
    }

    #[test]
    fn no_toggles_no_lock_builds_nothing() {
        let scene = generator::build_demo_scene(0);
        let frustum = grid_camera().frustum();
        assert!(build_wires(&scene, &frustum, WireRequest::default()).is_empty());
    }

    #[test]
    fn a_locked_camera_contributes_twelve_edges() {
        let scene = generator::build_demo_scene(0);
        let camera = grid_camera();
        let request = WireRequest {
            locked_frustum: Some(camera.view_proj().inverse()),
            ..Default::default()
        };
        let vertices = build_wires(&scene, &camera.frustum(), request);
        assert_eq!(vertices.len(), 24);
    }

    #[test]
    fn instance_wires_match_the_cpu_cull() {
        let scene = generator::build_demo_scene(0);
        let frustum = grid_camera().frustum();

        let visible = scene
            .instances
            .iter()
            .filter(|instance| frustum.contains_aabb(instance.center, instance.extents))
            .count();
        assert!(visible > 0);

        let vertices = build_wires(
            &scene,
            &frustum,
            WireRequest {
                instance_bounds: true,
                ..Default::default()
            },
        );
        assert_eq!(vertices.len(), visible * 24);
    }

    #[test]
    fn nothing_is_built_for_a_scene_behind_the_camera() {
        let mut camera = grid_camera();
        camera.yaw = 90.0;
        camera.move_by_delta(CameraDelta::default());

        let scene = generator::build_demo_scene(0);
        let vertices = build_wires(
            &scene,
            &camera.frustum(),
            WireRequest {
                instance_bounds: true,
                cluster_bounds: true,
                ..Default::default()
            },
        );
        assert!(vertices.is_empty());
    }

    #[test]
    fn cpu_reference_sees_the_whole_grid_head_on() {
        let scene = generator::build_demo_scene(0);
        let entries = cpu_visible_clusters(&scene, &grid_camera().frustum());

        // All 100 instances are in view; of each cube's six face clusters
        // the back face's box is still inside the frustum, so all six
        // survive the box test.
        assert_eq!(entries.len(), 600);
        for entry in &entries {
            assert!(unpack_instance(*entry) < 100);
            assert!(unpack_cluster(*entry) < 6);
        }
    }

    #[test]
    fn cpu_reference_is_stable_under_drawing_camera_movement() {
        // The culling set depends on the cull frustum alone; flying the
        // drawing camera elsewhere must not change it.
        let scene = generator::build_demo_scene(0);
        let locked = grid_camera().frustum();
        let before = cpu_visible_clusters(&scene, &locked);

        let mut drawing = grid_camera();
        drawing.move_by_delta(CameraDelta {
            forward: 100.0,
            left: 40.0,
            yaw: 90.0,
            ..Default::default()
        });

        assert_eq!(cpu_visible_clusters(&scene, &locked), before);
    }
}
