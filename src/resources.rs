use std::{mem, num::NonZeroU64, sync::OnceLock};

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::UVec4;

use crate::{
    camera::{Camera, GpuCamera},
    context::Context,
    frame::FRAME_COUNT,
    scene::{self, DebugMode, SceneData},
    slots,
};

/// Per-frame constants. One 256-aligned slice per frame slot lives in a
/// single uniform buffer bound with a dynamic offset.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Constants {
    pub cull_camera: GpuCamera,
    pub draw_camera: GpuCamera,
    /// x: instance count, y: max cluster slots, z: cluster-slot stride.
    pub counts: UVec4,
    pub debug_mode: u32,
    pub visibility_source: u32,
    pub z_near: f32,
    pub z_far: f32,
    pub pad: [UVec4; 2],
}

pub const VISIBILITY_SOURCE_RASTER: u32 = 0;
pub const VISIBILITY_SOURCE_RAY: u32 = 1;

impl Constants {
    pub fn new(
        cull_camera: &Camera,
        draw_camera: &Camera,
        instance_count: u32,
        max_cluster_slots: u32,
        cluster_stride: u32,
        debug_mode: DebugMode,
        visibility_source: u32,
    ) -> Self {
        Self {
            cull_camera: GpuCamera::new(cull_camera),
            draw_camera: GpuCamera::new(draw_camera),
            counts: UVec4::new(instance_count, max_cluster_slots, cluster_stride, 0),
            debug_mode: debug_mode as u32,
            visibility_source,
            z_near: draw_camera.z_near,
            z_far: draw_camera.z_far,
            pad: [UVec4::ZERO; 2],
        }
    }
}

pub const CONST_STRIDE: u64 = mem::size_of::<Constants>() as u64;

bitflags! {
    /// Usage bits of the buffer factory. The raw-view distinction of the
    /// descriptor model lives in the shaders; here only allocation usage
    /// remains.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        const STORAGE = 1 << 0;
        const INDIRECT = 1 << 1;
        const VERTEX = 1 << 2;
        const COPY_SRC = 1 << 3;
        const ACCEL_INPUT = 1 << 4;
        /// CPU-mapped readback; exclusive with the other bits.
        const READBACK = 1 << 5;
    }
}

/// Declarative buffer description, constructed by the caller and passed by
/// value.
#[derive(Clone, Copy, Debug)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub count: u64,
    pub stride: u64,
    pub flags: BufferFlags,
}

pub fn create_buffer(device: &wgpu::Device, desc: BufferDesc) -> wgpu::Buffer {
    let usage = if desc.flags.contains(BufferFlags::READBACK) {
        wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST
    } else {
        let mut usage = wgpu::BufferUsages::COPY_DST;
        if desc.flags.contains(BufferFlags::STORAGE) {
            usage |= wgpu::BufferUsages::STORAGE;
        }
        if desc.flags.contains(BufferFlags::INDIRECT) {
            usage |= wgpu::BufferUsages::INDIRECT;
        }
        if desc.flags.contains(BufferFlags::VERTEX) {
            usage |= wgpu::BufferUsages::VERTEX;
        }
        if desc.flags.contains(BufferFlags::COPY_SRC) {
            usage |= wgpu::BufferUsages::COPY_SRC;
        }
        if desc.flags.contains(BufferFlags::ACCEL_INPUT) {
            usage |= wgpu::BufferUsages::BLAS_INPUT;
        }
        usage
    };

    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(desc.label),
        size: (desc.count * desc.stride).max(4),
        mapped_at_creation: false,
        usage,
    })
}

pub struct ConstState {
    pub const_buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
}

impl ConstState {
    pub fn new(context: &Context) -> Self {
        let const_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::UNIFORM,
            size: CONST_STRIDE * FRAME_COUNT as u64,
            mapped_at_creation: false,
            label: Some("constant buffer"),
        });

        let bind_group = context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("const state"),
                layout: Self::bind_group_layout(context),
                entries: &[wgpu::BindGroupEntry {
                    binding: slots::CONSTANTS_BINDING,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &const_buffer,
                        size: NonZeroU64::new(CONST_STRIDE),
                        offset: 0,
                    }),
                }],
            });

        Self {
            const_buffer,
            bind_group,
        }
    }

    /// Byte offset of a frame slot's constants slice.
    pub fn offset(slot: usize) -> u32 {
        (slot as u64 * CONST_STRIDE) as u32
    }

    pub fn write(&self, queue: &wgpu::Queue, slot: usize, constants: &Constants) {
        queue.write_buffer(
            &self.const_buffer,
            slot as u64 * CONST_STRIDE,
            bytemuck::bytes_of(constants),
        );
    }

    pub fn bind_group_layout(context: &Context) -> &'static wgpu::BindGroupLayout {
        static LAYOUT: OnceLock<wgpu::BindGroupLayout> = OnceLock::new();

        LAYOUT.get_or_init(|| {
            context
                .device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("const state"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: slots::CONSTANTS_BINDING,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT
                            | wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: true,
                            min_binding_size: NonZeroU64::new(CONST_STRIDE),
                        },
                        count: None,
                    }],
                })
        })
    }
}

pub struct RenderTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
}

impl RenderTarget {
    pub fn new(
        context: &Context,
        label: &str,
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Self {
        let texture = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            dimension: wgpu::TextureDimension::D2,
            size: context.surface_size,
            mip_level_count: 1,
            sample_count: 1,
            view_formats: &[],
            format,
            usage,
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            ..Default::default()
        });

        Self {
            texture,
            view,
            format,
        }
    }
}

/// Surface-sized targets, recreated on resize.
pub struct RenderState {
    pub visibility: RenderTarget,
    pub depth: RenderTarget,
    pub color: RenderTarget,
}

impl RenderState {
    pub fn new(context: &Context) -> Self {
        Self {
            visibility: RenderTarget::new(
                context,
                "visibility buffer",
                VISIBILITY_BUFFER_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::STORAGE_BINDING,
            ),
            depth: RenderTarget::new(
                context,
                "depth buffer",
                DEPTH_BUFFER_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            ),
            color: RenderTarget::new(
                context,
                "color buffer",
                COLOR_BUFFER_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::STORAGE_BINDING,
            ),
        }
    }
}

/// The nine persistent scene pools and their shared bind group.
pub struct SceneState {
    pub instances: wgpu::Buffer,
    pub meshes: wgpu::Buffer,
    pub clusters: wgpu::Buffer,
    pub positions: wgpu::Buffer,
    pub normals: wgpu::Buffer,
    pub tangents: wgpu::Buffer,
    pub texcoords: wgpu::Buffer,
    pub indices: wgpu::Buffer,
    pub materials: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub instance_count: u32,
    pub cluster_stride: u32,
}

impl SceneState {
    pub fn new(context: &Context, scene: &SceneData) -> Self {
        let device = &context.device;

        let storage = BufferFlags::STORAGE;
        let instances = create_buffer(
            device,
            BufferDesc {
                label: "instance buffer",
                count: scene.instances.len() as u64,
                stride: mem::size_of::<scene::Instance>() as u64,
                flags: storage,
            },
        );
        let meshes = create_buffer(
            device,
            BufferDesc {
                label: "mesh buffer",
                count: scene.meshes.len() as u64,
                stride: mem::size_of::<scene::Mesh>() as u64,
                flags: storage,
            },
        );
        let clusters = create_buffer(
            device,
            BufferDesc {
                label: "cluster buffer",
                count: scene.clusters.len() as u64,
                stride: mem::size_of::<scene::Cluster>() as u64,
                flags: storage,
            },
        );
        let positions = create_buffer(
            device,
            BufferDesc {
                label: "position buffer",
                count: scene.positions.len() as u64,
                stride: 12,
                flags: storage | BufferFlags::ACCEL_INPUT,
            },
        );
        let normals = create_buffer(
            device,
            BufferDesc {
                label: "normal buffer",
                count: scene.normals.len() as u64,
                stride: 12,
                flags: storage,
            },
        );
        let tangents = create_buffer(
            device,
            BufferDesc {
                label: "tangent buffer",
                count: scene.tangents.len() as u64,
                stride: 16,
                flags: storage,
            },
        );
        let texcoords = create_buffer(
            device,
            BufferDesc {
                label: "texcoord buffer",
                count: scene.texcoords.len() as u64,
                stride: 8,
                flags: storage,
            },
        );
        let indices = create_buffer(
            device,
            BufferDesc {
                label: "index buffer",
                count: scene.indices.len() as u64,
                stride: 4,
                flags: storage | BufferFlags::ACCEL_INPUT,
            },
        );
        let materials = create_buffer(
            device,
            BufferDesc {
                label: "material buffer",
                count: scene.materials.len() as u64,
                stride: mem::size_of::<scene::Material>() as u64,
                flags: storage,
            },
        );

        let layout_entries: Vec<_> = (0..slots::SCENE_BINDING_COUNT)
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT | wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("scene state"),
            entries: &layout_entries,
        });

        let buffers = [
            (slots::SCENE_INSTANCES, &instances),
            (slots::SCENE_MESHES, &meshes),
            (slots::SCENE_CLUSTERS, &clusters),
            (slots::SCENE_POSITIONS, &positions),
            (slots::SCENE_NORMALS, &normals),
            (slots::SCENE_TANGENTS, &tangents),
            (slots::SCENE_TEXCOORDS, &texcoords),
            (slots::SCENE_INDICES, &indices),
            (slots::SCENE_MATERIALS, &materials),
        ];

        let bind_group_entries: Vec<_> = buffers
            .iter()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            })
            .collect();

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("scene state"),
            layout: &bind_group_layout,
            entries: &bind_group_entries,
        });

        Self {
            instance_count: scene.instances.len() as u32,
            cluster_stride: scene.cluster_stride(),
            instances,
            meshes,
            clusters,
            positions,
            normals,
            tangents,
            texcoords,
            indices,
            materials,
            bind_group,
            bind_group_layout,
        }
    }
}

/// The per-frame append lists, their counters, and the indirect arguments
/// derived from them. Produced and consumed within one frame.
pub struct TransientState {
    pub visible_instances: wgpu::Buffer,
    pub visible_instance_counter: wgpu::Buffer,
    pub visible_clusters: wgpu::Buffer,
    pub visible_cluster_counter: wgpu::Buffer,
    pub draw_args: wgpu::Buffer,
    pub draw_records: wgpu::Buffer,
    pub cluster_dispatch: wgpu::Buffer,
    pub max_cluster_slots: u32,
}

impl TransientState {
    pub fn new(device: &wgpu::Device, instance_capacity: u32) -> Self {
        Self::with_cluster_capacity(device, instance_capacity, scene::MAX_CLUSTERS as u32)
    }

    pub fn with_cluster_capacity(
        device: &wgpu::Device,
        instance_capacity: u32,
        max_cluster_slots: u32,
    ) -> Self {
        let visible_instances = create_buffer(
            device,
            BufferDesc {
                label: "visible instances",
                count: instance_capacity as u64,
                stride: 4,
                flags: BufferFlags::STORAGE,
            },
        );
        let visible_instance_counter = create_buffer(
            device,
            BufferDesc {
                label: "visible instance counter",
                count: 1,
                stride: 4,
                flags: BufferFlags::STORAGE | BufferFlags::COPY_SRC,
            },
        );
        let visible_clusters = create_buffer(
            device,
            BufferDesc {
                label: "visible clusters",
                count: max_cluster_slots as u64,
                stride: 4,
                flags: BufferFlags::STORAGE,
            },
        );
        // The three lanes double as a (x, 1, 1) dispatch argument and feed
        // the draw count of the record path.
        let visible_cluster_counter = create_buffer(
            device,
            BufferDesc {
                label: "visible cluster counter",
                count: 3,
                stride: 4,
                flags: BufferFlags::STORAGE | BufferFlags::INDIRECT | BufferFlags::COPY_SRC,
            },
        );
        let draw_args = create_buffer(
            device,
            BufferDesc {
                label: "cluster draw args",
                count: 4,
                stride: 4,
                flags: BufferFlags::STORAGE | BufferFlags::INDIRECT,
            },
        );
        let draw_records = create_buffer(
            device,
            BufferDesc {
                label: "cluster draw records",
                count: max_cluster_slots as u64,
                stride: 16,
                flags: BufferFlags::STORAGE | BufferFlags::INDIRECT,
            },
        );
        let cluster_dispatch = create_buffer(
            device,
            BufferDesc {
                label: "cluster cull dispatch args",
                count: 3,
                stride: 4,
                flags: BufferFlags::STORAGE | BufferFlags::INDIRECT,
            },
        );

        Self {
            visible_instances,
            visible_instance_counter,
            visible_clusters,
            visible_cluster_counter,
            draw_args,
            draw_records,
            cluster_dispatch,
            max_cluster_slots,
        }
    }
}

pub const DEPTH_BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const VISIBILITY_BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Uint;
pub const COLOR_BUFFER_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_record_is_aligned_for_dynamic_offsets() {
        // Uniform dynamic offsets must land on 256-byte boundaries.
        assert_eq!(CONST_STRIDE % 256, 0);
        assert_eq!(mem::size_of::<Constants>(), 768);
        assert_eq!(mem::size_of::<GpuCamera>(), 352);
        assert_eq!(ConstState::offset(2), 2 * CONST_STRIDE as u32);
    }

    #[test]
    fn constants_seed_matches_cameras() {
        let camera = Camera::new(1.5);
        let constants = Constants::new(
            &camera,
            &camera,
            100,
            1024,
            6,
            DebugMode::Clusters,
            VISIBILITY_SOURCE_RASTER,
        );

        assert_eq!(constants.counts.x, 100);
        assert_eq!(constants.counts.y, 1024);
        assert_eq!(constants.counts.z, 6);
        assert_eq!(constants.debug_mode, DebugMode::Clusters as u32);
        assert_eq!(constants.z_near, camera.z_near);
        assert_eq!(constants.z_far, camera.z_far);
        assert_eq!(constants.cull_camera.planes, constants.draw_camera.planes);
    }
}
