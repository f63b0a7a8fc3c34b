use bytemuck::{Pod, Zeroable};
use eyre::{ensure, Result};
use glam::{Mat4, Vec3, Vec4};

/// Hard upper bounds of the scene pools. Instance and cluster ids must fit
/// 16 bits because the visible-cluster list packs one of each into a single
/// word.
pub const MAX_INSTANCES: usize = u16::MAX as usize;
pub const MAX_CLUSTERS: usize = u16::MAX as usize;
pub const MAX_MESHES: usize = 8192;
pub const MAX_MATERIALS: usize = 1024;
pub const MAX_VERTICES: usize = 1 << 22;
pub const MAX_INDICES: usize = 1 << 24;

/// A cluster holds at most 64 unique vertices and 124 triangles.
pub const MAX_CLUSTER_VERTICES: u32 = 64;
pub const MAX_CLUSTER_TRIANGLES: u32 = 124;

/// Vertex count of one cluster-expanding draw instance. Triangles past a
/// cluster's real count are emitted degenerate by the vertex shader.
#[allow(unused)]
pub const CLUSTER_DRAW_VERTICES: u32 = MAX_CLUSTER_TRIANGLES * 3;

pub const CULL_WORKGROUP_SIZE: u32 = 128;

/// An axis-aligned box stored as center and half-extents.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub center: Vec3,
    pub extents: Vec3,
}

impl Aabb {
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self {
            center: (min + max) * 0.5,
            extents: (max - min) * 0.5,
        }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for point in points {
            min = min.min(point);
            max = max.max(point);
        }
        Self::from_min_max(min, max)
    }

    /// The box around this box transformed by `matrix`. Center moves with
    /// the full transform, extents with the absolute value of the upper 3×3.
    pub fn transformed(self, matrix: Mat4) -> Self {
        let center = matrix.transform_point3(self.center);
        let abs_x = matrix.x_axis.truncate().abs();
        let abs_y = matrix.y_axis.truncate().abs();
        let abs_z = matrix.z_axis.truncate().abs();
        let extents = abs_x * self.extents.x + abs_y * self.extents.y + abs_z * self.extents.z;
        Self { center, extents }
    }

    pub fn corners(self) -> [Vec3; 8] {
        let e = self.extents;
        [
            self.center + Vec3::new(-e.x, -e.y, -e.z),
            self.center + Vec3::new(e.x, -e.y, -e.z),
            self.center + Vec3::new(-e.x, e.y, -e.z),
            self.center + Vec3::new(e.x, e.y, -e.z),
            self.center + Vec3::new(-e.x, -e.y, e.z),
            self.center + Vec3::new(e.x, -e.y, e.z),
            self.center + Vec3::new(-e.x, e.y, e.z),
            self.center + Vec3::new(e.x, e.y, e.z),
        ]
    }
}

/// One placement of a mesh. The layout interleaves the two bounding-box
/// vectors with the pool indices so the record matches its WGSL declaration
/// without implicit padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Instance {
    pub model: Mat4,
    /// 3×3 normal matrix stored as three padded columns, the WGSL
    /// `mat3x3<f32>` layout.
    pub normal: [Vec4; 3],
    pub center: Vec3,
    pub mesh_index: u32,
    pub extents: Vec3,
    pub material_index: u32,
}

impl Instance {
    pub fn new(model: Mat4, mesh_index: u32, material_index: u32, mesh_aabb: Aabb) -> Self {
        let normal = Mat4::from_mat3(glam::Mat3::from_mat4(model).inverse().transpose());
        let world_aabb = mesh_aabb.transformed(model);
        Self {
            model,
            normal: [normal.x_axis, normal.y_axis, normal.z_axis],
            center: world_aabb.center,
            mesh_index,
            extents: world_aabb.extents,
            material_index,
        }
    }

    pub fn aabb(&self) -> Aabb {
        Aabb {
            center: self.center,
            extents: self.extents,
        }
    }
}

/// A contiguous range of clusters plus the local-space box around them.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Mesh {
    pub center: Vec3,
    pub cluster_start: u32,
    pub extents: Vec3,
    pub cluster_count: u32,
}

impl Mesh {
    #[allow(unused)]
    pub fn aabb(&self) -> Aabb {
        Aabb {
            center: self.center,
            extents: self.extents,
        }
    }
}

/// A bounded sub-mesh. `primitive_start`/`primitive_count` are triangle
/// ranges into the index pool; the indices themselves are relative to
/// `vertex_start`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Cluster {
    pub center: Vec3,
    pub vertex_start: u32,
    pub extents: Vec3,
    pub vertex_count: u32,
    pub primitive_start: u32,
    pub primitive_count: u32,
    pub pad: [u32; 2],
}

impl Cluster {
    pub fn aabb(&self) -> Aabb {
        Aabb {
            center: self.center,
            extents: self.extents,
        }
    }
}

/// Flat-color material. 24 bytes on disk and in GPU memory; the shaders read
/// it through a raw float view since a 24-byte struct stride is not
/// expressible in WGSL.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct Material {
    pub color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
}

/// How the resolve pass colors covered pixels.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DebugMode {
    #[default]
    None = 0,
    Triangles = 1,
    Clusters = 2,
    Instances = 3,
    Materials = 4,
    DepthBuffer = 5,
}

impl DebugMode {
    pub const ALL: [DebugMode; 6] = [
        DebugMode::None,
        DebugMode::Triangles,
        DebugMode::Clusters,
        DebugMode::Instances,
        DebugMode::Materials,
        DebugMode::DepthBuffer,
    ];

    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|mode| *mode == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn label(self) -> &'static str {
        match self {
            DebugMode::None => "shaded",
            DebugMode::Triangles => "triangles",
            DebugMode::Clusters => "clusters",
            DebugMode::Instances => "instances",
            DebugMode::Materials => "materials",
            DebugMode::DepthBuffer => "depth",
        }
    }
}

/// Entry of the visible-cluster list: instance id in the high half, cluster
/// index within its mesh in the low half.
pub fn pack_cluster_entry(instance_id: u32, cluster_local: u32) -> u32 {
    debug_assert!(instance_id <= u16::MAX as u32 && cluster_local <= u16::MAX as u32);
    (instance_id << 16) | cluster_local
}

pub fn entry_instance(entry: u32) -> u32 {
    entry >> 16
}

pub fn entry_cluster(entry: u32) -> u32 {
    entry & 0xffff
}

/// Visibility-buffer word: visible-list index in the high bits, triangle
/// index biased by one in the low 7 bits. Zero is "no geometry". These
/// mirror the encoding the shaders use.
#[allow(unused)]
pub fn encode_visibility(visible_index: u32, triangle: u32) -> u32 {
    debug_assert!(triangle < MAX_CLUSTER_TRIANGLES);
    (visible_index << 7) | (triangle + 1)
}

#[allow(unused)]
pub fn visibility_index(word: u32) -> u32 {
    word >> 7
}

#[allow(unused)]
pub fn visibility_triangle(word: u32) -> u32 {
    (word & 0x7f) - 1
}

/// The nine scene pools, parsed and validated. The GPU owns the same bytes;
/// instances, meshes, and clusters are additionally kept here for debug
/// wires and acceleration-structure construction.
#[derive(Default)]
pub struct SceneData {
    pub instances: Vec<Instance>,
    pub meshes: Vec<Mesh>,
    pub clusters: Vec<Cluster>,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub tangents: Vec<[f32; 4]>,
    pub texcoords: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
    pub materials: Vec<Material>,
}

impl SceneData {
    /// The cluster-slot stride of the culling grid: the widest mesh decides
    /// how many slots every visible instance occupies.
    pub fn cluster_stride(&self) -> u32 {
        self.meshes
            .iter()
            .map(|mesh| mesh.cluster_count)
            .max()
            .unwrap_or(1)
            .max(1)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.instances.len() <= MAX_INSTANCES,
            "instance pool over capacity: {}",
            self.instances.len(),
        );
        ensure!(
            self.clusters.len() <= MAX_CLUSTERS,
            "cluster pool over capacity: {}",
            self.clusters.len(),
        );
        ensure!(
            self.meshes.len() <= MAX_MESHES,
            "mesh pool over capacity: {}",
            self.meshes.len(),
        );
        ensure!(
            self.materials.len() <= MAX_MATERIALS,
            "material pool over capacity: {}",
            self.materials.len(),
        );
        ensure!(
            self.positions.len() <= MAX_VERTICES,
            "vertex pool over capacity: {}",
            self.positions.len(),
        );
        ensure!(
            self.indices.len() <= MAX_INDICES,
            "index pool over capacity: {}",
            self.indices.len(),
        );

        let vertex_count = self.positions.len();
        ensure!(
            self.normals.len() == vertex_count
                && self.tangents.len() == vertex_count
                && self.texcoords.len() == vertex_count,
            "vertex pools are not parallel: {} positions, {} normals, {} tangents, {} texcoords",
            vertex_count,
            self.normals.len(),
            self.tangents.len(),
            self.texcoords.len(),
        );
        ensure!(
            self.indices.len() % 3 == 0,
            "index pool length {} is not a multiple of three",
            self.indices.len(),
        );

        let triangle_count = (self.indices.len() / 3) as u64;
        for (index, cluster) in self.clusters.iter().enumerate() {
            ensure!(
                cluster.vertex_count <= MAX_CLUSTER_VERTICES,
                "cluster {index} holds {} vertices",
                cluster.vertex_count,
            );
            ensure!(
                cluster.primitive_count <= MAX_CLUSTER_TRIANGLES,
                "cluster {index} holds {} triangles",
                cluster.primitive_count,
            );
            ensure!(
                cluster.vertex_start as u64 + cluster.vertex_count as u64 <= vertex_count as u64,
                "cluster {index} vertex range escapes the pool",
            );
            ensure!(
                cluster.primitive_start as u64 + cluster.primitive_count as u64 <= triangle_count,
                "cluster {index} triangle range escapes the pool",
            );
        }

        for (index, mesh) in self.meshes.iter().enumerate() {
            ensure!(
                mesh.cluster_start as u64 + mesh.cluster_count as u64 <= self.clusters.len() as u64,
                "mesh {index} cluster range escapes the pool",
            );
        }

        for (index, instance) in self.instances.iter().enumerate() {
            ensure!(
                (instance.mesh_index as usize) < self.meshes.len(),
                "instance {index} references mesh {}",
                instance.mesh_index,
            );
            ensure!(
                (instance.material_index as usize) < self.materials.len(),
                "instance {index} references material {}",
                instance.material_index,
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn record_layouts_match_disk_format() {
        assert_eq!(mem::size_of::<Instance>(), 144);
        assert_eq!(mem::size_of::<Mesh>(), 32);
        assert_eq!(mem::size_of::<Cluster>(), 48);
        assert_eq!(mem::size_of::<Material>(), 24);
        // Records land in storage buffers byte-for-byte, so struct size and
        // WGSL array stride must agree.
        assert_eq!(mem::size_of::<Instance>() % 16, 0);
        assert_eq!(mem::size_of::<Cluster>() % 16, 0);
    }

    #[test]
    fn cluster_entry_round_trips() {
        let entry = pack_cluster_entry(0xbeef, 0x0042);
        assert_eq!(entry_instance(entry), 0xbeef);
        assert_eq!(entry_cluster(entry), 0x0042);
        assert_eq!(pack_cluster_entry(0, 0), 0);
    }

    #[test]
    fn visibility_word_round_trips() {
        for (index, triangle) in [(0, 0), (1, 123), (u16::MAX as u32, 7)] {
            let word = encode_visibility(index, triangle);
            assert_ne!(word, 0, "a covered pixel must never decode as background");
            assert_eq!(visibility_index(word), index);
            assert_eq!(visibility_triangle(word), triangle);
        }
    }

    #[test]
    fn aabb_transform_bounds_all_corners() {
        let aabb = Aabb {
            center: Vec3::new(1.0, 2.0, 3.0),
            extents: Vec3::new(0.5, 1.0, 2.0),
        };
        let matrix = Mat4::from_rotation_y(0.7)
            * Mat4::from_rotation_x(-1.2)
            * Mat4::from_translation(Vec3::new(-4.0, 0.5, 9.0))
            * Mat4::from_scale(Vec3::new(1.5, 0.25, 2.0));

        let transformed = aabb.transformed(matrix);
        for corner in aabb.corners() {
            let moved = matrix.transform_point3(corner);
            let delta = (moved - transformed.center).abs();
            assert!(delta.x <= transformed.extents.x + 1e-4);
            assert!(delta.y <= transformed.extents.y + 1e-4);
            assert!(delta.z <= transformed.extents.z + 1e-4);
        }
    }

    #[test]
    fn instance_precomputes_world_bounds() {
        let mesh_aabb = Aabb {
            center: Vec3::ZERO,
            extents: Vec3::ONE,
        };
        let model = Mat4::from_translation(Vec3::new(10.0, -2.0, 4.0));
        let instance = Instance::new(model, 3, 7, mesh_aabb);
        assert_eq!(instance.center, Vec3::new(10.0, -2.0, 4.0));
        assert_eq!(instance.extents, Vec3::ONE);
        assert_eq!(instance.mesh_index, 3);
        assert_eq!(instance.material_index, 7);
    }

    #[test]
    fn debug_mode_cycles_through_all_variants() {
        let mut mode = DebugMode::None;
        for _ in 0..DebugMode::ALL.len() {
            mode = mode.next();
        }
        assert_eq!(mode, DebugMode::None);
    }

    fn unit_cube_scene() -> SceneData {
        SceneData {
            instances: vec![Instance::new(
                Mat4::IDENTITY,
                0,
                0,
                Aabb {
                    center: Vec3::ZERO,
                    extents: Vec3::ONE,
                },
            )],
            meshes: vec![Mesh {
                center: Vec3::ZERO,
                cluster_start: 0,
                extents: Vec3::ONE,
                cluster_count: 1,
            }],
            clusters: vec![Cluster {
                center: Vec3::ZERO,
                vertex_start: 0,
                extents: Vec3::ONE,
                vertex_count: 8,
                primitive_start: 0,
                primitive_count: 12,
                pad: [0; 2],
            }],
            positions: vec![[0.0; 3]; 8],
            normals: vec![[0.0, 0.0, 1.0]; 8],
            tangents: vec![[1.0, 0.0, 0.0, 1.0]; 8],
            texcoords: vec![[0.0, 0.0]; 8],
            indices: vec![0; 36],
            materials: vec![Material {
                color: [1.0, 0.0, 0.0, 1.0],
                metallic: 0.0,
                roughness: 1.0,
            }],
        }
    }

    #[test]
    fn valid_scene_passes_validation() {
        unit_cube_scene().validate().unwrap();
    }

    #[test]
    fn validation_rejects_unparallel_vertex_pools() {
        let mut scene = unit_cube_scene();
        scene.normals.pop();
        assert!(scene.validate().is_err());
    }

    #[test]
    fn validation_rejects_cluster_escaping_pools() {
        let mut scene = unit_cube_scene();
        scene.clusters[0].vertex_start = 4;
        assert!(scene.validate().is_err());

        let mut scene = unit_cube_scene();
        scene.clusters[0].primitive_count = 13;
        assert!(scene.validate().is_err());

        let mut scene = unit_cube_scene();
        scene.clusters[0].vertex_count = MAX_CLUSTER_VERTICES + 1;
        assert!(scene.validate().is_err());
    }

    #[test]
    fn validation_rejects_dangling_references() {
        let mut scene = unit_cube_scene();
        scene.instances[0].mesh_index = 1;
        assert!(scene.validate().is_err());

        let mut scene = unit_cube_scene();
        scene.instances[0].material_index = 9;
        assert!(scene.validate().is_err());

        let mut scene = unit_cube_scene();
        scene.meshes[0].cluster_count = 2;
        assert!(scene.validate().is_err());
    }

    #[test]
    fn saturating_append_settles_at_capacity() {
        // Model of the append policy in the culling shaders: winners past
        // capacity give their slot back, so the counter may transiently
        // overshoot but settles at the capacity once every thread is done.
        fn append(counter: &mut u32, capacity: u32) -> Option<u32> {
            let slot = *counter;
            *counter += 1;
            if slot >= capacity {
                *counter -= 1;
                return None;
            }
            Some(slot)
        }

        let capacity = 1024;
        let mut counter = 0;
        let mut written = 0;
        for _ in 0..u16::MAX as u32 {
            if append(&mut counter, capacity).is_some() {
                written += 1;
            }
        }

        assert_eq!(counter, capacity);
        assert_eq!(written, capacity);
    }

    #[test]
    fn cluster_stride_is_the_widest_mesh() {
        let mut scene = unit_cube_scene();
        assert_eq!(scene.cluster_stride(), 1);
        scene.meshes.push(Mesh {
            center: Vec3::ZERO,
            cluster_start: 0,
            extents: Vec3::ONE,
            cluster_count: 6,
        });
        assert_eq!(scene.cluster_stride(), 6);
    }
}
