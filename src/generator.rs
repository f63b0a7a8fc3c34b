use std::fs;
use std::path::Path;

use eyre::{Result, WrapErr};
use glam::{Mat4, Vec3};

use crate::loader;
use crate::scene::{
    Aabb, Cluster, Instance, Material, Mesh, SceneData, MAX_CLUSTER_TRIANGLES,
    MAX_CLUSTER_VERTICES,
};

/// Highest face tessellation that still fits the cluster bounds: level 6
/// gives 64 vertices and 98 triangles per face.
pub const MAX_LOD: u32 = 6;

const GRID_SIDE: u32 = 10;
const GRID_SPACING: f32 = 3.0;
const GRID_DEPTH: f32 = -50.0;

struct Face {
    normal: Vec3,
    tangent: Vec3,
    bitangent: Vec3,
}

// Outward faces of the unit cube; tangent × bitangent equals the normal so
// the emitted winding is counter-clockwise seen from outside.
const FACES: [Face; 6] = [
    Face { normal: Vec3::X, tangent: Vec3::NEG_Z, bitangent: Vec3::Y },
    Face { normal: Vec3::NEG_X, tangent: Vec3::Z, bitangent: Vec3::Y },
    Face { normal: Vec3::Y, tangent: Vec3::X, bitangent: Vec3::NEG_Z },
    Face { normal: Vec3::NEG_Y, tangent: Vec3::X, bitangent: Vec3::Z },
    Face { normal: Vec3::Z, tangent: Vec3::X, bitangent: Vec3::Y },
    Face { normal: Vec3::NEG_Z, tangent: Vec3::NEG_X, bitangent: Vec3::Y },
];

/// Builds the demo scene: a 10×10 grid of unit cubes, one mesh of six
/// clusters (one per face), a color gradient across the grid. `lod` selects
/// the per-face tessellation.
pub fn build_demo_scene(lod: u32) -> SceneData {
    let lod = if lod > MAX_LOD {
        log::warn!("lod {lod} exceeds the cluster bounds, clamping to {MAX_LOD}");
        MAX_LOD
    } else {
        lod
    };

    let quads_per_side = lod + 1;
    let vertices_per_side = lod + 2;
    let face_vertices = vertices_per_side * vertices_per_side;
    let face_triangles = quads_per_side * quads_per_side * 2;
    debug_assert!(face_vertices <= MAX_CLUSTER_VERTICES);
    debug_assert!(face_triangles <= MAX_CLUSTER_TRIANGLES);

    let mut scene = SceneData::default();

    for (face_index, face) in FACES.iter().enumerate() {
        let face_index = face_index as u32;
        let vertex_start = face_index * face_vertices;

        let mut face_points = Vec::with_capacity(face_vertices as usize);
        for row in 0..vertices_per_side {
            for column in 0..vertices_per_side {
                let u = column as f32 / quads_per_side as f32;
                let v = row as f32 / quads_per_side as f32;
                let point =
                    face.normal + face.tangent * (u * 2.0 - 1.0) + face.bitangent * (v * 2.0 - 1.0);

                face_points.push(point);
                scene.positions.push(point.to_array());
                scene.normals.push(face.normal.to_array());
                scene.tangents.push([
                    face.tangent.x,
                    face.tangent.y,
                    face.tangent.z,
                    1.0,
                ]);
                scene.texcoords.push([u, v]);
            }
        }

        for row in 0..quads_per_side {
            for column in 0..quads_per_side {
                let corner = |r: u32, c: u32| r * vertices_per_side + c;
                let v00 = corner(row, column);
                let v10 = corner(row, column + 1);
                let v01 = corner(row + 1, column);
                let v11 = corner(row + 1, column + 1);

                scene.indices.extend([v00, v10, v11]);
                scene.indices.extend([v00, v11, v01]);
            }
        }

        let bounds = Aabb::from_points(face_points);
        scene.clusters.push(Cluster {
            center: bounds.center,
            vertex_start,
            extents: bounds.extents,
            vertex_count: face_vertices,
            primitive_start: face_index * face_triangles,
            primitive_count: face_triangles,
            pad: [0; 2],
        });
    }

    let mesh_aabb = Aabb {
        center: Vec3::ZERO,
        extents: Vec3::ONE,
    };
    scene.meshes.push(Mesh {
        center: mesh_aabb.center,
        cluster_start: 0,
        extents: mesh_aabb.extents,
        cluster_count: FACES.len() as u32,
    });

    for y in 0..GRID_SIDE {
        for x in 0..GRID_SIDE {
            let material_index = scene.materials.len() as u32;
            scene.materials.push(Material {
                color: [
                    x as f32 / GRID_SIDE as f32,
                    y as f32 / GRID_SIDE as f32,
                    0.0,
                    1.0,
                ],
                metallic: 0.0,
                roughness: 0.6,
            });

            let position = Vec3::new(
                GRID_SPACING * (x as f32 - GRID_SIDE as f32 / 2.0),
                GRID_SPACING * (y as f32 - GRID_SIDE as f32 / 2.0),
                GRID_DEPTH,
            );
            scene.instances.push(Instance::new(
                Mat4::from_translation(position),
                0,
                material_index,
                mesh_aabb,
            ));
        }
    }

    scene
}

/// Writes the demo scene as the nine raw pool files.
pub fn write_demo_scene(directory: &Path, lod: u32) -> Result<()> {
    let scene = build_demo_scene(lod);

    fs::create_dir_all(directory)
        .wrap_err_with(|| format!("failed creating scene directory {directory:?}"))?;

    let files: [(&str, &[u8]); 9] = [
        (loader::INSTANCES_FILE, bytemuck::cast_slice(&scene.instances)),
        (loader::MESHES_FILE, bytemuck::cast_slice(&scene.meshes)),
        (loader::CLUSTERS_FILE, bytemuck::cast_slice(&scene.clusters)),
        (loader::POSITIONS_FILE, bytemuck::cast_slice(&scene.positions)),
        (loader::NORMALS_FILE, bytemuck::cast_slice(&scene.normals)),
        (loader::TANGENTS_FILE, bytemuck::cast_slice(&scene.tangents)),
        (loader::TEXCOORDS_FILE, bytemuck::cast_slice(&scene.texcoords)),
        (loader::INDICES_FILE, bytemuck::cast_slice(&scene.indices)),
        (loader::MATERIALS_FILE, bytemuck::cast_slice(&scene.materials)),
    ];

    for (name, bytes) in files {
        let path = directory.join(name);
        fs::write(&path, bytes).wrap_err_with(|| format!("failed writing {path:?}"))?;
    }

    log::info!("wrote demo scene (lod {lod}) to {directory:?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_lod_respects_the_cluster_bounds() {
        for lod in 0..=MAX_LOD {
            let scene = build_demo_scene(lod);
            scene.validate().unwrap();

            for cluster in &scene.clusters {
                assert!(cluster.vertex_count <= MAX_CLUSTER_VERTICES);
                assert!(cluster.primitive_count <= MAX_CLUSTER_TRIANGLES);
            }
        }
    }

    #[test]
    fn an_excessive_lod_is_clamped() {
        let clamped = build_demo_scene(MAX_LOD + 5);
        let max = build_demo_scene(MAX_LOD);
        assert_eq!(clamped.positions.len(), max.positions.len());
        assert_eq!(clamped.indices.len(), max.indices.len());
    }

    #[test]
    fn clusters_partition_the_pools() {
        let scene = build_demo_scene(2);
        let mut expected_vertex = 0;
        let mut expected_triangle = 0;
        for cluster in &scene.clusters {
            assert_eq!(cluster.vertex_start, expected_vertex);
            assert_eq!(cluster.primitive_start, expected_triangle);
            expected_vertex += cluster.vertex_count;
            expected_triangle += cluster.primitive_count;
        }
        assert_eq!(expected_vertex as usize, scene.positions.len());
        assert_eq!(expected_triangle as usize * 3, scene.indices.len());
    }

    #[test]
    fn cluster_bounds_contain_their_vertices() {
        let scene = build_demo_scene(3);
        for cluster in &scene.clusters {
            for index in cluster.vertex_start..cluster.vertex_start + cluster.vertex_count {
                let point = Vec3::from_array(scene.positions[index as usize]);
                let delta = (point - cluster.center).abs();
                assert!(delta.x <= cluster.extents.x + 1e-5);
                assert!(delta.y <= cluster.extents.y + 1e-5);
                assert!(delta.z <= cluster.extents.z + 1e-5);
            }
        }
    }

    #[test]
    fn triangle_indices_stay_local_to_their_cluster() {
        let scene = build_demo_scene(1);
        for cluster in &scene.clusters {
            let start = cluster.primitive_start as usize * 3;
            let end = start + cluster.primitive_count as usize * 3;
            for &index in &scene.indices[start..end] {
                assert!(index < cluster.vertex_count);
            }
        }
    }

    #[test]
    fn instances_form_the_grid_of_the_reference_generator() {
        let scene = build_demo_scene(0);
        assert_eq!(scene.instances.len(), 100);
        assert_eq!(scene.materials.len(), 100);

        let first = &scene.instances[0];
        assert_eq!(first.center, Vec3::new(-15.0, -15.0, -50.0));
        assert_eq!(first.extents, Vec3::ONE);
        assert_eq!(first.mesh_index, 0);
        assert_eq!(first.material_index, 0);
    }
}
