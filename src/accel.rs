use std::iter;

use eyre::{ensure, Result};
use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::context::Context;
use crate::resources::SceneState;
use crate::scene::{pack_cluster_entry, SceneData};

/// Upper bound on (instance, cluster-in-mesh) pairs in the top-level
/// structure. The custom index also has to fit its 24-bit field.
pub const MAX_TLAS_INSTANCES: usize = 1 << 20;

const BLAS_BUILD_BATCH: usize = 64;

/// One bottom-level structure per cluster, one top-level instance per
/// (scene instance, cluster-in-its-mesh) pair. Built once at scene load.
pub struct AccelState {
    tlas_package: wgpu::TlasPackage,
    /// Packed (instance, cluster-in-mesh) entry per TLAS instance, indexed
    /// by the custom index the ray query reports.
    pub cluster_table: wgpu::Buffer,
    /// Keeps the per-cluster structures alive for the TLAS.
    _blas_pool: Vec<wgpu::Blas>,
}

impl AccelState {
    /// Returns `None` for scenes with nothing to trace against.
    pub fn build(
        context: &Context,
        scene: &SceneData,
        scene_state: &SceneState,
    ) -> Result<Option<Self>> {
        let device = &context.device;

        let instance_count: usize = scene
            .instances
            .iter()
            .map(|instance| scene.meshes[instance.mesh_index as usize].cluster_count as usize)
            .sum();
        if instance_count == 0 {
            return Ok(None);
        }
        ensure!(
            instance_count <= MAX_TLAS_INSTANCES,
            "scene needs {instance_count} cluster instances, the trace pool holds {MAX_TLAS_INSTANCES}",
        );

        let sizes: Vec<_> = scene
            .clusters
            .iter()
            .map(|cluster| wgpu::BlasTriangleGeometrySizeDescriptor {
                vertex_format: wgpu::VertexFormat::Float32x3,
                vertex_count: cluster.vertex_count,
                index_format: Some(wgpu::IndexFormat::Uint32),
                index_count: Some(cluster.primitive_count * 3),
                flags: wgpu::AccelerationStructureGeometryFlags::OPAQUE,
            })
            .collect();

        let blas_pool: Vec<_> = sizes
            .iter()
            .enumerate()
            .map(|(index, size)| {
                device.create_blas(
                    &wgpu::CreateBlasDescriptor {
                        label: Some(&format!("cluster blas {index}")),
                        flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE,
                        update_mode: wgpu::AccelerationStructureUpdateMode::Build,
                    },
                    wgpu::BlasGeometrySizeDescriptors::Triangles {
                        descriptors: vec![size.clone()],
                    },
                )
            })
            .collect();

        // Batched builds; wgpu serializes the shared scratch between them.
        for batch_start in (0..scene.clusters.len()).step_by(BLAS_BUILD_BATCH) {
            let batch_end = (batch_start + BLAS_BUILD_BATCH).min(scene.clusters.len());

            let entries: Vec<_> = (batch_start..batch_end)
                .map(|index| {
                    let cluster = &scene.clusters[index];
                    wgpu::BlasBuildEntry {
                        blas: &blas_pool[index],
                        geometry: wgpu::BlasGeometries::TriangleGeometries(vec![
                            wgpu::BlasTriangleGeometry {
                                size: &sizes[index],
                                vertex_buffer: &scene_state.positions,
                                first_vertex: cluster.vertex_start,
                                vertex_stride: 12,
                                index_buffer: Some(&scene_state.indices),
                                first_index: Some(cluster.primitive_start * 3),
                                transform_buffer: None,
                                transform_buffer_offset: None,
                            },
                        ]),
                    }
                })
                .collect();

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("blas build"),
            });
            encoder
                .build_acceleration_structures(entries.iter(), iter::empty::<&wgpu::TlasPackage>());
            context.queue.submit(iter::once(encoder.finish()));
        }

        let tlas = device.create_tlas(&wgpu::CreateTlasDescriptor {
            label: Some("cluster tlas"),
            max_instances: instance_count as u32,
            flags: wgpu::AccelerationStructureFlags::PREFER_FAST_TRACE,
            update_mode: wgpu::AccelerationStructureUpdateMode::Build,
        });
        let mut tlas_package = wgpu::TlasPackage::new(tlas);

        let mut table = Vec::with_capacity(instance_count);
        for (instance_id, instance) in scene.instances.iter().enumerate() {
            let mesh = &scene.meshes[instance.mesh_index as usize];
            for cluster_local in 0..mesh.cluster_count {
                let custom_index = table.len() as u32;
                tlas_package[custom_index as usize] = Some(wgpu::TlasInstance::new(
                    &blas_pool[(mesh.cluster_start + cluster_local) as usize],
                    transform_3x4(instance.model),
                    custom_index,
                    0xff,
                ));
                table.push(pack_cluster_entry(instance_id as u32, cluster_local));
            }
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tlas build"),
        });
        encoder.build_acceleration_structures(
            iter::empty::<&wgpu::BlasBuildEntry>(),
            iter::once(&tlas_package),
        );
        context.queue.submit(iter::once(encoder.finish()));
        context.device.poll(wgpu::Maintain::Wait);

        let cluster_table = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("cluster instance table"),
            usage: wgpu::BufferUsages::STORAGE,
            contents: bytemuck::cast_slice(&table),
        });

        log::info!(
            "built {} cluster blas, tlas with {instance_count} instances",
            scene.clusters.len(),
        );

        Ok(Some(Self {
            tlas_package,
            cluster_table,
            _blas_pool: blas_pool,
        }))
    }

    pub fn tlas(&self) -> &wgpu::Tlas {
        self.tlas_package.tlas()
    }
}

/// Row-major 3×4 transform of a TLAS instance.
fn transform_3x4(model: Mat4) -> [f32; 12] {
    let columns = model.to_cols_array_2d();
    [
        columns[0][0], columns[1][0], columns[2][0], columns[3][0],
        columns[0][1], columns[1][1], columns[2][1], columns[3][1],
        columns[0][2], columns[1][2], columns[2][2], columns[3][2],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn tlas_transform_drops_the_projective_row() {
        let model = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let transform = transform_3x4(model);

        // Identity rotation, translation in the last column of each row.
        assert_eq!(transform[0], 1.0);
        assert_eq!(transform[5], 1.0);
        assert_eq!(transform[10], 1.0);
        assert_eq!(transform[3], 1.0);
        assert_eq!(transform[7], 2.0);
        assert_eq!(transform[11], 3.0);
    }
}
