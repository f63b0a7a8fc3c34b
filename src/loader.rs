use std::fs;
use std::path::Path;
use std::sync::mpsc;

use bytemuck::Pod;
use eyre::{bail, ensure, Result, WrapErr};

use crate::context::Context;
use crate::resources::SceneState;
use crate::scene::{Cluster, Instance, Material, Mesh, SceneData};

pub const INSTANCES_FILE: &str = "instances.raw";
pub const MESHES_FILE: &str = "meshes.raw";
pub const CLUSTERS_FILE: &str = "clusters.raw";
pub const POSITIONS_FILE: &str = "positions.raw";
pub const NORMALS_FILE: &str = "normals.raw";
pub const TANGENTS_FILE: &str = "tangents.raw";
pub const TEXCOORDS_FILE: &str = "texcoords.raw";
pub const INDICES_FILE: &str = "indices.raw";
pub const MATERIALS_FILE: &str = "materials.raw";

/// Opens the nine pool files. Element counts are inferred from the file
/// sizes and checked against the pool capacities; any transport or layout
/// problem fails the load.
pub fn load_scene(directory: &Path) -> Result<SceneData> {
    let scene = SceneData {
        instances: read_pool::<Instance>(directory, INSTANCES_FILE)?,
        meshes: read_pool::<Mesh>(directory, MESHES_FILE)?,
        clusters: read_pool::<Cluster>(directory, CLUSTERS_FILE)?,
        positions: read_pool::<[f32; 3]>(directory, POSITIONS_FILE)?,
        normals: read_pool::<[f32; 3]>(directory, NORMALS_FILE)?,
        tangents: read_pool::<[f32; 4]>(directory, TANGENTS_FILE)?,
        texcoords: read_pool::<[f32; 2]>(directory, TEXCOORDS_FILE)?,
        indices: read_pool::<u32>(directory, INDICES_FILE)?,
        materials: read_pool::<Material>(directory, MATERIALS_FILE)?,
    };

    scene
        .validate()
        .wrap_err_with(|| format!("invalid scene in {directory:?}"))?;

    log::info!(
        "loaded scene from {directory:?}: {} instances, {} meshes, {} clusters, {} vertices, {} indices, {} materials",
        scene.instances.len(),
        scene.meshes.len(),
        scene.clusters.len(),
        scene.positions.len(),
        scene.indices.len(),
        scene.materials.len(),
    );

    Ok(scene)
}

fn read_pool<T: Pod>(directory: &Path, name: &str) -> Result<Vec<T>> {
    let path = directory.join(name);
    let bytes = fs::read(&path).wrap_err_with(|| format!("failed reading {path:?}"))?;

    let stride = std::mem::size_of::<T>();
    ensure!(
        bytes.len() % stride == 0,
        "{path:?} holds {} bytes, not a multiple of the {stride}-byte record",
        bytes.len(),
    );

    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

/// Streams the pools into their GPU buffers and blocks until the transfers
/// have finished, so the first frame never races the load.
pub fn upload_scene(context: &Context, scene: &SceneData, state: &SceneState) -> Result<()> {
    let queue = &context.queue;

    let uploads: [(&wgpu::Buffer, &[u8]); 9] = [
        (&state.instances, bytemuck::cast_slice(&scene.instances)),
        (&state.meshes, bytemuck::cast_slice(&scene.meshes)),
        (&state.clusters, bytemuck::cast_slice(&scene.clusters)),
        (&state.positions, bytemuck::cast_slice(&scene.positions)),
        (&state.normals, bytemuck::cast_slice(&scene.normals)),
        (&state.tangents, bytemuck::cast_slice(&scene.tangents)),
        (&state.texcoords, bytemuck::cast_slice(&scene.texcoords)),
        (&state.indices, bytemuck::cast_slice(&scene.indices)),
        (&state.materials, bytemuck::cast_slice(&scene.materials)),
    ];

    for (buffer, bytes) in uploads {
        if !bytes.is_empty() {
            queue.write_buffer(buffer, 0, bytes);
        }
    }

    queue.submit(std::iter::empty());

    let (sender, receiver) = mpsc::channel();
    queue.on_submitted_work_done(move || {
        let _ = sender.send(());
    });

    loop {
        match receiver.try_recv() {
            Ok(()) => break,
            Err(mpsc::TryRecvError::Empty) => {
                context.device.poll(wgpu::Maintain::Wait);
            }
            Err(mpsc::TryRecvError::Disconnected) => {
                bail!("scene upload did not complete");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("visicluster-{name}-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn generated_scene_round_trips_through_the_raw_files() {
        let dir = scratch_dir("roundtrip");
        generator::write_demo_scene(&dir, 0).unwrap();

        let scene = load_scene(&dir).unwrap();
        assert_eq!(scene.instances.len(), 100);
        assert_eq!(scene.meshes.len(), 1);
        assert_eq!(scene.clusters.len(), 6);
        assert_eq!(scene.positions.len(), 24);
        assert_eq!(scene.normals.len(), 24);
        assert_eq!(scene.tangents.len(), 24);
        assert_eq!(scene.texcoords.len(), 24);
        assert_eq!(scene.indices.len(), 36);
        assert_eq!(scene.materials.len(), 100);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn truncated_pool_file_fails_the_load() {
        let dir = scratch_dir("truncated");
        generator::write_demo_scene(&dir, 0).unwrap();

        let path = dir.join(CLUSTERS_FILE);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();

        assert!(load_scene(&dir).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_pool_file_fails_the_load() {
        let dir = scratch_dir("missing");
        generator::write_demo_scene(&dir, 0).unwrap();
        fs::remove_file(dir.join(TANGENTS_FILE)).unwrap();

        assert!(load_scene(&dir).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
