//! The fixed binding-slot table shared between CPU code and the shaders.
//!
//! Every persistent resource lives at a compile-time-known `(group, binding)`
//! pair. The WGSL sources declare the same pairs literally; a test in this
//! module checks the two sides against each other so the table has a single
//! source of truth.

/// Per-frame constants, bound with a dynamic offset.
pub const GROUP_CONSTANTS: u32 = 0;
pub const CONSTANTS_BINDING: u32 = 0;

/// The persistent scene pools, read-only in every stage.
pub const GROUP_SCENE: u32 = 1;
pub const SCENE_INSTANCES: u32 = 0;
pub const SCENE_MESHES: u32 = 1;
pub const SCENE_CLUSTERS: u32 = 2;
pub const SCENE_POSITIONS: u32 = 3;
pub const SCENE_NORMALS: u32 = 4;
pub const SCENE_TANGENTS: u32 = 5;
pub const SCENE_TEXCOORDS: u32 = 6;
pub const SCENE_INDICES: u32 = 7;
pub const SCENE_MATERIALS: u32 = 8;
pub const SCENE_BINDING_COUNT: u32 = 9;

/// Pass-owned transients. Each pass declares its own layout at this group;
/// the binding meanings below are per-pass.
pub const GROUP_PASS: u32 = 2;

// Frame setup.
pub const SETUP_INSTANCE_COUNTER: u32 = 0;
pub const SETUP_CLUSTER_COUNTER: u32 = 1;
pub const SETUP_DRAW_ARGS: u32 = 2;

// Instance culling.
pub const ICULL_VISIBLE_INSTANCES: u32 = 0;
pub const ICULL_INSTANCE_COUNTER: u32 = 1;

// Cluster culling.
pub const CCULL_VISIBLE_INSTANCES: u32 = 0;
pub const CCULL_INSTANCE_COUNTER: u32 = 1;
pub const CCULL_VISIBLE_CLUSTERS: u32 = 2;
pub const CCULL_CLUSTER_COUNTER: u32 = 3;
pub const CCULL_DRAW_ARGS: u32 = 4;
pub const CCULL_DRAW_RECORDS: u32 = 5;

// Cluster dispatch sizing (fused path).
pub const PREPARE_INSTANCE_COUNTER: u32 = 0;
pub const PREPARE_DISPATCH_ARGS: u32 = 1;

// Visibility raster.
pub const RASTER_VISIBLE_CLUSTERS: u32 = 0;

// Material resolve.
pub const RESOLVE_VISIBILITY: u32 = 0;
pub const RESOLVE_DEPTH: u32 = 1;
pub const RESOLVE_COLOR: u32 = 2;
pub const RESOLVE_VISIBLE_CLUSTERS: u32 = 3;
pub const RESOLVE_CLUSTER_TABLE: u32 = 4;

// Ray-traced visibility.
pub const TRACE_TLAS: u32 = 0;
pub const TRACE_VISIBILITY: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    fn declares(source: &str, group: u32, binding: u32, name: &str) -> bool {
        source
            .lines()
            .any(|line| line.contains(&format!("@group({group}) @binding({binding})")) && line.contains(name))
    }

    #[test]
    fn shader_bindings_match_table() {
        let instance_cull = include_str!("shaders/instance_cull.wgsl");
        assert!(declares(instance_cull, GROUP_SCENE, SCENE_INSTANCES, "instances"));
        assert!(declares(instance_cull, GROUP_PASS, ICULL_VISIBLE_INSTANCES, "visible_instances"));
        assert!(declares(instance_cull, GROUP_PASS, ICULL_INSTANCE_COUNTER, "visible_instance_counter"));

        let cluster_cull = include_str!("shaders/cluster_cull.wgsl");
        assert!(declares(cluster_cull, GROUP_SCENE, SCENE_MESHES, "meshes"));
        assert!(declares(cluster_cull, GROUP_SCENE, SCENE_CLUSTERS, "clusters"));
        assert!(declares(cluster_cull, GROUP_PASS, CCULL_VISIBLE_CLUSTERS, "visible_clusters"));
        assert!(declares(cluster_cull, GROUP_PASS, CCULL_CLUSTER_COUNTER, "visible_cluster_counter"));
        assert!(declares(cluster_cull, GROUP_PASS, CCULL_DRAW_ARGS, "draw_args"));
        assert!(declares(cluster_cull, GROUP_PASS, CCULL_DRAW_RECORDS, "draw_records"));

        let setup = include_str!("shaders/frame_setup.wgsl");
        assert!(declares(setup, GROUP_PASS, SETUP_INSTANCE_COUNTER, "visible_instance_counter"));
        assert!(declares(setup, GROUP_PASS, SETUP_CLUSTER_COUNTER, "visible_cluster_counter"));
        assert!(declares(setup, GROUP_PASS, SETUP_DRAW_ARGS, "draw_args"));

        let resolve = include_str!("shaders/resolve.wgsl");
        assert!(declares(resolve, GROUP_PASS, RESOLVE_VISIBILITY, "visibility"));
        assert!(declares(resolve, GROUP_PASS, RESOLVE_COLOR, "color_target"));
        assert!(declares(resolve, GROUP_PASS, RESOLVE_CLUSTER_TABLE, "cluster_table"));

        let raster = include_str!("shaders/visibility.wgsl");
        assert!(declares(raster, GROUP_PASS, RASTER_VISIBLE_CLUSTERS, "visible_clusters"));

        let trace = include_str!("shaders/raytrace.wgsl");
        assert!(declares(trace, GROUP_PASS, TRACE_TLAS, "tlas"));
        assert!(declares(trace, GROUP_PASS, TRACE_VISIBILITY, "visibility_out"));
    }

    #[test]
    fn shader_constants_match_pools() {
        let types = include_str!("include_shaders/types.wgsl");
        assert!(types.contains("const MAX_CLUSTER_VERTICES: u32 = 64u"));
        assert!(types.contains("const MAX_CLUSTER_TRIANGLES: u32 = 124u"));
        assert!(types.contains("const CLUSTER_DRAW_VERTICES: u32 = 372u"));
        assert!(types.contains("const CULL_WORKGROUP_SIZE: u32 = 128u"));
    }

    #[test]
    fn frame_setup_seeds_valid_indirect_arguments() {
        // The cluster counter must leave frame setup as a well-formed
        // (0, 1, 1) dispatch argument, and the draw arguments with zero
        // instances; skipping setup must leave nothing drawable behind.
        let setup = include_str!("shaders/frame_setup.wgsl");
        assert!(setup.contains("ClusterCounter(0u, 1u, 1u)"));
        assert!(setup.contains("DrawArgs(CLUSTER_DRAW_VERTICES, 0u, 0u, 0u)"));
        assert!(setup.contains("visible_instance_counter = 0u"));
    }
}
