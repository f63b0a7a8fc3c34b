use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// A flying camera. The same type serves as the drawing camera and, when the
/// cull lock is released, as the culling camera; locking snapshots a clone.
#[derive(Clone)]
pub struct Camera {
    pub pos: Vec3,
    pub front: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub fov: f32,
    pub z_near: f32,
    pub z_far: f32,
    pub proj: Mat4,
}

impl Camera {
    pub const UP: Vec3 = Vec3::Y;

    pub fn new(aspect_ratio: f32) -> Self {
        let z_near = 1.0;
        let z_far = 10_000.0;
        let fov = std::f32::consts::PI / 3.0;

        let mut camera = Self {
            pos: Vec3::new(0.0, 0.0, 10.0),
            front: Vec3::NEG_Z,
            yaw: -90.0,
            pitch: 0.0,
            proj: calc_proj(fov, aspect_ratio, z_near, z_far),
            z_near,
            z_far,
            fov,
        };

        camera.update_front();
        camera
    }

    pub fn move_by_delta(&mut self, delta: CameraDelta) {
        let horizontal = self.front.cross(Self::UP).normalize();

        self.pos += self.front * delta.forward;
        self.pos -= self.front * delta.backward;
        self.pos += horizontal * delta.right;
        self.pos -= horizontal * delta.left;

        self.yaw = (self.yaw + delta.yaw) % 360.0;
        self.pitch = (self.pitch + delta.pitch).clamp(-89.0, 89.0);

        self.update_front();
    }

    fn update_front(&mut self) {
        self.front = Vec3::new(
            f32::cos(self.yaw.to_radians()) * f32::cos(self.pitch.to_radians()),
            f32::sin(self.pitch.to_radians()),
            f32::sin(self.yaw.to_radians()) * f32::cos(self.pitch.to_radians()),
        )
        .normalize();
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.pos, self.pos + self.front, Self::UP)
    }

    pub fn view_proj(&self) -> Mat4 {
        self.proj * self.view()
    }

    pub fn resize_proj(&mut self, aspect_ratio: f32) {
        self.proj = calc_proj(self.fov, aspect_ratio, self.z_near, self.z_far);
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_proj(self.view_proj())
    }
}

fn calc_proj(fov: f32, aspect_ratio: f32, z_near: f32, z_far: f32) -> Mat4 {
    Mat4::perspective_rh(fov, aspect_ratio, z_near, z_far)
}

#[derive(Clone, Debug, Default)]
pub struct CameraDelta {
    pub left: f32,
    pub right: f32,
    pub forward: f32,
    pub backward: f32,
    pub yaw: f32,
    pub pitch: f32,
}

/// Six frustum planes in `(normal, distance)` form, normals pointing inward.
/// A point is inside when `dot(n, p) + d >= 0` for every plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Frustum {
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Gribb-Hartmann extraction for a zero-to-one depth projection: side
    /// planes from the w row plus or minus the x and y rows, the near plane
    /// from the z row alone, the far plane from the w row minus the z row.
    pub fn from_view_proj(view_proj: Mat4) -> Self {
        let planes = [
            view_proj.row(3) + view_proj.row(0),
            view_proj.row(3) - view_proj.row(0),
            view_proj.row(3) + view_proj.row(1),
            view_proj.row(3) - view_proj.row(1),
            view_proj.row(2),
            view_proj.row(3) - view_proj.row(2),
        ];

        Self {
            planes: planes.map(|plane| plane / plane.truncate().length()),
        }
    }

    /// Plane-vs-box test used on both sides of the pipeline; the culling
    /// shaders run the same arithmetic against the same planes.
    pub fn contains_aabb(&self, center: Vec3, extents: Vec3) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            normal.dot(center) + normal.abs().dot(extents) + plane.w >= 0.0
        })
    }
}

/// GPU-side camera record, written twice into the per-frame constants.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct GpuCamera {
    pub view: Mat4,
    pub view_proj: Mat4,
    pub inverse_proj: Mat4,
    pub inverse_view_proj: Mat4,
    pub planes: [Vec4; 6],
}

impl GpuCamera {
    pub fn new(camera: &Camera) -> Self {
        let view = camera.view();
        let view_proj = camera.proj * view;
        let frustum = Frustum::from_view_proj(view_proj);

        Self {
            view,
            view_proj,
            inverse_proj: camera.proj.inverse(),
            inverse_view_proj: view_proj.inverse(),
            planes: frustum.planes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Aabb;

    fn test_camera(pos: Vec3, yaw: f32) -> Camera {
        let mut camera = Camera::new(16.0 / 9.0);
        camera.pos = pos;
        camera.yaw = yaw;
        camera.pitch = 0.0;
        camera.move_by_delta(CameraDelta::default());
        camera
    }

    #[test]
    fn frustum_accepts_a_cube_in_front() {
        // Unit cube at the origin, camera three units down the z axis
        // looking back at it.
        let camera = test_camera(Vec3::new(0.0, 0.0, -3.0), 90.0);
        assert!(camera.frustum().contains_aabb(Vec3::ZERO, Vec3::ONE));
    }

    #[test]
    fn frustum_rejects_boxes_outside_every_plane() {
        let camera = test_camera(Vec3::new(0.0, 0.0, 10.0), -90.0);
        let frustum = camera.frustum();
        let extents = Vec3::ONE;

        // Behind the camera, past the far plane, and far off every side.
        assert!(!frustum.contains_aabb(Vec3::new(0.0, 0.0, 20.0), extents));
        assert!(!frustum.contains_aabb(Vec3::new(0.0, 0.0, -20_000.0), extents));
        assert!(!frustum.contains_aabb(Vec3::new(500.0, 0.0, -100.0), extents));
        assert!(!frustum.contains_aabb(Vec3::new(-500.0, 0.0, -100.0), extents));
        assert!(!frustum.contains_aabb(Vec3::new(0.0, 500.0, -100.0), extents));
        assert!(!frustum.contains_aabb(Vec3::new(0.0, -500.0, -100.0), extents));
    }

    #[test]
    fn plane_test_matches_corner_support() {
        // The extents projection is the exact support of the box, so the
        // per-plane verdict must equal "every corner is outside".
        let camera = test_camera(Vec3::new(3.0, -2.0, 8.0), -70.0);
        let frustum = camera.frustum();

        let boxes = [
            (Vec3::new(0.0, 0.0, 0.0), Vec3::ONE),
            (Vec3::new(12.0, 3.0, -40.0), Vec3::new(2.0, 0.5, 4.0)),
            (Vec3::new(-90.0, 0.0, -10.0), Vec3::splat(3.0)),
            (Vec3::new(3.0, -2.0, 30.0), Vec3::splat(0.25)),
        ];

        for (center, extents) in boxes {
            for plane in frustum.planes {
                let normal = plane.truncate();
                let plane_outside = normal.dot(center) + normal.abs().dot(extents) + plane.w < 0.0;
                let corners_outside = Aabb { center, extents }
                    .corners()
                    .iter()
                    .all(|corner| normal.dot(*corner) + plane.w < 0.0);
                assert_eq!(plane_outside, corners_outside);
            }
        }
    }

    #[test]
    fn locked_camera_is_independent_of_later_movement() {
        let mut camera = test_camera(Vec3::ZERO, -90.0);
        let locked = camera.clone();
        let frozen = locked.frustum();

        camera.move_by_delta(CameraDelta {
            forward: 100.0,
            yaw: 45.0,
            ..Default::default()
        });

        assert_eq!(locked.frustum(), frozen);
        assert_ne!(camera.frustum(), frozen);
    }

    #[test]
    fn gpu_camera_matrices_are_consistent() {
        let camera = test_camera(Vec3::new(1.0, 2.0, 3.0), 10.0);
        let gpu = GpuCamera::new(&camera);

        let identity = gpu.view_proj * gpu.inverse_view_proj;
        for column in 0..4 {
            let expect = Mat4::IDENTITY.col(column);
            assert!((identity.col(column) - expect).length() < 1e-4);
        }
        assert_eq!(gpu.planes, camera.frustum().planes);
    }
}
