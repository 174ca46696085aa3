use glam::{vec2, Mat4, Vec3};
use raytracer_shared::Camera;

/// Ray representation for raytracing
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    /// Create a new ray; the direction is normalized so that the ray
    /// parameter equals world-space distance.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    /// Primary ray through the center of pixel `pixel` of a `resolution`
    /// sized image.
    pub fn from_camera(camera: &Camera, pixel: [u32; 2], resolution: [u32; 2]) -> Self {
        let width = resolution[0].max(1) as f32;
        let height = resolution[1].max(1) as f32;

        let uv = vec2(
            (pixel[0] as f32 + 0.5) / width,
            (pixel[1] as f32 + 0.5) / height,
        );

        let aspect_ratio = width / height;
        let fov_scale = libm::tanf(camera.fov * 0.5 * core::f32::consts::PI / 180.0);

        let camera_x = (uv.x * 2.0 - 1.0) * aspect_ratio * fov_scale;
        let camera_y = (1.0 - uv.y * 2.0) * fov_scale;

        let forward = Vec3::from(camera.direction);
        let up = Vec3::from(camera.up);
        let right = forward.cross(up).normalize_or_zero();
        let true_up = right.cross(forward);

        let ray_direction = forward + right * camera_x + true_up * camera_y;
        Self::new(Vec3::from(camera.position), ray_direction)
    }

    /// Get point along ray at parameter t
    #[inline]
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// The same ray expressed in an instance's object space.
    ///
    /// The direction is not renormalized, so a local `t` is the same
    /// parameter as on the world ray.
    #[inline]
    pub fn to_local(&self, inverse: &Mat4) -> Ray {
        Ray {
            origin: inverse.transform_point3(self.origin),
            direction: inverse.transform_vector3(self.direction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn new_normalizes_direction() {
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -4.0));
        assert_eq!(ray.direction, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(ray.at(2.0), Vec3::new(0.0, 0.0, -2.0));
    }

    #[test]
    fn local_ray_keeps_parameterization() {
        let transform = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            glam::Quat::from_rotation_z(0.3),
            Vec3::new(10.0, -1.0, 3.0),
        );
        let ray = Ray::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.2, -0.4, 1.0));
        let local = ray.to_local(&transform.inverse());

        let t = 3.5;
        let back = transform.transform_point3(local.at(t));
        assert_abs_diff_eq!(back, ray.at(t), epsilon = 1e-4);
    }

    #[test]
    fn center_pixel_looks_forward() {
        let camera = Camera::new();
        let ray = Ray::from_camera(&camera, [50, 50], [101, 101]);
        assert_abs_diff_eq!(ray.direction, Vec3::new(0.0, 0.0, -1.0), epsilon = 1e-5);
        assert_eq!(ray.origin, Vec3::new(0.0, 0.0, 5.0));
    }
}
