// Camera and scene uniforms
//
// Matches the std140 block `SceneUniforms` in shaders/grid.vert.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use crate::config::CameraConfig;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    /// w is unused
    pub light_position: [f32; 4],
}

impl SceneUniforms {
    pub fn new(camera: &CameraConfig, width: u32, height: u32) -> Self {
        let view = Mat4::look_at_rh(
            Vec3::from(camera.eye),
            Vec3::from(camera.target),
            Vec3::Y,
        );

        let [x, y, z] = camera.light_position;

        Self {
            model: Mat4::IDENTITY.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: projection(camera, width, height).to_cols_array_2d(),
            light_position: [x, y, z, 1.0],
        }
    }
}

/// Perspective projection for Vulkan clip space (Y down, depth 0..1)
pub fn projection(camera: &CameraConfig, width: u32, height: u32) -> Mat4 {
    let aspect = width as f32 / height.max(1) as f32;
    let mut proj = Mat4::perspective_rh(
        camera.fov_degrees.to_radians(),
        aspect,
        camera.near,
        camera.far,
    );
    proj.y_axis.y *= -1.0;
    proj
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    #[test]
    fn layout_matches_std140_block() {
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 3 * 64 + 16);
        assert_eq!(std::mem::offset_of!(SceneUniforms, view), 64);
        assert_eq!(std::mem::offset_of!(SceneUniforms, proj), 128);
        assert_eq!(std::mem::offset_of!(SceneUniforms, light_position), 192);
    }

    #[test]
    fn view_looks_from_eye_to_target() {
        let camera = CameraConfig::default();
        let uniforms = SceneUniforms::new(&camera, 800, 600);
        let view = Mat4::from_cols_array_2d(&uniforms.view);

        let eye = view * Vec3::from(camera.eye).extend(1.0);
        assert_relative_eq!(eye.truncate().length(), 0.0, epsilon = 1e-5);

        // Right-handed: the target sits straight ahead on -Z
        let distance = (Vec3::from(camera.eye) - Vec3::from(camera.target)).length();
        let target = view * Vec3::from(camera.target).extend(1.0);
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(target.y, 0.0, epsilon = 1e-5);
        assert_relative_eq!(target.z, -distance, epsilon = 1e-4);
    }

    #[test]
    fn projection_flips_y_and_uses_aspect() {
        let camera = CameraConfig::default();
        let proj = projection(&camera, 800, 400);

        assert!(proj.y_axis.y < 0.0);
        assert_relative_eq!(proj.x_axis.x * 2.0, -proj.y_axis.y, epsilon = 1e-5);

        // 90 degrees vertical fov: focal length 1
        assert_relative_eq!(proj.y_axis.y, -1.0, epsilon = 1e-5);
    }

    #[test]
    fn near_and_far_map_to_vulkan_depth_range() {
        let camera = CameraConfig::default();
        let proj = projection(&camera, 100, 100);

        let near = proj * Vec4::new(0.0, 0.0, -camera.near, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -camera.far, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn zero_height_does_not_divide_by_zero() {
        let proj = projection(&CameraConfig::default(), 640, 0);
        assert!(proj.x_axis.x.is_finite());
    }

    #[test]
    fn light_position_is_a_point() {
        let camera = CameraConfig {
            light_position: [1.0, 2.0, 3.0],
            ..Default::default()
        };
        let uniforms = SceneUniforms::new(&camera, 1, 1);
        assert_eq!(uniforms.light_position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(uniforms.model, Mat4::IDENTITY.to_cols_array_2d());
    }
}
