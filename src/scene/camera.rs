use nalgebra::{Matrix4, Perspective3, Point3, Vector3, Vector4};

use crate::config::SceneConfig;

/// 固定画角の透視投影カメラ。+Z 側から原点を見る
#[derive(Debug, Clone)]
pub struct PerspectiveCamera {
    fov_y: f32,
    near: f32,
    far: f32,
    aspect: f32,
    eye: Point3<f32>,
}

/// スクリーン座標に投影された頂点
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projected {
    pub x: f32,
    pub y: f32,
    /// NDC の z (-1〜1)
    pub depth: f32,
    /// clip 空間の w（透視補正用）
    pub w: f32,
}

impl PerspectiveCamera {
    pub fn new(fov_deg: f32, near: f32, far: f32, camera_z: f32, aspect: f32) -> Self {
        Self {
            fov_y: fov_deg.to_radians(),
            near,
            far,
            aspect,
            eye: Point3::new(0.0, 0.0, camera_z),
        }
    }

    pub fn from_config(config: &SceneConfig) -> Self {
        let aspect = config.viewport_width as f32 / config.viewport_height as f32;
        Self::new(config.fov_deg, config.near, config.far, config.camera_z, aspect)
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        }
    }

    pub fn eye(&self) -> Point3<f32> {
        self.eye
    }

    pub fn view_projection(&self) -> Matrix4<f32> {
        let projection = Perspective3::new(self.aspect, self.fov_y, self.near, self.far);
        let view = Matrix4::look_at_rh(&self.eye, &Point3::origin(), &Vector3::y());
        projection.as_matrix() * view
    }

    /// ワールド座標をスクリーン座標へ。カメラの後ろなら None
    pub fn project(view_projection: &Matrix4<f32>, p: &Point3<f32>, width: u32, height: u32) -> Option<Projected> {
        let clip = view_projection * Vector4::new(p.x, p.y, p.z, 1.0);
        if clip.w <= 1e-5 {
            return None;
        }
        let ndc = clip.xyz() / clip.w;
        Some(Projected {
            x: (ndc.x + 1.0) * 0.5 * width as f32,
            y: (1.0 - ndc.y) * 0.5 * height as f32,
            depth: ndc.z,
            w: clip.w,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_projects_to_center() {
        let cam = PerspectiveCamera::new(50.0, 0.1, 1000.0, 5.0, 16.0 / 9.0);
        let p = PerspectiveCamera::project(&cam.view_projection(), &Point3::origin(), 1280, 720).unwrap();
        assert!((p.x - 640.0).abs() < 1e-3);
        assert!((p.y - 360.0).abs() < 1e-3);
        assert!(p.depth > -1.0 && p.depth < 1.0);
    }

    #[test]
    fn test_scene_up_is_screen_up() {
        let cam = PerspectiveCamera::new(50.0, 0.1, 1000.0, 5.0, 1.0);
        let vp = cam.view_projection();
        let up = PerspectiveCamera::project(&vp, &Point3::new(0.0, 1.0, 0.0), 100, 100).unwrap();
        assert!(up.y < 50.0);
    }

    #[test]
    fn test_behind_camera_is_culled() {
        let cam = PerspectiveCamera::new(50.0, 0.1, 1000.0, 5.0, 1.0);
        assert!(PerspectiveCamera::project(&cam.view_projection(), &Point3::new(0.0, 0.0, 10.0), 100, 100).is_none());
    }

    #[test]
    fn test_aspect_rejects_degenerate() {
        let mut cam = PerspectiveCamera::new(50.0, 0.1, 1000.0, 5.0, 2.0);
        cam.set_aspect(0.0);
        assert_eq!(cam.aspect(), 2.0);
        cam.set_aspect(1.5);
        assert_eq!(cam.aspect(), 1.5);
    }
}
