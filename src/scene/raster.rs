use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

use crate::material::PbrMaterial;

use super::camera::{PerspectiveCamera, Projected};
use super::mesh::Mesh;
use super::surface::RenderSurface;

/// 環境光 + 平行光
#[derive(Debug, Clone, Copy)]
pub struct Lighting {
    pub ambient: f32,
    pub directional: f32,
    /// 光源へ向かう単位ベクトル
    pub direction: Vector3<f32>,
}

impl Lighting {
    pub fn new(ambient: f32, directional: f32) -> Self {
        Self {
            ambient,
            directional,
            // 右上手前から
            direction: Vector3::new(0.5, 1.0, 1.0).normalize(),
        }
    }
}

struct ShadedVertex {
    screen: Projected,
    world: Vector3<f32>,
    normal: Vector3<f32>,
    uv: [f32; 2],
}

/// メッシュをソフトウェアラスタライズする（両面描画、深度テストあり）
pub fn draw_mesh(
    surface: &mut RenderSurface,
    view_projection: &Matrix4<f32>,
    eye: &Point3<f32>,
    model: &Matrix4<f32>,
    mesh: &Mesh,
    material: &PbrMaterial,
    lighting: &Lighting,
) -> usize {
    let (width, height) = surface.size();
    let normal_matrix: Matrix3<f32> = model.fixed_view::<3, 3>(0, 0).into_owned();

    let vertices: Vec<Option<ShadedVertex>> = mesh
        .positions
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let world = model.transform_point(&Point3::from(*p));
            let screen = PerspectiveCamera::project(view_projection, &world, width, height)?;
            let n = mesh.normals.get(i).copied().unwrap_or([0.0, 0.0, 1.0]);
            let normal = (normal_matrix * Vector3::from(n))
                .try_normalize(1e-12)
                .unwrap_or_else(Vector3::z);
            Some(ShadedVertex {
                screen,
                world: world.coords,
                normal,
                uv: mesh.uvs.get(i).copied().unwrap_or([0.0, 0.0]),
            })
        })
        .collect();

    let mut drawn = 0;
    for tri in mesh.indices.chunks_exact(3) {
        let (Some(a), Some(b), Some(c)) = (
            vertices[tri[0] as usize].as_ref(),
            vertices[tri[1] as usize].as_ref(),
            vertices[tri[2] as usize].as_ref(),
        ) else {
            // カメラ面をまたぐ三角形は描かない
            continue;
        };
        if draw_triangle(surface, [a, b, c], eye, material, lighting) {
            drawn += 1;
        }
    }
    drawn
}

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

fn draw_triangle(
    surface: &mut RenderSurface,
    v: [&ShadedVertex; 3],
    eye: &Point3<f32>,
    material: &PbrMaterial,
    lighting: &Lighting,
) -> bool {
    let p: [(f32, f32); 3] = [
        (v[0].screen.x, v[0].screen.y),
        (v[1].screen.x, v[1].screen.y),
        (v[2].screen.x, v[2].screen.y),
    ];
    let area = edge(p[0], p[1], p[2]);
    if area.abs() < 1e-8 {
        return false;
    }

    let (width, height) = surface.size();
    let min_x = p.iter().map(|q| q.0).fold(f32::MAX, f32::min).floor().max(0.0) as u32;
    let min_y = p.iter().map(|q| q.1).fold(f32::MAX, f32::min).floor().max(0.0) as u32;
    let max_x = p.iter().map(|q| q.0).fold(f32::MIN, f32::max).ceil().min(width as f32 - 1.0);
    let max_y = p.iter().map(|q| q.1).fold(f32::MIN, f32::max).ceil().min(height as f32 - 1.0);
    if max_x < 0.0 || max_y < 0.0 {
        return false;
    }
    let (max_x, max_y) = (max_x as u32, max_y as u32);

    let inv_w = [1.0 / v[0].screen.w, 1.0 / v[1].screen.w, 1.0 / v[2].screen.w];
    let mut any = false;

    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let c = (x as f32 + 0.5, y as f32 + 0.5);
            let b = [
                edge(p[1], p[2], c) / area,
                edge(p[2], p[0], c) / area,
                edge(p[0], p[1], c) / area,
            ];
            if b.iter().any(|&w| w < 0.0) {
                continue;
            }
            let depth = b[0] * v[0].screen.depth + b[1] * v[1].screen.depth + b[2] * v[2].screen.depth;
            if !(-1.0..=1.0).contains(&depth) {
                continue;
            }
            if !surface.depth_test(x, y, depth) {
                continue;
            }

            // 透視補正した重み
            let pw = [b[0] * inv_w[0], b[1] * inv_w[1], b[2] * inv_w[2]];
            let sum = pw[0] + pw[1] + pw[2];
            let pw = [pw[0] / sum, pw[1] / sum, pw[2] / sum];

            let uv = [
                pw[0] * v[0].uv[0] + pw[1] * v[1].uv[0] + pw[2] * v[2].uv[0],
                pw[0] * v[0].uv[1] + pw[1] * v[1].uv[1] + pw[2] * v[2].uv[1],
            ];
            let world = v[0].world * pw[0] + v[1].world * pw[1] + v[2].world * pw[2];
            let normal = (v[0].normal * pw[0] + v[1].normal * pw[1] + v[2].normal * pw[2])
                .try_normalize(1e-12)
                .unwrap_or_else(Vector3::z);

            let rgb = shade(material, lighting, &world, &normal, &eye.coords, uv);
            surface.put_pixel(x, y, [to_u8(rgb[0]), to_u8(rgb[1]), to_u8(rgb[2]), 255]);
            any = true;
        }
    }
    any
}

/// Lambert 拡散 + roughness で鋭さを変える Blinn-Phong 鏡面
pub fn shade(
    material: &PbrMaterial,
    lighting: &Lighting,
    world: &Vector3<f32>,
    normal: &Vector3<f32>,
    eye: &Vector3<f32>,
    uv: [f32; 2],
) -> [f32; 3] {
    let view = (eye - world).try_normalize(1e-12).unwrap_or_else(Vector3::z);
    // 裏面は法線を反転
    let mut n = if normal.dot(&view) < 0.0 { -normal } else { *normal };

    if let Some(ref map) = material.normal_map {
        let s = map.sample(uv[0], uv[1]);
        let tangent = Vector3::y().cross(&n).try_normalize(1e-6).unwrap_or_else(Vector3::x);
        let bitangent = n.cross(&tangent);
        n = (n + tangent * ((s[0] * 2.0 - 1.0) * 0.5) + bitangent * ((s[1] * 2.0 - 1.0) * 0.5))
            .try_normalize(1e-12)
            .unwrap_or(n);
    }

    let mut base = material.base_color;
    if let Some(ref map) = material.diffuse_map {
        let s = map.sample(uv[0], uv[1]);
        base = [base[0] * s[0], base[1] * s[1], base[2] * s[2]];
    }
    let roughness = match material.roughness_map {
        Some(ref map) => material.roughness * map.sample(uv[0], uv[1])[0],
        None => material.roughness,
    }
    .clamp(0.0, 1.0);
    let metal = material.metalness.clamp(0.0, 1.0);

    let l = lighting.direction;
    let diffuse = lighting.ambient + lighting.directional * n.dot(&l).max(0.0);
    let half = (l + view).try_normalize(1e-12).unwrap_or(n);
    let gloss = 1.0 - roughness;
    let shininess = 2.0 + gloss * gloss * 126.0;
    let spec = lighting.directional * gloss * n.dot(&half).max(0.0).powf(shininess);

    let mut rgb = [0.0; 3];
    for i in 0..3 {
        let f0 = 0.04 * (1.0 - metal) + base[i] * metal;
        rgb[i] = (base[i] * diffuse * (1.0 - metal * 0.5) + spec * f0 * 4.0).clamp(0.0, 1.0);
    }
    rgb
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Mesh {
        Mesh {
            positions: vec![[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]],
            normals: vec![[0.0, 0.0, 1.0]; 4],
            uvs: vec![[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    fn camera() -> PerspectiveCamera {
        PerspectiveCamera::new(50.0, 0.1, 100.0, 5.0, 1.0)
    }

    #[test]
    fn test_quad_covers_center() {
        let mut surface = RenderSurface::new(64, 64, true).unwrap();
        surface.clear([0, 0, 0, 0]);
        let cam = camera();
        let drawn = draw_mesh(
            &mut surface,
            &cam.view_projection(),
            &cam.eye(),
            &Matrix4::identity(),
            &quad(),
            &PbrMaterial::default(),
            &Lighting::new(0.4, 0.5),
        );
        assert_eq!(drawn, 2);
        let img = surface.read_pixels().unwrap();
        assert_eq!(img.get_pixel(32, 32).0[3], 255);
        assert_eq!(img.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn test_back_face_still_lit() {
        let mut surface = RenderSurface::new(32, 32, true).unwrap();
        surface.clear([0, 0, 0, 0]);
        let cam = camera();
        let flipped = nalgebra::Rotation3::from_euler_angles(0.0, std::f32::consts::PI, 0.0).to_homogeneous();
        draw_mesh(
            &mut surface,
            &cam.view_projection(),
            &cam.eye(),
            &flipped,
            &quad(),
            &PbrMaterial::default(),
            &Lighting::new(0.4, 0.5),
        );
        let p = surface.read_pixels().unwrap().get_pixel(16, 16).0;
        assert_eq!(p[3], 255);
        assert!(p[0] > 0);
    }

    #[test]
    fn test_nearer_triangle_wins() {
        let mut surface = RenderSurface::new(32, 32, true).unwrap();
        surface.clear([0, 0, 0, 0]);
        let cam = camera();
        let vp = cam.view_projection();
        let lighting = Lighting::new(0.4, 0.5);
        let red = PbrMaterial {
            base_color: [1.0, 0.0, 0.0],
            ..PbrMaterial::default()
        };
        let blue = PbrMaterial {
            base_color: [0.0, 0.0, 1.0],
            ..PbrMaterial::default()
        };
        let near = Matrix4::new_translation(&Vector3::new(0.0, 0.0, 1.0));
        draw_mesh(&mut surface, &vp, &cam.eye(), &near, &quad(), &red, &lighting);
        draw_mesh(&mut surface, &vp, &cam.eye(), &Matrix4::identity(), &quad(), &blue, &lighting);
        let p = surface.read_pixels().unwrap().get_pixel(16, 16).0;
        assert!(p[0] > p[2]);
    }

    #[test]
    fn test_lighting_stays_below_saturation() {
        let material = PbrMaterial {
            base_color: [0.8, 0.8, 0.8],
            roughness: 1.0,
            ..PbrMaterial::default()
        };
        let lighting = Lighting::new(0.4, 0.5);
        let rgb = shade(
            &material,
            &lighting,
            &Vector3::zeros(),
            &lighting.direction,
            &Vector3::new(0.0, 0.0, 5.0),
            [0.0, 0.0],
        );
        assert!(rgb[0] < 0.8);
    }
}
