use nalgebra::Vector3;
use serde::Deserialize;
use std::f32::consts::TAU;

/// 三角形メッシュ
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Mesh {
    pub positions: Vec<[f32; 3]>,
    /// 空なら読み込み時に面法線から計算
    #[serde(default)]
    pub normals: Vec<[f32; 3]>,
    #[serde(default)]
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn validate(&self) -> Result<(), String> {
        let n = self.positions.len();
        if n == 0 || self.indices.is_empty() {
            return Err("mesh has no geometry".into());
        }
        if self.indices.len() % 3 != 0 {
            return Err(format!("index count {} is not a multiple of 3", self.indices.len()));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= n) {
            return Err(format!("index {} out of range ({} vertices)", bad, n));
        }
        if !self.normals.is_empty() && self.normals.len() != n {
            return Err(format!("{} normals for {} vertices", self.normals.len(), n));
        }
        if !self.uvs.is_empty() && self.uvs.len() != n {
            return Err(format!("{} uvs for {} vertices", self.uvs.len(), n));
        }
        Ok(())
    }

    /// 頂点法線 = 隣接面法線の平均
    pub fn compute_normals(&mut self) {
        let mut acc = vec![Vector3::<f32>::zeros(); self.positions.len()];
        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let pa = Vector3::from(self.positions[a]);
            let pb = Vector3::from(self.positions[b]);
            let pc = Vector3::from(self.positions[c]);
            let face = (pb - pa).cross(&(pc - pa));
            for i in [a, b, c] {
                acc[i] += face;
            }
        }
        self.normals = acc
            .into_iter()
            .map(|n| n.try_normalize(1e-12).unwrap_or_else(Vector3::z).into())
            .collect();
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bone {
    pub name: String,
    #[serde(default)]
    pub parent: Option<usize>,
    pub position: [f32; 3],
}

/// スキニング用のボーン階層（現状は姿勢の参照用に保持するだけ）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Skeleton {
    pub bones: Vec<Bone>,
}

impl Skeleton {
    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|b| b.name == name)
    }

    fn validate(&self) -> Result<(), String> {
        for (i, bone) in self.bones.iter().enumerate() {
            if let Some(p) = bone.parent {
                if p >= i {
                    return Err(format!("bone `{}` parent {} must precede it", bone.name, p));
                }
            }
        }
        Ok(())
    }
}

/// 衣服アセット: 主メッシュ1つと任意のスケルトン
///
/// メッシュはモデル空間で肩の線が y = 0、正面が -Z を向くように作る。
#[derive(Debug, Clone, Deserialize)]
pub struct GarmentAsset {
    #[serde(default = "default_asset_name")]
    pub name: String,
    pub mesh: Mesh,
    #[serde(default)]
    pub skeleton: Option<Skeleton>,
}

fn default_asset_name() -> String {
    "garment".to_string()
}

impl GarmentAsset {
    pub fn from_json(content: &str) -> Result<Self, String> {
        let mut asset: GarmentAsset = serde_json::from_str(content).map_err(|e| e.to_string())?;
        asset.mesh.validate()?;
        if let Some(ref skeleton) = asset.skeleton {
            skeleton.validate()?;
        }
        if asset.mesh.normals.is_empty() {
            asset.mesh.compute_normals();
        }
        Ok(asset)
    }

    /// 内蔵のジャケット: 楕円筒の胴体と2本の袖
    pub fn procedural_jacket() -> Self {
        let mut mesh = Mesh::default();
        // 胴体 (肩幅 1.6)
        append_tube(&mut mesh, [0.0, 0.0, 0.0], [0.0, -2.0, 0.0], 0.8, 0.3, 24, 8);
        // 袖
        append_tube(&mut mesh, [0.72, -0.1, 0.0], [1.05, -1.5, 0.0], 0.18, 0.18, 12, 6);
        append_tube(&mut mesh, [-0.72, -0.1, 0.0], [-1.05, -1.5, 0.0], 0.18, 0.18, 12, 6);

        let bone = |name: &str, parent: Option<usize>, position: [f32; 3]| Bone {
            name: name.to_string(),
            parent,
            position,
        };
        let skeleton = Skeleton {
            bones: vec![
                bone("Spine", None, [0.0, -1.0, 0.0]),
                bone("Neck", Some(0), [0.0, 0.0, 0.0]),
                bone("LeftShoulder", Some(1), [0.72, -0.1, 0.0]),
                bone("RightShoulder", Some(1), [-0.72, -0.1, 0.0]),
                bone("LeftElbow", Some(2), [1.05, -1.5, 0.0]),
                bone("RightElbow", Some(3), [-1.05, -1.5, 0.0]),
            ],
        };

        Self {
            name: "jacket".to_string(),
            mesh,
            skeleton: Some(skeleton),
        }
    }
}

/// a から b へ伸びる楕円断面の筒を追加する (rx: 横半径, rz: 奥行き半径)
fn append_tube(mesh: &mut Mesh, a: [f32; 3], b: [f32; 3], rx: f32, rz: f32, segments: u32, rows: u32) {
    let a = Vector3::from(a);
    let b = Vector3::from(b);
    let axis = (b - a).normalize();
    let side = axis.cross(&Vector3::z()).try_normalize(1e-6).unwrap_or_else(Vector3::x);
    let depth = side.cross(&axis);
    let base = mesh.positions.len() as u32;

    for j in 0..=rows {
        let t = j as f32 / rows as f32;
        let center = a + (b - a) * t;
        for i in 0..=segments {
            let s = i as f32 / segments as f32;
            let theta = s * TAU;
            let (sin, cos) = theta.sin_cos();
            let p = center + side * (rx * cos) + depth * (rz * sin);
            let n = (side * (cos / rx) + depth * (sin / rz)).normalize();
            mesh.positions.push(p.into());
            mesh.normals.push(n.into());
            mesh.uvs.push([s, t]);
        }
    }

    let stride = segments + 1;
    for j in 0..rows {
        for i in 0..segments {
            let i0 = base + j * stride + i;
            let i1 = i0 + 1;
            let i2 = i0 + stride;
            let i3 = i2 + 1;
            mesh.indices.extend_from_slice(&[i0, i2, i1, i1, i2, i3]);
        }
    }
}
