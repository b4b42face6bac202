pub mod binding;
pub mod fabric;
pub mod texture;

pub use binding::{MaterialBinder, PbrMaterial};
pub use fabric::{Color, Fabric, FabricCatalog, FabricFinish};
pub use texture::{FileTextureLoader, Texture, TextureLoader};
