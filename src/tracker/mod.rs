pub mod mapper;
pub mod smooth;
pub mod transform;

pub use mapper::{MapperState, SkeletalMapper, TransformInfo, MESH_FACING_BIAS};
pub use smooth::TransformSmoother;
pub use transform::SkeletalTransform;
