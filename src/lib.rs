pub mod camera;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod material;
pub mod math;
pub mod pose;
pub mod render;
pub mod scene;
pub mod session;
pub mod tracker;
