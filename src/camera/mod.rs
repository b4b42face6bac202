pub mod source;

pub use source::{FrameSource, SharedFrameSource, StillFrameSource, VideoFrame};
