pub mod blend;
pub mod composite;
pub mod fps;
pub mod limiter;
pub mod skeleton;
#[cfg(feature = "desktop")]
pub mod window;

pub use blend::BlendState;
pub use composite::{
    CompositeRenderLoop, DisplaySink, HeadlessSink, IntervalVsync, RenderLoopHandle, RenderStats, Vsync,
};
pub use fps::FpsMeter;
pub use limiter::FrameLimiter;
pub use skeleton::POSE_CONNECTIONS;
#[cfg(feature = "desktop")]
pub use window::{MinifbWindow, WindowSink};
