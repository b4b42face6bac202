pub mod detector;
pub mod landmark;
pub mod replay;
pub mod source;

pub use detector::{DetectorOptions, LandmarkDetector};
pub use landmark::{Landmark, LandmarkIndex, PoseSnapshot};
pub use replay::{PoseRecording, ReplayDetector};
pub use source::{PoseReceiver, PoseSource, PoseSourceStats, ProcessOutcome};
