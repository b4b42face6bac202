pub mod client;
pub mod keyframe;
pub mod protocol;
pub mod transport;

pub use client::{ChannelStats, ConnectionState, EnhancementChannel, EnhancementFrame, EnhancementReceiver};
pub use keyframe::KeyframeScheduler;
pub use protocol::{KeyframeMessage, PosePayload, ServerMessage};
pub use transport::{Connector, MessageSink, MessageStream, WebSocketConnector};
