//! JSON messages exchanged with the enhancement service over the WebSocket.
//!
//! Outbound keyframe:
//! ```json
//! {"type": "keyframe", "timestamp": 1700000000000,
//!  "camera_frame": "data:image/jpeg;base64,...", "jacket_render": "data:image/png;base64,...",
//!  "pose": {"landmarks": [...], "shoulderWidth": 0.2, "rotation": 3.14}, "fabric_id": "denim-blue"}
//! ```
//! Inbound: `{"type": "result" | "keyframe_result", "image": "...", "timestamp": ..., "mode": "ai_enhanced"}`
//! or `{"type": "error", "error": "...", "timestamp": ...}`.

use serde::{Deserialize, Serialize};

use crate::error::ChannelError;
use crate::pose::{Landmark, PoseSnapshot};

pub const KEYFRAME_TYPE: &str = "keyframe";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PosePayload {
    pub landmarks: Vec<Landmark>,
    #[serde(rename = "shoulderWidth")]
    pub shoulder_width: f32,
    /// body yaw (rad)
    pub rotation: f32,
}

impl PosePayload {
    pub fn from_snapshot(pose: &PoseSnapshot) -> Self {
        Self {
            landmarks: pose.landmarks.to_vec(),
            shoulder_width: pose.shoulder_width(),
            rotation: pose.body_yaw(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyframeMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Unix time in milliseconds
    pub timestamp: i64,
    pub camera_frame: String,
    pub jacket_render: String,
    pub pose: Option<PosePayload>,
    pub fabric_id: Option<String>,
}

impl KeyframeMessage {
    pub fn new(
        timestamp: i64,
        camera_frame: String,
        jacket_render: String,
        pose: Option<PosePayload>,
        fabric_id: Option<String>,
    ) -> Self {
        Self {
            kind: KEYFRAME_TYPE,
            timestamp,
            camera_frame,
            jacket_render,
            pose,
            fabric_id,
        }
    }

    pub fn to_json(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|e| ChannelError::Protocol(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(alias = "keyframe_result")]
    Result {
        image: String,
        #[serde(default)]
        timestamp: Option<f64>,
        #[serde(default)]
        mode: Option<String>,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        timestamp: Option<f64>,
    },
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text).map_err(|e| ChannelError::Protocol(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::landmark::tests::standing_pose;

    #[test]
    fn test_keyframe_wire_names() {
        let msg = KeyframeMessage::new(
            1234567890,
            "data:image/jpeg;base64,AAA".into(),
            "data:image/png;base64,BBB".into(),
            Some(PosePayload::from_snapshot(&standing_pose())),
            Some("denim-blue".into()),
        );
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["type"], "keyframe");
        assert_eq!(v["timestamp"], 1234567890);
        assert_eq!(v["camera_frame"], "data:image/jpeg;base64,AAA");
        assert_eq!(v["jacket_render"], "data:image/png;base64,BBB");
        assert_eq!(v["fabric_id"], "denim-blue");
        assert_eq!(v["pose"]["landmarks"].as_array().unwrap().len(), 33);
        assert!((v["pose"]["shoulderWidth"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert!(v["pose"]["rotation"].is_number());
    }

    #[test]
    fn test_keyframe_without_pose_sends_null() {
        let msg = KeyframeMessage::new(1, String::new(), String::new(), None, None);
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert!(v["pose"].is_null());
        assert!(v["fabric_id"].is_null());
    }

    #[test]
    fn test_parse_result_and_alias() {
        let result = ServerMessage::parse(r#"{"type": "result", "image": "x", "timestamp": 5}"#).unwrap();
        assert_eq!(
            result,
            ServerMessage::Result {
                image: "x".into(),
                timestamp: Some(5.0),
                mode: None
            }
        );
        let alias = ServerMessage::parse(
            r#"{"type": "keyframe_result", "image": "y", "timestamp": 7, "mode": "fallback"}"#,
        )
        .unwrap();
        assert!(matches!(alias, ServerMessage::Result { mode: Some(ref m), .. } if m == "fallback"));
    }

    #[test]
    fn test_parse_error() {
        let msg = ServerMessage::parse(r#"{"type": "error", "error": "CUDA OOM"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Error {
                error: Some("CUDA OOM".into()),
                timestamp: None
            }
        );
    }

    #[test]
    fn test_parse_unknown_type() {
        assert!(ServerMessage::parse(r#"{"type": "pong"}"#).is_err());
        assert!(ServerMessage::parse("not json").is_err());
    }
}
