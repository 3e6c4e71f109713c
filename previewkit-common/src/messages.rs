use crate::{BuildFailure, BuildPhase, LogLine, ProjectClassification};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current version of the preview selection protocol.
///
/// Messages without a version field are treated as version 1.
pub const PROTOCOL_VERSION: u32 = 1;

fn default_version() -> u32 {
    1
}

/// Raw details of an element picked inside the preview
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDetails {
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Visible text, already truncated by the preview side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Messages exchanged between the host page and the preview surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectionMessage {
    // Host -> preview
    SetMode {
        enabled: bool,
    },

    // Preview -> host
    Ready,
    ElementPicked {
        identifier: String,
        details: ElementDetails,
    },
}

impl SelectionMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            SelectionMessage::SetMode { .. } => "SET_MODE",
            SelectionMessage::Ready => "READY",
            SelectionMessage::ElementPicked { .. } => "ELEMENT_PICKED",
        }
    }
}

/// Versioned wire envelope: `{"v":1,"type":"SET_MODE","enabled":true}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewEnvelope {
    #[serde(default = "default_version")]
    pub v: u32,
    #[serde(flatten)]
    pub message: SelectionMessage,
}

/// Errors decoding a preview message
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed preview message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u32),
}

impl PreviewEnvelope {
    pub fn new(message: SelectionMessage) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            message,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a raw message, rejecting versions this build does not speak
    pub fn decode(raw: &str) -> Result<SelectionMessage, ProtocolError> {
        let envelope: PreviewEnvelope = serde_json::from_str(raw)?;
        if envelope.v != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(envelope.v));
        }
        Ok(envelope.message)
    }
}

/// Events published by the orchestrator to the embedding UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    Classified {
        run_id: uuid::Uuid,
        classification: ProjectClassification,
    },
    PhaseChanged {
        run_id: uuid::Uuid,
        phase: BuildPhase,
    },
    Log {
        run_id: uuid::Uuid,
        line: LogLine,
    },
    PreviewReady {
        run_id: uuid::Uuid,
        url: String,
        port: Option<u16>,
    },
    Failed {
        run_id: uuid::Uuid,
        failure: BuildFailure,
    },
    Unsupported {
        run_id: uuid::Uuid,
        message: String,
    },
    ElementPicked {
        identifier: String,
        details: ElementDetails,
    },
}
