use serde::{Deserialize, Serialize};

/// Generic JSON envelope wrapping every HTTP response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
            error: None,
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::ok()
        }
    }

    pub fn with_data<T: Serialize>(data: T) -> Self {
        Self {
            data: serde_json::to_value(data).ok(),
            ..Self::ok()
        }
    }

    pub fn with_message_and_data<T: Serialize>(message: impl Into<String>, data: T) -> Self {
        Self {
            message: Some(message.into()),
            data: serde_json::to_value(data).ok(),
            ..Self::ok()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            data: None,
            error: Some(message.into()),
        }
    }
}
