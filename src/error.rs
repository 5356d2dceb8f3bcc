use serde::{Deserialize, Serialize};

/// Failure of a single remote operation, classified the way the status model
/// needs to render it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Rejected before or by the server because the input itself is unacceptable.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        reasons: Vec<String>,
    },

    #[error("transport error{}: {message}", status_suffix(.status))]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The caller lost (or never had) entitlement. Rendered as `denied`.
    #[error("permission denied: {message}")]
    Permission { message: String },

    /// The server explicitly reported a job failure, or omitted a required status.
    #[error("job failed: {message}")]
    JobFailure { message: String },

    /// A resource with the same name already exists and needs a user decision.
    #[error("a resource named {name:?} already exists")]
    Conflict { name: String },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            reasons: Vec::new(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, Self::Permission { .. })
    }

    /// Map a non-success HTTP status and its body text to an error.
    pub fn from_status(status: u16, body: &str, fallback_name: Option<&str>) -> Self {
        let (message, reasons) = parse_error_body(body);
        let message = message.unwrap_or_else(|| {
            if body.trim().is_empty() {
                format!("request failed with status {status}")
            } else {
                body.trim().to_owned()
            }
        });
        match status {
            401 | 403 => Self::Permission { message },
            409 => Self::Conflict {
                name: fallback_name.map(str::to_owned).unwrap_or(message),
            },
            400 | 413 | 422 => Self::Validation { message, reasons },
            _ => Self::Transport {
                status: Some(status),
                message,
            },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

fn parse_error_body(raw: &str) -> (Option<String>, Vec<String>) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return (None, Vec::new());
    };
    let message = ["error", "message", "developer_message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_owned);
    let reasons = value
        .get("reasons")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_owned))
                .collect()
        })
        .unwrap_or_default();
    (message, reasons)
}

/// Key of an entry in the error mapping. Each operation appends to and clears
/// only its own key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Load,
    Add,
    Delete,
    Lock,
    Update,
    Usage,
    Thumbnail,
    LinkCheck,
    Download,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Add => "add",
            Self::Delete => "delete",
            Self::Lock => "lock",
            Self::Update => "update",
            Self::Usage => "usage",
            Self::Thumbnail => "thumbnail",
            Self::LinkCheck => "link_check",
            Self::Download => "download",
        }
    }
}
