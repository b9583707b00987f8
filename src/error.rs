//! App error type shared by the library, the job runner and sidecar commands.
//! Implements Display and Serialize for the frontend.

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Aborted")]
    Aborted,

    /// Source could not be resolved to a playable asset.
    #[error("{0}")]
    LoadFailed(String),

    /// Library query or grouped change failed.
    #[error("{0}")]
    Library(String),

    #[error("Library access has not been granted")]
    PermissionDenied,

    #[error("{0}")]
    InvalidRequest(String),
}

impl AppError {
    pub fn aborted() -> Self {
        Self::Aborted
    }

    pub fn ffmpeg_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::FfmpegFailed {
            code,
            stderr: stderr.into(),
        }
    }

    pub fn load_failed(message: impl Into<String>) -> Self {
        Self::LoadFailed(message.into())
    }

    pub fn library(message: impl Into<String>) -> Self {
        Self::Library(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::FfmpegFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == "Aborted" {
            AppError::Aborted
        } else {
            AppError::FfmpegFailed {
                code: -1,
                stderr: s,
            }
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
