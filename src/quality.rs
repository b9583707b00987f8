//! Quality tiers offered in the compressor picker, each pinned to one encoder profile.

use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    High,
    #[default]
    Medium,
    Low,
}

/// Fixed target for a tier: the output fits inside `width`x`height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderProfile {
    pub width: u32,
    pub height: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
}

impl QualityTier {
    pub const ALL: [QualityTier; 3] = [QualityTier::High, QualityTier::Medium, QualityTier::Low];

    pub fn slug(self) -> &'static str {
        match self {
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Low => "low",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            QualityTier::High => "High (1080p)",
            QualityTier::Medium => "Medium (720p)",
            QualityTier::Low => "Low (540p)",
        }
    }

    pub fn profile(self) -> EncoderProfile {
        match self {
            QualityTier::High => EncoderProfile {
                width: 1920,
                height: 1080,
                video_bitrate_kbps: 8000,
                audio_bitrate_kbps: 192,
            },
            QualityTier::Medium => EncoderProfile {
                width: 1280,
                height: 720,
                video_bitrate_kbps: 4000,
                audio_bitrate_kbps: 128,
            },
            QualityTier::Low => EncoderProfile {
                width: 960,
                height: 540,
                video_bitrate_kbps: 2000,
                audio_bitrate_kbps: 96,
            },
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for QualityTier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        QualityTier::ALL
            .into_iter()
            .find(|tier| tier.slug() == normalized)
            .ok_or_else(|| AppError::invalid_request(format!("Unknown quality tier: {}", s)))
    }
}

/// Descriptor sent to the frontend so it can render the segmented picker.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityTierInfo {
    pub id: QualityTier,
    pub label: &'static str,
    #[serde(flatten)]
    pub profile: EncoderProfile,
}

pub fn tier_catalog() -> Vec<QualityTierInfo> {
    QualityTier::ALL
        .into_iter()
        .map(|tier| QualityTierInfo {
            id: tier,
            label: tier.label(),
            profile: tier.profile(),
        })
        .collect()
}
