// Quality levels and the presets that realize them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The five quality tiers, ordered from best to worst.
///
/// `Error` is the audio-only survival tier entered when the link is
/// effectively offline; it carries no video preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityLevel {
    High,
    Medium,
    Low,
    VeryLow,
    Error,
}

impl QualityLevel {
    /// Severity rank: 0 for `High`, increasing as quality drops.
    ///
    /// Comparisons always go through this rank rather than a derived
    /// `Ord`, so the enum's declaration order never silently becomes
    /// load-bearing.
    pub fn severity(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
            Self::VeryLow => 3,
            Self::Error => 4,
        }
    }

    /// The next better tier, or `None` at `High`.
    pub fn step_up(self) -> Option<Self> {
        match self {
            Self::High => None,
            Self::Medium => Some(Self::High),
            Self::Low => Some(Self::Medium),
            Self::VeryLow => Some(Self::Low),
            Self::Error => Some(Self::VeryLow),
        }
    }

    /// The next worse tier, or `None` at `Error`.
    pub fn step_down(self) -> Option<Self> {
        match self {
            Self::High => Some(Self::Medium),
            Self::Medium => Some(Self::Low),
            Self::Low => Some(Self::VeryLow),
            Self::VeryLow => Some(Self::Error),
            Self::Error => None,
        }
    }

    pub fn is_worse_than(self, other: Self) -> bool {
        self.severity() > other.severity()
    }

    pub fn is_better_than(self, other: Self) -> bool {
        self.severity() < other.severity()
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::VeryLow => "VERY_LOW",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Video frame dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Encoder settings for one quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityPreset {
    pub resolution: Resolution,
    pub frame_rate: u32,
    pub bitrate_kbps: u32,
}

impl QualityPreset {
    pub const fn new(width: u32, height: u32, frame_rate: u32, bitrate_kbps: u32) -> Self {
        Self {
            resolution: Resolution { width, height },
            frame_rate,
            bitrate_kbps,
        }
    }
}
