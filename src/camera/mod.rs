pub mod backend;
pub mod controller;

#[cfg(all(target_os = "linux", feature = "camera"))]
pub mod gst;

#[cfg(test)]
mod tests;

pub use backend::{CameraBackend, EncoderHandle, MockCameraBackend};
pub use controller::CameraController;

use crate::error::{HomewatchError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Encode quality for recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }
}

/// Physical output stream selector.
///
/// The main stream carries the high-resolution image used for recording
/// and snapshots; the lores stream feeds preview and motion analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    Main,
    Lores,
}

impl StreamName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Main => "main",
            StreamName::Lores => "lores",
        }
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when both dimensions are at least as large as `other`'s.
    pub fn covers(&self, other: &Resolution) -> bool {
        self.width >= other.width && self.height >= other.height
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One discrete sensor mode as reported by the device, in device order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorMode {
    pub size: Resolution,
    pub fps: f64,
    pub bit_depth: u32,
}

/// Mode table of the Raspberry Pi Camera Module 3 Wide, ordered as the
/// device reports it.
pub const CAMERA_MODULE3_WIDE_MODES: [SensorMode; 3] = [
    SensorMode {
        size: Resolution::new(1536, 864),
        fps: 120.13,
        bit_depth: 10,
    },
    SensorMode {
        size: Resolution::new(2304, 1296),
        fps: 56.03,
        bit_depth: 10,
    },
    SensorMode {
        size: Resolution::new(4608, 2592),
        fps: 14.35,
        bit_depth: 10,
    },
];

/// Runtime noise-reduction control modes understood by the ISP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseReductionMode {
    Off,
    Fast,
    HighQuality,
    Minimal,
    Zsl,
}

impl NoiseReductionMode {
    pub const NAMES: [&'static str; 5] = ["Off", "Fast", "HighQuality", "Minimal", "ZSL"];

    pub fn as_str(&self) -> &'static str {
        match self {
            NoiseReductionMode::Off => "Off",
            NoiseReductionMode::Fast => "Fast",
            NoiseReductionMode::HighQuality => "HighQuality",
            NoiseReductionMode::Minimal => "Minimal",
            NoiseReductionMode::Zsl => "ZSL",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "Off" => Ok(NoiseReductionMode::Off),
            "Fast" => Ok(NoiseReductionMode::Fast),
            "HighQuality" => Ok(NoiseReductionMode::HighQuality),
            "Minimal" => Ok(NoiseReductionMode::Minimal),
            "ZSL" => Ok(NoiseReductionMode::Zsl),
            _ => Err(HomewatchError::invalid_argument(format!(
                "unknown noise reduction mode '{}', expected one of: {:?}",
                name,
                Self::NAMES
            ))),
        }
    }
}
