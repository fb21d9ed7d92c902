//! Wire-compatible input/output types for a P.1203 session, and the small
//! internal types (synthetic frames, representation identity) the models
//! build from them.

use serde::{Deserialize, Serialize};

/// A validated session input report, as received from the extractor or a
/// hand-authored JSON file. Field names are kept exactly as the standard's
/// clause numbers (`I11`, `I13`, `I23`, ...) for wire compatibility.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct InputReport {
    #[serde(rename = "IGen", default)]
    pub i_gen: IGen,

    #[serde(rename = "I11", default)]
    pub i11: Option<I11>,

    #[serde(rename = "I13", default)]
    pub i13: Option<I13>,

    #[serde(rename = "I23", default)]
    pub i23: Option<I23>,

    /// Pre-computed per-second audio MOS; when present, bypasses Pa.
    #[serde(rename = "O21", default)]
    pub o21: Option<Vec<f64>>,

    /// Pre-computed per-second video MOS; when present, bypasses Pv.
    #[serde(rename = "O22", default)]
    pub o22: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IGen {
    #[serde(rename = "displaySize", default)]
    pub display_size: Option<String>,

    #[serde(default)]
    pub device: Option<String>,
}

impl Default for IGen {
    fn default() -> Self {
        IGen {
            display_size: None,
            device: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct I11 {
    #[serde(rename = "streamId", default)]
    pub stream_id: Option<i64>,

    #[serde(default)]
    pub segments: Vec<AudioSegment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct I13 {
    #[serde(rename = "streamId", default)]
    pub stream_id: Option<i64>,

    pub segments: Vec<VideoSegment>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct I23 {
    /// `(position_seconds, duration_seconds)` pairs, sorted by position.
    #[serde(default)]
    pub stalling: Vec<(f64, f64)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioSegment {
    pub codec: String,
    pub start: f64,
    pub duration: f64,
    pub bitrate: f64,
    pub representation: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoSegment {
    pub codec: String,
    pub start: f64,
    pub duration: f64,
    pub bitrate: f64,
    pub fps: f64,
    pub resolution: String,
    pub representation: Option<String>,
    pub frames: Option<Vec<RawFrame>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FrameType {
    I,
    P,
    B,
}

impl FrameType {
    /// Parses a wire `frameType` string, rejecting anything outside
    /// `{I, P, B}` with a typed error rather than a generic schema failure.
    pub fn parse(s: &str) -> Result<FrameType, base::Error> {
        match s {
            "I" => Ok(FrameType::I),
            "P" => Ok(FrameType::P),
            "B" => Ok(FrameType::B),
            other => base::bail_t!(InvalidFrameType, "invalid frame type: {}", other),
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameType::I => write!(f, "I"),
            FrameType::P => write!(f, "P"),
            FrameType::B => write!(f, "B"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "frameType")]
    pub frame_type: String,

    #[serde(rename = "frameSize")]
    pub frame_size: f64,

    #[serde(rename = "qpValues")]
    pub qp_values: Option<Vec<f64>>,
}

/// Device class, affecting nothing in the current model version but kept
/// for forward compatibility with the standard's mobile-specific coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Pc,
    Mobile,
}

impl Default for Device {
    fn default() -> Self {
        Device::Pc
    }
}

impl std::str::FromStr for Device {
    type Err = base::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pc" => Ok(Device::Pc),
            "mobile" => Ok(Device::Mobile),
            other => base::bail_t!(SchemaError, "unknown device: {}", other),
        }
    }
}

/// A synthetic frame as built by Pa (100 Hz) or Pv (at `segment.fps`) from
/// the input segments, and streamed through the [`crate::window::MeasurementWindow`].
#[derive(Debug, Clone)]
pub struct SynthFrame {
    pub duration: f64,
    pub dts: f64,
    pub bitrate: f64,
    pub codec: String,
    pub fps: Option<f64>,
    pub resolution: Option<String>,
    pub frame_type: Option<FrameType>,
    pub size: Option<f64>,
    pub qp_values: Option<Vec<f64>>,
    pub representation: String,
}

/// Recognized pipeline options (§6 Configuration).
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub debug: bool,
    pub amendment_1_audiovisual: bool,
    pub amendment_1_stalling: bool,
    pub amendment_1_app_2: bool,
    pub fast_mode: bool,
    /// Overrides `IGen.displaySize` when set.
    pub display_res: Option<String>,
    /// Overrides `IGen.device` when set.
    pub device: Option<Device>,
}

/// The session-level result bundle (§6 Output).
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    #[serde(rename = "streamId")]
    pub stream_id: i64,
    pub mode: i32,
    #[serde(rename = "O23")]
    pub o23: f64,
    #[serde(rename = "O34")]
    pub o34: Vec<f64>,
    #[serde(rename = "O35")]
    pub o35: f64,
    #[serde(rename = "O46")]
    pub o46: f64,
    pub date: String,
    #[serde(rename = "O21", skip_serializing_if = "Option::is_none")]
    pub o21: Option<Vec<f64>>,
    #[serde(rename = "O22", skip_serializing_if = "Option::is_none")]
    pub o22: Option<Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_type_parse_accepts_known_values() {
        assert_eq!(FrameType::parse("I").unwrap(), FrameType::I);
        assert_eq!(FrameType::parse("P").unwrap(), FrameType::P);
        assert_eq!(FrameType::parse("B").unwrap(), FrameType::B);
    }

    #[test]
    fn frame_type_parse_rejects_unknown_value() {
        let err = FrameType::parse("X").unwrap_err();
        assert_eq!(err.kind(), base::ErrorKind::InvalidFrameType);
    }
}
