//! # Quality Profile Selector
//!
//! Sceglie i parametri di compressione in base alla dimensione originale del file.
//!
//! ## Tier (soglia più alta controllata per prima):
//! - **> 50MB**: aggressivo, CRF 32, preset `ultrafast`, fps=30, max 1280×720
//! - **20MB - 50MB**: moderato, CRF 30, preset `faster`, max 1920×1080
//! - **<= 20MB**: default, CRF 28, preset `veryfast`, nessun downscale
//!
//! Per tutti i tier: H.264 + AAC 128k, `+faststart`, e il filtro che rende
//! pari larghezza e altezza sempre in coda alla catena (il chroma subsampling
//! di H.264 richiede dimensioni pari).
//!
//! `select` è pura e deterministica: stessi input, stesso profilo.

use crate::args;
use crate::config::MB;
use crate::media::MediaKind;
use serde::{Deserialize, Serialize};

pub const AGGRESSIVE_THRESHOLD: u64 = 50 * MB;
pub const MODERATE_THRESHOLD: u64 = 20 * MB;

pub const EVEN_DIMENSIONS_FILTER: &str = "scale=trunc(iw/2)*2:trunc(ih/2)*2";
const FPS_CAP_FILTER: &str = "fps=30";
const FIT_720P_FILTER: &str = "scale=min(iw\\,1280):min(ih\\,720):force_original_aspect_ratio=decrease";
const FIT_1080P_FILTER: &str = "scale=min(iw\\,1920):min(ih\\,1080):force_original_aspect_ratio=decrease";

/// Size bucket that determines compression aggressiveness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Default,
    Moderate,
    Aggressive,
}

impl Tier {
    pub fn for_size(byte_size: u64) -> Self {
        if byte_size > AGGRESSIVE_THRESHOLD {
            Self::Aggressive
        } else if byte_size > MODERATE_THRESHOLD {
            Self::Moderate
        } else {
            Self::Default
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Default => "standard file size, default compression",
            Self::Moderate => "large file, stronger compression",
            Self::Aggressive => "very large file, aggressive compression",
        }
    }
}

/// Encoder settings for one compression job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingProfile {
    pub tier: Tier,
    pub codec: String,
    /// CRF value, lower = better quality
    pub quality_factor: u8,
    pub speed_preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub video_filters: Vec<String>,
    pub container_flags: Vec<String>,
}

/// Select the encoding profile for a file of `byte_size` bytes
pub fn select(byte_size: u64, kind: MediaKind) -> EncodingProfile {
    let tier = Tier::for_size(byte_size);

    let (quality_factor, speed_preset, mut video_filters) = match tier {
        Tier::Aggressive => {
            let mut filters = Vec::new();
            // A still image has no frame rate to cap
            if kind == MediaKind::Video {
                filters.push(FPS_CAP_FILTER.to_string());
            }
            filters.push(FIT_720P_FILTER.to_string());
            (32, "ultrafast", filters)
        }
        Tier::Moderate => (30, "faster", vec![FIT_1080P_FILTER.to_string()]),
        Tier::Default => (28, "veryfast", Vec::new()),
    };

    video_filters.push(EVEN_DIMENSIONS_FILTER.to_string());

    EncodingProfile {
        tier,
        codec: "libx264".to_string(),
        quality_factor,
        speed_preset: speed_preset.to_string(),
        audio_codec: "aac".to_string(),
        audio_bitrate: "128k".to_string(),
        video_filters,
        container_flags: args!["-movflags", "+faststart"],
    }
}

impl EncodingProfile {
    /// Build the engine argument list, in the order the engine expects:
    /// input, video codec, quality, preset, audio codec, audio bitrate,
    /// filter chain, container flags, output.
    pub fn to_args(&self, input_name: &str, output_name: &str) -> Vec<String> {
        let mut args = args![
            "-i", input_name,
            "-c:v", self.codec,
            "-crf", self.quality_factor,
            "-preset", self.speed_preset,
            "-c:a", self.audio_codec,
            "-b:a", self.audio_bitrate,
        ];

        if !self.video_filters.is_empty() {
            args.push("-vf".to_string());
            args.push(self.video_filters.join(","));
        }

        args.extend(self.container_flags.iter().cloned());
        args.push(output_name.to_string());
        args
    }

    /// Max output frame, if this profile downscales
    pub fn max_dimensions(&self) -> Option<(u32, u32)> {
        match self.tier {
            Tier::Aggressive => Some((1280, 720)),
            Tier::Moderate => Some((1920, 1080)),
            Tier::Default => None,
        }
    }
}
