use std::fmt;
use std::str::FromStr;

use crate::error::{SoutError, SoutResult};

/// Elementary stream category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsCategory {
    /// Unknown or data stream
    Unknown,
    /// Video track
    Video,
    /// Audio track
    Audio,
    /// Subpicture (subtitles, teletext)
    Spu,
}

impl EsCategory {
    /// Short lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            EsCategory::Unknown => "unknown",
            EsCategory::Video => "video",
            EsCategory::Audio => "audio",
            EsCategory::Spu => "spu",
        }
    }
}

impl FromStr for EsCategory {
    type Err = SoutError;

    fn from_str(s: &str) -> SoutResult<Self> {
        match s {
            "video" => Ok(EsCategory::Video),
            "audio" => Ok(EsCategory::Audio),
            "spu" | "sub" | "subtitle" => Ok(EsCategory::Spu),
            "unknown" | "data" => Ok(EsCategory::Unknown),
            other => Err(SoutError::Config(format!("unknown es category {other}"))),
        }
    }
}

/// Four character codec code
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Build from a byte string literal
    pub const fn new(code: &[u8; 4]) -> Self {
        FourCC(*code)
    }
}

impl FromStr for FourCC {
    type Err = SoutError;

    /// Parse up to four ASCII characters, padding with spaces
    fn from_str(s: &str) -> SoutResult<Self> {
        if s.is_empty() || s.len() > 4 || !s.is_ascii() {
            return Err(SoutError::Config(format!("invalid fourcc \"{s}\"")));
        }
        let mut code = [b' '; 4];
        code[..s.len()].copy_from_slice(s.as_bytes());
        Ok(FourCC(code))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0).trim_end())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({self})")
    }
}

/// Audio track parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
    /// Bits per sample
    pub bits_per_sample: u16,
}

impl AudioFormat {
    /// Bytes per interleaved sample frame, `None` if it overflows
    pub fn block_align(&self) -> Option<u16> {
        self.channels.checked_mul(self.bits_per_sample.div_ceil(8))
    }

    /// Bytes per second of raw audio, `None` if it overflows
    pub fn byte_rate(&self) -> Option<u32> {
        self.rate.checked_mul(u32::from(self.block_align()?))
    }
}

/// Video track parameters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoFormat {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate as numerator/denominator
    pub frame_rate: Option<(u32, u32)>,
}

/// Description of one elementary stream.
///
/// Shared behind an `Arc` by every stage and muxer input that handles the
/// track; it never changes once a track has been added.
#[derive(Debug, Clone, PartialEq)]
pub struct EsFormat {
    /// Elementary stream id assigned by the producer
    pub id: i32,
    /// Track category
    pub category: EsCategory,
    /// Codec
    pub codec: FourCC,
    /// Audio parameters, meaningful for audio tracks
    pub audio: AudioFormat,
    /// Video parameters, meaningful for video tracks
    pub video: VideoFormat,
    /// Bitrate in bits per second, 0 if unknown
    pub bitrate: u32,
    /// ISO 639 language code
    pub language: Option<String>,
    /// Codec configuration data
    pub extra: Vec<u8>,
}

impl EsFormat {
    /// Create a format with no parameters
    pub fn new(category: EsCategory, codec: FourCC) -> Self {
        EsFormat {
            id: 0,
            category,
            codec,
            audio: AudioFormat::default(),
            video: VideoFormat::default(),
            bitrate: 0,
            language: None,
            extra: Vec::new(),
        }
    }

    /// Create an audio format
    pub fn audio(codec: FourCC, rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        let mut fmt = EsFormat::new(EsCategory::Audio, codec);
        fmt.audio = AudioFormat {
            rate,
            channels,
            bits_per_sample,
        };
        fmt
    }

    /// Create a video format
    pub fn video(codec: FourCC, width: u32, height: u32) -> Self {
        let mut fmt = EsFormat::new(EsCategory::Video, codec);
        fmt.video = VideoFormat {
            width,
            height,
            frame_rate: None,
        };
        fmt
    }

    /// Set the elementary stream id
    pub fn with_id(mut self, id: i32) -> Self {
        self.id = id;
        self
    }

    /// Set the language
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Set codec configuration data
    pub fn with_extra(mut self, extra: Vec<u8>) -> Self {
        self.extra = extra;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_parse() {
        let fcc: FourCC = "u8".parse().unwrap();
        assert_eq!(fcc, FourCC::new(b"u8  "));
        assert_eq!(fcc.to_string(), "u8");
        assert!("toolong".parse::<FourCC>().is_err());
        assert!("".parse::<FourCC>().is_err());
    }

    #[test]
    fn test_audio_format() {
        let fmt = EsFormat::audio(FourCC::new(b"s16l"), 48000, 2, 16).with_id(3);
        assert_eq!(fmt.category, EsCategory::Audio);
        assert_eq!(fmt.audio.block_align(), Some(4));
        assert_eq!(fmt.audio.byte_rate(), Some(192_000));
        assert_eq!(fmt.id, 3);
    }

    #[test]
    fn test_audio_format_overflow() {
        let wide = EsFormat::audio(FourCC::new(b"s32l"), 48000, 20000, 32);
        assert_eq!(wide.audio.block_align(), None);
        assert_eq!(wide.audio.byte_rate(), None);

        let fast = EsFormat::audio(FourCC::new(b"araw"), 192_000, 8, 32000);
        assert_eq!(fast.audio.block_align(), Some(32000));
        assert_eq!(fast.audio.byte_rate(), None);
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("spu".parse::<EsCategory>().unwrap(), EsCategory::Spu);
        assert!("smell".parse::<EsCategory>().is_err());
    }
}
