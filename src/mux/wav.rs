use hound::{SampleFormat, WavSpec};
use log::{debug, warn};

use super::{InputId, InputSlot, MuxContext, MuxModule, MuxQuery, MuxReply};
use crate::access::can_seek;
use crate::core::{Block, BlockFlags, EsCategory, EsFormat};
use crate::error::{SoutError, SoutResult};

const HEADER_LEN: u32 = 44;
const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;
const FORMAT_ALAW: u16 = 6;
const FORMAT_MULAW: u16 = 7;

#[derive(Debug, Clone, Copy)]
struct WaveFormat {
    tag: u16,
    spec: WavSpec,
    block_align: u16,
    byte_rate: u32,
}

/// Sample layout and format tag of a codec; companded codecs keep their own tag
fn codec_layout(fmt: &EsFormat) -> Option<(u16, SampleFormat, u16)> {
    let layout = match &fmt.codec.0 {
        b"u8  " => (FORMAT_PCM, SampleFormat::Int, 8),
        b"s16l" => (FORMAT_PCM, SampleFormat::Int, 16),
        b"s24l" => (FORMAT_PCM, SampleFormat::Int, 24),
        b"s32l" => (FORMAT_PCM, SampleFormat::Int, 32),
        b"fl32" => (FORMAT_IEEE_FLOAT, SampleFormat::Float, 32),
        b"alaw" => (FORMAT_ALAW, SampleFormat::Int, 8),
        b"ulaw" | b"mlaw" => (FORMAT_MULAW, SampleFormat::Int, 8),
        b"araw" if matches!(fmt.audio.bits_per_sample, 8 | 16 | 24 | 32) => {
            (FORMAT_PCM, SampleFormat::Int, fmt.audio.bits_per_sample)
        }
        _ => return None,
    };
    Some(layout)
}

impl WaveFormat {
    fn from_es(fmt: &EsFormat) -> SoutResult<Self> {
        if fmt.category != EsCategory::Audio {
            return Err(SoutError::InvalidFormat(format!(
                "wav only carries audio, got {}",
                fmt.category.name()
            )));
        }
        let Some((tag, sample_format, bits)) = codec_layout(fmt) else {
            return Err(SoutError::InvalidFormat(format!(
                "wav cannot carry codec {} ({} bits)",
                fmt.codec, fmt.audio.bits_per_sample
            )));
        };
        if fmt.audio.channels == 0 || fmt.audio.rate == 0 {
            return Err(SoutError::InvalidFormat(format!(
                "wav needs channels and rate, got {} channels at {} Hz",
                fmt.audio.channels, fmt.audio.rate
            )));
        }
        let spec = WavSpec {
            channels: fmt.audio.channels,
            sample_rate: fmt.audio.rate,
            bits_per_sample: bits,
            sample_format,
        };
        let block_align = spec.channels.checked_mul(bits / 8);
        let byte_rate =
            block_align.and_then(|align| spec.sample_rate.checked_mul(u32::from(align)));
        let (Some(block_align), Some(byte_rate)) = (block_align, byte_rate) else {
            return Err(SoutError::InvalidFormat(format!(
                "wav cannot describe {} channels of {} bits at {} Hz",
                spec.channels, bits, spec.sample_rate
            )));
        };
        Ok(WaveFormat {
            tag,
            spec,
            block_align,
            byte_rate,
        })
    }

    /// RIFF header announcing `data_size` bytes of samples
    fn header(&self, data_size: u32) -> Vec<u8> {
        let mut h = Vec::with_capacity(HEADER_LEN as usize);
        h.extend_from_slice(b"RIFF");
        h.extend_from_slice(&data_size.saturating_add(HEADER_LEN - 8).to_le_bytes());
        h.extend_from_slice(b"WAVE");
        h.extend_from_slice(b"fmt ");
        h.extend_from_slice(&16u32.to_le_bytes());
        h.extend_from_slice(&self.tag.to_le_bytes());
        h.extend_from_slice(&self.spec.channels.to_le_bytes());
        h.extend_from_slice(&self.spec.sample_rate.to_le_bytes());
        h.extend_from_slice(&self.byte_rate.to_le_bytes());
        h.extend_from_slice(&self.block_align.to_le_bytes());
        h.extend_from_slice(&self.spec.bits_per_sample.to_le_bytes());
        h.extend_from_slice(b"data");
        h.extend_from_slice(&data_size.to_le_bytes());
        h
    }
}

/// RIFF/WAVE muxer for one PCM audio stream.
///
/// The header is written with a maximal size before the first samples and
/// rewritten with the real sizes on close when the output can seek.
#[derive(Debug, Default)]
pub struct WavMux {
    input: Option<(InputId, WaveFormat)>,
    header_written: bool,
    data_size: u64,
}

impl WavMux {
    /// Create a WAV muxer
    pub fn new() -> Self {
        Self::default()
    }

    fn header_block(&self, data_size: u32) -> Option<Block> {
        let (_, format) = self.input?;
        Some(Block::new(format.header(data_size)).with_flags(BlockFlags {
            header: true,
            ..BlockFlags::default()
        }))
    }
}

impl MuxModule for WavMux {
    fn name(&self) -> &str {
        "wav"
    }

    fn control(&self, query: MuxQuery) -> SoutResult<MuxReply> {
        match query {
            MuxQuery::CanAddStreamWhileMuxing => Ok(MuxReply::Bool(false)),
            MuxQuery::GetAddStreamWait => Ok(MuxReply::Bool(false)),
            MuxQuery::GetMime => Ok(MuxReply::Mime("audio/wav".to_string())),
        }
    }

    fn add_stream(&mut self, input: &InputSlot) -> SoutResult<()> {
        if self.input.is_some() {
            return Err(SoutError::CannotAddStream(
                "wav supports a single audio stream".to_string(),
            ));
        }
        let format = WaveFormat::from_es(input.format())?;
        debug!(
            "wav: {} channels, {} Hz, {} bits, format tag {}",
            format.spec.channels,
            format.spec.sample_rate,
            format.spec.bits_per_sample,
            format.tag
        );
        self.input = Some((input.id(), format));
        Ok(())
    }

    fn mux(&mut self, ctx: &mut MuxContext<'_>) -> SoutResult<()> {
        let Some((id, _)) = self.input else {
            return Ok(());
        };
        let Some(input) = ctx.inputs.iter_mut().find(|i| i.id() == id) else {
            return Ok(());
        };
        if input.is_empty() {
            return Ok(());
        }

        let mut chain = Vec::with_capacity(input.len() + 1);
        if !self.header_written {
            chain.extend(self.header_block(u32::MAX - (HEADER_LEN - 8)));
            self.header_written = true;
        }
        while let Some(block) = input.pop() {
            self.data_size += block.len() as u64;
            chain.push(block);
        }
        ctx.access.write(chain)?;
        Ok(())
    }

    fn close(&mut self, ctx: &mut MuxContext<'_>) -> SoutResult<()> {
        if !self.header_written {
            return Ok(());
        }
        if !can_seek(&*ctx.access) {
            debug!("wav: output cannot seek, keeping the streaming header");
            return Ok(());
        }
        let data_size = u32::try_from(self.data_size).unwrap_or_else(|_| {
            warn!("wav: {} bytes of data do not fit a RIFF header", self.data_size);
            u32::MAX - (HEADER_LEN - 8)
        });
        debug!("wav: rewriting header for {} bytes of data", data_size);
        ctx.access.seek(0)?;
        ctx.access.write(self.header_block(data_size).into_iter().collect())?;
        Ok(())
    }

    fn has_enough_streams(&self, inputs: &[InputSlot]) -> bool {
        !inputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::FileAccess;
    use crate::config::FileOptions;
    use crate::core::FourCC;
    use crate::mux::tests::MemoryAccess;
    use crate::mux::{Muxer, MuxerOptions};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn pcm_block(samples: &[i16]) -> Block {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Block::new(bytes)
    }

    #[test]
    fn test_wav_file_is_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let access =
            FileAccess::open("file", path.to_str().unwrap(), &FileOptions::default(), &|_| false)
                .unwrap();

        let mut muxer = Muxer::new("wav", Box::new(access), MuxerOptions::default()).unwrap();
        let format = EsFormat::audio(FourCC::new(b"s16l"), 44100, 2, 16);
        let id = muxer.add_stream(Arc::new(format)).unwrap();
        muxer.send_buffer(id, pcm_block(&[1, -1, 2, -2])).unwrap();
        muxer.send_buffer(id, pcm_block(&[300, -300])).unwrap();
        drop(muxer);

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.sample_rate, 44100);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -1, 2, -2, 300, -300]);
    }

    #[test]
    fn test_streaming_header_without_seek() {
        let (access, data) = MemoryAccess::new(true);
        let mut muxer = Muxer::new("wav", Box::new(access), MuxerOptions::default()).unwrap();
        let format = EsFormat::audio(FourCC::new(b"u8  "), 8000, 1, 8);
        let id = muxer.add_stream(Arc::new(format)).unwrap();
        muxer.send_buffer(id, Block::from_slice(&[128, 129])).unwrap();
        drop(muxer);

        let data = data.lock();
        assert_eq!(data.len(), HEADER_LEN as usize + 2);
        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(&data[4..8], &u32::MAX.to_le_bytes());
        assert_eq!(&data[44..], &[128, 129]);
    }

    #[test]
    fn test_single_audio_stream_only() {
        let (access, _) = MemoryAccess::new(true);
        let mut muxer = Muxer::new("wav", Box::new(access), MuxerOptions::default()).unwrap();

        let video = EsFormat::video(FourCC::new(b"h264"), 16, 16);
        assert!(matches!(
            muxer.add_stream(Arc::new(video)),
            Err(SoutError::InvalidFormat(_))
        ));
        assert_eq!(muxer.input_count(), 0);

        let audio = Arc::new(EsFormat::audio(FourCC::new(b"fl32"), 48000, 1, 32));
        muxer.add_stream(Arc::clone(&audio)).unwrap();
        assert!(muxer.add_stream(audio).is_err());
        assert_eq!(muxer.input_count(), 1);
    }

    #[test]
    fn test_header_layout() {
        let es = EsFormat::audio(FourCC::new(b"s16l"), 48000, 2, 16);
        let format = WaveFormat::from_es(&es).unwrap();
        let h = format.header(1000);
        assert_eq!(h.len(), 44);
        assert_eq!(&h[4..8], &1036u32.to_le_bytes());
        assert_eq!(&h[28..32], &192_000u32.to_le_bytes());
        assert_eq!(&h[32..34], &4u16.to_le_bytes());
        assert_eq!(&h[40..44], &1000u32.to_le_bytes());
    }

    #[test]
    fn test_codec_table() {
        let float = EsFormat::audio(FourCC::new(b"fl32"), 48000, 1, 0);
        let float = WaveFormat::from_es(&float).unwrap();
        assert_eq!(float.tag, FORMAT_IEEE_FLOAT);
        assert_eq!(float.spec.sample_format, SampleFormat::Float);
        assert_eq!(float.spec.bits_per_sample, 32);

        let alaw = EsFormat::audio(FourCC::new(b"alaw"), 8000, 1, 0);
        let alaw = WaveFormat::from_es(&alaw).unwrap();
        assert_eq!(alaw.tag, FORMAT_ALAW);
        assert_eq!(alaw.block_align, 1);

        let raw = EsFormat::audio(FourCC::new(b"araw"), 8000, 1, 12);
        assert!(matches!(WaveFormat::from_es(&raw), Err(SoutError::InvalidFormat(_))));
    }

    #[test]
    fn test_oversized_format_rejected() {
        let (access, data) = MemoryAccess::new(true);
        let mut muxer = Muxer::new("wav", Box::new(access), MuxerOptions::default()).unwrap();

        let wide = EsFormat::audio(FourCC::new(b"s32l"), 48000, 20000, 32);
        assert!(matches!(
            muxer.add_stream(Arc::new(wide)),
            Err(SoutError::InvalidFormat(_))
        ));
        assert_eq!(muxer.input_count(), 0);

        let fast = EsFormat::audio(FourCC::new(b"s32l"), u32::MAX, 2, 32);
        assert!(muxer.add_stream(Arc::new(fast)).is_err());
        drop(muxer);

        assert!(data.lock().is_empty());
    }
}
