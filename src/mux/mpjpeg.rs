use super::{InputId, InputSlot, MuxContext, MuxModule, MuxQuery, MuxReply};
use crate::config::ChainElement;
use crate::core::{Block, BlockFlags, EsCategory};
use crate::error::{SoutError, SoutResult};

const DEFAULT_BOUNDARY: &str = "7b3cc56e5f51db803f790dad720ed50a";

/// Multipart JPEG muxer: every frame becomes one part of a
/// `multipart/x-mixed-replace` body
#[derive(Debug)]
pub struct MpjpegMux {
    boundary: String,
    input: Option<InputId>,
}

impl MpjpegMux {
    /// Create the muxer; `boundary` may be overridden by an option
    pub fn new(element: &ChainElement) -> Self {
        MpjpegMux {
            boundary: element.get("boundary").unwrap_or(DEFAULT_BOUNDARY).to_string(),
            input: None,
        }
    }

    fn part_header(&self, len: usize) -> Block {
        let header = format!(
            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
            self.boundary, len
        );
        Block::new(header.into_bytes()).with_flags(BlockFlags {
            header: true,
            ..BlockFlags::default()
        })
    }
}

impl MuxModule for MpjpegMux {
    fn name(&self) -> &str {
        "mpjpeg"
    }

    fn control(&self, query: MuxQuery) -> SoutResult<MuxReply> {
        match query {
            MuxQuery::CanAddStreamWhileMuxing => Ok(MuxReply::Bool(true)),
            MuxQuery::GetAddStreamWait => Ok(MuxReply::Bool(false)),
            MuxQuery::GetMime => Ok(MuxReply::Mime(format!(
                "multipart/x-mixed-replace; boundary={}",
                self.boundary
            ))),
        }
    }

    fn add_stream(&mut self, input: &InputSlot) -> SoutResult<()> {
        let fmt = input.format();
        let is_mjpeg = matches!(&fmt.codec.0, b"MJPG" | b"mjpg" | b"jpeg" | b"JPEG");
        if fmt.category != EsCategory::Video || !is_mjpeg {
            return Err(SoutError::InvalidFormat(format!(
                "mpjpeg only carries MJPEG video, got {} {}",
                fmt.category.name(),
                fmt.codec
            )));
        }
        if self.input.is_some() {
            return Err(SoutError::CannotAddStream(
                "mpjpeg supports a single video stream".to_string(),
            ));
        }
        self.input = Some(input.id());
        Ok(())
    }

    fn del_stream(&mut self, input: &InputSlot) {
        if self.input == Some(input.id()) {
            self.input = None;
        }
    }

    fn mux(&mut self, ctx: &mut MuxContext<'_>) -> SoutResult<()> {
        let mut chain = Vec::new();
        for input in ctx.inputs.iter_mut() {
            while let Some(block) = input.pop() {
                chain.push(self.part_header(block.len()));
                chain.push(block);
                chain.push(Block::from_slice(b"\r\n"));
            }
        }
        if !chain.is_empty() {
            ctx.access.write(chain)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EsFormat, FourCC};
    use crate::mux::tests::MemoryAccess;
    use crate::mux::{Muxer, MuxerOptions};
    use std::sync::Arc;

    #[test]
    fn test_parts_are_framed() {
        let (access, data) = MemoryAccess::new(false);
        let options = MuxerOptions {
            pace_nocontrol: true,
            ..MuxerOptions::default()
        };
        let mut muxer = Muxer::new("mpjpeg{boundary=frame}", Box::new(access), options).unwrap();
        assert_eq!(
            muxer.mime().unwrap(),
            "multipart/x-mixed-replace; boundary=frame"
        );

        let id = muxer
            .add_stream(Arc::new(EsFormat::video(FourCC::new(b"MJPG"), 64, 48)))
            .unwrap();
        muxer.send_buffer(id, Block::from_slice(b"JPEG")).unwrap();

        let expected = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n";
        assert_eq!(data.lock().as_slice(), &expected[..]);
    }

    #[test]
    fn test_rejects_other_codecs() {
        let (access, _) = MemoryAccess::new(false);
        let mut muxer = Muxer::new("mpjpeg", Box::new(access), MuxerOptions::default()).unwrap();
        let h264 = EsFormat::video(FourCC::new(b"h264"), 64, 48);
        assert!(muxer.add_stream(Arc::new(h264)).is_err());
    }
}
