use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info};

use super::{Downstream, Stream, StreamId, StreamQuery, StreamReply, Tracks};
use crate::access::{self, controls_pace};
use crate::config::ChainElement;
use crate::core::{Block, EsFormat};
use crate::error::{SoutError, SoutResult};
use crate::instance::SoutContext;
use crate::mux::{InputId, Muxer, MuxerOptions};

/// Mux guessed from the destination extension
const MUX_BY_EXTENSION: &[(&str, &str)] = &[
    ("wav", "wav"),
    ("mpjpeg", "mpjpeg"),
    ("mjpg", "mpjpeg"),
    ("mjpeg", "mpjpeg"),
    ("raw", "dummy"),
    ("es", "dummy"),
    ("bin", "dummy"),
    ("pcm", "dummy"),
    ("h264", "dummy"),
    ("264", "dummy"),
    ("mpga", "dummy"),
    ("mp3", "dummy"),
    ("aac", "dummy"),
];

/// Mux module for `path`, judging by its extension
pub fn guess_mux(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    MUX_BY_EXTENSION
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mux)| *mux)
}

/// Split `scheme://rest` into its parts
fn split_scheme(dst: &str) -> (Option<&str>, &str) {
    match dst.split_once("://") {
        Some((scheme, rest))
            if !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            (Some(scheme), rest)
        }
        _ => (None, dst),
    }
}

/// Terminal stage muxing every track into one access output.
///
/// `std{access=..,mux=..,dst=..}`; also opened as `file`, `stream` and `fd`,
/// which then name the access output.
pub struct StandardStream {
    ctx: Arc<SoutContext>,
    pace_nocontrol: bool,
    tracks: Tracks<InputId>,
    muxer: Muxer,
}

impl StandardStream {
    /// Open the access output, then the muxer on top of it
    pub fn open(ctx: &Arc<SoutContext>, element: &ChainElement) -> SoutResult<Self> {
        let dst = element.get("dst").unwrap_or("");
        let (scheme, path) = split_scheme(dst);

        let access_name = match (element.get("access"), element.name()) {
            (Some(access), _) => access,
            (None, shortcut @ ("file" | "stream" | "fd")) => shortcut,
            (None, _) => scheme.unwrap_or("file"),
        };
        let mux_name = match element.get("mux") {
            Some(mux) => mux,
            None => guess_mux(path).ok_or_else(|| {
                error!("no mux specified or found by extension for `{}'", dst);
                SoutError::ModuleOpen {
                    module: element.name().to_string(),
                    reason: format!("no mux specified or found by extension for \"{dst}\""),
                }
            })?,
        };

        let access = access::open(access_name, path, &ctx.config.file, &*ctx.confirm_overwrite)
            .inspect_err(|e| {
                error!(
                    "no suitable sout access module for `{}/{}://{}': {}",
                    access_name, mux_name, path, e
                );
            })?;

        let pace_nocontrol = !controls_pace(&*access);
        if pace_nocontrol {
            ctx.enter_pace_nocontrol();
        }
        let options = MuxerOptions {
            caching: ctx.config.mux_caching,
            pace_nocontrol: ctx.pace_nocontrol() > 0,
            clock: Arc::clone(&ctx.clock),
        };
        let muxer = match Muxer::new(mux_name, access, options) {
            Ok(muxer) => muxer,
            Err(e) => {
                if pace_nocontrol {
                    ctx.leave_pace_nocontrol();
                }
                return Err(e);
            }
        };

        info!("using `{}/{}://{}'", access_name, mux_name, path);
        Ok(StandardStream {
            ctx: Arc::clone(ctx),
            pace_nocontrol,
            tracks: Tracks::new(),
            muxer,
        })
    }

    /// The muxer fed by this stage
    pub fn muxer(&self) -> &Muxer {
        &self.muxer
    }
}

impl Stream for StandardStream {
    fn name(&self) -> &'static str {
        "std"
    }

    fn add(&mut self, _next: Downstream<'_>, format: &Arc<EsFormat>) -> SoutResult<StreamId> {
        let input = self.muxer.add_stream(Arc::clone(format))?;
        Ok(self.tracks.insert(input))
    }

    fn del(&mut self, _next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
        let input = self.tracks.remove(id)?;
        self.muxer.delete_stream(input)
    }

    fn send(&mut self, _next: Downstream<'_>, id: StreamId, block: Block) -> SoutResult<()> {
        let input = *self.tracks.get(id)?;
        self.muxer.send_buffer(input, block)
    }

    fn flush(&mut self, _next: Downstream<'_>, id: StreamId) -> SoutResult<()> {
        let input = *self.tracks.get(id)?;
        self.muxer.flush(input)
    }

    fn control(&mut self, _next: Downstream<'_>, query: StreamQuery) -> SoutResult<StreamReply> {
        match query {
            StreamQuery::IsEmpty => Ok(StreamReply::Bool(self.muxer.is_empty())),
            StreamQuery::IsSynchronous => {
                Ok(StreamReply::Bool(controls_pace(self.muxer.access())))
            }
            StreamQuery::GetMime => self.muxer.mime().map(StreamReply::Mime),
        }
    }

    fn tick(&mut self, _next: Downstream<'_>) -> SoutResult<()> {
        self.muxer.mux()
    }
}

impl Drop for StandardStream {
    fn drop(&mut self) {
        debug!("closing std output ({} tracks left)", self.tracks.len());
        if self.pace_nocontrol {
            self.ctx.leave_pace_nocontrol();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FourCC;
    use crate::stream::StreamChain;
    use crate::stream::tests::context;
    use tempfile::TempDir;

    #[test]
    fn test_guess_mux() {
        assert_eq!(guess_mux("out.WAV"), Some("wav"));
        assert_eq!(guess_mux("/tmp/cam.mjpg"), Some("mpjpeg"));
        assert_eq!(guess_mux("dump.es"), Some("dummy"));
        assert_eq!(guess_mux("noext"), None);
        assert_eq!(guess_mux("movie.xyz"), None);
    }

    #[test]
    fn test_split_scheme() {
        assert_eq!(split_scheme("dummy://x"), (Some("dummy"), "x"));
        assert_eq!(split_scheme("/a/b.wav"), (None, "/a/b.wav"));
        assert_eq!(split_scheme("://x"), (None, "://x"));
    }

    #[test]
    fn test_file_output_is_a_wav() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("out.wav");
        let ctx = context();
        let description = format!("file{{dst=\"{}\"}}", dst.display());
        let mut chain = StreamChain::new(&ctx, &description).unwrap();
        assert_eq!(ctx.pace_nocontrol(), 0);

        let format = Arc::new(EsFormat::audio(FourCC::new(b"s16l"), 22050, 1, 16));
        let id = chain.add(&format).unwrap();
        let samples: Vec<u8> = [7i16, -7, 1000].iter().flat_map(|s| s.to_le_bytes()).collect();
        chain.send(id, Block::new(samples)).unwrap();
        assert!(chain.control(StreamQuery::IsEmpty).unwrap().into_bool().unwrap());
        assert!(chain.control(StreamQuery::IsSynchronous).unwrap().into_bool().unwrap());
        chain.del(id).unwrap();
        drop(chain);

        let mut reader = hound::WavReader::open(&dst).unwrap();
        assert_eq!(reader.spec().sample_rate, 22050);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![7, -7, 1000]);
    }

    #[test]
    fn test_access_from_scheme_and_pace_counter() {
        let ctx = context();
        let chain = StreamChain::new(&ctx, "std{mux=mpjpeg,dst=dummy://nowhere}").unwrap();
        assert_eq!(ctx.pace_nocontrol(), 1);

        let mut chain = chain;
        let reply = chain.control(StreamQuery::GetMime).unwrap().into_mime().unwrap();
        assert!(reply.starts_with("multipart/x-mixed-replace"));
        assert!(!chain.control(StreamQuery::IsSynchronous).unwrap().into_bool().unwrap());

        drop(chain);
        assert_eq!(ctx.pace_nocontrol(), 0);
    }

    #[test]
    fn test_missing_mux() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("out");
        let ctx = context();
        let description = format!("std{{dst=\"{}\"}}", dst.display());
        let err = StreamChain::new(&ctx, &description).err().unwrap();
        assert!(matches!(err, SoutError::ModuleOpen { .. }));
        assert!(!dst.exists());
    }

    #[test]
    fn test_unknown_mux_releases_pace_slot() {
        let ctx = context();
        assert!(StreamChain::new(&ctx, "std{access=dummy,mux=ogg,dst=x.ogg}").is_err());
        assert_eq!(ctx.pace_nocontrol(), 0);
    }
}
