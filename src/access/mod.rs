//! Access outputs: the byte sinks at the end of a stream output

pub mod dummy;
pub mod file;

pub use dummy::DummyAccess;
pub use file::FileAccess;

use std::io::{self, Read, Write};
use std::path::Path;

use log::{debug, error};

use crate::config::{ChainElement, FileOptions};
use crate::core::BlockChain;
use crate::error::{SoutError, SoutResult};

/// Access output names and what they do
pub const MODULES: &[(&str, &str)] = &[
    ("file", "write to a file, \"-\" for standard output"),
    ("stream", "like file, for targets that drain as fast as written"),
    ("fd", "write to an inherited file descriptor number"),
    ("dummy", "discard everything"),
];

/// Capability queries answered by an access output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessQuery {
    /// Does the sink throttle its producer by itself
    ControlsPace,
    /// Can the sink seek
    CanSeek,
}

/// Terminal byte sink of a stream output
pub trait AccessOut: Send {
    /// Access module name (file, stream, fd, dummy)
    fn name(&self) -> &str;

    /// Destination as given when opening
    fn path(&self) -> &str;

    /// Write a chain of blocks, consuming all of them.
    ///
    /// Returns the number of bytes written. On failure the remaining blocks
    /// are released and the error carries the partial count.
    fn write(&mut self, chain: BlockChain) -> SoutResult<usize>;

    /// Absolute seek
    fn seek(&mut self, offset: u64) -> SoutResult<()>;

    /// Read back from the sink
    fn read(&mut self, _buf: &mut [u8]) -> SoutResult<usize> {
        Err(SoutError::Unsupported("read on this access output"))
    }

    /// Answer a capability query
    fn control(&self, query: AccessQuery) -> SoutResult<bool>;
}

/// Whether `access` controls pace; an unanswered query means yes
pub fn controls_pace(access: &dyn AccessOut) -> bool {
    access.control(AccessQuery::ControlsPace).unwrap_or(true)
}

/// Whether `access` can seek; an unanswered query means no
pub fn can_seek(access: &dyn AccessOut) -> bool {
    access.control(AccessQuery::CanSeek).unwrap_or(false)
}

/// Open an access output by name.
///
/// `name` may carry options (`file{append}`); an empty name means `file`.
/// `confirm_overwrite` is asked before replacing an existing file when
/// overwriting is disabled.
pub fn open(
    name: &str,
    path: &str,
    defaults: &FileOptions,
    confirm_overwrite: &dyn Fn(&Path) -> bool,
) -> SoutResult<Box<dyn AccessOut>> {
    let element = if name.trim().is_empty() {
        ChainElement::new("file")
    } else {
        ChainElement::parse(name)?
    };
    debug!("opening access output {} for {}", element, path);

    match element.name() {
        "file" | "stream" | "fd" => {
            let options = defaults.merged(&element)?;
            let access = FileAccess::open(element.name(), path, &options, confirm_overwrite)?;
            Ok(Box::new(access))
        }
        "dummy" => Ok(Box::new(DummyAccess::new(path))),
        other => {
            error!("no access output module matching \"{}\"", other);
            Err(SoutError::UnknownModule {
                kind: "access",
                name: other.to_string(),
            })
        }
    }
}

/// Write every block of `chain` to `out`, looping over short and interrupted writes
pub fn write_blocks<W: Write + ?Sized>(out: &mut W, chain: BlockChain) -> SoutResult<usize> {
    let mut written = 0;
    for mut block in chain {
        while !block.is_empty() {
            match out.write(block.as_slice()) {
                Ok(0) => {
                    let source = io::Error::from(io::ErrorKind::WriteZero);
                    error!("cannot write: {}", source);
                    return Err(SoutError::Write { written, source });
                }
                Ok(n) => {
                    block.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    error!("cannot write: {}", source);
                    return Err(SoutError::Write { written, source });
                }
            }
        }
    }
    Ok(written)
}

/// Read into `buf`, retrying interrupted reads
pub fn read_retrying<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> SoutResult<usize> {
    loop {
        match input.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SoutError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Block;

    /// Accepts at most `step` bytes per call and fails every other call with EINTR
    struct Trickle {
        data: Vec<u8>,
        step: usize,
        calls: usize,
        fail_after: Option<usize>,
    }

    impl Trickle {
        fn new(step: usize) -> Self {
            Trickle {
                data: Vec::new(),
                step,
                calls: 0,
                fail_after: None,
            }
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            if let Some(limit) = self.fail_after {
                if self.data.len() >= limit {
                    return Err(io::Error::from(io::ErrorKind::BrokenPipe));
                }
            }
            let n = buf.len().min(self.step);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_short_writes_are_looped() {
        let payload: Vec<u8> = (0..100u8).collect();
        let mut out = Trickle::new(1);

        let written = write_blocks(&mut out, vec![Block::new(payload.clone())]).unwrap();

        assert_eq!(written, 100);
        assert_eq!(out.data, payload);
    }

    #[test]
    fn test_chain_written_in_order() {
        let mut out = Trickle::new(3);
        let chain = vec![
            Block::from_slice(b"abcd"),
            Block::from_slice(b""),
            Block::from_slice(b"efg"),
        ];
        assert_eq!(write_blocks(&mut out, chain).unwrap(), 7);
        assert_eq!(out.data, b"abcdefg");
    }

    #[test]
    fn test_blocks_released_on_success() {
        let block = Block::from_slice(b"payload");
        let probe = block.duplicate();
        let mut out = Trickle::new(4);

        write_blocks(&mut out, vec![block]).unwrap();
        assert_eq!(probe.shared_count(), 1);
    }

    #[test]
    fn test_blocks_released_on_failure() {
        let first = Block::from_slice(b"0123456789");
        let second = Block::from_slice(b"never written");
        let probes = [first.duplicate(), second.duplicate()];
        let mut out = Trickle::new(4);
        out.fail_after = Some(8);

        let err = write_blocks(&mut out, vec![first, second]).unwrap_err();
        match err {
            SoutError::Write { written, .. } => assert_eq!(written, 8),
            other => panic!("unexpected error {other}"),
        }
        for probe in &probes {
            assert_eq!(probe.shared_count(), 1);
        }
    }

    #[test]
    fn test_unknown_access() {
        let err = open("carrier-pigeon", "x", &FileOptions::default(), &|_| false)
            .err()
            .unwrap();
        assert!(matches!(err, SoutError::UnknownModule { kind: "access", .. }));
    }
}
