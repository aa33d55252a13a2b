use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use chrono::format::{Item, StrftimeItems};
use log::{debug, error, info, warn};

use super::{AccessOut, AccessQuery, read_retrying, write_blocks};
use crate::config::FileOptions;
use crate::core::BlockChain;
use crate::error::{SoutError, SoutResult};

enum Target {
    File(File),
    Stdout(io::Stdout),
}

impl Write for Target {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Target::File(f) => f.write(buf),
            Target::Stdout(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Target::File(f) => f.flush(),
            Target::Stdout(s) => s.flush(),
        }
    }
}

/// File, standard output and descriptor access output
pub struct FileAccess {
    access: String,
    path: String,
    target: Target,
    seekable: bool,
}

impl FileAccess {
    /// Open `path` for the `file`, `stream` or `fd` access.
    ///
    /// For `fd` the path is a descriptor number which gets duplicated. For
    /// `file` and `stream`, `-` selects standard output.
    pub fn open(
        access: &str,
        path: &str,
        options: &FileOptions,
        confirm_overwrite: &dyn Fn(&Path) -> bool,
    ) -> SoutResult<Self> {
        let target = if access == "fd" {
            Target::File(open_descriptor(path)?)
        } else if path == "-" {
            debug!("using stdout");
            Target::Stdout(io::stdout())
        } else {
            let resolved = if options.format {
                expand_path(path)?
            } else {
                PathBuf::from(path)
            };
            let mut file = create_file(access, path, &resolved, options, confirm_overwrite)?;
            if options.append {
                file.seek(SeekFrom::End(0)).map_err(|source| {
                    error!("cannot seek to end of {}: {}", resolved.display(), source);
                    SoutError::AccessOpen {
                        access: access.to_string(),
                        path: path.to_string(),
                        source,
                    }
                })?;
            }
            Target::File(file)
        };

        let seekable = match &target {
            Target::File(f) => f.metadata().map(|m| m.is_file()).unwrap_or(false),
            Target::Stdout(_) => false,
        };

        info!("{} access output opened ({})", access, path);
        Ok(FileAccess {
            access: access.to_string(),
            path: path.to_string(),
            target,
            seekable,
        })
    }
}

impl AccessOut for FileAccess {
    fn name(&self) -> &str {
        &self.access
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn write(&mut self, chain: BlockChain) -> SoutResult<usize> {
        write_blocks(&mut self.target, chain)
    }

    fn seek(&mut self, offset: u64) -> SoutResult<()> {
        let file = match &mut self.target {
            Target::File(f) if self.seekable => f,
            _ => {
                return Err(SoutError::Seek {
                    offset,
                    source: io::Error::new(io::ErrorKind::Unsupported, "target is not seekable"),
                });
            }
        };
        file.seek(SeekFrom::Start(offset)).map_err(|source| {
            error!("cannot seek (to offset {}): {}", offset, source);
            SoutError::Seek { offset, source }
        })?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> SoutResult<usize> {
        match &mut self.target {
            Target::File(f) => read_retrying(f, buf),
            Target::Stdout(_) => Err(SoutError::Unsupported("read from standard output")),
        }
    }

    fn control(&self, query: AccessQuery) -> SoutResult<bool> {
        match query {
            AccessQuery::ControlsPace => Ok(self.access != "stream"),
            AccessQuery::CanSeek => Ok(self.seekable),
        }
    }
}

impl Drop for FileAccess {
    fn drop(&mut self) {
        if let Err(e) = self.target.flush() {
            warn!("cannot flush {}: {}", self.path, e);
        }
        debug!("file access output closed");
    }
}

fn create_file(
    access: &str,
    path: &str,
    resolved: &Path,
    options: &FileOptions,
    confirm_overwrite: &dyn Fn(&Path) -> bool,
) -> SoutResult<File> {
    // Exclusive creation and truncation are independent; confirming only
    // lifts the exclusive flag.
    let mut exclusive = !options.overwrite;
    loop {
        let mut oo = OpenOptions::new();
        oo.read(true).write(true).create(true).truncate(!options.append);
        if exclusive {
            oo.create_new(true);
        }
        apply_sync(&mut oo, options.sync);

        match oo.open(resolved) {
            Ok(file) => return Ok(file),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && exclusive => {
                if confirm_overwrite(resolved) {
                    debug!("overwriting {}", resolved.display());
                    exclusive = false;
                    continue;
                }
                error!("cannot create {}: {}", resolved.display(), e);
                return Err(SoutError::OverwriteDeclined(resolved.to_path_buf()));
            }
            Err(source) => {
                error!("cannot create {}: {}", resolved.display(), source);
                return Err(SoutError::AccessOpen {
                    access: access.to_string(),
                    path: path.to_string(),
                    source,
                });
            }
        }
    }
}

#[cfg(unix)]
fn apply_sync(oo: &mut OpenOptions, sync: bool) {
    use std::os::unix::fs::OpenOptionsExt;
    if sync {
        oo.custom_flags(libc::O_SYNC);
    }
}

#[cfg(not(unix))]
fn apply_sync(_oo: &mut OpenOptions, sync: bool) {
    if sync {
        warn!("synchronous writes are not supported on this platform");
    }
}

#[cfg(unix)]
fn open_descriptor(path: &str) -> SoutResult<File> {
    use std::os::fd::FromRawFd;

    let fd: libc::c_int = path
        .trim()
        .parse()
        .map_err(|_| SoutError::InvalidDescriptor(path.to_string()))?;
    if fd < 0 {
        return Err(SoutError::InvalidDescriptor(path.to_string()));
    }
    // SAFETY: dup only reads the descriptor table; the result is checked below.
    let dup = unsafe { libc::dup(fd) };
    if dup < 0 {
        let source = io::Error::last_os_error();
        error!("cannot use file descriptor {}: {}", fd, source);
        return Err(SoutError::AccessOpen {
            access: "fd".to_string(),
            path: path.to_string(),
            source,
        });
    }
    // SAFETY: `dup` is a fresh descriptor owned by nothing else.
    Ok(unsafe { File::from_raw_fd(dup) })
}

#[cfg(not(unix))]
fn open_descriptor(path: &str) -> SoutResult<File> {
    Err(SoutError::InvalidDescriptor(format!(
        "{path}: descriptors are not supported on this platform"
    )))
}

/// Expand strftime sequences of `path` with the local time
fn expand_path(path: &str) -> SoutResult<PathBuf> {
    let items: Vec<Item<'_>> = StrftimeItems::new(path).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(SoutError::Config(format!("invalid time format in path {path}")));
    }
    let expanded = Local::now().format_with_items(items.into_iter()).to_string();
    Ok(PathBuf::from(expanded))
}
