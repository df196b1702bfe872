//! Thin wrapper around a POSIX FIFO.
//!
//! The FIFO is opened read-write and non-blocking.  Holding both ends means
//! `open` never waits for a peer, reads never see EOF when the plugin closes
//! its end, and writes never block waiting for a reader.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for FIFO operations.
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("failed to create FIFO {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: Errno,
    },
    #[error("failed to open FIFO {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("FIFO is not open")]
    NotOpen,
    #[error("FIFO I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("poll failed: {0}")]
    Poll(#[from] Errno),
}

/// A named pipe with at most one open descriptor.
#[derive(Debug, Default)]
pub struct NamedPipe {
    path: Option<PathBuf>,
    file: Option<File>,
}

impl NamedPipe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `path`, creating the FIFO first if it does not exist.
    ///
    /// A pipe that is already open is closed (and its FIFO removed) first.
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<(), PipeError> {
        let path = path.as_ref();
        if self.is_open() {
            self.close();
        }
        self.path = Some(path.to_path_buf());

        match mkfifo(path, Mode::from_bits_truncate(0o666)) {
            Ok(()) | Err(Errno::EEXIST) => {}
            Err(source) => {
                return Err(PipeError::Create {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
        // The umask strips bits from mkfifo's mode; plugins may run as another user.
        if let Err(e) = fs::set_permissions(path, Permissions::from_mode(0o777)) {
            warn!("cannot chmod FIFO {}: {e}", path.display());
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| PipeError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        debug!("opened FIFO {}", path.display());
        self.file = Some(file);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Waits up to `timeout` for data, then reads at most `buf.len()` bytes.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    pub fn read_ready(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, PipeError> {
        let file = self.file.as_mut().ok_or(PipeError::NotOpen)?;

        let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
        let ready = {
            let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(millis)) {
                Ok(n) => n > 0 && fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)),
                Err(Errno::EINTR) => false,
                Err(e) => return Err(PipeError::Poll(e)),
            }
        };
        if !ready {
            return Ok(0);
        }

        match file.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(PipeError::Io(e)),
        }
    }

    /// Writes `text` without blocking.
    ///
    /// Returns the number of bytes written; a full pipe buffer writes nothing.
    pub fn write_str(&mut self, text: &str) -> Result<usize, PipeError> {
        let file = self.file.as_mut().ok_or(PipeError::NotOpen)?;
        match file.write(text.as_bytes()) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(PipeError::Io(e)),
        }
    }

    /// Closes the descriptor and removes the FIFO from the filesystem.
    pub fn close(&mut self) {
        self.file = None;
        if let Some(path) = self.path.take() {
            match fs::remove_file(&path) {
                Ok(()) => debug!("removed FIFO {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("cannot remove FIFO {}: {e}", path.display()),
            }
        }
    }
}

impl Drop for NamedPipe {
    fn drop(&mut self) {
        if self.path.is_some() {
            self.close();
        }
    }
}
