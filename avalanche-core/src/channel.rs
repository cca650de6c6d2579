// SPDX-License-Identifier: MIT
//
// Avalanche RNG: Junction Noise Entropy Pipe
// Copyright (c) 2025 Valer Bocan, PhD, CSSLP
// Email: valer.bocan@upt.ro
//
// Department of Computer and Information Technology
// Politehnica University of Timisoara
//
// https://github.com/vbocan/avalanche-rng

//! Named-pipe channel between the sampler and its consumer
//!
//! The wire format is a flat byte stream: no length prefix, no framing, no checksum.
//! Each window is written in one open/write/close transaction. Opening a FIFO for writing
//! blocks until a reader opens it, which is the only rendezvous between the two processes.

use crate::{Error, Result};
use std::ffi::CString;
use std::fs::{OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Permissions of a freshly created FIFO
const FIFO_MODE: u32 = 0o666;

/// Destination of packed sample windows
pub trait Channel {
    /// Make sure the channel exists, then block until a consumer attaches
    fn ensure_and_wait(&mut self, pre_message: &str, post_message: &str) -> Result<()>;

    /// Deliver one window in a single transaction
    fn deliver(&mut self, bytes: &[u8]) -> Result<()>;
}

/// FIFO on the local filesystem
#[derive(Debug, Clone)]
pub struct NamedPipe {
    path: PathBuf,
}

impl NamedPipe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the FIFO if it does not exist yet
    ///
    /// Returns `true` if a new node was created. An existing FIFO is left untouched; any
    /// other kind of file at the path is an error.
    pub fn ensure(&self) -> Result<bool> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.file_type().is_fifo() => return Ok(false),
            Ok(_) => return Err(Error::NotAFifo(self.path.clone())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::channel(&self.path, e)),
        }

        let c_path = CString::new(self.path.as_os_str().as_bytes()).map_err(|e| {
            Error::channel(
                &self.path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            )
        })?;

        // SAFETY: c_path is a valid NUL-terminated CString.
        let ret = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE as libc::mode_t) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            // Lost a race with another creator
            if err.kind() == std::io::ErrorKind::AlreadyExists {
                return Ok(false);
            }
            return Err(Error::channel(&self.path, err));
        }

        // mkfifo honours the umask; the consumer may run as another user
        std::fs::set_permissions(&self.path, Permissions::from_mode(FIFO_MODE))
            .map_err(|e| Error::channel(&self.path, e))?;

        info!("Created FIFO {}", self.path.display());
        Ok(true)
    }
}

impl Channel for NamedPipe {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn ensure_and_wait(&mut self, pre_message: &str, post_message: &str) -> Result<()> {
        self.ensure()?;

        info!("{}", pre_message);
        // Blocks until the consumer opens the read end
        let fifo = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| Error::channel(&self.path, e))?;
        drop(fifo);
        info!("{}", post_message);

        Ok(())
    }

    fn deliver(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("Opening FIFO {}", self.path.display());
        let mut fifo = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| Error::channel(&self.path, e))?;

        fifo.write_all(bytes)
            .and_then(|_| fifo.flush())
            .map_err(|e| Error::channel(&self.path, e))?;

        debug!("Wrote {} bytes to FIFO", bytes.len());
        Ok(())
    }
}
