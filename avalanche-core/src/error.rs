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

//! Error types for the sampling pipeline
//!
//! Provides a unified error taxonomy using `thiserror` for ergonomic error handling.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for sampling operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration validation failed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bit source could not acquire its hardware resource
    #[error("Resource error: {0}")]
    Resource(String),

    /// Named pipe could not be created, opened or written
    #[error("Channel error on {}: {source}", path.display())]
    Channel {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Named pipe path exists but is something else
    #[error("{} exists and is not a FIFO", .0.display())]
    NotAFifo(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn channel(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Channel {
            path: path.into(),
            source,
        }
    }

    /// Check if error came from the bit source
    pub fn is_resource_error(&self) -> bool {
        matches!(self, Error::Resource(_))
    }

    /// Check if error came from the named pipe
    pub fn is_channel_error(&self) -> bool {
        matches!(self, Error::Channel { .. } | Error::NotAFifo(_))
    }
}

impl From<envy::Error> for Error {
    fn from(e: envy::Error) -> Self {
        Error::Config(format!("Failed to parse environment variables: {}", e))
    }
}
