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

//! Avalanche RNG Core Library
//!
//! This crate samples avalanche noise from a reverse-biased PN junction wired to a GPIO
//! input, packs the raw bits into bytes and hands them to a consumer through a named pipe.
//!
//! # Architecture
//!
//! The library is organized into modules representing core concerns:
//! - `source`: Bit sources (GPIO register polling, pseudo-random fallback)
//! - `packer`: MSB-first bit-to-byte packing
//! - `channel`: Named-pipe rendezvous and per-window delivery
//! - `sampler`: Fixed-interval sampling and delivery loop
//! - `config`: Configuration management with validation
//! - `stats`: Sampling counters
//! - `daemon`: Process detachment
//! - `error`: Unified error types
//!
//! # Data flow
//!
//! ```text
//! ┌──────────────┐  read_bit()  ┌──────────────┐  write()  ┌──────────────┐
//! │  Bit Source  │ ────────────>│   Sampler    │ ─────────>│  Named Pipe  │
//! │ (GPIO / PRNG)│  every 500µs │  (BitPacker) │ per window│  (consumer)  │
//! └──────────────┘              └──────────────┘           └──────────────┘
//! ```

pub mod channel;
pub mod config;
pub mod daemon;
pub mod error;
pub mod packer;
pub mod sampler;
pub mod source;
pub mod stats;

pub use error::{Error, Result};
pub use source::BitSourceKind;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default sampling interval in microseconds
pub const DEFAULT_INTERVAL_US: u64 = 500;

/// Default sampling window in milliseconds
pub const DEFAULT_WINDOW_MS: u64 = 100;

/// GPIO line wired to the avalanche circuit
pub const DEFAULT_GPIO_PIN: u8 = 4;

/// Default named pipe read by the consumer
pub const DEFAULT_CHANNEL_PATH: &str = "../rng_fifo";
