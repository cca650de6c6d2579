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

//! Avalanche Collector - samples junction noise into a named pipe
//!
//! The collector polls a GPIO line driven by a reverse-biased PN junction, packs the raw
//! bits into bytes and writes one window of bytes per transaction to a FIFO read by a
//! consumer (typically a websocket relay).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   GPIO level  ┌──────────────┐     FIFO       ┌──────────────┐
//! │  Avalanche   │ ─────────────>│  Collector   │ ──────────────>│   Consumer   │
//! │   circuit    │   (500µs)     │  (Sampler)   │  (per window)  │  (reader)    │
//! └──────────────┘               └──────────────┘                └──────────────┘
//! ```
//!
//! # Features
//!
//! - Hardware (GPIO) or pseudo-random bit source
//! - Graceful shutdown on SIGINT/SIGTERM with partial window flush
//! - Optional daemonization

use anyhow::{Context, Result};
use avalanche_core::{
    channel::NamedPipe, config::SamplerConfig, daemon, sampler::Sampler, source,
    stats::SamplerStats, BitSourceKind,
};
use clap::Parser;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "avalanche-collector")]
#[command(about = "Avalanche Collector - Samples junction noise into a named pipe", long_about = None)]
struct Args {
    /// Detach from the terminal and run in the background
    #[arg(short, long)]
    daemonize: bool,

    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Use the pseudo-random bit source regardless of configuration
    #[arg(long)]
    software: bool,
}

fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if args.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    if args.daemonize {
        daemon::daemonize().context("Failed to daemonize")?;
    }

    init_tracing(&args);

    info!("Avalanche Collector v{}", avalanche_core::VERSION);

    // Load configuration from environment variables
    let source_override = args.software.then_some(BitSourceKind::Software);
    let config = SamplerConfig::from_env_with_source(source_override)
        .context("Failed to load configuration from environment")?;

    info!("Bit source: {}", config.source);
    info!("Channel: {}", config.channel_path.display());
    info!(
        "Sampling every {}µs over {}ms windows",
        config.interval_us, config.window_ms
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    // SIGTERM follows SIGINT so service managers get the same partial-window flush
    for signal in [SIGINT, SIGTERM] {
        // A second signal exits at once, e.g. while still blocked waiting for a consumer
        signal_hook::flag::register_conditional_shutdown(signal, 1, Arc::clone(&shutdown))
            .context("Failed to register signal handlers")?;
        signal_hook::flag::register(signal, Arc::clone(&shutdown))
            .context("Failed to register signal handlers")?;
    }

    let stats = SamplerStats::new();
    let mut sampler = Sampler::from_config(
        &config,
        source::from_config(&config),
        NamedPipe::new(&config.channel_path),
        shutdown,
    )
    .context("Invalid window geometry")?
    .with_stats(stats.clone());

    sampler.run().context("Sampler stopped")?;

    info!(
        "Collector shut down gracefully: {} windows, {} bytes, {} bits sampled ({:.0} bits/s over {}s)",
        stats.windows_delivered(),
        stats.bytes_delivered(),
        stats.bits_sampled(),
        stats.bits_per_second(),
        stats.uptime_seconds()
    );
    Ok(())
}
