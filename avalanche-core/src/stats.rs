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

//! Sampling counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared sampling statistics
///
/// Cloning yields another handle to the same counters, so the binary can keep one for
/// its shutdown summary while the sampler owns another.
#[derive(Clone)]
pub struct SamplerStats {
    inner: Arc<StatsInner>,
}

struct StatsInner {
    start_time: Instant,

    // Acquisition
    bits_sampled: AtomicU64,
    bits_discarded: AtomicU64,

    // Delivery
    windows_delivered: AtomicU64,
    windows_interrupted: AtomicU64,
    bytes_delivered: AtomicU64,
}

impl Default for SamplerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplerStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StatsInner {
                start_time: Instant::now(),
                bits_sampled: AtomicU64::new(0),
                bits_discarded: AtomicU64::new(0),
                windows_delivered: AtomicU64::new(0),
                windows_interrupted: AtomicU64::new(0),
                bytes_delivered: AtomicU64::new(0),
            }),
        }
    }

    pub fn record_bits(&self, sampled: usize, discarded: usize) {
        self.inner
            .bits_sampled
            .fetch_add(sampled as u64, Ordering::Relaxed);
        self.inner
            .bits_discarded
            .fetch_add(discarded as u64, Ordering::Relaxed);
    }

    pub fn record_delivery(&self, bytes: usize, interrupted: bool) {
        self.inner.windows_delivered.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_delivered
            .fetch_add(bytes as u64, Ordering::Relaxed);
        if interrupted {
            self.inner
                .windows_interrupted
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn bits_sampled(&self) -> u64 {
        self.inner.bits_sampled.load(Ordering::Relaxed)
    }

    pub fn bits_discarded(&self) -> u64 {
        self.inner.bits_discarded.load(Ordering::Relaxed)
    }

    pub fn windows_delivered(&self) -> u64 {
        self.inner.windows_delivered.load(Ordering::Relaxed)
    }

    pub fn windows_interrupted(&self) -> u64 {
        self.inner.windows_interrupted.load(Ordering::Relaxed)
    }

    pub fn bytes_delivered(&self) -> u64 {
        self.inner.bytes_delivered.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }

    /// Achieved sampling rate, lower than the nominal one by the per-bit overhead
    pub fn bits_per_second(&self) -> f64 {
        let elapsed = self.inner.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.bits_sampled() as f64 / elapsed
        } else {
            0.0
        }
    }
}
