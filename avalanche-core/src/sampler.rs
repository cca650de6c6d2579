//! Fixed-interval sampling and delivery loop
//!
//! The sampler reads one bit per tick, packs bits MSB first into the window buffer and,
//! once the window is complete, hands the buffer to the channel in a single transaction.
//!
//! # Shutdown
//!
//! The shutdown flag is checked before every bit and before every window. A request that
//! arrives mid-window stops collection at once; the bytes completed so far are still
//! delivered and the incomplete trailing byte is dropped. A channel write in progress is
//! never cancelled.

use crate::{
    channel::Channel,
    config::{SamplerConfig, WindowGeometry},
    packer::BitPacker,
    source::BitSource,
    stats::SamplerStats,
    Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Windows between two progress lines (one minute at the default geometry)
const PROGRESS_EVERY: u64 = 600;

/// Result of collecting one window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Bits read from the source
    pub bits: usize,
    /// Completed bytes at the front of the buffer
    pub bytes: usize,
    /// Trailing bits that never completed a byte
    pub discarded_bits: usize,
    /// Collection stopped early on shutdown
    pub interrupted: bool,
}

/// Sampling loop bound to one bit source and one channel
pub struct Sampler<C: Channel> {
    geometry: WindowGeometry,
    interval: Duration,
    source: Box<dyn BitSource>,
    channel: C,
    shutdown: Arc<AtomicBool>,
    stats: SamplerStats,
    buffer: Vec<u8>,
}

impl<C: Channel> Sampler<C> {
    pub fn new(
        geometry: WindowGeometry,
        interval: Duration,
        source: Box<dyn BitSource>,
        channel: C,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            geometry,
            interval,
            source,
            channel,
            shutdown,
            stats: SamplerStats::new(),
            buffer: vec![0u8; geometry.bytes_per_window],
        }
    }

    /// Build a sampler from a configuration
    pub fn from_config(
        config: &SamplerConfig,
        source: Box<dyn BitSource>,
        channel: C,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        Ok(Self::new(
            config.geometry()?,
            config.interval(),
            source,
            channel,
            shutdown,
        ))
    }

    /// Share an existing statistics handle
    pub fn with_stats(mut self, stats: SamplerStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn geometry(&self) -> WindowGeometry {
        self.geometry
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run until shutdown
    ///
    /// The bit source is set up before the channel is touched, so a missing device never
    /// leaves a FIFO behind. The source is torn down on every exit path after a
    /// successful setup.
    pub fn run(&mut self) -> Result<()> {
        self.source.setup()?;

        let result = self.sample_until_shutdown();

        let teardown = self.source.teardown();
        if let Err(e) = &teardown {
            error!("Failed to release {} bit source: {}", self.source.name(), e);
        }
        result.and(teardown)
    }

    fn sample_until_shutdown(&mut self) -> Result<()> {
        self.channel.ensure_and_wait(
            "Waiting for consumer to open the channel...",
            "Consumer attached, starting random number generation",
        )?;

        info!(
            "Sampling {} source: {} bits per window ({} bytes) every {:?}",
            self.source.name(),
            self.geometry.bits_per_window,
            self.geometry.bytes_per_window,
            self.interval
        );

        while !self.shutdown_requested() {
            let window = self.collect_window();
            self.flush(&window)?;
        }

        info!("Shutdown requested, sampler stopped");
        Ok(())
    }

    /// Collect one window into the buffer
    pub fn collect_window(&mut self) -> WindowOutcome {
        // Bits never straddle windows
        let mut packer = BitPacker::new();
        let mut outcome = WindowOutcome {
            bits: 0,
            bytes: 0,
            discarded_bits: 0,
            interrupted: false,
        };

        for _ in 0..self.geometry.bits_per_window {
            if self.shutdown_requested() {
                outcome.interrupted = true;
                break;
            }

            let bit = self.source.read_bit();
            outcome.bits += 1;
            if let Some(byte) = packer.push(bit) {
                self.buffer[outcome.bytes] = byte;
                outcome.bytes += 1;
            }

            std::thread::sleep(self.interval);
        }

        outcome.discarded_bits = packer.reset();
        self.stats.record_bits(outcome.bits, outcome.discarded_bits);
        outcome
    }

    /// Hand the completed bytes of the last window to the channel
    pub fn flush(&mut self, window: &WindowOutcome) -> Result<()> {
        if window.bytes == 0 {
            debug!(
                "No complete byte in interrupted window ({} bits dropped)",
                window.discarded_bits
            );
            return Ok(());
        }

        self.channel.deliver(&self.buffer[..window.bytes])?;
        self.stats.record_delivery(window.bytes, window.interrupted);

        if window.interrupted {
            info!(
                "Delivered partial window: {} bytes, {} trailing bits dropped",
                window.bytes, window.discarded_bits
            );
        } else {
            debug!("Delivered window of {} bytes", window.bytes);
        }

        let delivered = self.stats.windows_delivered();
        if delivered == 1 || delivered % PROGRESS_EVERY == 0 {
            info!(
                "Delivered {} windows ({} bytes)",
                delivered,
                self.stats.bytes_delivered()
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packer::unpack_bits;
    use crate::source::SoftwareBitSource;
    use crate::Error;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Replays a fixed bit pattern, optionally raising shutdown after N reads
    struct ScriptedSource {
        pattern: Vec<u8>,
        reads: usize,
        trip_after: Option<(usize, Arc<AtomicBool>)>,
        teardowns: Rc<Cell<usize>>,
    }

    impl ScriptedSource {
        fn new(pattern: Vec<u8>) -> Self {
            Self {
                pattern,
                reads: 0,
                trip_after: None,
                teardowns: Rc::new(Cell::new(0)),
            }
        }

        fn alternating() -> Self {
            Self::new(vec![1, 0])
        }

        fn tripping_after(mut self, reads: usize, shutdown: &Arc<AtomicBool>) -> Self {
            self.trip_after = Some((reads, Arc::clone(shutdown)));
            self
        }
    }

    impl BitSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn setup(&mut self) -> Result<()> {
            Ok(())
        }

        fn read_bit(&mut self) -> u8 {
            let bit = self.pattern[self.reads % self.pattern.len()];
            self.reads += 1;
            if let Some((limit, shutdown)) = &self.trip_after {
                if self.reads == *limit {
                    shutdown.store(true, Ordering::SeqCst);
                }
            }
            bit
        }

        fn teardown(&mut self) -> Result<()> {
            self.teardowns.set(self.teardowns.get() + 1);
            Ok(())
        }
    }

    /// Source whose resource is never available
    struct UnavailableSource;

    impl BitSource for UnavailableSource {
        fn name(&self) -> &'static str {
            "unavailable"
        }

        fn setup(&mut self) -> Result<()> {
            Err(Error::Resource("Cannot open /dev/mem".to_string()))
        }

        fn read_bit(&mut self) -> u8 {
            unreachable!("read before setup")
        }

        fn teardown(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Records windows; raises shutdown after a number of deliveries
    #[derive(Default)]
    struct RecordingChannel {
        ensured: usize,
        windows: Vec<Vec<u8>>,
        stop_after: Option<(usize, Arc<AtomicBool>)>,
        fail_deliveries: bool,
    }

    impl RecordingChannel {
        fn stopping_after(windows: usize, shutdown: &Arc<AtomicBool>) -> Self {
            Self {
                stop_after: Some((windows, Arc::clone(shutdown))),
                ..Default::default()
            }
        }
    }

    impl Channel for RecordingChannel {
        fn ensure_and_wait(&mut self, _pre: &str, _post: &str) -> Result<()> {
            self.ensured += 1;
            Ok(())
        }

        fn deliver(&mut self, bytes: &[u8]) -> Result<()> {
            if self.fail_deliveries {
                return Err(Error::channel(
                    "rng_fifo",
                    std::io::Error::from(std::io::ErrorKind::BrokenPipe),
                ));
            }
            self.windows.push(bytes.to_vec());
            if let Some((limit, shutdown)) = &self.stop_after {
                if self.windows.len() == *limit {
                    shutdown.store(true, Ordering::SeqCst);
                }
            }
            Ok(())
        }
    }

    fn sampler(
        geometry: WindowGeometry,
        source: impl BitSource + 'static,
        channel: RecordingChannel,
        shutdown: &Arc<AtomicBool>,
    ) -> Sampler<RecordingChannel> {
        Sampler::new(
            geometry,
            Duration::from_micros(500),
            Box::new(source),
            channel,
            Arc::clone(shutdown),
        )
    }

    #[test]
    fn test_alternating_bits_yield_0xaa_window() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let geometry = WindowGeometry::new(100, 500).unwrap();
        let mut sampler = sampler(
            geometry,
            ScriptedSource::alternating(),
            RecordingChannel::stopping_after(1, &shutdown),
            &shutdown,
        );

        sampler.run().unwrap();

        let channel = sampler.channel();
        assert_eq!(channel.ensured, 1);
        assert_eq!(channel.windows, vec![vec![0xAA; 25]]);
        assert_eq!(sampler.stats().bits_sampled(), 200);
        assert_eq!(sampler.stats().bytes_delivered(), 25);
        assert_eq!(sampler.stats().windows_interrupted(), 0);
    }

    #[test]
    fn test_shutdown_after_12_bits_flushes_one_byte() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource::new(vec![1, 1, 0, 0, 1, 0, 1, 0, 1, 1, 1, 1])
            .tripping_after(12, &shutdown);
        let teardowns = Rc::clone(&source.teardowns);
        let mut sampler = sampler(
            WindowGeometry::new(100, 500).unwrap(),
            source,
            RecordingChannel::default(),
            &shutdown,
        );

        sampler.run().unwrap();

        assert_eq!(sampler.channel().windows, vec![vec![0b1100_1010]]);
        assert_eq!(sampler.stats().bits_sampled(), 12);
        assert_eq!(sampler.stats().bits_discarded(), 4);
        assert_eq!(sampler.stats().windows_interrupted(), 1);
        assert_eq!(teardowns.get(), 1);
    }

    #[test]
    fn test_from_config_rejects_oversized_window() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let config = SamplerConfig {
            window_ms: u64::MAX,
            ..Default::default()
        };
        let result = Sampler::from_config(
            &config,
            Box::new(ScriptedSource::alternating()),
            RecordingChannel::default(),
            Arc::clone(&shutdown),
        );
        assert!(matches!(result, Err(Error::Config(_))));

        let sampler = Sampler::from_config(
            &SamplerConfig::default(),
            Box::new(ScriptedSource::alternating()),
            RecordingChannel::default(),
            shutdown,
        )
        .unwrap();
        assert_eq!(sampler.geometry().bytes_per_window, 25);
    }

    #[test]
    fn test_setup_failure_never_touches_channel() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut sampler = sampler(
            WindowGeometry::new(100, 500).unwrap(),
            UnavailableSource,
            RecordingChannel::default(),
            &shutdown,
        );

        let err = sampler.run().unwrap_err();
        assert!(err.is_resource_error());
        assert_eq!(sampler.channel().ensured, 0);
        assert!(sampler.channel().windows.is_empty());
    }

    #[test]
    fn test_channel_failure_is_fatal() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let source = ScriptedSource::alternating();
        let teardowns = Rc::clone(&source.teardowns);
        let channel = RecordingChannel {
            fail_deliveries: true,
            ..Default::default()
        };
        let mut sampler = sampler(WindowGeometry::new(4, 500).unwrap(), source, channel, &shutdown);

        let err = sampler.run().unwrap_err();
        assert!(err.is_channel_error());
        assert!(!shutdown.load(Ordering::SeqCst));
        assert_eq!(teardowns.get(), 1);
    }

    #[test]
    fn test_shutdown_before_first_bit_delivers_nothing() {
        let shutdown = Arc::new(AtomicBool::new(true));
        let mut sampler = sampler(
            WindowGeometry::new(100, 500).unwrap(),
            ScriptedSource::alternating(),
            RecordingChannel::default(),
            &shutdown,
        );

        sampler.run().unwrap();
        assert_eq!(sampler.channel().ensured, 1);
        assert!(sampler.channel().windows.is_empty());

        let outcome = sampler.collect_window();
        assert!(outcome.interrupted);
        assert_eq!(outcome.bits, 0);
        sampler.flush(&outcome).unwrap();
        assert!(sampler.channel().windows.is_empty());
    }

    #[test]
    fn test_partial_byte_never_crosses_windows() {
        // 6ms at 500µs = 12 bits: one byte per window, four bits dropped each time
        let shutdown = Arc::new(AtomicBool::new(false));
        let geometry = WindowGeometry::new(6, 500).unwrap();
        let pattern: Vec<u8> = (0..24).map(|i| ((i / 4) % 2) as u8).collect();
        let mut sampler = sampler(
            geometry,
            ScriptedSource::new(pattern.clone()),
            RecordingChannel::stopping_after(2, &shutdown),
            &shutdown,
        );

        sampler.run().unwrap();

        let windows = &sampler.channel().windows;
        assert_eq!(windows.len(), 2);
        assert_eq!(unpack_bits(&windows[0]), &pattern[0..8]);
        assert_eq!(unpack_bits(&windows[1]), &pattern[12..20]);
        assert_eq!(sampler.stats().bits_discarded(), 8);
    }

    #[test]
    fn test_windows_delivered_in_order() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let geometry = WindowGeometry::new(4, 500).unwrap();
        let mut sampler = sampler(
            geometry,
            SoftwareBitSource::with_seed(3),
            RecordingChannel::stopping_after(3, &shutdown),
            &shutdown,
        );

        sampler.run().unwrap();

        let mut reference = SoftwareBitSource::with_seed(3);
        let expected: Vec<Vec<u8>> = (0..3)
            .map(|_| {
                let bits: Vec<u8> = (0..8).map(|_| reference.read_bit()).collect();
                crate::packer::pack_bits(&bits)
            })
            .collect();
        assert_eq!(sampler.channel().windows, expected);
    }
}
