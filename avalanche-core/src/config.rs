//! Configuration management for the sampler

use crate::{source::BitSourceKind, Error, Result};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Physical address of the BCM2708 GPIO controller (peripheral base + 0x200000)
pub const BCM2708_GPIO_BASE: u64 = 0x2000_0000 + 0x0020_0000;

/// Highest pin readable through the first level register (GPLEV0)
pub const MAX_GPIO_PIN: u8 = 31;

/// Largest window accepted, one hour of samples at the default 500µs interval fits
pub const MAX_BITS_PER_WINDOW: usize = 8 * 1024 * 1024;

/// Sampler configuration
///
/// Every field defaults to the constants the collector was built around, so an empty
/// environment yields the historic 500µs / 100ms / GPIO 4 setup.
#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    /// Delay between two samples in microseconds
    #[serde(default = "default_interval_us")]
    pub interval_us: u64,

    /// Duration of one sampling window in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// GPIO line wired to the avalanche circuit
    #[serde(default = "default_gpio_pin")]
    pub gpio_pin: u8,

    /// Physical address of the GPIO register block inside `gpio_device`
    #[serde(
        default = "default_gpio_base",
        deserialize_with = "deserialize_address"
    )]
    pub gpio_base: u64,

    /// Device exposing the GPIO registers (`/dev/mem`, or `/dev/gpiomem` with base 0)
    #[serde(default = "default_gpio_device")]
    pub gpio_device: PathBuf,

    /// Named pipe the consumer reads from
    #[serde(default = "default_channel_path")]
    pub channel_path: PathBuf,

    /// Which bit source feeds the sampler
    #[serde(default)]
    pub source: BitSourceKind,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_us: default_interval_us(),
            window_ms: default_window_ms(),
            gpio_pin: default_gpio_pin(),
            gpio_base: default_gpio_base(),
            gpio_device: default_gpio_device(),
            channel_path: default_channel_path(),
            source: BitSourceKind::default(),
        }
    }
}

impl SamplerConfig {
    /// Load configuration from `AVALANCHE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_source(None)
    }

    /// Load configuration, letting the caller force the bit source before validation
    pub fn from_env_with_source(source: Option<BitSourceKind>) -> Result<Self> {
        let mut config: Self = envy::prefixed("AVALANCHE_").from_env()?;
        if let Some(kind) = source {
            config.source = kind;
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.interval_us == 0 {
            return Err(Error::Config("interval_us must be > 0".to_string()));
        }

        let geometry = self.geometry()?;
        if geometry.bytes_per_window == 0 {
            return Err(Error::Config(format!(
                "window of {}ms at {}µs yields {} bits, need at least 8",
                self.window_ms, self.interval_us, geometry.bits_per_window
            )));
        }

        if geometry.dropped_bits() != 0 {
            warn!(
                "Window of {} bits is not a multiple of 8, {} trailing bits per window are dropped",
                geometry.bits_per_window,
                geometry.dropped_bits()
            );
        }

        if self.source == BitSourceKind::Hardware {
            if self.gpio_pin > MAX_GPIO_PIN {
                return Err(Error::Config(format!(
                    "gpio_pin must be between 0 and {}",
                    MAX_GPIO_PIN
                )));
            }

            if self.gpio_device.as_os_str().is_empty() {
                return Err(Error::Config("gpio_device cannot be empty".to_string()));
            }
        }

        if self.channel_path.as_os_str().is_empty() {
            return Err(Error::Config("channel_path cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us)
    }

    pub fn geometry(&self) -> Result<WindowGeometry> {
        WindowGeometry::new(self.window_ms, self.interval_us)
    }
}

/// Size of one sampling window, fixed at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    pub bits_per_window: usize,
    pub bytes_per_window: usize,
}

impl WindowGeometry {
    /// Derive bit and byte counts from a window duration and a sampling interval
    ///
    /// Fails on a zero interval and on windows above [`MAX_BITS_PER_WINDOW`].
    pub fn new(window_ms: u64, interval_us: u64) -> Result<Self> {
        if interval_us == 0 {
            return Err(Error::Config("interval_us must be > 0".to_string()));
        }

        let too_large = || {
            Error::Config(format!(
                "window of {}ms at {}µs exceeds {} bits",
                window_ms, interval_us, MAX_BITS_PER_WINDOW
            ))
        };

        let window_us = window_ms.checked_mul(1000).ok_or_else(too_large)?;
        let bits_per_window = usize::try_from(window_us / interval_us).map_err(|_| too_large())?;
        if bits_per_window > MAX_BITS_PER_WINDOW {
            return Err(too_large());
        }

        Ok(Self {
            bits_per_window,
            bytes_per_window: bits_per_window / 8,
        })
    }

    /// Trailing bits of each window that never complete a byte
    pub fn dropped_bits(&self) -> usize {
        self.bits_per_window % 8
    }
}

/// Accept addresses as decimal or `0x`-prefixed hexadecimal
fn deserialize_address<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_address(&raw).map_err(serde::de::Error::custom)
}

fn parse_address(raw: &str) -> std::result::Result<u64, String> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", raw, e))
}

// Default value functions
fn default_interval_us() -> u64 {
    crate::DEFAULT_INTERVAL_US
}

fn default_window_ms() -> u64 {
    crate::DEFAULT_WINDOW_MS
}

fn default_gpio_pin() -> u8 {
    crate::DEFAULT_GPIO_PIN
}

fn default_gpio_base() -> u64 {
    BCM2708_GPIO_BASE
}

fn default_gpio_device() -> PathBuf {
    PathBuf::from("/dev/mem")
}

fn default_channel_path() -> PathBuf {
    PathBuf::from(crate::DEFAULT_CHANNEL_PATH)
}
