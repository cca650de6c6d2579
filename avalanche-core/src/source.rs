//! Bit sources feeding the sampler
//!
//! A bit source yields one raw bit per call, sampled at the instant of the call. Two
//! implementations share the [`BitSource`] trait:
//!
//! - [`GpioBitSource`] reads the live level of a GPIO line through the memory-mapped
//!   BCM283x register block. The avalanche circuit drives that line directly, so no
//!   debouncing or filtering is applied.
//! - [`SoftwareBitSource`] draws uniform pseudo-random bits for machines without the
//!   circuit attached.

use crate::config::{SamplerConfig, MAX_GPIO_PIN};
use crate::{Error, Result};
// glibc exposes a 64-bit offset even where off_t is 32 bits wide (armv7 Raspberry Pi OS)
#[cfg(all(target_os = "linux", target_env = "gnu"))]
use libc::{mmap64 as mmap, off64_t as MapOffset};
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
use libc::{mmap, off_t as MapOffset};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use tracing::{debug, info};

/// Size of the mapped GPIO register page
pub const GPIO_BLOCK_SIZE: usize = 256;

/// Word offset of the first pin level register (GPLEV0)
const GPLEV0: usize = 13;

/// Capability consumed by the sampling loop
pub trait BitSource {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Acquire resources; failure is fatal to the caller
    fn setup(&mut self) -> Result<()>;

    /// Sample one bit (0 or 1)
    ///
    /// Only meaningful after `setup` returned `Ok`.
    fn read_bit(&mut self) -> u8;

    /// Release resources acquired by `setup`; later calls are no-ops
    fn teardown(&mut self) -> Result<()>;
}

/// Which bit source to instantiate
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BitSourceKind {
    /// Avalanche circuit on a GPIO line
    #[default]
    Hardware,
    /// Pseudo-random substitute
    Software,
}

impl std::fmt::Display for BitSourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardware => write!(f, "hardware"),
            Self::Software => write!(f, "software"),
        }
    }
}

/// Build the bit source selected by the configuration
pub fn from_config(config: &SamplerConfig) -> Box<dyn BitSource> {
    match config.source {
        BitSourceKind::Hardware => Box::new(GpioBitSource::new(
            &config.gpio_device,
            config.gpio_base,
            config.gpio_pin,
        )),
        BitSourceKind::Software => Box::new(SoftwareBitSource::new()),
    }
}

/// GPIO line read through the memory-mapped register block
pub struct GpioBitSource {
    device: PathBuf,
    base: u64,
    pin: u8,
    map: Option<RegisterMap>,
}

/// Mapped register page
struct RegisterMap {
    regs: NonNull<u32>,
    // Keeps the device descriptor open for the lifetime of the mapping
    _file: File,
}

impl GpioBitSource {
    pub fn new(device: impl AsRef<Path>, base: u64, pin: u8) -> Self {
        Self {
            device: device.as_ref().to_path_buf(),
            base,
            pin,
            map: None,
        }
    }

    /// Check if the register page is currently mapped
    pub fn is_mapped(&self) -> bool {
        self.map.is_some()
    }
}

impl BitSource for GpioBitSource {
    fn name(&self) -> &'static str {
        "gpio"
    }

    fn setup(&mut self) -> Result<()> {
        if self.map.is_some() {
            return Ok(());
        }

        if self.pin > MAX_GPIO_PIN {
            return Err(Error::Config(format!(
                "GPIO pin {} is outside GPLEV0 (0..={})",
                self.pin, MAX_GPIO_PIN
            )));
        }

        let map = RegisterMap::open(&self.device, self.base)?;
        map.configure_input(self.pin);

        info!(
            "Mapped GPIO registers from {} at {:#x}, reading pin {}",
            self.device.display(),
            self.base,
            self.pin
        );
        self.map = Some(map);
        Ok(())
    }

    fn read_bit(&mut self) -> u8 {
        debug_assert!(self.map.is_some(), "read_bit called before setup");
        match &self.map {
            Some(map) => map.level(self.pin),
            None => 0,
        }
    }

    fn teardown(&mut self) -> Result<()> {
        match self.map.take() {
            Some(map) => {
                map.unmap()?;
                debug!("Released GPIO register mapping");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for GpioBitSource {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

impl RegisterMap {
    fn open(device: &Path, base: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(device)
            .map_err(|e| Error::Resource(format!("Cannot open {}: {}", device.display(), e)))?;

        let offset = map_offset(base)?;

        // SAFETY: the descriptor is valid for the duration of the call and the kernel
        // validates length, protection and offset; MAP_FAILED is checked below.
        let addr = unsafe {
            mmap(
                std::ptr::null_mut(),
                GPIO_BLOCK_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                offset,
            )
        };
        if addr == libc::MAP_FAILED {
            return Err(Error::Resource(format!(
                "mmap() of {} failed: {}",
                device.display(),
                std::io::Error::last_os_error()
            )));
        }

        let regs = NonNull::new(addr.cast::<u32>())
            .ok_or_else(|| Error::Resource("mmap() returned a null mapping".to_string()))?;

        Ok(Self { regs, _file: file })
    }

    /// Clear the three function-select bits of `pin`, making it an input
    fn configure_input(&self, pin: u8) {
        let index = pin as usize / 10;
        let shift = (pin as u32 % 10) * 3;
        // SAFETY: index < 4 for pins 0..=31, well inside the mapped page.
        unsafe {
            let reg = self.regs.as_ptr().add(index);
            let value = reg.read_volatile();
            reg.write_volatile(value & !(7 << shift));
        }
    }

    fn level(&self, pin: u8) -> u8 {
        // SAFETY: GPLEV0 lies inside the mapped page and the mapping outlives `self`.
        let levels = unsafe { self.regs.as_ptr().add(GPLEV0).read_volatile() };
        ((levels >> pin) & 1) as u8
    }

    fn unmap(self) -> Result<()> {
        // SAFETY: regs was returned by mmap with GPIO_BLOCK_SIZE and `self` is consumed, so
        // the page is unmapped exactly once.
        let ret = unsafe { libc::munmap(self.regs.as_ptr().cast(), GPIO_BLOCK_SIZE) };
        if ret == -1 {
            return Err(Error::Resource(format!(
                "munmap() failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

fn map_offset(base: u64) -> Result<MapOffset> {
    MapOffset::try_from(base)
        .map_err(|_| Error::Resource(format!("GPIO base {:#x} out of range", base)))
}

/// Uniform pseudo-random bits
pub struct SoftwareBitSource {
    rng: StdRng,
}

impl SoftwareBitSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible stream for tests and benchmarks
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for SoftwareBitSource {
    fn default() -> Self {
        Self::new()
    }
}

impl BitSource for SoftwareBitSource {
    fn name(&self) -> &'static str {
        "software"
    }

    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_bit(&mut self) -> u8 {
        self.rng.gen::<bool>() as u8
    }

    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}
