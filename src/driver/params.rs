//! Discovery of the driver's read-only integer parameters.
//!
//! Every scalar lives in its own file under the parameter root. The raw
//! reader mirrors the driver contract: a negative return distinguishes a
//! failed read from a legitimate zero, which matters for the optional
//! parameters kept verbatim in the configuration.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use nix::errno::Errno;

use super::consts::*;
use crate::convert::CodecFormat;
use crate::error::{Error, Result};

/// How the codec is attached downstream of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Codec wired directly to the SoC.
    Native,
    /// Secondary microcontroller without timing feedback.
    Async,
    /// Secondary microcontroller feeding back a per-period timing error.
    Sync,
}

impl Platform {
    pub fn from_driver(value: i32) -> Option<Self> {
        match value {
            PLATFORM_NATIVE => Some(Platform::Native),
            PLATFORM_ASYNC => Some(Platform::Async),
            PLATFORM_SYNC => Some(Platform::Sync),
            _ => None,
        }
    }
}

/// Everything the driver reports about the running audio setup. Immutable
/// once `open` succeeds.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frames: usize,
    pub input_channels: usize,
    pub output_channels: usize,
    pub codec_channels: usize,
    pub format: CodecFormat,
    pub platform: Platform,
    /// Kept verbatim; negative when the driver does not publish them.
    pub usb_audio_type: i32,
    pub irq_affinity: i32,
}

impl AudioConfig {
    pub fn period_ns(&self) -> f64 {
        self.frames as f64 * 1_000_000_000.0 / self.sample_rate as f64
    }

    pub fn period_us(&self) -> u64 {
        (self.frames as u64 * 1_000_000) / self.sample_rate as u64
    }
}

pub(crate) fn param_root() -> PathBuf {
    match std::env::var(PARAM_ROOT_ENV) {
        Ok(root) if !root.is_empty() => PathBuf::from(root),
        _ => PathBuf::from(PARAM_ROOT),
    }
}

/// Raw single-parameter read: at most 25 bytes, parsed as a decimal integer.
/// Returns `-errno` on any failure so a missing parameter is
/// distinguishable from a legitimate zero.
pub(crate) fn read_param_raw(root: &Path, name: &str) -> i32 {
    let mut file = match File::open(root.join(name)) {
        Ok(f) => f,
        Err(e) => return -e.raw_os_error().unwrap_or(Errno::EIO as i32),
    };
    let mut buf = [0u8; 25];
    let n = match file.read(&mut buf) {
        Ok(n) => n,
        Err(e) => return -e.raw_os_error().unwrap_or(Errno::EIO as i32),
    };
    match std::str::from_utf8(&buf[..n]) {
        Ok(text) => text.trim().parse::<i32>().unwrap_or(-(Errno::EINVAL as i32)),
        Err(_) => -(Errno::EINVAL as i32),
    }
}

fn read_param(root: &Path, name: &'static str) -> Result<i32> {
    let value = read_param_raw(root, name);
    if value < 0 {
        Err(Error::ParamRead { name, errno: Some(Errno::from_raw(-value)) })
    } else {
        Ok(value)
    }
}

/// Reads and validates the whole configuration against the caller's period
/// size. Runs before any resource is acquired so a failure leaves nothing
/// to unwind.
pub(crate) fn discover(frames_requested: usize) -> Result<AudioConfig> {
    let root = param_root();

    let major = read_param(&root, "version_major")?;
    let minor = read_param(&root, "version_minor")?;
    if major != REQUIRED_VERSION_MAJOR || minor < REQUIRED_VERSION_MINOR {
        return Err(Error::VersionMismatch { major, minor });
    }

    let buffer_size = read_param(&root, "buffer_size")?;
    if buffer_size as usize != frames_requested {
        return Err(Error::BufferSizeMismatch {
            requested: frames_requested,
            reported: buffer_size,
        });
    }

    let platform_raw = read_param(&root, "platform_type")?;
    let platform =
        Platform::from_driver(platform_raw).ok_or(Error::InvalidPlatform(platform_raw))?;

    let format_raw = read_param(&root, "codec_format")?;
    let format =
        CodecFormat::from_driver(format_raw).ok_or(Error::InvalidCodecFormat(format_raw))?;

    let sample_rate = read_param(&root, "sample_rate")?;
    if sample_rate <= 0 {
        return Err(Error::ParamRange { name: "sample_rate", value: sample_rate });
    }
    let input_channels = read_param(&root, "input_channels")?;
    let output_channels = read_param(&root, "output_channels")?;
    if input_channels.max(output_channels) <= 0 {
        return Err(Error::ParamRange { name: "output_channels", value: output_channels });
    }

    // Informational scalars; older drivers do not publish them.
    let usb_audio_type = read_param_raw(&root, "usb_audio_type");
    let irq_affinity = read_param_raw(&root, "irq_affinity");

    Ok(AudioConfig {
        sample_rate: sample_rate as u32,
        frames: frames_requested,
        input_channels: input_channels as usize,
        output_channels: output_channels as usize,
        codec_channels: input_channels.max(output_channels) as usize,
        format,
        platform,
        usb_audio_type,
        irq_affinity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fixture_root(tag: &str, params: &[(&str, &str)]) -> PathBuf {
        let root = std::env::temp_dir().join(format!("cadenza-params-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        for (name, value) in params {
            let mut f = File::create(root.join(name)).unwrap();
            write!(f, "{value}").unwrap();
        }
        root
    }

    #[test]
    fn raw_read_parses_decimal_scalars() {
        let root = fixture_root("raw", &[("sample_rate", "48000\n"), ("negative", "-3")]);
        assert_eq!(read_param_raw(&root, "sample_rate"), 48000);
        assert_eq!(read_param_raw(&root, "negative"), -3);
        assert!(read_param_raw(&root, "missing") < 0);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn garbage_content_reads_negative() {
        let root = fixture_root("garbage", &[("platform_type", "banana")]);
        assert!(read_param_raw(&root, "platform_type") < 0);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn platform_values_map_in_order() {
        assert_eq!(Platform::from_driver(1), Some(Platform::Native));
        assert_eq!(Platform::from_driver(2), Some(Platform::Async));
        assert_eq!(Platform::from_driver(3), Some(Platform::Sync));
        assert_eq!(Platform::from_driver(0), None);
        assert_eq!(Platform::from_driver(4), None);
    }

    #[test]
    fn period_length_follows_rate_and_frames() {
        let config = AudioConfig {
            sample_rate: 48_000,
            frames: 64,
            input_channels: 2,
            output_channels: 2,
            codec_channels: 2,
            format: CodecFormat::Int24Lj,
            platform: Platform::Native,
            usb_audio_type: -1,
            irq_affinity: -1,
        };
        assert_eq!(config.period_us(), 1_333);
        assert!((config.period_ns() - 1_333_333.333).abs() < 1.0);
    }
}
