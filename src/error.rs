use nix::errno::Errno;
use std::fmt;

use crate::convert::CodecFormat;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by the engine. Each variant maps to a stable negative
/// integer code so callers holding only a code can still recover the text
/// through [`error_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    ParamRead { name: &'static str, errno: Option<Errno> },
    ParamRange { name: &'static str, value: i32 },
    VersionMismatch { major: i32, minor: i32 },
    BufferSizeMismatch { requested: usize, reported: i32 },
    InvalidPlatform(i32),
    InvalidCodecFormat(i32),
    ControllerInactive,
    InvalidFirmware { major: u16, minor: u16 },
    Busy,
    MemoryLock(Errno),
    DeviceOpen(Errno),
    Mmap(Errno),
    UserBufferAlloc,
    UnsupportedConversion { format: CodecFormat, frames: usize, channels: usize },
    TaskAffinity(Errno),
    TaskCreate,
    TaskStart(Errno),
    TaskStop(Errno),
    GpioConfig(Errno),
}

pub const ERR_PARAM_READ: i32 = -100;
pub const ERR_PARAM_RANGE: i32 = -101;
pub const ERR_VERSION_MISMATCH: i32 = -102;
pub const ERR_BUFFER_SIZE_MISMATCH: i32 = -103;
pub const ERR_INVALID_PLATFORM: i32 = -104;
pub const ERR_INVALID_CODEC_FORMAT: i32 = -105;
pub const ERR_CONTROLLER_INACTIVE: i32 = -106;
pub const ERR_INVALID_FIRMWARE: i32 = -107;
pub const ERR_BUSY: i32 = -108;
pub const ERR_MEMORY_LOCK: i32 = -110;
pub const ERR_DEVICE_OPEN: i32 = -111;
pub const ERR_MMAP: i32 = -112;
pub const ERR_USER_BUFFER_ALLOC: i32 = -113;
pub const ERR_UNSUPPORTED_CONVERSION: i32 = -114;
pub const ERR_TASK_AFFINITY: i32 = -120;
pub const ERR_TASK_CREATE: i32 = -121;
pub const ERR_TASK_START: i32 = -122;
pub const ERR_TASK_STOP: i32 = -123;
pub const ERR_GPIO_CONFIG: i32 = -124;

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::ParamRead { .. } => ERR_PARAM_READ,
            Error::ParamRange { .. } => ERR_PARAM_RANGE,
            Error::VersionMismatch { .. } => ERR_VERSION_MISMATCH,
            Error::BufferSizeMismatch { .. } => ERR_BUFFER_SIZE_MISMATCH,
            Error::InvalidPlatform(_) => ERR_INVALID_PLATFORM,
            Error::InvalidCodecFormat(_) => ERR_INVALID_CODEC_FORMAT,
            Error::ControllerInactive => ERR_CONTROLLER_INACTIVE,
            Error::InvalidFirmware { .. } => ERR_INVALID_FIRMWARE,
            Error::Busy => ERR_BUSY,
            Error::MemoryLock(_) => ERR_MEMORY_LOCK,
            Error::DeviceOpen(_) => ERR_DEVICE_OPEN,
            Error::Mmap(_) => ERR_MMAP,
            Error::UserBufferAlloc => ERR_USER_BUFFER_ALLOC,
            Error::UnsupportedConversion { .. } => ERR_UNSUPPORTED_CONVERSION,
            Error::TaskAffinity(_) => ERR_TASK_AFFINITY,
            Error::TaskCreate => ERR_TASK_CREATE,
            Error::TaskStart(_) => ERR_TASK_START,
            Error::TaskStop(_) => ERR_TASK_STOP,
            Error::GpioConfig(_) => ERR_GPIO_CONFIG,
        }
    }

    fn errno(&self) -> Option<Errno> {
        match self {
            Error::ParamRead { errno, .. } => *errno,
            Error::MemoryLock(e)
            | Error::DeviceOpen(e)
            | Error::Mmap(e)
            | Error::TaskAffinity(e)
            | Error::TaskStart(e)
            | Error::TaskStop(e)
            | Error::GpioConfig(e) => Some(*e),
            _ => None,
        }
    }
}

/// Stable description for a negative error code. No errno fragment is ever
/// appended here; [`Error`]'s `Display` carries that detail.
pub fn error_text(code: i32) -> &'static str {
    match code {
        ERR_PARAM_READ => "failed to read driver parameter",
        ERR_PARAM_RANGE => "driver parameter out of range",
        ERR_VERSION_MISMATCH => "incompatible driver version",
        ERR_BUFFER_SIZE_MISMATCH => "buffer size mismatch between caller and driver",
        ERR_INVALID_PLATFORM => "driver reported an invalid platform type",
        ERR_INVALID_CODEC_FORMAT => "driver reported an invalid codec format",
        ERR_CONTROLLER_INACTIVE => "audio controller is not active",
        ERR_INVALID_FIRMWARE => "audio controller firmware is incompatible",
        ERR_BUSY => "engine is not in a state that allows this operation",
        ERR_MEMORY_LOCK => "failed to lock memory pages",
        ERR_DEVICE_OPEN => "failed to open audio device",
        ERR_MMAP => "failed to map driver buffers",
        ERR_USER_BUFFER_ALLOC => "failed to allocate user audio buffers",
        ERR_UNSUPPORTED_CONVERSION => "unsupported codec format / buffer size combination",
        ERR_TASK_AFFINITY => "failed to set real-time task affinity",
        ERR_TASK_CREATE => "failed to create real-time task",
        ERR_TASK_START => "failed to start real-time processing",
        ERR_TASK_STOP => "failed to stop real-time processing",
        ERR_GPIO_CONFIG => "failed to configure gpio pin",
        _ => "unknown error",
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", error_text(self.code()))?;
        match self {
            Error::ParamRead { name, .. } => write!(f, " '{name}'")?,
            Error::ParamRange { name, value } => write!(f, " '{name}' = {value}")?,
            Error::VersionMismatch { major, minor } => {
                write!(f, " (driver reports {major}.{minor})")?
            }
            Error::BufferSizeMismatch { requested, reported } => {
                write!(f, " (requested {requested}, driver reports {reported})")?
            }
            Error::InvalidPlatform(v) | Error::InvalidCodecFormat(v) => write!(f, " ({v})")?,
            Error::InvalidFirmware { major, minor } => write!(f, " ({major}.{minor})")?,
            Error::UnsupportedConversion { format, frames, channels } => {
                write!(f, " ({format:?}, {frames} frames, {channels} channels)")?
            }
            _ => {}
        }
        if let Some(errno) = self.errno() {
            write!(f, ": {}", errno.desc())?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}
