//! Userspace real-time audio engine for a kernel-resident audio driver.
//!
//! The driver exposes a memory-mapped double-buffered audio window, a set of
//! read-only parameters and an interrupt-wait ioctl. This crate wakes one
//! `SCHED_FIFO` thread per hardware period, converts the codec's integer
//! samples to deinterleaved floats, runs the application's processing
//! callback under deadline discipline and answers on the control plane
//! (CV gates, GPIO blobs, clock corrections) that shares the period.
//!
//! ```no_run
//! use cadenza::Engine;
//!
//! let mut engine = Engine::new();
//! engine.init()?;
//! engine.open(
//!     64,
//!     Box::new(|input, output| output.copy_from_slice(input)),
//!     0,
//! )?;
//! engine.start_realtime()?;
//! // ... run until done ...
//! engine.close()?;
//! # Ok::<(), cadenza::Error>(())
//! ```

mod buffers;
pub mod convert;
pub mod dll;
mod driver;
mod engine;
pub mod error;
pub mod gpio;
mod rt;
pub mod spsc;

pub use convert::{CodecFormat, SampleConverter, converter_for};
pub use driver::{AudioConfig, GPIO_DIR_INPUT, GPIO_DIR_OUTPUT, Platform};
pub use engine::Engine;
pub use error::{Error, Result, error_text};
pub use gpio::{GpioDataBlob, GpioSidecarHandles};
pub use rt::{ProcessCallback, SIGNAL_ON_MODE_SWITCH};
