//! Compile-time contract with the kernel audio driver.

use std::time::Duration;

/// Real-time device node registered by the driver.
pub const DEVICE_PATH: &str = "/dev/rtdm/rtaudio";
/// Root of the read-only integer parameters the driver publishes.
pub const PARAM_ROOT: &str = "/sys/class/rtaudio";

/// Environment overrides, mainly for pointing tests at fixture paths.
pub const DEVICE_ENV: &str = "CADENZA_DEVICE";
pub const PARAM_ROOT_ENV: &str = "CADENZA_PARAM_ROOT";

/// Driver ABI the engine is built against. Major must match exactly,
/// minor is backwards compatible.
pub const REQUIRED_VERSION_MAJOR: i32 = 1;
pub const REQUIRED_VERSION_MINOR: i32 = 1;

/// Controller firmware major the control protocol requires.
pub const REQUIRED_FW_MAJOR: u16 = 1;

/// The driver maps a fixed window of 20 pages regardless of period size.
pub const BUFFER_PAGES: usize = 20;

/// Opaque slot the driver and controller firmware exchange ahead of each
/// audio control packet.
pub const DEVICE_CTRL_BYTES: usize = 256;

/// Scheduling of the real-time thread.
pub const RT_PRIORITY: i32 = 90;
pub const RT_CPU: usize = 0;
pub const RT_THREAD_NAME: &str = "cadenza-rt";

/// Settling horizon of the timing-error filter, in periods.
pub const DLL_T60_PERIODS: f64 = 100.0;
/// Periods the SYNC loop runs before the first user callback.
pub const SYNC_SETTLING_PERIODS: u64 = 100;
/// The correction is handed to the driver once per this many periods; the
/// filter itself ticks every period.
pub const CORRECTION_DOWNSAMPLE: u64 = 16;

/// Grace between raising the stop flag and `PROC_STOP`, long enough for the
/// cease packet to reach the controller.
pub const STOP_GRACE: Duration = Duration::from_millis(500);

/// Platform types as the driver reports them.
pub const PLATFORM_NATIVE: i32 = 1;
pub const PLATFORM_ASYNC: i32 = 2;
pub const PLATFORM_SYNC: i32 = 3;
