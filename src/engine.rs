//! Engine lifecycle and public façade.
//!
//! One engine value owns everything: the device handle, the mapped window,
//! the user buffers, the rings and the real-time task. Opening walks the
//! phases forward; any failure unwinds exactly the phases reached (locals
//! drop in reverse acquisition order before the state is committed), so a
//! failed `open` always leaves a retryable engine.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::libc;
use nix::sched::{CpuSet, sched_setaffinity};
use nix::sys::mman::{MlockAllFlags, mlockall};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::buffers::AlignedBuf;
use crate::convert;
use crate::dll::DllFilter;
use crate::driver::consts::{
    DLL_T60_PERIODS, REQUIRED_FW_MAJOR, RT_CPU, RT_THREAD_NAME, STOP_GRACE,
    SYNC_SETTLING_PERIODS,
};
use crate::driver::{self, AudioConfig, Device, Platform, layout, packet, params};
use crate::error::{Error, Result};
use crate::gpio::{self, GpioSidecarHandles};
use crate::rt::{self, ProcessCallback, RtContext, SharedState};

/// Lifecycle phases, strictly forward on success. A failure anywhere
/// unwinds through exactly the phases reached, in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Start,
    DeviceOpen,
    Mapped,
    UserBuffers,
    TaskStarted,
}

/// The engine. Single consumer at process scope; none of the operations are
/// reentrant.
pub struct Engine {
    phase: Phase,
    config: Option<AudioConfig>,
    device: Option<Arc<Device>>,
    region: Option<driver::MappedRegion>,
    context: Option<RtContext>,
    handle: Option<JoinHandle<()>>,
    shared: Arc<SharedState>,
    sidecar: Option<GpioSidecarHandles>,
    output_latency_us: u64,
}

impl Engine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Start,
            config: None,
            device: None,
            region: None,
            context: None,
            handle: None,
            shared: Arc::new(SharedState::new()),
            sidecar: None,
            output_latency_us: 0,
        }
    }

    /// Locks all current and future pages. Called once, before `open`.
    pub fn init(&mut self) -> Result<()> {
        mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
            .map_err(Error::MemoryLock)?;
        debug!("memory locked");
        Ok(())
    }

    /// Discovers the driver configuration, validates it against the caller's
    /// period size and acquires every resource short of the real-time task.
    /// A failure unwinds back to the start phase; `open` may be retried.
    pub fn open(
        &mut self,
        frames: usize,
        callback: ProcessCallback,
        debug_flags: u32,
    ) -> Result<()> {
        if self.phase != Phase::Start {
            return Err(Error::Busy);
        }
        match self.acquire(frames, callback, debug_flags) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.teardown();
                Err(e)
            }
        }
    }

    fn acquire(&mut self, frames: usize, callback: ProcessCallback, debug_flags: u32) -> Result<()> {
        // Validation runs before acquisition; the common compatibility
        // failures leave no phase to unwind.
        let config = params::discover(frames)?;
        let converter = convert::converter_for(config.format, frames, config.codec_channels)
            .ok_or(Error::UnsupportedConversion {
                format: config.format,
                frames,
                channels: config.codec_channels,
            })?;

        let device = Arc::new(Device::open()?);
        self.device = Some(Arc::clone(&device));
        self.phase = Phase::DeviceOpen;

        let plan = layout::plan(frames, config.codec_channels, config.platform);
        let region = driver::MappedRegion::map(&device)?;
        let view = region.view(plan)?;
        self.region = Some(region);
        self.phase = Phase::Mapped;

        if config.platform != Platform::Native {
            let status = packet::parse_device_status(view.device_ctrl_rx(0))
                .ok_or(Error::ControllerInactive)?;
            if !status.active {
                return Err(Error::ControllerInactive);
            }
            if status.fw_major != REQUIRED_FW_MAJOR {
                return Err(Error::InvalidFirmware {
                    major: status.fw_major,
                    minor: status.fw_minor,
                });
            }
        }

        let samples = frames * config.codec_channels;
        let user_in = AlignedBuf::zeroed(samples).ok_or(Error::UserBufferAlloc)?;
        let user_out = AlignedBuf::zeroed(samples).ok_or(Error::UserBufferAlloc)?;

        let shared = Arc::new(SharedState::new());
        let (rt_queues, sidecar) = gpio::queues();
        self.context = Some(RtContext {
            platform: config.platform,
            view,
            converter,
            callback,
            user_in,
            user_out,
            shared: Arc::clone(&shared),
            gpio: rt_queues,
            dll: DllFilter::new(DLL_T60_PERIODS, config.period_ns()),
            settle_left: if config.platform == Platform::Sync { SYNC_SETTLING_PERIODS } else { 0 },
            tick_index: 0,
            seq: 0,
            debug_flags,
            period_us: config.period_us(),
        });
        self.phase = Phase::UserBuffers;

        debug!(
            "opened: {} Hz, {} frames, {}/{} channels, {:?}, {:?}",
            config.sample_rate,
            config.frames,
            config.input_channels,
            config.output_channels,
            config.format,
            config.platform
        );

        self.output_latency_us = config.period_us();
        self.config = Some(config);
        self.shared = shared;
        self.sidecar = Some(sidecar);
        Ok(())
    }

    /// Spawns the real-time task pinned to the RT core and arms the driver's
    /// data path. On any failure the engine unwinds back to the start phase.
    pub fn start_realtime(&mut self) -> Result<()> {
        if self.phase != Phase::UserBuffers {
            return Err(Error::Busy);
        }
        match self.spawn_and_arm() {
            Ok(()) => {
                self.phase = Phase::TaskStarted;
                Ok(())
            }
            Err(e) => {
                let _ = self.teardown();
                Err(e)
            }
        }
    }

    fn spawn_and_arm(&mut self) -> Result<()> {
        let context = self.context.take().ok_or(Error::Busy)?;
        let device = Arc::clone(self.device.as_ref().ok_or(Error::Busy)?);
        let shared = Arc::clone(&self.shared);

        // Pinning the spawning thread first makes the new task inherit the
        // RT core; the spawning thread widens back out once it is running.
        let mut rt_set = CpuSet::new();
        rt_set.set(RT_CPU).map_err(Error::TaskAffinity)?;
        sched_setaffinity(Pid::from_raw(0), &rt_set).map_err(Error::TaskAffinity)?;

        let spawned = std::thread::Builder::new()
            .name(RT_THREAD_NAME.to_string())
            .spawn(move || rt::run(device, context));

        let deadline = Instant::now() + Duration::from_secs(1);
        if spawned.is_ok() {
            while !shared.running.load(Ordering::Acquire) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        let mut all_cores = CpuSet::new();
        for cpu in 0..num_cpus::get() {
            let _ = all_cores.set(cpu);
        }
        if sched_setaffinity(Pid::from_raw(0), &all_cores).is_err() {
            warn!("could not restore control thread affinity");
        }

        self.handle = Some(spawned.map_err(|_| Error::TaskCreate)?);

        if let Some(device) = self.device.as_ref() {
            device.proc_start().map_err(Error::TaskStart)?;
        }
        Ok(())
    }

    /// Raises the stop flag, lets the cease/mute reach the controller,
    /// disarms the driver and joins the real-time task. Idempotent; calling
    /// it again (or after a failed `open`) succeeds without side effects.
    pub fn close(&mut self) -> Result<()> {
        if self.phase == Phase::Start {
            return Ok(());
        }
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let mut result = Ok(());
        if let Some(handle) = self.handle.take() {
            self.shared.stop.store(true, Ordering::Relaxed);
            std::thread::sleep(STOP_GRACE);
            if let Some(device) = self.device.as_ref() {
                if let Err(e) = device.proc_stop() {
                    result = Err(Error::TaskStop(e));
                }
            }
            if handle.join().is_err() && result.is_ok() {
                result = Err(Error::TaskStop(Errno::EIO));
            }
        }
        // Reverse acquisition order: buffers and rings, then the mapping,
        // then the device node.
        self.context = None;
        self.sidecar = None;
        self.region = None;
        self.device = None;
        self.config = None;
        self.output_latency_us = 0;
        self.phase = Phase::Start;
        result
    }

    pub fn sample_rate(&self) -> f32 {
        self.config.as_ref().map(|c| c.sample_rate as f32).unwrap_or(0.0)
    }

    pub fn input_channels(&self) -> usize {
        self.config.as_ref().map(|c| c.input_channels).unwrap_or(0)
    }

    pub fn output_channels(&self) -> usize {
        self.config.as_ref().map(|c| c.output_channels).unwrap_or(0)
    }

    /// Samples processed so far: completed periods times the period size.
    /// Wraps silently past the 64-bit horizon.
    pub fn sample_count(&self) -> u64 {
        let frames = self.config.as_ref().map(|c| c.frames as u64).unwrap_or(0);
        self.shared.periods.load(Ordering::Relaxed).wrapping_mul(frames)
    }

    /// Microseconds on the monotonic clock, 0 when the clock is unreadable.
    pub fn time_now_us(&self) -> u64 {
        let mut now = libc::timespec { tv_sec: 0, tv_nsec: 0 };
        let ok = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) == 0 };
        if !ok {
            return 0;
        }
        (now.tv_sec as u64) * 1_000_000 + (now.tv_nsec as u64) / 1_000
    }

    /// One period of output latency, 0 before a successful `open`.
    pub fn output_latency_us(&self) -> u64 {
        self.output_latency_us
    }

    /// Last CV gate word received from the codec or controller.
    pub fn gate_in(&self) -> u32 {
        self.shared.gate_in.load(Ordering::Relaxed)
    }

    /// CV gate word transmitted on the next period.
    pub fn set_gate_out(&self, gate: u32) {
        self.shared.gate_out.store(gate, Ordering::Relaxed);
    }

    /// Forwards a (pin, direction, value) record to the driver.
    pub fn set_gpio_pin(&self, pin: u32, direction: u32, value: u32) -> Result<()> {
        self.device.as_ref().ok_or(Error::Busy)?.set_gpio_pin(pin, direction, value)
    }

    /// Hands out the non-RT ends of the GPIO rings, once per `open`. The
    /// external socket forwarder owns them from here on.
    pub fn gpio_sidecar(&mut self) -> Option<GpioSidecarHandles> {
        self.sidecar.take()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_default_to_zero_before_open() {
        let engine = Engine::new();
        assert_eq!(engine.sample_rate(), 0.0);
        assert_eq!(engine.input_channels(), 0);
        assert_eq!(engine.output_channels(), 0);
        assert_eq!(engine.sample_count(), 0);
        assert_eq!(engine.output_latency_us(), 0);
        assert_eq!(engine.gate_in(), 0);
    }

    #[test]
    fn monotonic_clock_moves_forward() {
        let engine = Engine::new();
        let a = engine.time_now_us();
        let b = engine.time_now_us();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn close_before_open_is_a_no_op() {
        let mut engine = Engine::new();
        assert!(engine.close().is_ok());
        assert!(engine.close().is_ok());
    }

    #[test]
    fn gpio_pin_config_requires_a_device() {
        let engine = Engine::new();
        assert_eq!(
            engine.set_gpio_pin(3, crate::driver::GPIO_DIR_OUTPUT, 1),
            Err(Error::Busy)
        );
    }
}
