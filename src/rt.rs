//! The real-time period loop.
//!
//! One cooperatively scheduled thread blocks in the driver's IRQ wait,
//! executes the platform body for the half-buffer it was handed, and
//! acknowledges the period. The bodies never issue a syscall themselves;
//! everything they touch is the mapped window, the user buffers and the
//! lock-free rings, which keeps them drivable from tests.

use std::ffi::CString;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use nix::libc;
use tracing::{debug, warn};

use crate::buffers::AlignedBuf;
use crate::convert::SampleConverter;
use crate::dll::DllFilter;
use crate::driver::consts::{CORRECTION_DOWNSAMPLE, RT_PRIORITY, RT_THREAD_NAME};
use crate::driver::layout::RegionView;
use crate::driver::packet::{self, PacketContent};
use crate::driver::{Device, Platform};
use crate::gpio::RtGpioQueues;

/// Period processing function supplied by the application. Input and output
/// are deinterleaved `frames x codec_channels` float buffers; any user data
/// lives in the closure's captures.
pub type ProcessCallback = Box<dyn FnMut(&[f32], &mut [f32]) + Send + 'static>;

/// Debug flag for `open`: ask the kernel to warn when the real-time thread
/// falls out of its primary scheduling mode.
pub const SIGNAL_ON_MODE_SWITCH: u32 = 1 << 0;

/// State shared between the real-time thread and the façade. Everything is
/// a plain atomic; the façade never holds a lock the RT thread could miss a
/// deadline on.
pub(crate) struct SharedState {
    pub stop: AtomicBool,
    pub running: AtomicBool,
    pub periods: AtomicU64,
    pub gate_in: AtomicU32,
    pub gate_out: AtomicU32,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            running: AtomicBool::new(false),
            periods: AtomicU64::new(0),
            gate_in: AtomicU32::new(0),
            gate_out: AtomicU32::new(0),
        }
    }
}

/// Everything the real-time thread owns for its lifetime.
pub(crate) struct RtContext {
    pub platform: Platform,
    pub view: RegionView,
    pub converter: Box<dyn SampleConverter>,
    pub callback: ProcessCallback,
    pub user_in: AlignedBuf,
    pub user_out: AlignedBuf,
    pub shared: Arc<SharedState>,
    pub gpio: RtGpioQueues,
    pub dll: DllFilter,
    pub settle_left: u64,
    pub tick_index: u64,
    pub seq: u32,
    pub debug_flags: u32,
    pub period_us: u64,
}

/// One period of work. Returns the nanosecond correction to acknowledge
/// with; zero everywhere but on SYNC's downsampled live periods.
pub(crate) fn period(ctx: &mut RtContext, half: usize) -> i64 {
    match ctx.platform {
        Platform::Native => {
            native_period(ctx, half);
            0
        }
        Platform::Async | Platform::Sync => control_period(ctx, half),
    }
}

fn native_period(ctx: &mut RtContext, half: usize) {
    if ctx.shared.stop.load(Ordering::Relaxed) {
        ctx.view.zero_audio_out(0);
        ctx.view.zero_audio_out(1);
        return;
    }
    ctx.shared.gate_in.store(ctx.view.read_cv_in(), Ordering::Relaxed);
    ctx.converter.codec_to_float(ctx.user_in.as_mut_slice(), ctx.view.audio_in(half));
    (ctx.callback)(ctx.user_in.as_slice(), ctx.user_out.as_mut_slice());
    ctx.converter.float_to_codec(ctx.view.audio_out_mut(half), ctx.user_out.as_slice());
    ctx.view.write_cv_out(ctx.shared.gate_out.load(Ordering::Relaxed));
}

fn control_period(ctx: &mut RtContext, half: usize) -> i64 {
    let mut correction = 0i64;
    if ctx.platform == Platform::Sync {
        let error_ns = packet::read_timing_error(ctx.view.rx_pkt(half));
        let smoothed = ctx.dll.tick(error_ns as f64);
        ctx.tick_index += 1;
        if ctx.tick_index % CORRECTION_DOWNSAMPLE == 0 {
            correction = smoothed as i64;
        }
    }

    if let Some(parsed) = packet::parse(ctx.view.rx_pkt(half)) {
        ctx.shared.gate_in.store(parsed.cv_gate, Ordering::Relaxed);
        match parsed.content {
            PacketContent::Gpio { blobs, count } => {
                for blob in blobs.iter().take(count) {
                    if !ctx.gpio.from_rt.push(*blob) {
                        // Sidecar is behind; newest payloads are dropped.
                        break;
                    }
                }
            }
            // Opaque to the engine; counted by the controller protocol only.
            PacketContent::Midi { .. } => {}
            PacketContent::Empty => {}
        }
    }

    let settling = ctx.platform == Platform::Sync && ctx.settle_left > 0;
    if settling {
        ctx.settle_left -= 1;
    } else {
        ctx.converter.codec_to_float(ctx.user_in.as_mut_slice(), ctx.view.audio_in(half));
        (ctx.callback)(ctx.user_in.as_slice(), ctx.user_out.as_mut_slice());
        ctx.converter.float_to_codec(ctx.view.audio_out_mut(half), ctx.user_out.as_slice());
    }

    ctx.seq = ctx.seq.wrapping_add(1);
    let seq = ctx.seq;
    let stopping = ctx.shared.stop.load(Ordering::Relaxed);
    let gate = ctx.shared.gate_out.load(Ordering::Relaxed);
    let tx = ctx.view.tx_pkt_mut(half);
    if stopping {
        packet::build_cease(tx, seq);
    } else if !ctx.gpio.to_rt.is_empty() {
        packet::build_gpio(tx, seq, &mut ctx.gpio.to_rt);
    } else {
        packet::build_default(tx, seq);
    }
    packet::set_gate(tx, gate);

    correction
}

/// Thread body. Runs until an ioctl reports a negative status, which is the
/// driver's way of tearing the data path down.
pub(crate) fn run(device: Arc<Device>, mut ctx: RtContext) {
    if let Err(e) = configure_rt_thread(RT_THREAD_NAME, RT_PRIORITY) {
        warn!("real-time scheduling not enabled: {e}");
    }
    ctx.shared.running.store(true, Ordering::Release);

    let mut iterations = 0u64;
    loop {
        let half = match device.irq_wait() {
            Ok(half) => half,
            Err(e) => {
                debug!("irq wait returned {e}, leaving the period loop");
                break;
            }
        };
        let correction = period(&mut ctx, half);
        if let Err(e) = device.userproc_finished(correction) {
            debug!("period acknowledge returned {e}, leaving the period loop");
            break;
        }
        ctx.shared.periods.fetch_add(1, Ordering::Relaxed);

        iterations += 1;
        if iterations == 2 && ctx.debug_flags & SIGNAL_ON_MODE_SWITCH != 0 {
            install_mode_switch_warning(ctx.period_us);
            ctx.debug_flags &= !SIGNAL_ON_MODE_SWITCH;
        }
    }
}

/// Names the thread, switches it to SCHED_FIFO at the requested priority and
/// verifies the switch took.
fn configure_rt_thread(name: &str, priority: i32) -> Result<(), String> {
    let thread = unsafe { libc::pthread_self() };
    if let Ok(c_name) = CString::new(name) {
        unsafe {
            let _ = libc::pthread_setname_np(thread, c_name.as_ptr());
        }
    }

    let param = libc::sched_param { sched_priority: priority };
    let rc = unsafe { libc::pthread_setschedparam(thread, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        return Err(format!("pthread_setschedparam(prio {priority}) failed with errno {rc}"));
    }

    let mut actual_policy = 0_i32;
    let mut actual_param = unsafe { std::mem::zeroed::<libc::sched_param>() };
    let rc = unsafe { libc::pthread_getschedparam(thread, &mut actual_policy, &mut actual_param) };
    if rc != 0 {
        return Err(format!("pthread_getschedparam failed with errno {rc}"));
    }
    if actual_policy != libc::SCHED_FIFO || actual_param.sched_priority != priority {
        return Err(format!(
            "realtime verification failed: policy {actual_policy}, prio {}",
            actual_param.sched_priority
        ));
    }
    Ok(())
}

/// Best effort: a FIFO thread that burns a full period of CPU without
/// sleeping has left its deadline, and `RLIMIT_RTTIME` makes the kernel
/// deliver SIGXCPU when that happens. Never fails the loop.
fn install_mode_switch_warning(period_us: u64) {
    let limit = libc::rlimit { rlim_cur: period_us.max(1), rlim_max: libc::RLIM_INFINITY };
    let rc = unsafe { libc::setrlimit(libc::RLIMIT_RTTIME, &limit) };
    if rc != 0 {
        debug!("mode switch warning not installed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{self, CodecFormat};
    use crate::driver::consts::{DLL_T60_PERIODS, SYNC_SETTLING_PERIODS};
    use crate::driver::layout;
    use crate::gpio::{self, GpioDataBlob, GpioSidecarHandles};

    /// A period context over process-owned memory standing in for the mmap.
    struct Harness {
        _backing: Vec<i32>,
        ctx: RtContext,
        sidecar: GpioSidecarHandles,
        calls: Arc<AtomicU64>,
    }

    fn harness(
        platform: Platform,
        frames: usize,
        channels: usize,
        format: CodecFormat,
        callback: ProcessCallback,
    ) -> Harness {
        let plan = layout::plan(frames, channels, platform);
        let mut backing = vec![0i32; plan.total / 4 + 1];
        let view = unsafe { layout::RegionView::new(backing.as_mut_ptr() as *mut u8, plan) };
        let (rt_queues, sidecar) = gpio::queues();
        let samples = frames * channels;
        let calls = Arc::new(AtomicU64::new(0));
        let counted: ProcessCallback = {
            let calls = Arc::clone(&calls);
            let mut inner = callback;
            Box::new(move |input: &[f32], output: &mut [f32]| {
                calls.fetch_add(1, Ordering::Relaxed);
                inner(input, output);
            })
        };
        let ctx = RtContext {
            platform,
            view,
            converter: convert::converter_for(format, frames, channels).unwrap(),
            callback: counted,
            user_in: AlignedBuf::zeroed(samples).unwrap(),
            user_out: AlignedBuf::zeroed(samples).unwrap(),
            shared: Arc::new(SharedState::new()),
            gpio: rt_queues,
            dll: DllFilter::new(DLL_T60_PERIODS, 64.0 * 1_000_000_000.0 / 48_000.0),
            settle_left: if platform == Platform::Sync { SYNC_SETTLING_PERIODS } else { 0 },
            tick_index: 0,
            seq: 0,
            debug_flags: 0,
            period_us: 1_333,
        };
        Harness { _backing: backing, ctx, sidecar, calls }
    }

    impl Harness {
        fn seed_rx(&mut self, half: usize, timing_error_ns: i32, gate: u32) {
            let raw = self.ctx.view.rx_pkt_mut(half);
            packet::build_default(raw, 1);
            packet::write_timing_error(raw, timing_error_ns);
            packet::set_gate(raw, gate);
        }

        fn seed_rx_gpio(&mut self, half: usize, blobs: &[GpioDataBlob]) {
            let (mut tx, mut rx) = crate::spsc::channel::<GpioDataBlob>(8);
            for blob in blobs {
                tx.push(*blob);
            }
            packet::build_gpio(self.ctx.view.rx_pkt_mut(half), 1, &mut rx);
        }
    }

    #[test]
    fn native_loopback_copies_input_to_output_bit_for_bit() {
        let mut h = harness(
            Platform::Native,
            64,
            2,
            CodecFormat::Int24Lj,
            Box::new(|input, output| output.copy_from_slice(input)),
        );
        for p in 0..1000u64 {
            let half = (p % 2) as usize;
            for (n, w) in h.ctx.view.audio_in_mut(half).iter_mut().enumerate() {
                *w = (((p as i64 * 131 + n as i64) % 8_388_607) as i32) << 8;
            }
            let corr = period(&mut h.ctx, half);
            assert_eq!(corr, 0);
            h.ctx.shared.periods.fetch_add(1, Ordering::Relaxed);
            let out = h.ctx.view.audio_out(half).to_vec();
            assert_eq!(out.as_slice(), h.ctx.view.audio_in(half), "period {p}");
        }
        assert_eq!(h.calls.load(Ordering::Relaxed), 1000);
        assert_eq!(h.ctx.shared.periods.load(Ordering::Relaxed) * 64, 64_000);
    }

    #[test]
    fn native_gates_travel_both_directions() {
        let mut h = harness(Platform::Native, 8, 2, CodecFormat::Int32, Box::new(|_, _| {}));
        h.ctx.view.write_cv_in(0x1234_5678);
        h.ctx.shared.gate_out.store(0x9ABC_DEF0, Ordering::Relaxed);
        period(&mut h.ctx, 0);
        assert_eq!(h.ctx.shared.gate_in.load(Ordering::Relaxed), 0x1234_5678);
        assert_eq!(h.ctx.view.read_cv_out(), 0x9ABC_DEF0);
    }

    #[test]
    fn test_tone_peaks_at_scaled_full_scale() {
        // 750 Hz at 48 kHz puts a sample exactly on the sine peak.
        let phase_inc = 2.0 * std::f32::consts::PI * 750.0 / 48_000.0;
        let mut phase = 0.0f32;
        let mut h = harness(
            Platform::Native,
            64,
            2,
            CodecFormat::Int24Lj,
            Box::new(move |_input, output| {
                for n in 0..64 {
                    let sample = 0.7 * (phase + phase_inc * n as f32).sin();
                    output[n] = sample;
                    output[64 + n] = sample;
                }
                phase += phase_inc * 64.0;
            }),
        );
        let mut peak = 0i32;
        for p in 0..4u64 {
            let half = (p % 2) as usize;
            period(&mut h.ctx, half);
            for &w in h.ctx.view.audio_out(half) {
                peak = peak.max((w >> 8).abs());
            }
        }
        let expected = (0.7f64 * 8_388_607.0).round() as i32;
        assert!((peak - expected).abs() <= 1, "peak {peak} vs {expected}");
    }

    #[test]
    fn native_stop_zeroes_both_output_halves() {
        let mut h = harness(
            Platform::Native,
            8,
            2,
            CodecFormat::Int32,
            Box::new(|_, output| output.fill(0.9)),
        );
        period(&mut h.ctx, 0);
        period(&mut h.ctx, 1);
        assert!(h.ctx.view.audio_out(0).iter().any(|&w| w != 0));

        h.ctx.shared.stop.store(true, Ordering::Relaxed);
        period(&mut h.ctx, 0);
        assert!(h.ctx.view.audio_out(0).iter().all(|&w| w == 0));
        assert!(h.ctx.view.audio_out(1).iter().all(|&w| w == 0));
        assert_eq!(h.calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn async_period_processes_audio_and_answers_packets() {
        let mut h = harness(
            Platform::Async,
            16,
            2,
            CodecFormat::Int24_32Rj,
            Box::new(|input, output| output.copy_from_slice(input)),
        );
        h.seed_rx(0, 0, 0x0000_BEEF);
        for (n, w) in h.ctx.view.audio_in_mut(0).iter_mut().enumerate() {
            *w = n as i32 - 16;
        }
        let corr = period(&mut h.ctx, 0);
        assert_eq!(corr, 0);
        assert_eq!(h.ctx.shared.gate_in.load(Ordering::Relaxed), 0x0000_BEEF);
        assert_eq!(h.calls.load(Ordering::Relaxed), 1);
        for (n, &w) in h.ctx.view.audio_out(0).iter().enumerate() {
            assert_eq!(w, n as i32 - 16);
        }
        let parsed = packet::parse(h.ctx.view.tx_pkt(0)).unwrap();
        assert_eq!(parsed.seq, 1);
    }

    #[test]
    fn async_stop_emits_cease_packet() {
        let mut h = harness(Platform::Async, 16, 2, CodecFormat::Int32, Box::new(|_, _| {}));
        h.seed_rx(0, 0, 0);
        h.ctx.shared.stop.store(true, Ordering::Relaxed);
        period(&mut h.ctx, 0);
        assert!(packet::is_cease(h.ctx.view.tx_pkt(0)));
    }

    #[test]
    fn gpio_blobs_flow_through_the_period() {
        let mut h = harness(Platform::Async, 16, 2, CodecFormat::Int32, Box::new(|_, _| {}));
        let mut inbound = GpioDataBlob::default();
        inbound.bytes[0] = 7;
        h.seed_rx_gpio(0, &[inbound]);

        let mut outbound = GpioDataBlob::default();
        outbound.bytes[0] = 9;
        assert!(h.sidecar.to_rt.push(outbound));

        period(&mut h.ctx, 0);

        assert_eq!(h.sidecar.from_rt.pop(), Some(inbound));
        match packet::parse(h.ctx.view.tx_pkt(0)).unwrap().content {
            PacketContent::Gpio { blobs, count } => {
                assert_eq!(count, 1);
                assert_eq!(blobs[0], outbound);
            }
            other => panic!("expected gpio packet, got {other:?}"),
        }
    }

    #[test]
    fn sync_settles_then_reports_downsampled_corrections() {
        let mut h = harness(Platform::Sync, 64, 2, CodecFormat::Int32, Box::new(|_, _| {}));
        h.seed_rx(0, 160, 0);
        h.seed_rx(1, 160, 0);

        let mut live = Vec::new();
        for p in 0..200u64 {
            let half = (p % 2) as usize;
            let corr = period(&mut h.ctx, half);
            if (p + 1) % CORRECTION_DOWNSAMPLE == 0 {
                live.push(corr);
            } else {
                assert_eq!(corr, 0, "period {p} should be masked");
            }
            // No callback during the settling prologue.
            let expected_calls = p.saturating_sub(SYNC_SETTLING_PERIODS - 1);
            assert_eq!(h.calls.load(Ordering::Relaxed), expected_calls);
        }
        let last = *live.last().unwrap();
        assert!((last - 160).abs() <= 16, "settled correction {last} not within 10% of 160");
    }

    #[test]
    fn sync_stop_during_settling_still_ceases() {
        let mut h = harness(Platform::Sync, 64, 2, CodecFormat::Int32, Box::new(|_, _| {}));
        h.seed_rx(0, 0, 0);
        h.ctx.shared.stop.store(true, Ordering::Relaxed);
        period(&mut h.ctx, 0);
        assert!(h.ctx.settle_left > 0);
        assert!(packet::is_cease(h.ctx.view.tx_pkt(0)));
        assert_eq!(h.calls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn rx_packet_without_magic_is_ignored() {
        let mut h = harness(Platform::Async, 16, 2, CodecFormat::Int32, Box::new(|_, _| {}));
        h.ctx.shared.gate_in.store(77, Ordering::Relaxed);
        // Garbage where the packet should be: gate stays untouched, audio
        // still processed.
        h.ctx.view.rx_pkt_mut(0).fill(0xEE);
        period(&mut h.ctx, 0);
        assert_eq!(h.ctx.shared.gate_in.load(Ordering::Relaxed), 77);
        assert_eq!(h.calls.load(Ordering::Relaxed), 1);
    }
}
