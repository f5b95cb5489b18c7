//! End-to-end test against the real kernel driver.
//!
//! Opens the engine at 64 frames, runs a loopback callback for a while and
//! checks that periods are being consumed and that teardown is orderly.
//! Marked `#[ignore]` because it needs the audio driver loaded and a
//! real-time capable kernel; it cannot run in headless CI.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cadenza::Engine;

#[test]
#[ignore = "requires the real-time audio driver"]
fn loopback_runs_and_stops_cleanly() {
    let mut engine = Engine::new();
    engine.init().expect("memory lock failed");

    let calls = Arc::new(AtomicU64::new(0));
    let counted = Arc::clone(&calls);
    engine
        .open(
            64,
            Box::new(move |input, output| {
                counted.fetch_add(1, Ordering::Relaxed);
                output.copy_from_slice(input);
            }),
            cadenza::SIGNAL_ON_MODE_SWITCH,
        )
        .expect("open failed");

    assert!(engine.sample_rate() > 0.0);
    assert!(engine.output_latency_us() > 0);

    engine.start_realtime().expect("start failed");
    std::thread::sleep(Duration::from_millis(500));

    let halfway = engine.sample_count();
    assert!(halfway > 0, "no periods consumed");
    std::thread::sleep(Duration::from_millis(500));
    assert!(engine.sample_count() > halfway, "sample count stalled");
    assert_eq!(engine.sample_count() % 64, 0);
    assert!(calls.load(Ordering::Relaxed) > 0);

    engine.close().expect("close failed");
    assert_eq!(engine.sample_rate(), 0.0);
}
