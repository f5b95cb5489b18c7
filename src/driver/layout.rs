//! Placement of the per-period buffers inside the driver's mapped window.
//!
//! The plan is pure offset arithmetic over `(frames, channels, platform)`;
//! binding it to the mapped base happens afterwards, so the geometry is
//! checkable without a device.

use super::consts::{BUFFER_PAGES, DEVICE_CTRL_BYTES};
use super::packet::PKT_BYTES;
use crate::driver::params::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Segment {
    pub offset: usize,
    pub len: usize,
}

impl Segment {
    fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// Offsets of every subrange the engine touches. Unused subranges (control
/// packets on NATIVE, gate words elsewhere) have zero length.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RegionPlan {
    pub audio_in: [Segment; 2],
    pub audio_out: [Segment; 2],
    pub device_ctrl_rx: [Segment; 2],
    pub device_ctrl_tx: [Segment; 2],
    pub rx_pkt: [Segment; 2],
    pub tx_pkt: [Segment; 2],
    pub cv_out: Segment,
    pub cv_in: Segment,
    /// Bytes actually used; must stay within the mapped window.
    pub total: usize,
}

/// Size of the window the driver maps, independent of the period geometry.
pub(crate) fn region_bytes(page_size: usize) -> usize {
    BUFFER_PAGES * page_size
}

pub(crate) fn plan(frames: usize, channels: usize, platform: Platform) -> RegionPlan {
    let audio_bytes = frames * channels * 4;
    let mut offset = 0;
    let mut take = |len: usize| {
        let seg = Segment::new(offset, len);
        offset += len;
        seg
    };

    match platform {
        Platform::Native => {
            let audio_in = [take(audio_bytes), take(audio_bytes)];
            let audio_out = [take(audio_bytes), take(audio_bytes)];
            let cv_out = take(4);
            let cv_in = take(4);
            RegionPlan {
                audio_in,
                audio_out,
                device_ctrl_rx: [Segment::default(); 2],
                device_ctrl_tx: [Segment::default(); 2],
                rx_pkt: [Segment::default(); 2],
                tx_pkt: [Segment::default(); 2],
                cv_out,
                cv_in,
                total: offset,
            }
        }
        Platform::Async | Platform::Sync => {
            // Four blocks, each audio half preceded by its control packet,
            // which in turn is preceded by the driver's own slot.
            let mut device_ctrl_rx = [Segment::default(); 2];
            let mut rx_pkt = [Segment::default(); 2];
            let mut audio_in = [Segment::default(); 2];
            for half in 0..2 {
                device_ctrl_rx[half] = take(DEVICE_CTRL_BYTES);
                rx_pkt[half] = take(PKT_BYTES);
                audio_in[half] = take(audio_bytes);
            }
            let mut device_ctrl_tx = [Segment::default(); 2];
            let mut tx_pkt = [Segment::default(); 2];
            let mut audio_out = [Segment::default(); 2];
            for half in 0..2 {
                device_ctrl_tx[half] = take(DEVICE_CTRL_BYTES);
                tx_pkt[half] = take(PKT_BYTES);
                audio_out[half] = take(audio_bytes);
            }
            RegionPlan {
                audio_in,
                audio_out,
                device_ctrl_rx,
                device_ctrl_tx,
                rx_pkt,
                tx_pkt,
                cv_out: Segment::default(),
                cv_in: Segment::default(),
                total: offset,
            }
        }
    }
}

impl RegionPlan {
    fn segments(&self) -> Vec<Segment> {
        let mut all = Vec::with_capacity(14);
        all.extend_from_slice(&self.audio_in);
        all.extend_from_slice(&self.audio_out);
        all.extend_from_slice(&self.device_ctrl_rx);
        all.extend_from_slice(&self.device_ctrl_tx);
        all.extend_from_slice(&self.rx_pkt);
        all.extend_from_slice(&self.tx_pkt);
        all.push(self.cv_out);
        all.push(self.cv_in);
        all.retain(|s| s.len > 0);
        all
    }

    /// Every used subrange is disjoint and inside `region`.
    pub fn fits(&self, region: usize) -> bool {
        let mut segments = self.segments();
        segments.sort_by_key(|s| s.offset);
        let mut previous_end = 0;
        for seg in &segments {
            if seg.offset < previous_end {
                return false;
            }
            previous_end = seg.end();
        }
        self.total <= region && previous_end <= region
    }
}

/// The plan bound to a mapped (or test-owned) base pointer. Copies travel to
/// the real-time thread; the memory behind `base` outlives the thread by
/// construction of the engine teardown order.
pub(crate) struct RegionView {
    base: *mut u8,
    plan: RegionPlan,
}

unsafe impl Send for RegionView {}

impl RegionView {
    /// `base` must point at a region of at least `plan.total` writable
    /// bytes, 4-byte aligned, valid for the lifetime of the view.
    pub unsafe fn new(base: *mut u8, plan: RegionPlan) -> Self {
        Self { base, plan }
    }

    fn words(&self, seg: Segment) -> *mut i32 {
        debug_assert!(seg.len > 0 && seg.offset % 4 == 0);
        // SAFETY: the constructor guarantees base..base+total is valid and
        // the plan keeps every segment inside it.
        unsafe { self.base.add(seg.offset) as *mut i32 }
    }

    pub fn audio_in(&self, half: usize) -> &[i32] {
        let seg = self.plan.audio_in[half];
        unsafe { std::slice::from_raw_parts(self.words(seg), seg.len / 4) }
    }

    pub fn audio_out_mut(&mut self, half: usize) -> &mut [i32] {
        let seg = self.plan.audio_out[half];
        unsafe { std::slice::from_raw_parts_mut(self.words(seg), seg.len / 4) }
    }

    pub fn zero_audio_out(&mut self, half: usize) {
        let seg = self.plan.audio_out[half];
        unsafe { std::ptr::write_bytes(self.base.add(seg.offset), 0, seg.len) };
    }

    pub fn rx_pkt(&self, half: usize) -> &[u8] {
        let seg = self.plan.rx_pkt[half];
        unsafe { std::slice::from_raw_parts(self.base.add(seg.offset), seg.len) }
    }

    pub fn tx_pkt_mut(&mut self, half: usize) -> &mut [u8] {
        let seg = self.plan.tx_pkt[half];
        unsafe { std::slice::from_raw_parts_mut(self.base.add(seg.offset), seg.len) }
    }

    pub fn device_ctrl_rx(&self, half: usize) -> &[u8] {
        let seg = self.plan.device_ctrl_rx[half];
        unsafe { std::slice::from_raw_parts(self.base.add(seg.offset), seg.len) }
    }

    /// The kernel writes this word; a volatile read keeps the access honest.
    pub fn read_cv_in(&self) -> u32 {
        let seg = self.plan.cv_in;
        debug_assert!(seg.len == 4);
        unsafe { std::ptr::read_volatile(self.base.add(seg.offset) as *const u32) }
    }

    pub fn write_cv_out(&mut self, gate: u32) {
        let seg = self.plan.cv_out;
        debug_assert!(seg.len == 4);
        unsafe { std::ptr::write_volatile(self.base.add(seg.offset) as *mut u32, gate) };
    }

    // Driver-side accessors, for tests that stand in for the kernel.

    #[cfg(test)]
    pub fn audio_in_mut(&mut self, half: usize) -> &mut [i32] {
        let seg = self.plan.audio_in[half];
        unsafe { std::slice::from_raw_parts_mut(self.words(seg), seg.len / 4) }
    }

    #[cfg(test)]
    pub fn rx_pkt_mut(&mut self, half: usize) -> &mut [u8] {
        let seg = self.plan.rx_pkt[half];
        unsafe { std::slice::from_raw_parts_mut(self.base.add(seg.offset), seg.len) }
    }

    #[cfg(test)]
    pub fn tx_pkt(&self, half: usize) -> &[u8] {
        let seg = self.plan.tx_pkt[half];
        unsafe { std::slice::from_raw_parts(self.base.add(seg.offset), seg.len) }
    }

    #[cfg(test)]
    pub fn audio_out(&self, half: usize) -> &[i32] {
        let seg = self.plan.audio_out[half];
        unsafe { std::slice::from_raw_parts(self.words(seg), seg.len / 4) }
    }

    #[cfg(test)]
    pub fn write_cv_in(&mut self, gate: u32) {
        let seg = self.plan.cv_in;
        debug_assert!(seg.len == 4);
        unsafe { std::ptr::write_volatile(self.base.add(seg.offset) as *mut u32, gate) };
    }

    #[cfg(test)]
    pub fn read_cv_out(&self) -> u32 {
        let seg = self.plan.cv_out;
        debug_assert!(seg.len == 4);
        unsafe { std::ptr::read_volatile(self.base.add(seg.offset) as *const u32) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 4096;

    #[test]
    fn native_layout_is_four_halves_plus_gates() {
        let plan = plan(64, 2, Platform::Native);
        let audio = 64 * 2 * 4;
        assert_eq!(plan.audio_in[0].offset, 0);
        assert_eq!(plan.audio_in[1].offset, audio);
        assert_eq!(plan.audio_out[0].offset, 2 * audio);
        assert_eq!(plan.audio_out[1].offset, 3 * audio);
        assert_eq!(plan.cv_out.offset, 4 * audio);
        assert_eq!(plan.cv_in.offset, 4 * audio + 4);
        assert_eq!(plan.total, 4 * audio + 8);
        assert!(plan.fits(region_bytes(PAGE)));
    }

    #[test]
    fn control_layout_places_packets_before_each_half() {
        for platform in [Platform::Async, Platform::Sync] {
            let plan = plan(64, 2, platform);
            for half in 0..2 {
                assert_eq!(
                    plan.rx_pkt[half].offset,
                    plan.device_ctrl_rx[half].end()
                );
                assert_eq!(plan.audio_in[half].offset, plan.rx_pkt[half].end());
                assert_eq!(
                    plan.tx_pkt[half].offset,
                    plan.device_ctrl_tx[half].end()
                );
                assert_eq!(plan.audio_out[half].offset, plan.tx_pkt[half].end());
            }
            assert!(plan.fits(region_bytes(PAGE)));
        }
    }

    #[test]
    fn maximum_geometry_fits_twenty_pages_without_overlap() {
        for platform in [Platform::Native, Platform::Async, Platform::Sync] {
            let plan = plan(512, 8, platform);
            assert!(plan.fits(region_bytes(PAGE)), "{platform:?} plan does not fit");
        }
    }

    #[test]
    fn view_round_trips_audio_and_gates() {
        let plan = plan(8, 2, Platform::Native);
        let mut backing = vec![0i32; plan.total / 4 + 1];
        let mut view = unsafe { RegionView::new(backing.as_mut_ptr() as *mut u8, plan) };

        view.audio_out_mut(1).fill(0x0101_0101);
        assert!(view.audio_in(0).iter().all(|&w| w == 0));
        view.write_cv_out(0xCAFE_F00D);
        assert_eq!(view.read_cv_out(), 0xCAFE_F00D);

        view.audio_in_mut(0).fill(7);
        assert!(view.audio_in(0).iter().all(|&w| w == 7));

        view.zero_audio_out(1);
        assert!(view.audio_out(1).iter().all(|&w| w == 0));
        drop(view);
        assert!(backing.iter().any(|&w| w != 0));
    }
}
