//! Kernel driver interface: device node, ioctls, parameter discovery, the
//! mapped buffer window and the control-packet codec.

use std::fs::File;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::libc;

pub(crate) mod consts;
pub(crate) mod ioctl;
pub(crate) mod layout;
pub(crate) mod packet;
pub(crate) mod params;

pub use ioctl::{GPIO_DIR_INPUT, GPIO_DIR_OUTPUT};
pub use params::{AudioConfig, Platform};

use crate::error::{Error, Result};

fn device_path() -> PathBuf {
    match std::env::var(consts::DEVICE_ENV) {
        Ok(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(consts::DEVICE_PATH),
    }
}

/// Open handle on the real-time device node. Closing the file releases the
/// driver session.
#[derive(Debug)]
pub(crate) struct Device {
    file: File,
}

impl Device {
    pub fn open() -> Result<Self> {
        let path = device_path();
        let file = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::DeviceOpen(Errno::from_raw(e.raw_os_error().unwrap_or(0))))?;
        Ok(Self { file })
    }

    pub fn fd(&self) -> i32 {
        self.file.as_raw_fd()
    }

    /// Blocks until the next period interrupt; returns the half-buffer index
    /// now owned by userspace.
    pub fn irq_wait(&self) -> std::result::Result<usize, Errno> {
        let index = unsafe { ioctl::audio_irq_wait(self.fd()) }?;
        Ok((index & 1) as usize)
    }

    pub fn proc_start(&self) -> std::result::Result<(), Errno> {
        unsafe { ioctl::audio_proc_start(self.fd()) }.map(|_| ())
    }

    /// Acknowledges the period. `correction_ns` is only meaningful on SYNC
    /// platforms; everyone else passes zero.
    pub fn userproc_finished(&self, correction_ns: i64) -> std::result::Result<(), Errno> {
        let payload: libc::c_longlong = correction_ns;
        unsafe { ioctl::audio_userproc_finished(self.fd(), &payload) }.map(|_| ())
    }

    pub fn proc_stop(&self) -> std::result::Result<(), Errno> {
        unsafe { ioctl::audio_proc_stop(self.fd()) }.map(|_| ())
    }

    pub fn set_gpio_pin(&self, pin: u32, direction: u32, value: u32) -> Result<()> {
        let record = ioctl::GpioPinConfig { pin, direction, value };
        unsafe { ioctl::audio_gpio_pin_cfg(self.fd(), &record) }
            .map(|_| ())
            .map_err(Error::GpioConfig)
    }
}

/// The driver's 20-page buffer window, mapped shared. Owned by the engine
/// from mmap to munmap; the real-time thread only ever holds a bound
/// [`layout::RegionView`] into it.
#[derive(Debug)]
pub(crate) struct MappedRegion {
    base: *mut libc::c_void,
    len: usize,
}

unsafe impl Send for MappedRegion {}

impl MappedRegion {
    pub fn map(device: &Device) -> Result<Self> {
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page <= 0 {
            return Err(Error::Mmap(Errno::EINVAL));
        }
        let len = layout::region_bytes(page as usize);
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                device.fd(),
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(Error::Mmap(Errno::last()));
        }
        Ok(Self { base, len })
    }

    pub fn view(&self, plan: layout::RegionPlan) -> Result<layout::RegionView> {
        if !plan.fits(self.len) {
            return Err(Error::Mmap(Errno::EOVERFLOW));
        }
        // SAFETY: the mapping spans `len` writable bytes and stays alive
        // until the engine drops this region, which happens after the
        // real-time thread is joined.
        Ok(unsafe { layout::RegionView::new(self.base as *mut u8, plan) })
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if !self.base.is_null() {
            unsafe {
                let _ = libc::munmap(self.base, self.len);
            }
            self.base = std::ptr::null_mut();
        }
    }
}
