use nix::libc;

/// (pin, direction, value) record for `GPIO_PIN_CFG`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct GpioPinConfig {
    pub pin: libc::c_uint,
    pub direction: libc::c_uint,
    pub value: libc::c_uint,
}

pub const GPIO_DIR_INPUT: u32 = 0;
pub const GPIO_DIR_OUTPUT: u32 = 1;

const AUDIO_IOC_MAGIC: u8 = b'A';
const AUDIO_IRQ_WAIT: u8 = 1;
const AUDIO_PROC_START: u8 = 2;
const AUDIO_USERPROC_FINISHED: u8 = 3;
const AUDIO_PROC_STOP: u8 = 4;
const AUDIO_GPIO_PIN_CFG: u8 = 5;

// IRQ_WAIT blocks until the next period interrupt; the ioctl return value is
// the half-buffer index now owned by userspace.
nix::ioctl_none!(audio_irq_wait, AUDIO_IOC_MAGIC, AUDIO_IRQ_WAIT);
nix::ioctl_none!(audio_proc_start, AUDIO_IOC_MAGIC, AUDIO_PROC_START);
nix::ioctl_write_ptr!(
    audio_userproc_finished,
    AUDIO_IOC_MAGIC,
    AUDIO_USERPROC_FINISHED,
    libc::c_longlong
);
nix::ioctl_none!(audio_proc_stop, AUDIO_IOC_MAGIC, AUDIO_PROC_STOP);
nix::ioctl_write_ptr!(
    audio_gpio_pin_cfg,
    AUDIO_IOC_MAGIC,
    AUDIO_GPIO_PIN_CFG,
    GpioPinConfig
);
