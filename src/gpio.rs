//! GPIO sidecar queues.
//!
//! GPIO data rides the audio control packets. The real-time loop drains
//! incoming blobs into `from_rt` and picks outgoing ones from `to_rt`; the
//! socket forwarder that actually talks to the host supervisor lives outside
//! this crate and only ever sees the non-RT handles. The RT side never
//! blocks: a full `from_rt` ring drops the newest payload.

use crate::spsc::{self, Consumer, Producer};

/// One GPIO payload as carried in a control packet.
pub const GPIO_BLOB_BYTES: usize = 24;

/// Queue depth on both directions.
pub const GPIO_QUEUE_CAPACITY: usize = 64;

/// Opaque GPIO payload; the engine forwards it without interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpioDataBlob {
    pub bytes: [u8; GPIO_BLOB_BYTES],
}

impl Default for GpioDataBlob {
    fn default() -> Self {
        Self { bytes: [0; GPIO_BLOB_BYTES] }
    }
}

/// Real-time ends of the two rings. Owned by the RT loop.
pub(crate) struct RtGpioQueues {
    /// Blobs the sidecar wants transmitted to the controller.
    pub to_rt: Consumer<GpioDataBlob>,
    /// Blobs received from the controller, bound for the sidecar.
    pub from_rt: Producer<GpioDataBlob>,
}

/// Non-RT ends, surrendered once to the external socket forwarder.
pub struct GpioSidecarHandles {
    /// Feed blobs towards the real-time loop.
    pub to_rt: Producer<GpioDataBlob>,
    /// Drain blobs the real-time loop received.
    pub from_rt: Consumer<GpioDataBlob>,
}

pub(crate) fn queues() -> (RtGpioQueues, GpioSidecarHandles) {
    let (to_rt_tx, to_rt_rx) = spsc::channel(GPIO_QUEUE_CAPACITY);
    let (from_rt_tx, from_rt_rx) = spsc::channel(GPIO_QUEUE_CAPACITY);
    (
        RtGpioQueues { to_rt: to_rt_rx, from_rt: from_rt_tx },
        GpioSidecarHandles { to_rt: to_rt_tx, from_rt: from_rt_rx },
    )
}
