//! Audio control packet codec.
//!
//! On ASYNC and SYNC platforms every audio half-buffer is preceded by a
//! fixed 112-byte control packet exchanged with the controller firmware, and
//! in front of that a larger opaque slot the driver itself owns (of which
//! the engine only reads the status header at open). All multi-byte fields
//! are little-endian on the wire.
//!
//! Layout:
//!
//! ```text
//! 0        2     3     4        8        12       16             112
//! | magic  | cmd | sub | seq    | t_err  | gate   | payload       |
//! ```

#![allow(dead_code)]

use byteorder::{ByteOrder, LittleEndian};

use crate::gpio::{GpioDataBlob, GPIO_BLOB_BYTES};
use crate::spsc::Consumer;

pub(crate) const PKT_BYTES: usize = 112;
pub(crate) const PKT_MAGIC: [u8; 2] = *b"ca";

const OFF_CMD: usize = 2;
const OFF_SUB: usize = 3;
const OFF_SEQ: usize = 4;
const OFF_TIMING_ERROR: usize = 8;
const OFF_GATE: usize = 12;
const OFF_PAYLOAD: usize = 16;
const PAYLOAD_BYTES: usize = PKT_BYTES - OFF_PAYLOAD;

pub(crate) const CMD_NULL: u8 = 0;
pub(crate) const CMD_GPIO: u8 = 1;
pub(crate) const CMD_MIDI: u8 = 2;
pub(crate) const CMD_CEASE: u8 = 3;

/// GPIO blobs one packet can carry.
pub(crate) const MAX_GPIO_BLOBS: usize = PAYLOAD_BYTES / GPIO_BLOB_BYTES;

/// What an incoming packet carries, classified. Fixed-size so parsing never
/// allocates on the real-time path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PacketContent {
    Empty,
    Gpio { blobs: [GpioDataBlob; MAX_GPIO_BLOBS], count: usize },
    /// Opaque MIDI bytes; the engine only forwards the count.
    Midi { bytes: usize },
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ParsedPacket {
    pub seq: u32,
    pub timing_error_ns: i32,
    pub cv_gate: u32,
    pub content: PacketContent,
}

/// Parses an incoming packet. `None` means the magic was absent and the
/// packet is to be ignored.
pub(crate) fn parse(raw: &[u8]) -> Option<ParsedPacket> {
    if raw.len() < PKT_BYTES || raw[0..2] != PKT_MAGIC {
        return None;
    }
    let sub = raw[OFF_SUB] as usize;
    let content = match raw[OFF_CMD] {
        CMD_GPIO => {
            let count = sub.min(MAX_GPIO_BLOBS);
            let mut blobs = [GpioDataBlob::default(); MAX_GPIO_BLOBS];
            for (i, blob) in blobs.iter_mut().enumerate().take(count) {
                let start = OFF_PAYLOAD + i * GPIO_BLOB_BYTES;
                blob.bytes.copy_from_slice(&raw[start..start + GPIO_BLOB_BYTES]);
            }
            PacketContent::Gpio { blobs, count }
        }
        CMD_MIDI => PacketContent::Midi { bytes: sub.min(PAYLOAD_BYTES) },
        _ => PacketContent::Empty,
    };
    Some(ParsedPacket {
        seq: LittleEndian::read_u32(&raw[OFF_SEQ..OFF_SEQ + 4]),
        timing_error_ns: LittleEndian::read_i32(&raw[OFF_TIMING_ERROR..OFF_TIMING_ERROR + 4]),
        cv_gate: LittleEndian::read_u32(&raw[OFF_GATE..OFF_GATE + 4]),
        content,
    })
}

/// The SYNC loop reads only this field during settling.
pub(crate) fn read_timing_error(raw: &[u8]) -> i32 {
    LittleEndian::read_i32(&raw[OFF_TIMING_ERROR..OFF_TIMING_ERROR + 4])
}

pub(crate) fn read_gate(raw: &[u8]) -> u32 {
    LittleEndian::read_u32(&raw[OFF_GATE..OFF_GATE + 4])
}

pub(crate) fn set_gate(raw: &mut [u8], gate: u32) {
    LittleEndian::write_u32(&mut raw[OFF_GATE..OFF_GATE + 4], gate);
}

pub(crate) fn is_cease(raw: &[u8]) -> bool {
    raw.len() >= PKT_BYTES && raw[0..2] == PKT_MAGIC && raw[OFF_CMD] == CMD_CEASE
}

fn write_header(raw: &mut [u8], cmd: u8, sub: u8, seq: u32) {
    raw[0..2].copy_from_slice(&PKT_MAGIC);
    raw[OFF_CMD] = cmd;
    raw[OFF_SUB] = sub;
    LittleEndian::write_u32(&mut raw[OFF_SEQ..OFF_SEQ + 4], seq);
    LittleEndian::write_i32(&mut raw[OFF_TIMING_ERROR..OFF_TIMING_ERROR + 4], 0);
    LittleEndian::write_u32(&mut raw[OFF_GATE..OFF_GATE + 4], 0);
    raw[OFF_PAYLOAD..PKT_BYTES].fill(0);
}

/// Null command carrying only the sequence number.
pub(crate) fn build_default(raw: &mut [u8], seq: u32) {
    write_header(raw, CMD_NULL, 0, seq);
}

/// Tells the controller to mute and stop; emitted at least once during
/// teardown.
pub(crate) fn build_cease(raw: &mut [u8], seq: u32) {
    write_header(raw, CMD_CEASE, 0, seq);
}

/// Drains up to [`MAX_GPIO_BLOBS`] blobs from the RT-bound ring into the
/// payload. Returns the number of blobs written; zero degrades to a default
/// packet.
pub(crate) fn build_gpio(raw: &mut [u8], seq: u32, queue: &mut Consumer<GpioDataBlob>) -> usize {
    write_header(raw, CMD_GPIO, 0, seq);
    let mut count = 0;
    while count < MAX_GPIO_BLOBS {
        match queue.pop() {
            Some(blob) => {
                let start = OFF_PAYLOAD + count * GPIO_BLOB_BYTES;
                raw[start..start + GPIO_BLOB_BYTES].copy_from_slice(&blob.bytes);
                count += 1;
            }
            None => break,
        }
    }
    if count == 0 {
        raw[OFF_CMD] = CMD_NULL;
    }
    raw[OFF_SUB] = count as u8;
    count
}

/// Only the driver side fills this field; tests standing in for it too.
#[cfg(test)]
pub(crate) fn write_timing_error(raw: &mut [u8], error_ns: i32) {
    LittleEndian::write_i32(&mut raw[OFF_TIMING_ERROR..OFF_TIMING_ERROR + 4], error_ns);
}

/// Status header at the front of the driver's device-control slot, filled by
/// the controller firmware before the data path is armed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeviceStatus {
    pub active: bool,
    pub fw_major: u16,
    pub fw_minor: u16,
}

const DEVICE_MAGIC: u32 = 0x3143_4443; // "CDC1"
const DEV_OFF_STATUS: usize = 4;
const DEV_OFF_FW_MAJOR: usize = 8;
const DEV_OFF_FW_MINOR: usize = 10;
const DEV_STATUS_ACTIVE: u32 = 1;

/// `None` when the slot does not carry the firmware magic, meaning the
/// controller never came up.
pub(crate) fn parse_device_status(raw: &[u8]) -> Option<DeviceStatus> {
    if raw.len() < 12 || LittleEndian::read_u32(&raw[0..4]) != DEVICE_MAGIC {
        return None;
    }
    Some(DeviceStatus {
        active: LittleEndian::read_u32(&raw[DEV_OFF_STATUS..DEV_OFF_STATUS + 4])
            == DEV_STATUS_ACTIVE,
        fw_major: LittleEndian::read_u16(&raw[DEV_OFF_FW_MAJOR..DEV_OFF_FW_MAJOR + 2]),
        fw_minor: LittleEndian::read_u16(&raw[DEV_OFF_FW_MINOR..DEV_OFF_FW_MINOR + 2]),
    })
}

#[cfg(test)]
pub(crate) fn write_device_status(raw: &mut [u8], active: bool, fw_major: u16, fw_minor: u16) {
    LittleEndian::write_u32(&mut raw[0..4], DEVICE_MAGIC);
    LittleEndian::write_u32(
        &mut raw[DEV_OFF_STATUS..DEV_OFF_STATUS + 4],
        if active { DEV_STATUS_ACTIVE } else { 0 },
    );
    LittleEndian::write_u16(&mut raw[DEV_OFF_FW_MAJOR..DEV_OFF_FW_MAJOR + 2], fw_major);
    LittleEndian::write_u16(&mut raw[DEV_OFF_FW_MINOR..DEV_OFF_FW_MINOR + 2], fw_minor);
}
