//! Plain data shared by the protocol, calibration and flashing layers.
use std::fmt;

/// Channel slots every bar exposes; the mask selects which are fitted.
pub const SLOTS: usize = 4;

/// Stored calibration for one active channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCalibration {
    pub zero: u64,
    pub factor: f32,
    /// Big-endian IEEE-754 bits of `factor`, 8 uppercase hex digits.
    pub factor_hex: String,
}

impl ChannelCalibration {
    pub fn new(zero: u64, factor: f32) -> Self {
        Self {
            zero,
            factor,
            factor_hex: crate::matrix::ieee754_hex(factor),
        }
    }
}

/// One bar on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    /// Protocol address.
    pub id: u8,
    /// Active channel slots, bits 0..=3.
    pub channel_mask: u8,
    /// Per active channel, in slot order. Empty until calibrated.
    pub calibration: Vec<ChannelCalibration>,
}

impl Bar {
    pub fn new(id: u8, channel_mask: u8) -> Self {
        Self {
            id,
            channel_mask,
            calibration: Vec::new(),
        }
    }

    pub fn nlcs(&self) -> usize {
        self.channel_mask.count_ones() as usize
    }

    /// Slot numbers of the active channels, ascending.
    pub fn active_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..SLOTS).filter(move |&s| self.channel_mask & (1 << s) != 0)
    }

    pub fn is_calibrated(&self) -> bool {
        !self.calibration.is_empty()
    }
}

/// Firmware version as reported by `V`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Version {
    pub device_id: u32,
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.device_id, self.major, self.minor)
    }
}

/// Outcome of a write-style command: whether the expected token came back,
/// plus the raw reply for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub accepted: bool,
    pub raw: Vec<u8>,
}

impl Ack {
    pub fn raw_hex(&self) -> String {
        runrilla_hardware::frame::hex_dump(&self.raw)
    }
}
