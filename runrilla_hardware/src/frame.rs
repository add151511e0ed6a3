//! Wire framing for addressed bar commands.
//!
//! An addressed command is the bar id as two uppercase hex digits, the
//! payload, and a terminating carriage return:
//!
//! ```text
//! 0AV\r          -> "V" (version) to bar 0x0A
//! 01O000001234|  -> zero payload to bar 0x01 (CR appended)
//! ```
//!
//! The update-mode challenge is also sent unaddressed as a broadcast; every
//! bar listening on the line answers it.

use crate::error::{HwError, Result};

/// Carriage return terminating every command.
pub const CR: u8 = b'\r';

/// Challenge string that switches bars into firmware-update mode.
pub const UPDATE_CHALLENGE: &str = "27182818284590452353602874713527\r";

/// Build an addressed command frame for `bar_id`.
pub fn encode(bar_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 3);
    out.extend_from_slice(format!("{bar_id:02X}").as_bytes());
    out.extend_from_slice(payload);
    if payload.last() != Some(&CR) {
        out.push(CR);
    }
    out
}

/// A decoded addressed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub bar_id: u8,
    /// Payload without the trailing CR.
    pub payload: &'a [u8],
}

/// Split an addressed frame into bar id and payload.
pub fn decode(bytes: &[u8]) -> Result<Frame<'_>> {
    let body = bytes.strip_suffix(&[CR]).unwrap_or(bytes);
    if body.len() < 2 {
        return Err(HwError::Frame(format!("frame too short ({} bytes)", bytes.len())));
    }
    let addr = std::str::from_utf8(&body[..2])
        .map_err(|_| HwError::Frame("non-ascii address".into()))?;
    let bar_id = u8::from_str_radix(addr, 16)
        .map_err(|_| HwError::Frame(format!("bad address {addr:?}")))?;
    Ok(Frame {
        bar_id,
        payload: &body[2..],
    })
}

/// True when `bytes` is the bare (unaddressed) update challenge.
pub fn is_broadcast_challenge(bytes: &[u8]) -> bool {
    bytes == UPDATE_CHALLENGE.as_bytes()
}

/// Space-separated uppercase hex dump, e.g. `4F 4B 0D`.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
