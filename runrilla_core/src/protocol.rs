//! Addressed command/response exchanges with the bars.
//!
//! `Protocol` borrows the bus for the length of one operation; callers that
//! share a bus across threads hold its lock for as long as the `Protocol`
//! lives, so exchanges from different operations never interleave.

use std::fmt::Write as _;
use std::time::Duration;

use runrilla_hardware::frame::{self, CR, UPDATE_CHALLENGE};
use runrilla_hardware::util::{INTER_BYTE_GAP, collect_response};
use runrilla_traits::Bus;
use tracing::{debug, trace};

use crate::error::{Result, RunrillaError};
use crate::factors::decode_factors;
use crate::hw_error::bus_report;
use crate::types::{Ack, Bar, SLOTS, Version};
use crate::util::common_channel_count;

/// Default per-call read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(200);
/// Timeout for the factor read.
pub const FACTOR_TIMEOUT: Duration = Duration::from_millis(300);
/// Timeout for the unaddressed update-mode challenge.
pub const BROADCAST_TIMEOUT: Duration = Duration::from_millis(1000);
/// Timeout for the addressed ready probe during flashing.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(400);
/// How long the line is drained after priming.
pub const PRIME_DRAIN: Duration = Duration::from_millis(50);

pub struct Protocol<'a> {
    bus: &'a mut dyn Bus,
    bars: &'a [Bar],
    nlcs: usize,
    sample_command: &'a str,
}

impl<'a> Protocol<'a> {
    /// Wrap `bus` for the given bars; fails if the bars disagree on channel count.
    pub fn new(bus: &'a mut dyn Bus, bars: &'a [Bar], sample_command: &'a str) -> Result<Self> {
        let nlcs = common_channel_count(bars)?;
        Ok(Self {
            bus,
            bars,
            nlcs,
            sample_command,
        })
    }

    pub const fn bars(&self) -> &'a [Bar] {
        self.bars
    }

    pub const fn nlcs(&self) -> usize {
        self.nlcs
    }

    pub fn bar(&self, bar_index: usize) -> Result<&'a Bar> {
        self.bars.get(bar_index).ok_or_else(|| {
            eyre::Report::new(RunrillaError::InvalidArgument(format!(
                "bar index {bar_index} out of range ({} bars)",
                self.bars.len()
            )))
        })
    }

    fn exchange(&mut self, bytes: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.bus.clear_input().map_err(bus_report)?;
        self.bus.write_all(bytes).map_err(bus_report)?;
        let reply = collect_response(&mut *self.bus, timeout, INTER_BYTE_GAP).map_err(bus_report)?;
        trace!(
            bus = self.bus.name(),
            tx = %frame::hex_dump(bytes),
            rx = %frame::hex_dump(&reply),
            "exchange"
        );
        Ok(reply)
    }

    /// Send `payload` to `bar_id` and collect the reply until `timeout`.
    ///
    /// Silence is an empty reply, not an error; only transport failures err.
    pub fn send_and_await(&mut self, bar_id: u8, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.exchange(&frame::encode(bar_id, payload), timeout)
    }

    /// Send raw bytes with no address and collect whatever answers.
    pub fn broadcast(&mut self, bytes: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        self.exchange(bytes, timeout)
    }

    pub fn get_version(&mut self, bar_index: usize) -> Result<Version> {
        let bar = self.bar(bar_index)?;
        let reply = self.send_and_await(bar.id, b"V", DEFAULT_TIMEOUT)?;
        let text = String::from_utf8_lossy(&reply);
        let version = parse_version(&text).map_err(|e| match e {
            VersionParse::Missing => RunrillaError::VersionProbeFailure {
                bar_index,
                reason: format!("no version in reply [{}]", frame::hex_dump(&reply)),
            },
            VersionParse::Malformed(raw) => RunrillaError::InvalidVersionFormat { bar_index, raw },
        })?;
        debug!(bar = bar.id, %version, "version");
        Ok(version)
    }

    /// Raw ADC counts for the active channels of one bar.
    ///
    /// An unparseable or empty reply is an empty reading; transport errors
    /// still propagate.
    pub fn get_raw_channels(&mut self, bar_index: usize) -> Result<Vec<i64>> {
        let bar = self.bar(bar_index)?;
        let payload = self.sample_command.as_bytes();
        let reply = self.send_and_await(bar.id, payload, DEFAULT_TIMEOUT)?;
        let echo = frame::encode(bar.id, payload);
        Ok(parse_raw_channels(&reply, &echo, payload, bar.channel_mask, self.nlcs).unwrap_or_default())
    }

    /// Factors currently stored on the bar (`X`), one per active channel.
    pub fn read_factors(&mut self, bar_index: usize) -> Result<Vec<f64>> {
        let bar = self.bar(bar_index)?;
        let reply = self.send_and_await(bar.id, b"X", FACTOR_TIMEOUT)?;
        decode_factors(&reply, self.nlcs).ok_or_else(|| {
            eyre::Report::new(RunrillaError::NoValidFactors {
                bar_index,
                raw_hex: frame::hex_dump(&reply),
            })
        })
    }

    /// Write per-channel zeros plus the weighted zero average. Needs `OK`.
    pub fn write_zeros(&mut self, bar_index: usize, zeros: &[u64], total: u64) -> Result<Ack> {
        let bar = self.bar(bar_index)?;
        let payload = zero_payload(bar.channel_mask, zeros, total);
        self.expect(bar.id, &payload, DEFAULT_TIMEOUT, "OK")
    }

    /// Write per-channel factors. Needs `OK`.
    pub fn write_factors(&mut self, bar_index: usize, factors: &[f32]) -> Result<Ack> {
        let bar = self.bar(bar_index)?;
        let payload = factor_payload(bar.channel_mask, factors);
        self.expect(bar.id, &payload, DEFAULT_TIMEOUT, "OK")
    }

    /// Broadcast the update-mode challenge. Needs `Enter`.
    pub fn enter_update_mode(&mut self) -> Result<Ack> {
        let raw = self.broadcast(UPDATE_CHALLENGE.as_bytes(), BROADCAST_TIMEOUT)?;
        Ok(Ack {
            accepted: contains(&raw, "Enter"),
            raw,
        })
    }

    /// Addressed update-mode challenge for one bar. Needs `Enter`.
    pub fn probe_update_mode(&mut self, bar_index: usize) -> Result<Ack> {
        let bar = self.bar(bar_index)?;
        self.expect(bar.id, UPDATE_CHALLENGE.as_bytes(), PROBE_TIMEOUT, "Enter")
    }

    /// Ask a bar to restart. Needs `Rebooting`.
    pub fn reboot(&mut self, bar_index: usize) -> Result<Ack> {
        let bar = self.bar(bar_index)?;
        self.expect(bar.id, b"R", DEFAULT_TIMEOUT, "Rebooting")
    }

    /// Push a lone CR through the bootloaders and discard what comes back.
    pub fn prime(&mut self) -> Result<()> {
        let drained = self.broadcast(&[CR], PRIME_DRAIN)?;
        trace!(len = drained.len(), "primed");
        Ok(())
    }

    fn expect(&mut self, bar_id: u8, payload: &[u8], timeout: Duration, token: &str) -> Result<Ack> {
        let raw = self.send_and_await(bar_id, payload, timeout)?;
        Ok(Ack {
            accepted: contains(&raw, token),
            raw,
        })
    }
}

fn contains(haystack: &[u8], token: &str) -> bool {
    haystack
        .windows(token.len())
        .any(|w| w == token.as_bytes())
}

#[derive(Debug, PartialEq, Eq)]
pub enum VersionParse {
    /// No `Version ` token in the reply.
    Missing,
    /// Token present but fewer than three dotted parts follow it.
    Malformed(String),
}

/// Parse `... Version <id>.<major>.<minor>`; non-numeric parts read as 0.
pub fn parse_version(reply: &str) -> std::result::Result<Version, VersionParse> {
    const TOKEN: &str = "Version ";
    let start = reply.find(TOKEN).ok_or(VersionParse::Missing)?;
    let rest = reply[start + TOKEN.len()..].trim();
    let parts: Vec<&str> = rest.split('.').collect();
    if parts.len() < 3 {
        return Err(VersionParse::Malformed(rest.to_string()));
    }
    let num = |s: &str| s.trim().parse::<u32>().unwrap_or(0);
    Ok(Version {
        device_id: num(parts[0]),
        major: num(parts[1]),
        minor: num(parts[2]),
    })
}

/// Parse the reply to the sampling command.
///
/// Integers may be separated by `|`, `,`, `;` or whitespace and may follow
/// an echo of the frame (`01A`) or of the bare command (`A`). Four values
/// are one per slot and are filtered by `mask`; exactly `nlcs` values are
/// taken as they are. Anything else is `None`.
pub fn parse_raw_channels(reply: &[u8], frame_echo: &[u8], command: &[u8], mask: u8, nlcs: usize) -> Option<Vec<i64>> {
    let text = std::str::from_utf8(reply).ok()?;
    let mut body = text.trim();
    for echo in [frame_echo, command] {
        let echo = std::str::from_utf8(echo).ok()?.trim_end_matches('\r');
        if !echo.is_empty()
            && let Some(rest) = body.strip_prefix(echo)
        {
            body = rest;
            break;
        }
    }
    let values = body
        .split(|c: char| matches!(c, '|' | ',' | ';') || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().ok())
        .collect::<Option<Vec<i64>>>()?;
    if values.len() == SLOTS {
        return Some(
            (0..SLOTS)
                .filter(|&s| mask & (1 << s) != 0)
                .map(|s| values[s])
                .collect(),
        );
    }
    (values.len() == nlcs && nlcs > 0).then_some(values)
}

/// `O` + per-slot zero (`{:09}|`, `000000000|` when inactive) + average.
pub fn zero_payload(mask: u8, zeros: &[u64], total: u64) -> Vec<u8> {
    let mut out = String::from("O");
    let mut active = zeros.iter();
    for slot in 0..SLOTS {
        let value = if mask & (1 << slot) != 0 {
            active.next().copied().unwrap_or(0)
        } else {
            0
        };
        let _ = write!(out, "{value:09}|");
    }
    let _ = write!(out, "{total:09}|");
    out.into_bytes()
}

/// `X` + per-slot factor (`{:.10}|`, `1.0000000000|` when inactive).
pub fn factor_payload(mask: u8, factors: &[f32]) -> Vec<u8> {
    let mut out = String::from("X");
    let mut active = factors.iter();
    for slot in 0..SLOTS {
        let value = if mask & (1 << slot) != 0 {
            active.next().copied().unwrap_or(1.0)
        } else {
            1.0
        };
        let _ = write!(out, "{:.10}|", f64::from(value));
    }
    out.into_bytes()
}
