//! Simulated bars answering the same wire protocol as the real firmware.
//!
//! The simulator owns its state behind a shared handle so a caller can keep
//! placing loads (or muting bars) after the bus itself has been handed to a
//! session.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use runrilla_traits::{Bus, BusError};
use tracing::trace;

use crate::error::HwError;
use crate::frame::{self, CR, UPDATE_CHALLENGE};

/// Number of channel slots on every bar.
pub const SLOTS: usize = 4;

#[derive(Debug, Clone)]
pub struct SimBar {
    pub id: u8,
    pub channel_mask: u8,
    /// Reported as `Version <id>.<major>.<minor>`.
    pub version: (u32, u32, u32),
    /// Raw count each slot reads with nothing on it.
    pub raw_zero: [i64; SLOTS],
    /// Weight units per raw count.
    pub sensitivity: [f64; SLOTS],
    /// Weight currently resting on each slot.
    pub load: [f64; SLOTS],
    /// Coefficients stored in firmware (active slots only are meaningful).
    pub stored_zeros: [u64; SLOTS],
    pub stored_factors: [f32; SLOTS],
    pub update_mode: bool,
    /// A muted bar ignores everything on the line.
    pub responsive: bool,
}

impl SimBar {
    pub fn new(id: u8, channel_mask: u8) -> Self {
        let id_f = f64::from(id);
        let mut raw_zero = [0i64; SLOTS];
        let mut sensitivity = [0f64; SLOTS];
        for slot in 0..SLOTS {
            raw_zero[slot] = 100_000 + 5_000 * i64::from(id) + 700 * slot as i64;
            sensitivity[slot] = 0.05 * (1.0 + 0.02 * slot as f64 + 0.01 * id_f);
        }
        Self {
            id,
            channel_mask,
            version: (u32::from(id), 1, 0),
            raw_zero,
            sensitivity,
            load: [0.0; SLOTS],
            stored_zeros: [0; SLOTS],
            stored_factors: [1.0; SLOTS],
            update_mode: false,
            responsive: true,
        }
    }

    fn active_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..SLOTS).filter(move |&s| self.channel_mask & (1 << s) != 0)
    }

    fn raw(&self, slot: usize) -> i64 {
        if self.channel_mask & (1 << slot) == 0 {
            return 0;
        }
        self.raw_zero[slot] + (self.load[slot] / self.sensitivity[slot]).round() as i64
    }
}

struct SimState {
    bars: Vec<SimBar>,
    sample_command: Vec<u8>,
    rx: VecDeque<u8>,
    log: Vec<Vec<u8>>,
}

impl SimState {
    fn respond(&mut self, bytes: &[u8]) -> Vec<u8> {
        if frame::is_broadcast_challenge(bytes) {
            let mut any = false;
            for bar in self.bars.iter_mut().filter(|b| b.responsive) {
                bar.update_mode = true;
                any = true;
            }
            return if any { b"Enter\r\n".to_vec() } else { Vec::new() };
        }
        if bytes == [CR] {
            return Vec::new();
        }
        let Ok(f) = frame::decode(bytes) else {
            return Vec::new();
        };
        let sample_command = self.sample_command.clone();
        let Some(bar) = self
            .bars
            .iter_mut()
            .find(|b| b.id == f.bar_id && b.responsive)
        else {
            return Vec::new();
        };
        let payload = f.payload;
        let challenge = UPDATE_CHALLENGE.trim_end_matches('\r').as_bytes();

        if payload == challenge {
            bar.update_mode = true;
            return b"Enter\r\n".to_vec();
        }
        if payload == b"V" {
            let (id, major, minor) = bar.version;
            return format!("Version {id}.{major}.{minor}\r\n").into_bytes();
        }
        if payload == sample_command.as_slice() {
            let slots: Vec<String> = (0..SLOTS).map(|s| bar.raw(s).to_string()).collect();
            return format!("{}\r\n", slots.join("|")).into_bytes();
        }
        if payload == b"X" {
            let mut out = b"X".to_vec();
            out.extend_from_slice(&1.0f32.to_be_bytes());
            let factors: Vec<f32> = bar.active_slots().map(|s| bar.stored_factors[s]).collect();
            for f in factors {
                out.extend_from_slice(&f.to_be_bytes());
            }
            out.extend_from_slice(b"\r\n");
            return out;
        }
        if payload == b"R" {
            bar.update_mode = false;
            return b"Rebooting\r\n".to_vec();
        }
        match payload.first() {
            Some(b'O') if bar.update_mode => match parse_slots::<u64>(&payload[1..]) {
                Some(values) if values.len() >= SLOTS => {
                    bar.stored_zeros.copy_from_slice(&values[..SLOTS]);
                    b"OK\r\n".to_vec()
                }
                _ => b"ERR\r\n".to_vec(),
            },
            Some(b'X') if bar.update_mode => match parse_slots::<f32>(&payload[1..]) {
                Some(values) if values.len() == SLOTS => {
                    bar.stored_factors.copy_from_slice(&values);
                    b"OK\r\n".to_vec()
                }
                _ => b"ERR\r\n".to_vec(),
            },
            Some(b'O' | b'X') => b"LOCKED\r\n".to_vec(),
            _ => b"?\r\n".to_vec(),
        }
    }
}

fn parse_slots<T: std::str::FromStr>(body: &[u8]) -> Option<Vec<T>> {
    let text = std::str::from_utf8(body).ok()?;
    text.split('|')
        .filter(|s| !s.is_empty())
        .map(|s| s.trim().parse::<T>().ok())
        .collect()
}

/// A set of simulated bars sharing one line.
pub struct SimulatedBars {
    state: Arc<Mutex<SimState>>,
}

/// Side channel into a running simulator.
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBars {
    pub fn new(bars: Vec<SimBar>, sample_command: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                bars,
                sample_command: sample_command.as_bytes().to_vec(),
                rx: VecDeque::new(),
                log: Vec::new(),
            })),
        }
    }

    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: self.state.clone(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>, HwError> {
        self.state
            .lock()
            .map_err(|_| HwError::Serial("simulator state poisoned".into()))
    }
}

impl SimHandle {
    fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> Option<R> {
        self.state.lock().ok().map(|mut s| f(&mut s))
    }

    /// Put `weight` on one slot of one bar (by position in the bar list).
    pub fn set_load(&self, bar_index: usize, slot: usize, weight: f64) {
        self.with(|s| {
            if let Some(bar) = s.bars.get_mut(bar_index)
                && slot < SLOTS
            {
                bar.load[slot] = weight;
            }
        });
    }

    /// Remove every load from every bar.
    pub fn clear_loads(&self) {
        self.with(|s| s.bars.iter_mut().for_each(|b| b.load = [0.0; SLOTS]));
    }

    /// Mute or unmute a bar.
    pub fn set_responsive(&self, bar_index: usize, responsive: bool) {
        self.with(|s| {
            if let Some(bar) = s.bars.get_mut(bar_index) {
                bar.responsive = responsive;
            }
        });
    }

    /// Snapshot of a bar's simulated state.
    pub fn bar(&self, bar_index: usize) -> Option<SimBar> {
        self.with(|s| s.bars.get(bar_index).cloned()).flatten()
    }

    /// Every command written to the line so far.
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.with(|s| s.log.clone()).unwrap_or_default()
    }
}

impl Bus for SimulatedBars {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        let mut state = self.lock()?;
        state.log.push(bytes.to_vec());
        let reply = state.respond(bytes);
        trace!(tx = %frame::hex_dump(bytes), rx = %frame::hex_dump(&reply), "sim exchange");
        state.rx.extend(reply);
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, BusError> {
        let mut state = self.lock()?;
        let n = buf.len().min(state.rx.len());
        for (dst, src) in buf.iter_mut().zip(state.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), BusError> {
        self.lock()?.rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }
}
