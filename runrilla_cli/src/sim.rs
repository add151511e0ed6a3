//! Simulated shelf for `--sim` runs.
//!
//! Each calibration placement is mapped onto load-cell loads so the solve is
//! well-posed: the first `bars * nlcs` placements load one cell each, later
//! ones split the weight between two neighbouring cells.

use runrilla_core::types::Bar;
use runrilla_hardware::{SimBar, SimHandle, SimulatedBars};

/// Env var holding `bar,slot,weight` to load once test-mode zeros are taken.
pub const SIM_LOAD_ENV: &str = "RUNRILLA_SIM_LOAD";

pub fn shelf(bars: &[Bar], sample_command: &str) -> (SimulatedBars, SimHandle) {
    let sim = SimulatedBars::new(
        bars.iter()
            .map(|b| SimBar::new(b.id, b.channel_mask))
            .collect(),
        sample_command,
    );
    let handle = sim.handle();
    (sim, handle)
}

/// `(bar_index, slot)` of the flat channel `flat`.
fn cell(bars: &[Bar], nlcs: usize, flat: usize) -> Option<(usize, usize)> {
    let bar_index = flat / nlcs;
    let slot = bars.get(bar_index)?.active_slots().nth(flat % nlcs)?;
    Some((bar_index, slot))
}

/// Clear the shelf and put `weight` down for weight placement `placement`.
pub fn place(handle: &SimHandle, bars: &[Bar], nlcs: usize, placement: usize, weight: f64) {
    handle.clear_loads();
    let cells = bars.len() * nlcs;
    if cells == 0 {
        return;
    }
    let first = placement % cells;
    if placement < cells {
        if let Some((bar, slot)) = cell(bars, nlcs, first) {
            handle.set_load(bar, slot, weight);
        }
        return;
    }
    let second = (first + 1 + placement / cells) % cells;
    for flat in [first, second] {
        if let Some((bar, slot)) = cell(bars, nlcs, flat) {
            handle.set_load(bar, slot, weight / 2.0);
        }
    }
}

/// Parse `bar,slot,weight` (bar is 1-based).
pub fn parse_load(text: &str) -> Option<(usize, usize, f64)> {
    let mut parts = text.split(',').map(str::trim);
    let bar: usize = parts.next()?.parse().ok()?;
    let slot = parts.next()?.parse().ok()?;
    let weight = parts.next()?.parse().ok()?;
    (bar > 0 && parts.next().is_none()).then_some((bar - 1, slot, weight))
}
