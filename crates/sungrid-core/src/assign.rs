//! Panel Assignment Engine.
//!
//! Pure mapping from a detection or simulation result to a per-panel state
//! vector plus aggregate statistics. Hotspots are overlaid last so a
//! hotspot panel can never display as on, even when a result claims the
//! same id in both sets.

use crate::{AggregateStats, PanelState, Result, SungridError};
use std::collections::BTreeSet;

/// A freshly computed state vector with its aggregate counters.
#[derive(Clone, Debug, PartialEq)]
pub struct Assignment {
    pub states: Vec<PanelState>,
    pub stats: AggregateStats,
}

/// Assignment for the detection-only case, before any optimization step:
/// every non-hotspot panel defaults to on, damage 0, efficiency 100.
pub fn assign_detection(total_panels: u32, hotspot_ids: &BTreeSet<u32>) -> Result<Assignment> {
    let states = overlay(
        total_panels,
        PanelState::On,
        &BTreeSet::new(),
        hotspot_ids,
    )?;
    Ok(finish(states, 0.0, 100.0))
}

/// Assignment for one completed simulation step: standby baseline, on ids
/// overlaid, hotspot ids overlaid last.
pub fn assign_step(
    total_panels: u32,
    on_ids: &BTreeSet<u32>,
    hotspot_ids: &BTreeSet<u32>,
    damage_percent: f64,
    efficiency_percent: f64,
) -> Result<Assignment> {
    let states = overlay(total_panels, PanelState::Standby, on_ids, hotspot_ids)?;
    Ok(finish(states, damage_percent, efficiency_percent))
}

fn overlay(
    total_panels: u32,
    baseline: PanelState,
    on_ids: &BTreeSet<u32>,
    hotspot_ids: &BTreeSet<u32>,
) -> Result<Vec<PanelState>> {
    if total_panels == 0 {
        return Err(SungridError::InvalidInput(
            "cannot assign states for zero panels".into(),
        ));
    }
    // Validate before touching the vector so a rejected input leaves no
    // partial result.
    for (name, set) in [("on", on_ids), ("hotspot", hotspot_ids)] {
        for &id in set.iter() {
            if id == 0 || id > total_panels {
                return Err(SungridError::InvalidInput(format!(
                    "{} id {} out of range 1..={}",
                    name, id, total_panels
                )));
            }
        }
    }

    let mut states = vec![baseline; total_panels as usize];
    for &id in on_ids {
        states[(id - 1) as usize] = PanelState::On;
    }
    for &id in hotspot_ids {
        states[(id - 1) as usize] = PanelState::Hotspot;
    }
    Ok(states)
}

fn finish(states: Vec<PanelState>, damage_percent: f64, efficiency_percent: f64) -> Assignment {
    let mut on = 0u32;
    let mut off = 0u32;
    let mut hotspot = 0u32;
    for state in &states {
        match state {
            PanelState::On => on += 1,
            PanelState::Standby => off += 1,
            PanelState::Hotspot => hotspot += 1,
        }
    }
    Assignment {
        states,
        stats: AggregateStats {
            on,
            off,
            hotspot,
            damage_percent,
            efficiency_percent,
        },
    }
}
