//! Policy contracts for the controller loop.
//!
//! A policy maps batches of atom state to per-atom force deltas. Two shapes
//! are supported without protocol changes: per-particle policies answer each
//! request in isolation, bulk policies hold every arriving request at a
//! rendezvous (the controller sends `waiting` on their behalf) and release
//! one response per held worker once all registered workers have reported.

use std::collections::BTreeMap;

use crate::protocol::{AtomData, FixData};

/// Requests held at the current rendezvous, keyed by subworld rank. The
/// entry for the rank being dispatched is always present.
pub type PendingMap = BTreeMap<usize, Vec<AtomData>>;

pub enum Verdict {
    /// Answer the dispatched rank now, with one delta per request atom.
    Respond(Vec<FixData>),
    /// Hold the dispatched rank at the rendezvous.
    Wait,
    /// Rendezvous satisfied: answer every held rank, exactly once each.
    Release(BTreeMap<usize, Vec<FixData>>),
}

pub trait Policy {
    /// Decide what to do now that `source`'s request has arrived.
    fn dispatch(&mut self, source: usize, pending: &PendingMap, registered: usize) -> Verdict;
}

/// Zero deltas for every atom. Useful as a wiring check: forces must come
/// back bit-identical to their pre-interchange state.
pub struct NullPolicy;

impl Policy for NullPolicy {
    fn dispatch(&mut self, source: usize, pending: &PendingMap, _registered: usize) -> Verdict {
        let n = pending.get(&source).map_or(0, Vec::len);
        Verdict::Respond(vec![FixData::ZERO; n])
    }
}

/// Per-particle damping: `df = -factor * f` componentwise.
pub struct DampingPolicy {
    factor: f64,
}

impl DampingPolicy {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl Policy for DampingPolicy {
    fn dispatch(&mut self, source: usize, pending: &PendingMap, _registered: usize) -> Verdict {
        let atoms = match pending.get(&source) {
            Some(atoms) => atoms,
            None => return Verdict::Respond(Vec::new()),
        };
        Verdict::Respond(
            atoms
                .iter()
                .map(|atom| FixData {
                    dfx: -self.factor * atom.fx,
                    dfy: -self.factor * atom.fy,
                    dfz: -self.factor * atom.fz,
                })
                .collect(),
        )
    }
}

/// Bulk mean-attraction: once every registered worker has reported, every
/// atom is pulled toward the x–y centroid of the whole batch by a unit
/// vector clamped per component to ±`clamp`. z is left alone.
pub struct CentroidPolicy {
    clamp: f64,
}

impl CentroidPolicy {
    pub fn new(clamp: f64) -> Self {
        Self { clamp }
    }
}

impl Policy for CentroidPolicy {
    fn dispatch(&mut self, _source: usize, pending: &PendingMap, registered: usize) -> Verdict {
        if pending.len() < registered {
            return Verdict::Wait;
        }

        let mut mean_x = 0.0;
        let mut mean_y = 0.0;
        let mut count = 0usize;
        for atoms in pending.values() {
            for atom in atoms {
                mean_x += atom.x;
                mean_y += atom.y;
                count += 1;
            }
        }
        if count > 0 {
            mean_x /= count as f64;
            mean_y /= count as f64;
        }

        let responses = pending
            .iter()
            .map(|(&rank, atoms)| {
                let fixes = atoms
                    .iter()
                    .map(|atom| {
                        let dx = mean_x - atom.x;
                        let dy = mean_y - atom.y;
                        let distance = (dx * dx + dy * dy).sqrt();
                        if distance == 0.0 {
                            return FixData::ZERO;
                        }
                        FixData {
                            dfx: clamp_component(dx / distance, self.clamp),
                            dfy: clamp_component(dy / distance, self.clamp),
                            dfz: 0.0,
                        }
                    })
                    .collect();
                (rank, fixes)
            })
            .collect();
        Verdict::Release(responses)
    }
}

fn clamp_component(value: f64, limit: f64) -> f64 {
    if value.abs() > limit {
        limit.copysign(value)
    } else {
        value
    }
}
