//! Per-atom values exchanged between worker and controller.

use serde::{Deserialize, Serialize};

/// One selected atom as seen by the worker: position, velocity and the force
/// accumulated so far this step, all IEEE-754 doubles. Dipole-bearing hosts
/// set the `is_dipole` flag and the orientation components; those keys
/// appear on the wire only when set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AtomData {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
    pub fx: f64,
    pub fy: f64,
    pub fz: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_dipole: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muz: Option<f64>,
}

impl AtomData {
    /// Build from the host's per-atom rows.
    pub fn from_rows(x: [f64; 3], v: [f64; 3], f: [f64; 3]) -> Self {
        Self {
            x: x[0],
            y: x[1],
            z: x[2],
            vx: v[0],
            vy: v[1],
            vz: v[2],
            fx: f[0],
            fy: f[1],
            fz: f[2],
            is_dipole: None,
            mux: None,
            muy: None,
            muz: None,
        }
    }

    pub fn with_dipole(mut self, mu: [f64; 3]) -> Self {
        self.is_dipole = Some(true);
        self.mux = Some(mu[0]);
        self.muy = Some(mu[1]);
        self.muz = Some(mu[2]);
        self
    }

    /// Dipole orientation, when the flag is set and every component came
    /// across the wire.
    pub fn dipole(&self) -> Option<[f64; 3]> {
        if self.is_dipole != Some(true) {
            return None;
        }
        Some([self.mux?, self.muy?, self.muz?])
    }
}

/// One additive force correction, positionally matched to the request atom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixData {
    pub dfx: f64,
    pub dfy: f64,
    pub dfz: f64,
}

impl FixData {
    pub const ZERO: FixData = FixData { dfx: 0.0, dfy: 0.0, dfz: 0.0 };
}
