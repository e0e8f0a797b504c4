//! Per-step glue between the host simulator and the worker.
//!
//! [`CouplingFix`] owns the registered [`Worker`] and drives it from the
//! host's post-force callback: gather the locally owned atoms selected by
//! the group mask, interchange, and add the returned deltas to the host
//! force array. Deltas only ever accumulate; forces are never overwritten.

use tracing::debug;

use crate::comm::Comm;
use crate::config::FixOptions;
use crate::error::LinkError;
use crate::protocol::AtomData;
use crate::worker::Worker;

/// Borrowed view of the host's per-atom arrays for the local owned atoms.
/// `mask` and the fix's group bit select which atoms participate; hosts with
/// dipole support expose `mu` and the orientations ride along on the wire.
pub struct AtomView<'a> {
    pub x: &'a [[f64; 3]],
    pub v: &'a [[f64; 3]],
    pub f: &'a mut [[f64; 3]],
    pub mask: &'a [u32],
    pub mu: Option<&'a [[f64; 3]]>,
}

pub struct CouplingFix<C: Comm> {
    worker: Option<Worker<C>>,
    every: u32,
    counter: u32,
    groupbit: u32,
}

impl<C: Comm> CouplingFix<C> {
    /// Register with the controller and arm the per-step stride.
    pub fn register(comm: C, options: &FixOptions, groupbit: u32) -> Result<Self, LinkError> {
        let worker = Worker::register(comm, options.max_delay_ms)?;
        Ok(CouplingFix { worker: Some(worker), every: options.every, counter: 0, groupbit })
    }

    /// Host post-force callback. Interchanges on every `every`-th call;
    /// intermediate steps return immediately.
    pub fn post_force(&mut self, atoms: AtomView<'_>) -> Result<(), LinkError> {
        self.counter += 1;
        if self.counter < self.every {
            return Ok(());
        }
        self.counter = 0;

        let selected: Vec<usize> = (0..atoms.mask.len())
            .filter(|&i| atoms.mask[i] & self.groupbit != 0)
            .collect();
        let batch: Vec<AtomData> = selected
            .iter()
            .map(|&i| {
                let atom = AtomData::from_rows(atoms.x[i], atoms.v[i], atoms.f[i]);
                match atoms.mu {
                    Some(mu) => atom.with_dipole(mu[i]),
                    None => atom,
                }
            })
            .collect();

        let worker = self.worker.as_mut().ok_or_else(|| {
            LinkError::ProtocolViolation("coupling fix already shut down".into())
        })?;
        let fixes = match worker.interchange(&batch) {
            Ok(fixes) => fixes,
            Err(err) => {
                // Tell the controller this worker is gone before the host
                // unwinds, so its termination condition cannot hang.
                if let Some(mut dead) = self.worker.take() {
                    dead.abandon();
                }
                return Err(err);
            }
        };

        for (&i, fix) in selected.iter().zip(&fixes) {
            atoms.f[i][0] += fix.dfx;
            atoms.f[i][1] += fix.dfy;
            atoms.f[i][2] += fix.dfz;
        }
        debug!(atoms = selected.len(), "applied force deltas");
        Ok(())
    }

    /// Clean shutdown: deregister once. Subsequent calls are no-ops.
    pub fn finish(&mut self) -> Result<(), LinkError> {
        match self.worker.take() {
            Some(worker) => worker.deregister(),
            None => Ok(()),
        }
    }
}

impl<C: Comm> Drop for CouplingFix<C> {
    fn drop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.abandon();
        }
    }
}
