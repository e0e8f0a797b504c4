//! Worker-side interchange.
//!
//! A [`Worker`] lives inside a simulator rank. It registers with the
//! controller at startup, runs one request/response exchange per coupled
//! step, and deregisters at shutdown. Controller discovery is by broadcast:
//! the registration packet goes to every other subworld rank and the one
//! that answers `ack` is remembered for the worker's lifetime.
//!
//! The receive loop never blocks in the transport. It probes, and when
//! nothing is pending sleeps for a uniform 0–500 µs draw before probing
//! again: a pure spin would starve co-located ranks on the same node, while
//! a blocking receive would serialize against the controller's own bulk
//! rendezvous. A `waiting` token resets the deadline; the response budget
//! must not accumulate against another worker's travel time.

use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::comm::Comm;
use crate::error::LinkError;
use crate::protocol::{AtomData, FixData, Packet};

/// Budget for the registration handshake, in milliseconds.
pub const REGISTRATION_TIMEOUT_MS: f64 = 1_000.0;

/// Upper bound of the uniform back-off draw between probes, in microseconds.
const BACKOFF_MAX_US: u64 = 500;

#[derive(Debug)]
pub struct Worker<C: Comm> {
    comm: C,
    controller: usize,
    uid: Option<u64>,
    max_ms: f64,
}

impl<C: Comm> Worker<C> {
    /// Register with the controller, discovering its rank. `max_ms` is the
    /// per-request response budget; zero disables the deadline.
    pub fn register(comm: C, max_ms: f64) -> Result<Self, LinkError> {
        Self::register_within(comm, max_ms, REGISTRATION_TIMEOUT_MS)
    }

    /// Like [`Worker::register`] with an explicit registration budget.
    pub fn register_within(
        comm: C,
        max_ms: f64,
        registration_ms: f64,
    ) -> Result<Self, LinkError> {
        let bytes = Packet::Register { uid: None }.encode()?;
        for rank in 0..comm.size() {
            if rank != comm.rank() {
                comm.send_to(rank, &bytes)?;
            }
        }

        let started = Instant::now();
        let mut rng = rand::thread_rng();
        loop {
            if let Some((source, bytes)) = comm.poll_any()? {
                match Packet::decode(&bytes)? {
                    Packet::Ack { uid } => {
                        info!(controller = source, ?uid, "registered with controller");
                        return Ok(Worker { comm, controller: source, uid, max_ms });
                    }
                    // A peer worker's own broadcast; not for us.
                    Packet::Register { .. } => continue,
                    other => {
                        return Err(LinkError::ProtocolViolation(format!(
                            "got `{}` from rank {source} while awaiting ack",
                            other.kind()
                        )))
                    }
                }
            }
            if started.elapsed().as_secs_f64() * 1e3 > registration_ms {
                return Err(LinkError::RegistrationTimeout(registration_ms));
            }
            backoff(&mut rng);
        }
    }

    /// Subworld rank of the controller discovered at registration.
    pub fn controller(&self) -> usize {
        self.controller
    }

    /// Identifier assigned by the controller, if its ack carried one.
    pub fn uid(&self) -> Option<u64> {
        self.uid
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// One full exchange for a coupled step: ship `atoms`, collect the force
    /// deltas. Returns exactly one delta per atom, in request order.
    pub fn interchange(&mut self, atoms: &[AtomData]) -> Result<Vec<FixData>, LinkError> {
        let request = Packet::Request {
            expect_response: self.max_ms,
            atoms: atoms.to_vec(),
            uid: self.uid,
        };
        self.comm.send_to(self.controller, &request.encode()?)?;

        loop {
            // Each pass re-arms the deadline, so `waiting` buys the
            // controller another full budget.
            match self.await_packet()? {
                Packet::Waiting => {
                    debug!("controller is holding the rendezvous");
                    continue;
                }
                Packet::Response { atoms: fixes, .. } => {
                    if fixes.len() != atoms.len() {
                        return Err(LinkError::LengthMismatch {
                            expected: atoms.len(),
                            got: fixes.len(),
                        });
                    }
                    return Ok(fixes);
                }
                other => {
                    return Err(LinkError::ProtocolViolation(format!(
                        "got `{}` while awaiting response",
                        other.kind()
                    )))
                }
            }
        }
    }

    /// Leave the coupling cleanly. Consumes the worker; the controller drops
    /// its registration on receipt.
    pub fn deregister(self) -> Result<(), LinkError> {
        let bytes = Packet::Deregister { uid: self.uid }.encode()?;
        self.comm.send_to(self.controller, &bytes)?;
        info!(rank = self.comm.rank(), "deregistered");
        Ok(())
    }

    /// Best-effort deregister for fatal paths, so the controller's
    /// termination condition is not left hanging on a dead worker.
    pub fn abandon(&mut self) {
        if let Ok(bytes) = (Packet::Deregister { uid: self.uid }).encode() {
            if let Err(err) = self.comm.send_to(self.controller, &bytes) {
                warn!(%err, "best-effort deregister failed");
            }
        }
    }

    fn await_packet(&self) -> Result<Packet, LinkError> {
        let started = Instant::now();
        let mut rng = rand::thread_rng();
        loop {
            if let Some(bytes) = self.comm.poll_from(self.controller)? {
                return Packet::decode(&bytes);
            }
            if self.max_ms > 0.0 && started.elapsed().as_secs_f64() * 1e3 > self.max_ms {
                return Err(LinkError::Timeout(self.max_ms));
            }
            backoff(&mut rng);
        }
    }
}

fn backoff(rng: &mut impl Rng) {
    thread::sleep(Duration::from_micros(rng.gen_range(0..=BACKOFF_MAX_US)));
}
