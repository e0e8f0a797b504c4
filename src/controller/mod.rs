//! Controller event loop.
//!
//! The controller is a peer process on the coupling subworld. It keeps a
//! count of registered workers, a uid table with recycling, and (for bulk
//! policies) the map of requests held at the current rendezvous. The loop
//! accepts one packet at a time from any source, dispatches by kind, and
//! exits when the registered count returns to zero.

use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, info, warn};

use crate::comm::Comm;
use crate::error::LinkError;
use crate::protocol::Packet;

pub mod policy;
pub use policy::{CentroidPolicy, DampingPolicy, NullPolicy, PendingMap, Policy, Verdict};

pub struct Controller<C: Comm, P: Policy> {
    comm: C,
    policy: P,
    registered: usize,
    next_uid: u64,
    free_uids: VecDeque<u64>,
    pending: PendingMap,
    requests_served: u64,
}

impl<C: Comm, P: Policy> Controller<C, P> {
    pub fn new(comm: C, policy: P) -> Self {
        Controller {
            comm,
            policy,
            registered: 0,
            next_uid: 0,
            free_uids: VecDeque::new(),
            pending: BTreeMap::new(),
            requests_served: 0,
        }
    }

    /// Number of currently registered workers.
    pub fn registered(&self) -> usize {
        self.registered
    }

    /// Run until every registered worker has deregistered. Any protocol or
    /// codec error is fatal: the loop surfaces it and the caller terminates.
    pub fn run(&mut self) -> Result<(), LinkError> {
        info!(rank = self.comm.rank(), "controller accepting registrations");
        loop {
            let (source, bytes) = self.comm.recv_any()?;
            // Only a deregistration can satisfy the termination condition; a
            // stray request seen before any registration must not end the
            // loop while the count is still at its initial zero.
            if self.handle(source, &bytes)? && self.registered == 0 {
                break;
            }
        }
        if !self.pending.is_empty() {
            warn!(held = self.pending.len(), "terminating with requests still held");
        }
        info!(served = self.requests_served, "all workers deregistered");
        Ok(())
    }

    /// Handle one inbound packet. Returns true when it was a deregistration,
    /// the only event that can move the loop toward termination.
    fn handle(&mut self, source: usize, bytes: &[u8]) -> Result<bool, LinkError> {
        match Packet::decode(bytes)? {
            Packet::Register { .. } => {
                let uid = self.assign_uid();
                self.registered += 1;
                info!(source, uid, registered = self.registered, "worker registered");
                self.send(source, &Packet::Ack { uid: Some(uid) })?;
                Ok(false)
            }
            Packet::Deregister { uid } => {
                if self.registered == 0 {
                    return Err(LinkError::ProtocolViolation(format!(
                        "deregister from rank {source} with no workers registered"
                    )));
                }
                self.registered -= 1;
                if let Some(uid) = uid {
                    self.free_uids.push_back(uid);
                }
                info!(source, registered = self.registered, "worker deregistered");
                Ok(true)
            }
            Packet::Request { atoms, uid, .. } => {
                if self.pending.contains_key(&source) {
                    return Err(LinkError::ProtocolViolation(format!(
                        "rank {source} sent a request while one is outstanding"
                    )));
                }
                self.pending.insert(source, atoms);
                let verdict = self.policy.dispatch(source, &self.pending, self.registered);
                self.settle(source, uid, verdict)?;
                Ok(false)
            }
            other => Err(LinkError::ProtocolViolation(format!(
                "inbound `{}` from rank {source}",
                other.kind()
            ))),
        }
    }

    fn settle(&mut self, source: usize, uid: Option<u64>, verdict: Verdict) -> Result<(), LinkError> {
        match verdict {
            Verdict::Respond(fixes) => {
                let atoms = self.pending.remove(&source).ok_or_else(|| {
                    LinkError::ProtocolViolation(format!("no held request for rank {source}"))
                })?;
                if fixes.len() != atoms.len() {
                    return Err(LinkError::LengthMismatch {
                        expected: atoms.len(),
                        got: fixes.len(),
                    });
                }
                self.count_request();
                self.send(source, &Packet::Response { atoms: fixes, uid })
            }
            Verdict::Wait => {
                debug!(source, held = self.pending.len(), "holding at rendezvous");
                self.send(source, &Packet::Waiting)
            }
            Verdict::Release(mut responses) => {
                if responses.len() != self.pending.len()
                    || !self.pending.keys().all(|rank| responses.contains_key(rank))
                {
                    return Err(LinkError::ProtocolViolation(
                        "bulk policy must answer every held request exactly once".into(),
                    ));
                }
                let held = std::mem::take(&mut self.pending);
                for (rank, atoms) in held {
                    let fixes = responses.remove(&rank).ok_or_else(|| {
                        LinkError::ProtocolViolation(format!("no response for rank {rank}"))
                    })?;
                    if fixes.len() != atoms.len() {
                        return Err(LinkError::LengthMismatch {
                            expected: atoms.len(),
                            got: fixes.len(),
                        });
                    }
                    self.count_request();
                    self.send(rank, &Packet::Response { atoms: fixes, uid: None })?;
                }
                Ok(())
            }
        }
    }

    fn send(&self, dest: usize, packet: &Packet) -> Result<(), LinkError> {
        self.comm.send_to(dest, &packet.encode()?)
    }

    // Released uids are recycled, so long runs with worker churn keep
    // identifiers small.
    fn assign_uid(&mut self) -> u64 {
        self.free_uids.pop_front().unwrap_or_else(|| {
            self.next_uid += 1;
            self.next_uid
        })
    }

    fn count_request(&mut self) {
        self.requests_served += 1;
        if self.requests_served % 1000 == 0 {
            debug!(served = self.requests_served, "request count");
        }
    }
}
