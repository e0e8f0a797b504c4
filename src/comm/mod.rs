//! Byte transport over the coupling subworld.
//!
//! [`Comm`] is the seam between protocol logic and message passing: workers
//! and the controller are generic over it. The MPI implementation lives in
//! [`mpi_comm`] behind the `mpi` feature; [`local_comm`] provides an
//! in-process world with the same semantics for tests and single-node runs.
//! Every implementation must preserve per-pair FIFO ordering; message tags
//! are unconstrained because the packet kind travels in the payload.

use crate::error::LinkError;

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    /// Deliver one framed packet to `dest`.
    fn send_to(&self, dest: usize, bytes: &[u8]) -> Result<(), LinkError>;
    /// Non-blocking: take the next pending message from `source`, if any.
    fn poll_from(&self, source: usize) -> Result<Option<Vec<u8>>, LinkError>;
    /// Non-blocking: take the next pending message from any source.
    fn poll_any(&self) -> Result<Option<(usize, Vec<u8>)>, LinkError>;
    /// Blocking: wait for the next message from any source.
    fn recv_any(&self) -> Result<(usize, Vec<u8>), LinkError>;
}

pub mod local_comm;
pub use local_comm::LocalComm;

#[cfg(feature = "mpi")]
pub mod mpi_comm;
#[cfg(feature = "mpi")]
pub use mpi_comm::{MpiComm, COUPLING_COLOR, SIMULATOR_COLOR};
