// MPI subworld construction and byte transport (feature "mpi")

use mpi::topology::{Color, SimpleCommunicator};
use mpi::traits::*;

use crate::comm::Comm;
use crate::error::LinkError;

/// Rendezvous color every coupling participant passes to the subworld split.
pub const COUPLING_COLOR: i32 = 56789;
/// Color simulator ranks pass to the first split for their internal traffic.
pub const SIMULATOR_COLOR: i32 = 0;

/// Coupling subworld endpoint backed by a derived MPI communicator.
///
/// Construction is collective: every rank of the shared world must call
/// [`MpiComm::split_worker`] or [`MpiComm::split_controller`] at the same
/// time, each performing the same two splits. The first split separates
/// simulator-internal traffic from the controller; the second, keyed on
/// [`COUPLING_COLOR`], yields the communicator all coupling packets use.
/// Membership is fixed for the life of the subworld.
pub struct MpiComm {
    comm: SimpleCommunicator,
    rank: usize,
    size: usize,
}

impl MpiComm {
    /// Split called on simulator ranks. Returns the simulator-internal
    /// communicator alongside the coupling endpoint.
    pub fn split_worker(
        world: &SimpleCommunicator,
    ) -> Result<(SimpleCommunicator, Self), LinkError> {
        let simulator = world
            .split_by_color(Color::with_value(SIMULATOR_COLOR))
            .ok_or_else(|| LinkError::Transport("simulator split yielded no communicator".into()))?;
        Ok((simulator, Self::coupling_split(world)?))
    }

    /// Split called on the controller rank. The first split only keeps the
    /// collective call count aligned with the workers; its communicator is
    /// released immediately.
    pub fn split_controller(world: &SimpleCommunicator) -> Result<Self, LinkError> {
        let _alignment = world.split_by_color(Color::with_value(COUPLING_COLOR));
        Self::coupling_split(world)
    }

    fn coupling_split(world: &SimpleCommunicator) -> Result<Self, LinkError> {
        let comm = world
            .split_by_color(Color::with_value(COUPLING_COLOR))
            .ok_or_else(|| LinkError::Transport("coupling split yielded no communicator".into()))?;
        let rank = comm.rank() as usize;
        let size = comm.size() as usize;
        Ok(MpiComm { comm, rank, size })
    }
}

impl Comm for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_to(&self, dest: usize, bytes: &[u8]) -> Result<(), LinkError> {
        if dest >= self.size {
            return Err(LinkError::Transport(format!(
                "no rank {dest} in a subworld of {}",
                self.size
            )));
        }
        self.comm.process_at_rank(dest as i32).send(bytes);
        Ok(())
    }

    fn poll_from(&self, source: usize) -> Result<Option<Vec<u8>>, LinkError> {
        // A matched probe reports the pending length, so the receive buffer
        // is sized exactly; the protocol has no maximum packet size.
        match self
            .comm
            .process_at_rank(source as i32)
            .immediate_matched_probe()
        {
            Some((message, _status)) => {
                let (bytes, _status) = message.matched_receive_vec::<u8>();
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    fn poll_any(&self) -> Result<Option<(usize, Vec<u8>)>, LinkError> {
        match self.comm.any_process().immediate_matched_probe() {
            Some((message, status)) => {
                let (bytes, _status) = message.matched_receive_vec::<u8>();
                Ok(Some((status.source_rank() as usize, bytes)))
            }
            None => Ok(None),
        }
    }

    fn recv_any(&self) -> Result<(usize, Vec<u8>), LinkError> {
        let (message, status) = self.comm.any_process().matched_probe();
        let (bytes, _status) = message.matched_receive_vec::<u8>();
        Ok((status.source_rank() as usize, bytes))
    }
}
