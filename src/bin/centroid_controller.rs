//! Bulk example controller: waits for every worker each round, then pulls
//! all atoms toward their common x–y centroid with clamped unit forces.

use anyhow::Context;
use mpi::traits::{Communicator, CommunicatorCollectives};

use fixlink::{CentroidPolicy, Controller, MpiComm};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let universe = mpi::initialize().context("MPI is already initialized")?;
    let world = universe.world();
    tracing::info!(rank = world.rank(), "starting bulk controller");

    let link = MpiComm::split_controller(&world)?;
    let mut controller = Controller::new(link, CentroidPolicy::new(0.1));
    controller.run()?;

    tracing::info!("halting bulk controller");
    world.barrier();
    Ok(())
}
