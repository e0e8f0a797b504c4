//! Per-particle example controller: damps every reported force by half.
//! Launch together with the simulator ranks, e.g.
//! `mpiexec -n 4 simulator : -n 1 damping_controller`.

use anyhow::Context;
use mpi::traits::Communicator;

use fixlink::{Controller, DampingPolicy, MpiComm};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let universe = mpi::initialize().context("MPI is already initialized")?;
    let world = universe.world();
    tracing::info!(rank = world.rank(), "starting controller");

    let link = MpiComm::split_controller(&world)?;
    let mut controller = Controller::new(link, DampingPolicy::new(0.5));
    controller.run()?;

    tracing::info!("halting controller");
    Ok(())
}
