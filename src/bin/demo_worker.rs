//! Synthetic worker standing in for a simulator rank: integrates a random
//! atom set with a toy Euler step and interchanges once per step. Useful for
//! exercising a controller without a real simulator in the world.

use anyhow::Context;
use mpi::traits::CommunicatorCollectives;
use rand::Rng;

use fixlink::{AtomData, MpiComm, Worker};

const NUM_UPDATES: usize = 1000;
const NUM_ATOMS: usize = 128;
const DT: f64 = 0.01;
const MAX_MS: f64 = 50.0;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let universe = mpi::initialize().context("MPI is already initialized")?;
    let world = universe.world();
    let (_simulator, link) = MpiComm::split_worker(&world)?;

    let mut rng = rand::thread_rng();
    let mut atoms: Vec<AtomData> = (0..NUM_ATOMS)
        .map(|_| {
            let mut draw = || rng.gen_range(-100.0..100.0);
            AtomData::from_rows(
                [draw(), draw(), draw()],
                [draw(), draw(), draw()],
                [draw(), draw(), draw()],
            )
        })
        .collect();

    let mut worker = Worker::register(link, MAX_MS)?;
    tracing::info!(
        rank = worker.rank(),
        controller = worker.controller(),
        "worker launched"
    );

    for step in 0..NUM_UPDATES {
        for atom in &mut atoms {
            atom.vx += atom.fx * DT;
            atom.x += atom.vx * DT;
            atom.vy += atom.fy * DT;
            atom.y += atom.vy * DT;
            atom.vz += atom.fz * DT;
            atom.z += atom.vz * DT;
        }

        let fixes = worker.interchange(&atoms)?;
        if step % 10 == 0 {
            tracing::debug!(step, "got fix data");
        }

        for (atom, fix) in atoms.iter_mut().zip(&fixes) {
            atom.fx += fix.dfx;
            atom.fy += fix.dfy;
            atom.fz += fix.dfz;
        }
    }

    worker.deregister()?;
    world.barrier();
    Ok(())
}
