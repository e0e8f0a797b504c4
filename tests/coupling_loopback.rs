//! End-to-end coupling scenarios over the in-process mailbox world.
//!
//! Each test stands up real `Worker`/`Controller` instances on `LocalComm`
//! endpoints, one thread per rank, and drives full register → interchange →
//! deregister lifecycles: identity and damping policies, a three-worker bulk
//! rendezvous, timeout paths, and the waiting-token deadline reset.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;
use fixlink::{
    AtomData, AtomView, CentroidPolicy, Comm, Controller, CouplingFix, DampingPolicy, FixData,
    FixOptions, LinkError, LocalComm, NullPolicy, Packet, PendingMap, Policy, Verdict, Worker,
};

/// Run a controller on its own thread, returning `(run result, final count)`.
fn spawn_controller<P: Policy + Send + 'static>(
    comm: LocalComm,
    policy: P,
) -> thread::JoinHandle<(Result<(), LinkError>, usize)> {
    thread::spawn(move || {
        let mut controller = Controller::new(comm, policy);
        let result = controller.run();
        (result, controller.registered())
    })
}

#[test]
fn zero_deltas_leave_forces_bit_identical() {
    let mut world = LocalComm::world(2);
    let controller_comm = world.pop().unwrap();
    let worker_comm = world.pop().unwrap();
    let controller = spawn_controller(controller_comm, NullPolicy);

    let x = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
    let v = [[0.0; 3]; 3];
    let mut f = [[10.0, 20.0, 30.0], [11.0, 21.0, 31.0], [12.0, 22.0, 32.0]];
    let mask = [1u32; 3];
    let before = f;

    let options = FixOptions::default();
    let mut fix = CouplingFix::register(worker_comm, &options, 1).unwrap();
    fix.post_force(AtomView { x: &x, v: &v, f: &mut f, mask: &mask, mu: None })
        .unwrap();
    fix.finish().unwrap();

    for (row, expected) in f.iter().zip(&before) {
        for (got, want) in row.iter().zip(expected) {
            assert_eq!(got.to_bits(), want.to_bits());
        }
    }
    let (result, registered) = controller.join().unwrap();
    result.unwrap();
    assert_eq!(registered, 0);
}

#[test]
fn damping_policy_halves_forces() {
    let mut world = LocalComm::world(2);
    let controller_comm = world.pop().unwrap();
    let worker_comm = world.pop().unwrap();
    let controller = spawn_controller(controller_comm, DampingPolicy::new(0.5));

    let x = [[0.0; 3]];
    let v = [[0.0; 3]];
    let mut f = [[10.0, 20.0, 30.0]];
    let mask = [1u32];

    let options = FixOptions::parse(&["maxdelay", "0"]).unwrap();
    let mut fix = CouplingFix::register(worker_comm, &options, 1).unwrap();
    fix.post_force(AtomView { x: &x, v: &v, f: &mut f, mask: &mask, mu: None })
        .unwrap();
    fix.finish().unwrap();

    assert_eq!(f[0], [5.0, 10.0, 15.0]);
    controller.join().unwrap().0.unwrap();
}

#[test]
fn group_mask_filters_atoms() {
    let mut world = LocalComm::world(2);
    let controller_comm = world.pop().unwrap();
    let worker_comm = world.pop().unwrap();
    let controller = spawn_controller(controller_comm, DampingPolicy::new(0.5));

    let x = [[0.0; 3]; 3];
    let v = [[0.0; 3]; 3];
    let mut f = [[8.0, 0.0, 0.0], [16.0, 0.0, 0.0], [32.0, 0.0, 0.0]];
    // Middle atom is outside the fix group and must stay untouched.
    let mask = [0b01u32, 0b10, 0b01];

    let mut fix = CouplingFix::register(worker_comm, &FixOptions::default(), 0b01).unwrap();
    fix.post_force(AtomView { x: &x, v: &v, f: &mut f, mask: &mask, mu: None })
        .unwrap();
    fix.finish().unwrap();

    assert_eq!(f[0][0], 4.0);
    assert_eq!(f[1][0], 16.0);
    assert_eq!(f[2][0], 16.0);
    controller.join().unwrap().0.unwrap();
}

#[test]
fn every_stride_skips_intermediate_steps() {
    let mut world = LocalComm::world(2);
    let controller_comm = world.pop().unwrap();
    let worker_comm = world.pop().unwrap();
    let controller = spawn_controller(controller_comm, DampingPolicy::new(0.5));

    let x = [[0.0; 3]];
    let v = [[0.0; 3]];
    let mut f = [[16.0, 0.0, 0.0]];
    let mask = [1u32];

    let options = FixOptions::parse(&["every", "3"]).unwrap();
    let mut fix = CouplingFix::register(worker_comm, &options, 1).unwrap();
    for _ in 0..2 {
        fix.post_force(AtomView { x: &x, v: &v, f: &mut f, mask: &mask, mu: None })
            .unwrap();
        assert_eq!(f[0][0], 16.0);
    }
    // Third call crosses the stride and interchanges.
    fix.post_force(AtomView { x: &x, v: &v, f: &mut f, mask: &mask, mu: None })
        .unwrap();
    assert_eq!(f[0][0], 8.0);
    fix.finish().unwrap();
    controller.join().unwrap().0.unwrap();
}

#[test]
fn bulk_rendezvous_pulls_workers_toward_centroid() {
    let mut world = LocalComm::world(4);
    let controller_comm = world.pop().unwrap();
    let controller = spawn_controller(controller_comm, CentroidPolicy::new(0.1));

    let positions = [[0.0, 0.0, 0.0], [6.0, 0.0, 0.0], [0.0, 6.0, 0.0]];
    let expected = [[0.1, 0.1], [-0.1, 0.1], [0.1, -0.1]];
    let all_registered = Arc::new(Barrier::new(3));

    let handles: Vec<_> = world
        .into_iter()
        .enumerate()
        .map(|(i, comm)| {
            let gate = Arc::clone(&all_registered);
            thread::spawn(move || {
                let mut worker = Worker::register(comm, 0.0).unwrap();
                // Requests may only start once the controller has acked all
                // three registrations, or the rendezvous would be short.
                gate.wait();
                let atoms = [AtomData::from_rows(positions[i], [0.0; 3], [0.0; 3])];
                let fixes = worker.interchange(&atoms).unwrap();
                assert_eq!(fixes.len(), 1);
                assert_abs_diff_eq!(fixes[0].dfx, expected[i][0], epsilon = 1e-12);
                assert_abs_diff_eq!(fixes[0].dfy, expected[i][1], epsilon = 1e-12);
                assert_eq!(fixes[0].dfz, 0.0);
                worker.deregister().unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    let (result, registered) = controller.join().unwrap();
    result.unwrap();
    assert_eq!(registered, 0);
}

#[test]
fn registration_times_out_without_controller() {
    let mut world = LocalComm::world(2);
    let worker_comm = world.remove(0);
    let started = Instant::now();
    let err = Worker::register_within(worker_comm, 0.0, 40.0).unwrap_err();
    assert!(matches!(err, LinkError::RegistrationTimeout(_)));
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn request_times_out_before_late_response() {
    let mut world = LocalComm::world(2);
    let scripted = world.pop().unwrap();
    let worker_comm = world.pop().unwrap();

    let script = thread::spawn(move || {
        let (source, bytes) = scripted.recv_any().unwrap();
        assert!(matches!(Packet::decode(&bytes).unwrap(), Packet::Register { .. }));
        scripted
            .send_to(source, &Packet::Ack { uid: Some(1) }.encode().unwrap())
            .unwrap();

        let (source, bytes) = scripted.recv_any().unwrap();
        let n = match Packet::decode(&bytes).unwrap() {
            Packet::Request { atoms, .. } => atoms.len(),
            other => panic!("expected request, got {}", other.kind()),
        };
        // Far past the worker's 10 ms budget.
        thread::sleep(Duration::from_millis(50));
        let response = Packet::Response { atoms: vec![FixData::ZERO; n], uid: None };
        scripted.send_to(source, &response.encode().unwrap()).unwrap();
    });

    let mut worker = Worker::register(worker_comm, 10.0).unwrap();
    let atoms = [AtomData::from_rows([0.0; 3], [0.0; 3], [1.0, 2.0, 3.0])];
    let started = Instant::now();
    let err = worker.interchange(&atoms).unwrap_err();
    assert!(matches!(err, LinkError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_millis(40));
    script.join().unwrap();
}

#[test]
fn waiting_token_resets_the_deadline() {
    let mut world = LocalComm::world(2);
    let scripted = world.pop().unwrap();
    let worker_comm = world.pop().unwrap();

    let script = thread::spawn(move || {
        let (source, bytes) = scripted.recv_any().unwrap();
        assert!(matches!(Packet::decode(&bytes).unwrap(), Packet::Register { .. }));
        scripted
            .send_to(source, &Packet::Ack { uid: None }.encode().unwrap())
            .unwrap();

        let (source, bytes) = scripted.recv_any().unwrap();
        let n = match Packet::decode(&bytes).unwrap() {
            Packet::Request { atoms, .. } => atoms.len(),
            other => panic!("expected request, got {}", other.kind()),
        };
        // Three gaps, each inside the worker's 40 ms budget; the total is
        // well past it. Only the per-gap clock may matter.
        for _ in 0..2 {
            thread::sleep(Duration::from_millis(25));
            scripted.send_to(source, &Packet::Waiting.encode().unwrap()).unwrap();
        }
        thread::sleep(Duration::from_millis(25));
        let response = Packet::Response { atoms: vec![FixData::ZERO; n], uid: None };
        scripted.send_to(source, &response.encode().unwrap()).unwrap();
    });

    let mut worker = Worker::register(worker_comm, 40.0).unwrap();
    let atoms = [AtomData::from_rows([0.0; 3], [0.0; 3], [0.0; 3])];
    let fixes = worker.interchange(&atoms).unwrap();
    assert_eq!(fixes, vec![FixData::ZERO]);
    script.join().unwrap();
}

#[test]
fn dipole_orientations_ride_along() {
    let mut world = LocalComm::world(2);
    let scripted = world.pop().unwrap();
    let worker_comm = world.pop().unwrap();

    let script = thread::spawn(move || {
        let (source, _) = scripted.recv_any().unwrap();
        scripted
            .send_to(source, &Packet::Ack { uid: None }.encode().unwrap())
            .unwrap();
        let (source, bytes) = scripted.recv_any().unwrap();
        let n = match Packet::decode(&bytes).unwrap() {
            Packet::Request { atoms, .. } => {
                let mu = atoms[0].dipole().expect("dipole fields were dropped");
                assert_eq!(atoms[0].is_dipole, Some(true));
                assert_eq!(mu[1], -1.0);
                atoms.len()
            }
            other => panic!("expected request, got {}", other.kind()),
        };
        let response = Packet::Response { atoms: vec![FixData::ZERO; n], uid: None };
        scripted.send_to(source, &response.encode().unwrap()).unwrap();
    });

    let x = [[0.0; 3]];
    let v = [[0.0; 3]];
    let mut f = [[0.0; 3]];
    let mask = [1u32];
    let mu = [[0.5, -1.0, 0.25]];
    let mut fix = CouplingFix::register(worker_comm, &FixOptions::default(), 1).unwrap();
    fix.post_force(AtomView { x: &x, v: &v, f: &mut f, mask: &mask, mu: Some(&mu) })
        .unwrap();
    fix.finish().unwrap();
    script.join().unwrap();
}

#[test]
fn two_workers_shut_down_gracefully() {
    let mut world = LocalComm::world(3);
    let controller_comm = world.pop().unwrap();
    let controller = spawn_controller(controller_comm, NullPolicy);

    let handles: Vec<_> = world
        .into_iter()
        .map(|comm| {
            thread::spawn(move || {
                let mut worker = Worker::register(comm, 0.0).unwrap();
                let atoms = [AtomData::from_rows([1.0; 3], [0.0; 3], [0.0; 3])];
                for _ in 0..3 {
                    worker.interchange(&atoms).unwrap();
                }
                worker.deregister().unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    let (result, registered) = controller.join().unwrap();
    result.unwrap();
    assert_eq!(registered, 0);
}

/// Holds every request forever; only useful for poking the loop's
/// duplicate-request tracking.
struct HoldForever;

impl Policy for HoldForever {
    fn dispatch(&mut self, _source: usize, _pending: &PendingMap, _registered: usize) -> Verdict {
        Verdict::Wait
    }
}

#[test]
fn second_in_flight_request_is_a_protocol_violation() {
    let mut world = LocalComm::world(2);
    let controller_comm = world.pop().unwrap();
    let rogue = world.pop().unwrap();
    let controller = spawn_controller(controller_comm, HoldForever);

    rogue.send_to(1, &Packet::Register { uid: None }.encode().unwrap()).unwrap();
    let (_, bytes) = rogue.recv_any().unwrap();
    assert!(matches!(Packet::decode(&bytes).unwrap(), Packet::Ack { .. }));

    let request = Packet::Request {
        expect_response: 0.0,
        atoms: vec![AtomData::from_rows([0.0; 3], [0.0; 3], [0.0; 3])],
        uid: Some(1),
    };
    rogue.send_to(1, &request.encode().unwrap()).unwrap();
    rogue.send_to(1, &request.encode().unwrap()).unwrap();

    let (result, _) = controller.join().unwrap();
    assert!(matches!(result, Err(LinkError::ProtocolViolation(_))));
}

#[test]
fn per_particle_replay_is_deterministic() {
    let mut world = LocalComm::world(2);
    let controller_comm = world.pop().unwrap();
    let worker_comm = world.pop().unwrap();
    let controller = spawn_controller(controller_comm, DampingPolicy::new(0.25));

    let atoms = [
        AtomData::from_rows([0.3, 0.7, -1.1], [0.0; 3], [3.0, -6.0, 0.125]),
        AtomData::from_rows([5.0, 5.0, 5.0], [1.0; 3], [-2.5, 0.1, 9.0]),
    ];
    let mut worker = Worker::register(worker_comm, 0.0).unwrap();
    let first = worker.interchange(&atoms).unwrap();
    let second = worker.interchange(&atoms).unwrap();
    assert_eq!(first, second);
    worker.deregister().unwrap();
    controller.join().unwrap().0.unwrap();
}

#[test]
fn fatal_interchange_still_deregisters() {
    let mut world = LocalComm::world(2);
    let scripted = world.pop().unwrap();
    let worker_comm = world.pop().unwrap();

    let script = thread::spawn(move || {
        let (source, _) = scripted.recv_any().unwrap();
        scripted
            .send_to(source, &Packet::Ack { uid: Some(1) }.encode().unwrap())
            .unwrap();
        let (_, bytes) = scripted.recv_any().unwrap();
        assert!(matches!(Packet::decode(&bytes).unwrap(), Packet::Request { .. }));
        // Never answer; the worker times out and must still say goodbye.
        let (_, bytes) = scripted.recv_any().unwrap();
        assert!(matches!(
            Packet::decode(&bytes).unwrap(),
            Packet::Deregister { uid: Some(1) }
        ));
    });

    let x = [[0.0; 3]];
    let v = [[0.0; 3]];
    let mut f = [[1.0, 1.0, 1.0]];
    let mask = [1u32];
    let options = FixOptions::parse(&["maxdelay", "10"]).unwrap();
    let mut fix = CouplingFix::register(worker_comm, &options, 1).unwrap();
    let err = fix
        .post_force(AtomView { x: &x, v: &v, f: &mut f, mask: &mask, mu: None })
        .unwrap_err();
    assert!(matches!(err, LinkError::Timeout(_)));
    // Forces are untouched on the error path.
    assert_eq!(f[0], [1.0, 1.0, 1.0]);
    script.join().unwrap();
}
