// In-process mailbox world mirroring the subworld semantics

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::comm::Comm;
use crate::error::LinkError;

#[derive(Debug)]
struct Mailbox {
    queue: Mutex<VecDeque<(usize, Vec<u8>)>>,
    ready: Condvar,
}

#[derive(Debug)]
struct Shared {
    boxes: Vec<Mailbox>,
}

/// One endpoint of an in-process world. `LocalComm::world(n)` hands out `n`
/// connected endpoints; each normally moves into its own thread. Delivery is
/// FIFO per (sender, receiver) pair, like the MPI transport.
#[derive(Debug)]
pub struct LocalComm {
    shared: Arc<Shared>,
    rank: usize,
}

impl LocalComm {
    pub fn world(size: usize) -> Vec<LocalComm> {
        let shared = Arc::new(Shared {
            boxes: (0..size)
                .map(|_| Mailbox { queue: Mutex::new(VecDeque::new()), ready: Condvar::new() })
                .collect(),
        });
        (0..size)
            .map(|rank| LocalComm { shared: Arc::clone(&shared), rank })
            .collect()
    }

    fn mailbox(&self, rank: usize) -> Result<&Mailbox, LinkError> {
        self.shared.boxes.get(rank).ok_or_else(|| {
            LinkError::Transport(format!("no rank {rank} in a world of {}", self.size()))
        })
    }
}

impl Comm for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.boxes.len()
    }

    fn send_to(&self, dest: usize, bytes: &[u8]) -> Result<(), LinkError> {
        let mailbox = self.mailbox(dest)?;
        let mut queue = mailbox
            .queue
            .lock()
            .map_err(|_| LinkError::Transport("mailbox poisoned".into()))?;
        queue.push_back((self.rank, bytes.to_vec()));
        mailbox.ready.notify_all();
        Ok(())
    }

    fn poll_from(&self, source: usize) -> Result<Option<Vec<u8>>, LinkError> {
        let mailbox = self.mailbox(self.rank)?;
        let mut queue = mailbox
            .queue
            .lock()
            .map_err(|_| LinkError::Transport("mailbox poisoned".into()))?;
        let position = queue.iter().position(|(from, _)| *from == source);
        Ok(position.and_then(|i| queue.remove(i)).map(|(_, bytes)| bytes))
    }

    fn poll_any(&self) -> Result<Option<(usize, Vec<u8>)>, LinkError> {
        let mailbox = self.mailbox(self.rank)?;
        let mut queue = mailbox
            .queue
            .lock()
            .map_err(|_| LinkError::Transport("mailbox poisoned".into()))?;
        Ok(queue.pop_front())
    }

    fn recv_any(&self) -> Result<(usize, Vec<u8>), LinkError> {
        let mailbox = self.mailbox(self.rank)?;
        let mut queue = mailbox
            .queue
            .lock()
            .map_err(|_| LinkError::Transport("mailbox poisoned".into()))?;
        loop {
            if let Some(message) = queue.pop_front() {
                return Ok(message);
            }
            queue = mailbox
                .ready
                .wait(queue)
                .map_err(|_| LinkError::Transport("mailbox poisoned".into()))?;
        }
    }
}
