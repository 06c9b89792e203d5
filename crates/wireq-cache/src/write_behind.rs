//! crates/wireq-cache/src/write_behind.rs
//!
//! The write-behind worker: a single consumer thread draining a channel of
//! posted operations, deferring `Put` flushes via a min-heap keyed by
//! deadline rather than spawning a timer per entry.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use wireq_codec::CacheHeader;

use crate::CacheShared;

pub(crate) enum WorkerMsg {
    Put { key: String, deadline: Instant },
    Update { key: String, header: CacheHeader },
    Clear,
    Shutdown,
}

pub(crate) struct WorkerHandle {
    sender: Sender<WorkerMsg>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub(crate) fn spawn(shared: Arc<CacheShared>) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let join = std::thread::Builder::new()
            .name("wireq-cache-write-behind".to_owned())
            .spawn(move || run(&shared, &receiver))
            .expect("spawning write-behind worker thread");
        Self {
            sender,
            join: Some(join),
        }
    }

    pub(crate) fn schedule_put(&self, key: String, delay: Duration) {
        let _ = self.sender.send(WorkerMsg::Put {
            key,
            deadline: Instant::now() + delay,
        });
    }

    pub(crate) fn schedule_update(&self, key: String, header: CacheHeader) {
        let _ = self.sender.send(WorkerMsg::Update { key, header });
    }

    pub(crate) fn clear(&self) {
        let _ = self.sender.send(WorkerMsg::Clear);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        let _ = self.sender.send(WorkerMsg::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn is_disconnected(err: &crossbeam_channel::RecvTimeoutError) -> bool {
    matches!(err, crossbeam_channel::RecvTimeoutError::Disconnected)
}

fn run(shared: &Arc<CacheShared>, receiver: &Receiver<WorkerMsg>) {
    let mut deadlines: BinaryHeap<Reverse<(Instant, String)>> = BinaryHeap::new();

    loop {
        let wait = deadlines
            .peek()
            .map(|Reverse((deadline, _))| deadline.saturating_duration_since(Instant::now()));

        let received = match wait {
            Some(timeout) => receiver.recv_timeout(timeout),
            None => receiver.recv().map_err(|_| crossbeam_channel::RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(WorkerMsg::Put { key, deadline }) => deadlines.push(Reverse((deadline, key))),
            Ok(WorkerMsg::Update { key, header }) => shared.apply_update(&key, header),
            Ok(WorkerMsg::Clear) => deadlines.clear(),
            Ok(WorkerMsg::Shutdown) => break,
            Err(err) if is_disconnected(&err) => break,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while let Some(Reverse((deadline, _))) = deadlines.peek() {
            if *deadline > now {
                break;
            }
            let Reverse((_, key)) = deadlines.pop().expect("peeked entry must pop");
            shared.flush_pending(&key);
        }
    }
}
