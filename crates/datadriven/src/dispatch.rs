//! # Per-object dispatch lanes
//!
//! Every listener-facing task (cache mutation followed by `on_update` /
//! `on_remove`, signal delivery, method reply listeners) runs on a lane.
//! A lane is a single tokio task draining an unbounded queue, so tasks on one
//! lane run strictly one after another. The lane of a task is picked by
//! hashing the [`ObjectId`] it concerns: events of one object keep the order
//! in which they were enqueued, while different objects spread over lanes
//! and run concurrently.
//!
//! A task that panics is logged and dropped; the lane keeps going.

use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::trace;

use ddbus::ObjectId;

pub(crate) type Task = BoxFuture<'static, ()>;

pub(crate) struct Dispatcher {
    lanes: Vec<mpsc::UnboundedSender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn start(handle: &Handle, lanes: usize) -> Self {
        let lanes = lanes.max(1);
        let mut senders = Vec::with_capacity(lanes);
        let mut workers = Vec::with_capacity(lanes);

        for lane in 0..lanes {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            workers.push(handle.spawn(run_lane(lane, rx)));
        }

        Self { lanes: senders, workers }
    }

    pub(crate) fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub(crate) fn lane_for(&self, id: &ObjectId) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }

    /// Queues a task behind everything already queued for the same object.
    ///
    /// Returns false if the lane has shut down.
    pub(crate) fn enqueue(&self, id: &ObjectId, task: Task) -> bool {
        let lane = self.lane_for(id);
        self.lanes[lane].send(task).is_ok()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn run_lane(lane: usize, mut rx: mpsc::UnboundedReceiver<Task>) {
    while let Some(task) = rx.recv().await {
        if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
            error!(lane, "dispatch task panicked: {}", panic_message(panic.as_ref()));
        }
    }
    trace!(lane, "dispatch lane stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "<non-string panic payload>"
    }
}
