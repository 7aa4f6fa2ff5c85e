use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, warn};

use super::{Delivery, Registry, deliver_elements};
use crate::osc::types::Bundle;

struct Scheduled {
    due: Instant,
    seq: u64,
    bundle: Bundle,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Reversed so the BinaryHeap pops the earliest deadline first, FIFO on ties.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Runs deferred bundles once their time tag is reached.
///
/// One thread per dispatcher owns a deadline heap fed through a channel. The
/// thread keeps running until every handle is dropped and the heap is empty,
/// so a scheduled bundle always fires.
#[derive(Clone)]
pub struct Scheduler {
    tx: Sender<Scheduled>,
    seq: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl Scheduler {
    pub(crate) fn start(registry: Registry) -> Scheduler {
        let (tx, rx) = unbounded();
        let seq = Arc::new(AtomicU64::new(0));
        let pending = Arc::new(AtomicUsize::new(0));

        let worker = Worker {
            rx,
            registry,
            queue: BinaryHeap::new(),
            seq: seq.clone(),
            pending: pending.clone(),
        };
        thread::spawn(move || worker.run());

        Scheduler { tx, seq, pending }
    }

    /// Queues `bundle` to have its elements dispatched after `delay`.
    pub fn schedule(&self, delay: Duration, bundle: Bundle) {
        let scheduled = Scheduled {
            due: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            bundle,
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(scheduled).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("scheduler thread is gone, dropping deferred bundle");
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

struct Worker {
    rx: Receiver<Scheduled>,
    registry: Registry,
    queue: BinaryHeap<Scheduled>,
    seq: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
}

impl Worker {
    fn run(mut self) {
        let mut connected = true;
        loop {
            self.fire_due();

            let next_due = self.queue.peek().map(|s| s.due);
            match (next_due, connected) {
                (None, false) => break,
                (Some(due), false) => thread::sleep(due.saturating_duration_since(Instant::now())),
                (None, true) => match self.rx.recv() {
                    Ok(scheduled) => self.queue.push(scheduled),
                    Err(_) => connected = false,
                },
                (Some(due), true) => match self.rx.recv_deadline(due) {
                    Ok(scheduled) => self.queue.push(scheduled),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => connected = false,
                },
            }
        }
        debug!("scheduler thread exiting");
    }

    fn fire_due(&mut self) {
        let now = Instant::now();
        while self.queue.peek().is_some_and(|s| s.due <= now) {
            let Some(scheduled) = self.queue.pop() else {
                break;
            };
            self.fire(scheduled.bundle);
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn fire(&mut self, bundle: Bundle) {
        let bindings = self.registry.snapshot();
        let mut delivery = Delivery::default();
        let mut deferred = Vec::new();
        deliver_elements(
            &bindings,
            bundle,
            &mut |delay, nested| deferred.push((delay, nested)),
            &mut delivery,
        );

        // Nested bundles with a later time tag go back on the heap.
        for (delay, nested) in deferred {
            self.pending.fetch_add(1, Ordering::SeqCst);
            self.queue.push(Scheduled {
                due: Instant::now() + delay,
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
                bundle: nested,
            });
        }
        for failure in delivery.failures {
            warn!("deferred dispatch failed: {failure}");
        }
    }
}
