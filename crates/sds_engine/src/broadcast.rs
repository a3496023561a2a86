use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Weak};
use std::thread;

use engine_logging::{engine_debug, engine_error, engine_warn};
use sds_core::{JobError, JobEvent, JobId, JobObserver};

use crate::types::panic_message;

pub type SubscriptionId = u64;

struct Subscriber {
    queue: mpsc::Sender<JobEvent>,
    observer: Weak<dyn JobObserver>,
    active: Arc<AtomicBool>,
}

/// Fans job events out to observers.
///
/// Each subscriber owns a FIFO queue drained by its own delivery thread, so
/// `publish` only enqueues and never waits on observer code.
pub struct Broadcaster {
    subscribers: BTreeMap<SubscriptionId, Subscriber>,
    next_id: SubscriptionId,
    coalesce_progress: bool,
}

impl Broadcaster {
    pub fn new(coalesce_progress: bool) -> Self {
        Self {
            subscribers: BTreeMap::new(),
            next_id: 1,
            coalesce_progress,
        }
    }

    /// Registers an observer; `replay` is queued ahead of any later event.
    pub fn subscribe(
        &mut self,
        observer: Weak<dyn JobObserver>,
        replay: Vec<JobEvent>,
    ) -> SubscriptionId {
        let id = self.next_id;
        self.next_id += 1;

        let (queue, rx) = mpsc::channel();
        for event in replay {
            let _ = queue.send(event);
        }
        let active = Arc::new(AtomicBool::new(true));
        let worker = DeliveryWorker {
            id,
            rx,
            observer: observer.clone(),
            active: active.clone(),
            coalesce_progress: self.coalesce_progress,
        };
        if let Err(err) = thread::Builder::new()
            .name(format!("sds-observer-{id}"))
            .spawn(move || worker.run())
        {
            // Without a receiver the next publish prunes this subscriber.
            engine_error!("failed to spawn delivery thread for subscriber {}: {}", id, err);
        }

        self.subscribers.insert(
            id,
            Subscriber {
                queue,
                observer,
                active,
            },
        );
        engine_debug!("subscriber {} registered", id);
        id
    }

    /// Stops delivery to a subscriber, including events still queued for it.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        match self.subscribers.remove(&id) {
            Some(subscriber) => {
                subscriber.active.store(false, Ordering::Release);
                engine_debug!("subscriber {} unregistered", id);
                true
            }
            None => false,
        }
    }

    pub fn publish(&mut self, event: &JobEvent) {
        self.subscribers.retain(|id, subscriber| {
            if subscriber.observer.strong_count() == 0 {
                engine_debug!("subscriber {} dropped by its owner", id);
                return false;
            }
            if subscriber.queue.send(event.clone()).is_err() {
                engine_warn!("subscriber {} has no delivery thread, removing it", id);
                return false;
            }
            true
        });
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Drops every subscription. Events already queued are still delivered.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

struct DeliveryWorker {
    id: SubscriptionId,
    rx: mpsc::Receiver<JobEvent>,
    observer: Weak<dyn JobObserver>,
    active: Arc<AtomicBool>,
    coalesce_progress: bool,
}

impl DeliveryWorker {
    fn run(self) {
        while let Ok(first) = self.rx.recv() {
            let mut batch: Vec<JobEvent> = std::iter::once(first).chain(self.rx.try_iter()).collect();
            if self.coalesce_progress {
                batch = coalesce_progress(batch);
            }
            for event in batch {
                if !self.active.load(Ordering::Acquire) {
                    return;
                }
                let Some(observer) = self.observer.upgrade() else {
                    return;
                };
                self.deliver(observer.as_ref(), &event);
            }
        }
    }

    fn deliver(&self, observer: &dyn JobObserver, event: &JobEvent) {
        let message = match panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("{err:#}"),
            Err(payload) => format!("panicked: {}", panic_message(payload.as_ref())),
        };
        let failure = JobError::SubscriberFailure {
            subscription: self.id,
            message,
        };
        engine_warn!(job = event.job_id(); "{} while handling {} event", failure, event.status());
    }
}

/// Drops progress events that a later progress event for the same job
/// supersedes, as long as no other event for that job sits between them.
pub(crate) fn coalesce_progress(batch: Vec<JobEvent>) -> Vec<JobEvent> {
    let mut superseded: HashSet<JobId> = HashSet::new();
    let mut kept = Vec::with_capacity(batch.len());
    for event in batch.into_iter().rev() {
        if event.is_coalescable() {
            if superseded.contains(event.job_id()) {
                continue;
            }
            superseded.insert(event.job_id().clone());
        } else {
            superseded.remove(event.job_id());
        }
        kept.push(event);
    }
    kept.reverse();
    kept
}
