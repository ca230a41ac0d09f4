//! Process-wide map from task id to its event channel.
//!
//! The registry holds the receiving half of each channel until a stream
//! attaches, plus a weak handle to the sending half so late lookups never
//! keep a finished task's channel open.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{RegistryError, RegistryResult};
use crate::metrics::VisionMetrics;
use crate::models::TaskEvent;

struct TaskSlot {
    sender: mpsc::WeakUnboundedSender<TaskEvent>,
    receiver: Option<mpsc::UnboundedReceiver<TaskEvent>>,
    cancel: CancellationToken,
}

/// Sending half of a task channel.
#[derive(Clone, Debug)]
pub struct EventSender {
    task_id: Uuid,
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl EventSender {
    /// Push an event. Returns `false` once the stream consumer is gone.
    pub fn emit(&self, event: TaskEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                debug!(task_id = %self.task_id, kind = %event.kind, "Dropping event, no consumer");
                false
            }
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }
}

/// Producer side of a freshly registered task.
///
/// Dropping the handle (and every clone of `events`) closes the channel; an
/// attached stream then ends after draining what was already sent.
#[derive(Debug)]
pub struct TaskHandle {
    pub task_id: Uuid,
    pub events: EventSender,
    pub cancel: CancellationToken,
}

#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<Uuid, TaskSlot>>,
    registered: Notify,
    metrics: VisionMetrics,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, TaskSlot>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, TaskSlot>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the channel for `task_id` and wake any stream waiting for it.
    pub fn register(&self, task_id: Uuid) -> RegistryResult<TaskHandle> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let live = {
            let mut tasks = self.write();
            if tasks.contains_key(&task_id) {
                return Err(RegistryError::DuplicateTask(task_id));
            }
            tasks.insert(
                task_id,
                TaskSlot {
                    sender: tx.downgrade(),
                    receiver: Some(rx),
                    cancel: cancel.clone(),
                },
            );
            tasks.len()
        };

        self.registered.notify_waiters();
        self.metrics.live_tasks(live);
        debug!(%task_id, "Task registered");

        Ok(TaskHandle {
            task_id,
            events: EventSender { task_id, tx },
            cancel,
        })
    }

    /// Sending half of a live task, if its producer is still running.
    pub fn lookup(&self, task_id: Uuid) -> Option<EventSender> {
        self.read()
            .get(&task_id)
            .and_then(|slot| slot.sender.upgrade())
            .map(|tx| EventSender { task_id, tx })
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.read().contains_key(&task_id)
    }

    /// Remove the task. Returns whether it was present.
    pub fn unregister(&self, task_id: Uuid) -> bool {
        let (removed, live) = {
            let mut tasks = self.write();
            let removed = tasks.remove(&task_id).is_some();
            (removed, tasks.len())
        };

        if removed {
            self.metrics.live_tasks(live);
            debug!(%task_id, "Task unregistered");
        }
        removed
    }

    /// Remove the task only if no stream ever attached to it.
    pub fn release_if_unattached(&self, task_id: Uuid) -> bool {
        let (released, live) = {
            let mut tasks = self.write();
            let unattached = tasks
                .get(&task_id)
                .is_some_and(|slot| slot.receiver.is_some());
            if unattached {
                tasks.remove(&task_id);
            }
            (unattached, tasks.len())
        };

        if released {
            self.metrics.live_tasks(live);
            info!(%task_id, "Released task that was never streamed");
        }
        released
    }

    /// Cancel every live task; used on shutdown.
    pub fn cancel_all(&self) {
        let tasks = self.read();
        for slot in tasks.values() {
            slot.cancel.cancel();
        }
        if !tasks.is_empty() {
            info!(count = tasks.len(), "Cancelled live tasks");
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Wait for `task_id` to be registered and take its receiver.
    ///
    /// Resolves as soon as `register` runs; `timeout: None` waits forever.
    pub async fn attach(
        self: &Arc<Self>,
        task_id: Uuid,
        timeout: Option<Duration>,
    ) -> RegistryResult<Subscription> {
        let wait = async {
            loop {
                let notified = self.registered.notified();
                tokio::pin!(notified);
                // Enabled before the map check so a concurrent register is not missed.
                notified.as_mut().enable();

                if let Some(result) = self.try_take(task_id) {
                    return result;
                }
                notified.await;
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| RegistryError::NotFound(task_id))?,
            None => wait.await,
        }
    }

    fn try_take(self: &Arc<Self>, task_id: Uuid) -> Option<RegistryResult<Subscription>> {
        let mut tasks = self.write();
        let slot = tasks.get_mut(&task_id)?;

        Some(match slot.receiver.take() {
            Some(receiver) => Ok(Subscription {
                task_id,
                receiver,
                cancel: slot.cancel.clone(),
                registry: Arc::clone(self),
                finished: false,
            }),
            None => Err(RegistryError::AlreadyAttached(task_id)),
        })
    }
}

/// The single consumer of a task's events.
///
/// Unregisters the task after `end` (or when the producer goes away). Dropped
/// early, it cancels the task and unregisters it.
pub struct Subscription {
    task_id: Uuid,
    receiver: mpsc::UnboundedReceiver<TaskEvent>,
    cancel: CancellationToken,
    registry: Arc<TaskRegistry>,
    finished: bool,
}

impl Subscription {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Next event in FIFO order; `None` after `end` or once the producer is gone.
    pub async fn next(&mut self) -> Option<TaskEvent> {
        if self.finished {
            return None;
        }

        match self.receiver.recv().await {
            Some(event) => {
                if event.is_terminal() {
                    self.finish();
                }
                Some(event)
            }
            None => {
                debug!(task_id = %self.task_id, "Task channel closed without end event");
                self.finish();
                None
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.registry.unregister(self.task_id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.finished {
            info!(task_id = %self.task_id, "Stream consumer left before end, cancelling task");
            self.cancel.cancel();
            self.registry.unregister(self.task_id);
        }
    }
}
