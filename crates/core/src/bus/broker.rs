//! # Message Broker
//!
//! Routes messages to per-recipient FIFO mailboxes and tracks worker liveness.
//! The bus never fails a sender: messages to unknown recipients are dropped
//! with a warning.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::message::{Message, MessageKind};

/// Liveness state of a registered worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Working,
    Error,
    Offline,
}

impl WorkerStatus {
    /// Whether the coordinator may dispatch work to this worker.
    /// `error` and `offline` both surface as unavailable; re-registration recovers.
    pub fn is_available(self) -> bool {
        !matches!(self, WorkerStatus::Error | WorkerStatus::Offline)
    }
}

/// Registry entry for a worker
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInfo {
    pub name: String,
    pub status: WorkerStatus,
    pub capabilities: BTreeSet<String>,
    pub current_task: Option<String>,
    pub last_activity: DateTime<Utc>,
}

/// Per-recipient FIFO queue
struct Mailbox {
    queue: VecDeque<Message>,
    notify: Arc<Notify>,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[derive(Default)]
struct BusState {
    workers: HashMap<String, WorkerInfo>,
    mailboxes: HashMap<String, Mailbox>,
}

/// The message bus: worker registry plus per-recipient mailboxes.
///
/// An explicit collaborator, not a global: multiple buses may coexist in one
/// process (parallel workflows in tests). Workers are referenced by name only.
pub struct MessageBus {
    state: Mutex<BusState>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState::default()),
        }
    }

    /// Register a worker and create its mailbox.
    ///
    /// Idempotent on re-registration: capabilities are replaced, the mailbox
    /// (and any pending messages) is preserved, and status resets to idle.
    pub fn register(&self, worker_name: &str, capabilities: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let info = WorkerInfo {
            name: worker_name.to_string(),
            status: WorkerStatus::Idle,
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            current_task: None,
            last_activity: Utc::now(),
        };
        state.workers.insert(worker_name.to_string(), info);
        state
            .mailboxes
            .entry(worker_name.to_string())
            .or_insert_with(Mailbox::new);
        tracing::debug!(worker = worker_name, "worker registered");
    }

    /// Remove a worker; pending messages are discarded and pollers wake up.
    pub fn unregister(&self, worker_name: &str) {
        let mut state = self.state.lock().unwrap();
        state.workers.remove(worker_name);
        if let Some(mailbox) = state.mailboxes.remove(worker_name) {
            if !mailbox.queue.is_empty() {
                tracing::warn!(
                    worker = worker_name,
                    dropped = mailbox.queue.len(),
                    "unregister discarded pending messages"
                );
            }
            mailbox.notify.notify_waiters();
        }
    }

    /// Whether a worker is currently registered
    pub fn is_registered(&self, worker_name: &str) -> bool {
        self.state.lock().unwrap().workers.contains_key(worker_name)
    }

    /// Snapshot of a worker's registry entry
    pub fn worker_info(&self, worker_name: &str) -> Option<WorkerInfo> {
        self.state.lock().unwrap().workers.get(worker_name).cloned()
    }

    /// Names of all registered workers
    pub fn worker_names(&self) -> Vec<String> {
        self.state.lock().unwrap().workers.keys().cloned().collect()
    }

    /// Enqueue a message on the recipient's mailbox. O(1), non-blocking.
    ///
    /// Unknown recipients are logged and the message dropped; the sender is
    /// never notified of routing failures.
    pub fn send(&self, message: Message) {
        let mut state = self.state.lock().unwrap();
        match state.mailboxes.get_mut(&message.recipient) {
            Some(mailbox) => {
                mailbox.queue.push_back(message);
                mailbox.notify.notify_one();
            }
            None => {
                tracing::warn!(
                    recipient = %message.recipient,
                    sender = %message.sender,
                    kind = ?message.kind,
                    "dropping message to unknown recipient"
                );
            }
        }
    }

    /// Enqueue one copy per registered worker except the sender.
    /// Each copy carries a fresh message ID. Returns the number delivered.
    pub fn broadcast(
        &self,
        kind: MessageKind,
        body: serde_json::Value,
        sender: &str,
        priority: i32,
    ) -> usize {
        let mut state = self.state.lock().unwrap();
        let recipients: Vec<String> = state
            .workers
            .keys()
            .filter(|name| name.as_str() != sender)
            .cloned()
            .collect();
        let mut delivered = 0;
        for recipient in recipients {
            if let Some(mailbox) = state.mailboxes.get_mut(&recipient) {
                let copy = Message::new(kind, sender, &recipient, body.clone())
                    .with_priority(priority);
                mailbox.queue.push_back(copy);
                mailbox.notify.notify_one();
                delivered += 1;
            }
        }
        delivered
    }

    /// Return the next message from the worker's mailbox, waiting up to
    /// `max_wait`. Ordering is insertion order per recipient; priority is
    /// carried but does not reorder. Returns `None` on timeout or if the
    /// worker is not registered.
    pub async fn poll(&self, worker_name: &str, max_wait: Duration) -> Option<Message> {
        let deadline = Instant::now() + max_wait;
        loop {
            let notify = {
                let mut state = self.state.lock().unwrap();
                let mailbox = state.mailboxes.get_mut(worker_name)?;
                if let Some(message) = mailbox.queue.pop_front() {
                    return Some(message);
                }
                mailbox.notify.clone()
            };

            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let _ = tokio::time::timeout(deadline - now, notify.notified()).await;
        }
    }

    /// Update a worker's liveness entry. Emits no message.
    pub fn update_status(
        &self,
        worker_name: &str,
        status: WorkerStatus,
        current_task: Option<String>,
    ) {
        let mut state = self.state.lock().unwrap();
        if let Some(info) = state.workers.get_mut(worker_name) {
            info.status = status;
            info.current_task = current_task;
            info.last_activity = Utc::now();
        }
    }
}
