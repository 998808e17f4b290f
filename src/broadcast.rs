//! Per-job progress fan-out.
//!
//! Every output line is kept so late observers can catch up. Live events go
//! to each observer over its own unbounded channel, so a slow observer never
//! loses events and never holds up the job. A terminal event closes the
//! broadcast: observers are dropped, which ends their streams.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::orchestrator::JobSnapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Output(String),
    Progress(JobSnapshot),
    Complete(JobSnapshot),
    Error(String),
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Complete(_) | JobEvent::Error(_))
    }
}

#[derive(Debug, Default)]
struct Inner {
    lines: Vec<String>,
    observers: Vec<(u64, mpsc::UnboundedSender<JobEvent>)>,
    next_id: u64,
    closed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressBroadcast {
    inner: Arc<Mutex<Inner>>,
}

impl ProgressBroadcast {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` to every attached observer. Events after a terminal
    /// event are dropped.
    pub fn publish(&self, event: JobEvent) {
        let mut inner = self.lock();
        if inner.closed {
            debug!(?event, "event published after close, dropping");
            return;
        }
        if let JobEvent::Output(ref line) = event {
            inner.lines.push(line.clone());
        }
        let terminal = event.is_terminal();
        inner.observers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        if terminal {
            inner.closed = true;
            inner.observers.clear();
        }
    }

    /// Attach an observer. The backlog snapshot and the registration happen
    /// under one lock, so no line is missed or seen twice.
    pub fn subscribe(&self) -> Subscription {
        let mut inner = self.lock();
        let backlog: VecDeque<String> = inner.lines.iter().cloned().collect();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = if inner.closed {
            None
        } else {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.push((id, tx));
            Some(id)
        };
        Subscription {
            id,
            backlog,
            rx,
            source: Arc::downgrade(&self.inner),
        }
    }

    pub fn buffered_lines(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

/// One observer's view of a broadcast. Dropping it detaches the observer.
#[derive(Debug)]
pub struct Subscription {
    id: Option<u64>,
    backlog: VecDeque<String>,
    rx: mpsc::UnboundedReceiver<JobEvent>,
    source: Weak<Mutex<Inner>>,
}

impl Subscription {
    /// Buffered lines first (as `Output`), then live events. `None` once the
    /// job has finished and everything was delivered.
    pub async fn next(&mut self) -> Option<JobEvent> {
        if let Some(line) = self.backlog.pop_front() {
            return Some(JobEvent::Output(line));
        }
        self.rx.recv().await
    }

    #[cfg(test)]
    fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn into_stream(self) -> impl Stream<Item = JobEvent> + Send {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.next().await?;
            Some((event, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let (Some(id), Some(source)) = (self.id, self.source.upgrade()) else {
            return;
        };
        let mut inner = source.lock().unwrap_or_else(PoisonError::into_inner);
        inner.observers.retain(|(observer, _)| *observer != id);
    }
}
