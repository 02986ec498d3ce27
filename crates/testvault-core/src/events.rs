use crate::numbering::SeriesBuild;
use crate::status::Status;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use testvault_store::RowId;
use tokio::sync::mpsc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Persisted {
    Stored,
    /// Already recorded under the same parent; dropped with a warning.
    Duplicate,
    /// Not written because of configuration (keywords or logs disabled, level filtered).
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArchiveEvent {
    SuiteFinished {
        run_id: RowId,
        suite_id: RowId,
        full_name: String,
        status: Status,
        execution_path: String,
        fingerprint: Option<String>,
        elapsed: Option<i64>,
        persisted: Persisted,
    },
    TestFinished {
        run_id: RowId,
        test_id: RowId,
        full_name: String,
        status: Status,
        execution_path: String,
        fingerprint: Option<String>,
        elapsed: Option<i64>,
        tags: Vec<String>,
        persisted: Persisted,
    },
    RunFinished {
        run_id: RowId,
        dryrun: bool,
        builds: Vec<SeriesBuild>,
    },
}

pub trait ArchiveObserver: Send + Sync {
    fn on_event(&self, event: &ArchiveEvent);
}

impl<F> ArchiveObserver for F
where
    F: Fn(&ArchiveEvent) + Send + Sync,
{
    fn on_event(&self, event: &ArchiveEvent) {
        self(event);
    }
}

pub type SharedArchiveObserver = Arc<dyn ArchiveObserver>;
pub type ArchiveEventSender = mpsc::UnboundedSender<ArchiveEvent>;
pub type ArchiveEventReceiver = mpsc::UnboundedReceiver<ArchiveEvent>;

/// Fans every event out to all registered observers and an optional channel.
#[derive(Clone, Default)]
pub struct ArchiveEventSink {
    observers: Vec<SharedArchiveObserver>,
    sender: Option<ArchiveEventSender>,
}

impl ArchiveEventSink {
    pub fn with_observer(observer: SharedArchiveObserver) -> Self {
        Self {
            observers: vec![observer],
            sender: None,
        }
    }

    pub fn observer(mut self, observer: SharedArchiveObserver) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn sender(mut self, sender: ArchiveEventSender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn emit(&self, event: ArchiveEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
        if let Some(sender) = self.sender.as_ref() {
            let _ = sender.send(event);
        }
    }
}

pub fn archive_event_channel() -> (ArchiveEventSender, ArchiveEventReceiver) {
    mpsc::unbounded_channel()
}
