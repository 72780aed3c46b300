//! Progress reporting over a bounded channel.
//!
//! The engine never calls back into the host. It pushes [`ProgressEvent`]s
//! into a `tokio::sync::mpsc` channel and the host drains the receiver on
//! whatever thread or task it likes.

use tokio::sync::mpsc;

/// Stage label while a payload is streamed to disk.
pub const STAGE_DOWNLOADING: &str = "Downloading";
/// Stage label while an archive is unpacked.
pub const STAGE_EXTRACTING: &str = "Extracting";
/// Stage label while extracted content is moved into the install dir.
pub const STAGE_INSTALLING: &str = "Installing";
/// Stage label once the whole reconciliation succeeded.
pub const STAGE_DONE: &str = "Done";

/// Stage label while a category delta is applied.
pub fn updating_stage(category: &str) -> String {
    format!("Updating {category}")
}

/// A single progress update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub stage: String,
    /// Always within `0..=100`.
    pub percent: u8,
}

/// Sending half of the progress channel.
///
/// Cheap to clone. A reporter whose receiver has been dropped silently
/// discards events, so a host that stops listening never fails an update.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressReporter {
    /// Create a reporter and the receiver the host drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that discards every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Send an event, waiting for channel capacity.
    pub async fn report(&self, stage: &str, percent: u8) {
        if let Some(tx) = &self.tx {
            let event = ProgressEvent {
                stage: stage.to_string(),
                percent: percent.min(100),
            };
            let _ = tx.send(event).await;
        }
    }

    /// Send an event from synchronous code running on a blocking thread.
    ///
    /// Must not be called from inside an async task.
    pub fn report_blocking(&self, stage: &str, percent: u8) {
        if let Some(tx) = &self.tx {
            let event = ProgressEvent {
                stage: stage.to_string(),
                percent: percent.min(100),
            };
            let _ = tx.blocking_send(event);
        }
    }

    /// Start tracking a stage of `total` units.
    pub fn tracker(&self, stage: impl Into<String>, total: Option<u64>) -> PercentTracker {
        PercentTracker::new(self.clone(), stage, total)
    }
}

/// Converts a running unit count into strictly increasing percentages.
///
/// Intermediate events are emitted only when the integer percentage grows,
/// so a stage never produces more than 101 events. When the total is unknown
/// or zero no intermediate events are produced. [`finish`](Self::finish)
/// always yields exactly one final 100.
#[derive(Debug)]
pub struct PercentTracker {
    reporter: ProgressReporter,
    stage: String,
    total: Option<u64>,
    last: Option<u8>,
}

impl PercentTracker {
    fn new(reporter: ProgressReporter, stage: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            reporter,
            stage: stage.into(),
            total: total.filter(|t| *t > 0),
            last: None,
        }
    }

    /// Stage label this tracker reports under.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Percentage to emit for `done` units, if it advances the sequence.
    pub fn next_percent(&mut self, done: u64) -> Option<u8> {
        let total = self.total?;
        let percent = ((done.min(total) as u128 * 100) / total as u128) as u8;
        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }

    /// The closing 100, unless it was already emitted.
    pub fn final_percent(&mut self) -> Option<u8> {
        if self.last == Some(100) {
            return None;
        }
        self.last = Some(100);
        Some(100)
    }

    /// Report progress after `done` units.
    pub async fn update(&mut self, done: u64) {
        if let Some(percent) = self.next_percent(done) {
            self.reporter.report(&self.stage, percent).await;
        }
    }

    /// Report completion of the stage.
    pub async fn finish(&mut self) {
        if let Some(percent) = self.final_percent() {
            self.reporter.report(&self.stage, percent).await;
        }
    }

    /// Blocking variant of [`update`](Self::update).
    pub fn update_blocking(&mut self, done: u64) {
        if let Some(percent) = self.next_percent(done) {
            self.reporter.report_blocking(&self.stage, percent);
        }
    }

    /// Blocking variant of [`finish`](Self::finish).
    pub fn finish_blocking(&mut self) {
        if let Some(percent) = self.final_percent() {
            self.reporter.report_blocking(&self.stage, percent);
        }
    }
}

/// Drain every event currently buffered in `rx`.
pub fn drain(rx: &mut mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
