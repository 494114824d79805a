//! Output slots for decision batches.

use tokio::sync::mpsc;

use super::decider::Decision;
use super::model::Actor;

/// Receives the two batches produced by a decision pass. Both are only ever
/// called with a non-empty batch, once per pass.
pub trait EncounterSink: Send + Sync {
    /// Commanders worth a beep. Sound selection and playback are up to the sink.
    fn notify(&self, batch: &[Actor]);
    /// Every commander whose metadata changed this pass.
    fn display(&self, batch: &[Actor]);
}

pub fn dispatch(sink: &dyn EncounterSink, decision: &Decision) {
    if !decision.notify.is_empty() {
        sink.notify(&decision.notify);
    }
    if !decision.display.is_empty() {
        sink.display(&decision.display);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EncounterEvent {
    Notify(Vec<Actor>),
    Display(Vec<Actor>),
}

/// Forwards batches into a channel so they can be handled off the worker.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EncounterEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EncounterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: EncounterEvent) {
        if self.tx.send(event).is_err() {
            log::warn!("Encounter receiver dropped, discarding batch");
        }
    }
}

impl EncounterSink for ChannelSink {
    fn notify(&self, batch: &[Actor]) {
        self.send(EncounterEvent::Notify(batch.to_vec()));
    }

    fn display(&self, batch: &[Actor]) {
        self.send(EncounterEvent::Display(batch.to_vec()));
    }
}

/// Collects every batch it receives. Test helper.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    pub notified: std::sync::Mutex<Vec<Vec<Actor>>>,
    pub displayed: std::sync::Mutex<Vec<Vec<Actor>>>,
}

#[cfg(test)]
impl EncounterSink for RecordingSink {
    fn notify(&self, batch: &[Actor]) {
        self.notified.lock().unwrap().push(batch.to_vec());
    }

    fn display(&self, batch: &[Actor]) {
        self.displayed.lock().unwrap().push(batch.to_vec());
    }
}
