use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::context::{Context, WatchState};
use super::decider::{Decision, NotificationDecider};
use super::dispatch::{dispatch, EncounterSink};
use super::feed::FeedAggregator;

/// One poll cycle: feed, decide, dispatch, persist, consume windows.
pub struct Coordinator {
    ctx: Arc<Context>,
    feed: FeedAggregator,
    sink: Arc<dyn EncounterSink>,
    first_run: bool,
}

impl Coordinator {
    pub fn new(ctx: Arc<Context>, sink: Arc<dyn EncounterSink>) -> Self {
        let history_dir = ctx.lock().settings.history_dir.clone();
        Self {
            ctx,
            feed: FeedAggregator::new(history_dir),
            sink,
            first_run: true,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.ctx.lock().settings.poll_interval()
    }

    pub fn tick(&mut self) -> Decision {
        // Hot-reload: a new history directory starts over with a fresh bootstrap.
        let history_dir = self.ctx.lock().settings.history_dir.clone();
        if history_dir != self.feed.dir() {
            log::info!("Commander history directory changed to {:?}", history_dir);
            self.feed.set_dir(history_dir);
            self.first_run = true;
        }

        let Some(entries) = self.feed.poll(self.first_run) else {
            return Decision::default();
        };
        self.first_run = false;

        let decision = {
            let mut guard = self.ctx.lock();
            let WatchState {
                settings,
                store,
                location,
            } = &mut *guard;
            let now = Instant::now();
            location.note_data_received(now);

            let decision = NotificationDecider::from_settings(settings).decide(&entries, location, store, now);
            store.persist_if_dirty();
            location.finish_pass();
            decision
        };

        if !decision.is_empty() {
            log::info!(
                "{} new records: {} to notify, {} to display",
                entries.len(),
                decision.notify.len(),
                decision.display.len()
            );
        }
        dispatch(self.sink.as_ref(), &decision);
        decision
    }
}

/// Handle to the background poll worker.
pub struct WorkerHandle {
    ctx: Arc<Context>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Starts the poll loop on the context's runtime.
pub fn spawn_worker(ctx: Arc<Context>, sink: Arc<dyn EncounterSink>) -> WorkerHandle {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let mut coordinator = Coordinator::new(Arc::clone(&ctx), sink);

    let task = ctx.runtime().spawn(async move {
        log::info!("Commander history worker started, watching {:?}", coordinator.feed.dir());
        loop {
            // A failing pass is logged and the loop keeps going; whatever it
            // already changed stays changed.
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| coordinator.tick())) {
                log::error!("Decision pass failed: {}", panic_message(panic.as_ref()));
            }

            tokio::select! {
                _ = tokio::time::sleep(coordinator.poll_interval()) => {}
                _ = stop_rx.changed() => break,
            }
        }
        log::info!("Commander history worker stopped");
    });

    WorkerHandle { ctx, stop_tx, task }
}

impl WorkerHandle {
    /// Signals the worker to stop and waits up to `timeout` for it. Any
    /// pending deferred reset is cancelled. Returns false on timeout.
    pub async fn shutdown(self, timeout: Duration) -> bool {
        let _ = self.stop_tx.send(true);
        self.ctx.cancel_deferred_reset();

        match tokio::time::timeout(timeout, self.task).await {
            Ok(_) => true,
            Err(_) => {
                log::warn!("Worker did not stop within {:?}", timeout);
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Settings;
    use crate::core::dispatch::RecordingSink;
    use crate::core::model::LocationState;
    use crate::core::store::ActorStore;
    use crate::core::model::Actor;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::SystemTime;
    use tempfile::tempdir;
    use tokio::runtime::Handle;

    const BASE_EPOCH: i64 = 13_350_000_000;

    fn write_history(dir: &Path, entries: &[(u64, i64)]) {
        let interactions: Vec<serde_json::Value> = entries
            .iter()
            .map(|(id, epoch)| serde_json::json!({"CommanderID": id, "Epoch": epoch, "Interactions": ["Met"]}))
            .collect();
        fs::write(
            dir.join("Commander1.cmdrHistory"),
            serde_json::json!({ "Interactions": interactions }).to_string(),
        )
        .unwrap();
    }

    /// Panics on the first notify batch, records everything after.
    #[derive(Default)]
    struct FlakySink {
        failed: AtomicBool,
        inner: RecordingSink,
    }

    impl EncounterSink for FlakySink {
        fn notify(&self, batch: &[Actor]) {
            if !self.failed.swap(true, Ordering::SeqCst) {
                panic!("sink unavailable");
            }
            self.inner.notify(batch);
        }

        fn display(&self, batch: &[Actor]) {
            self.inner.display(batch);
        }
    }

    fn setup(dir: &Path) -> (Arc<Context>, Arc<RecordingSink>) {
        let settings = Settings {
            history_dir: dir.join("history"),
            store_path: dir.join("seen.json"),
            poll_interval_ms: 10,
            ..Settings::default()
        };
        fs::create_dir_all(&settings.history_dir).unwrap();
        let store = ActorStore::new(&settings.store_path);
        let ctx = Context::new(settings, store, Handle::current());
        ctx.transition(LocationState::NormalSpace, "Sol");
        (ctx, Arc::new(RecordingSink::default()))
    }

    #[tokio::test]
    async fn test_coordinator_flow() {
        let dir = tempdir().unwrap();
        let (ctx, sink) = setup(dir.path());
        let history = dir.path().join("history");
        let mut coordinator = Coordinator::new(Arc::clone(&ctx), sink.clone());

        // Nothing to read yet.
        assert!(coordinator.tick().is_empty());

        write_history(&history, &[(42, BASE_EPOCH)]);
        let decision = coordinator.tick();
        assert_eq!(decision.notify.len(), 1);
        assert_eq!(sink.notified.lock().unwrap().len(), 1);
        assert_eq!(sink.displayed.lock().unwrap().len(), 1);

        // Unchanged feed: nothing more.
        assert!(coordinator.tick().is_empty());
        assert_eq!(sink.notified.lock().unwrap().len(), 1);

        // Persisted.
        let stored = ActorStore::load(dir.path().join("seen.json")).unwrap();
        assert!(stored.contains(42));
    }

    #[tokio::test]
    async fn test_tick_consumes_windows() {
        let dir = tempdir().unwrap();
        let (ctx, sink) = setup(dir.path());
        let mut coordinator = Coordinator::new(Arc::clone(&ctx), sink);

        ctx.note_interdiction();
        ctx.note_pvp_kill("jameson");
        write_history(&dir.path().join("history"), &[(42, BASE_EPOCH)]);
        coordinator.tick();

        let state = ctx.lock();
        assert!(state.location.windows().interdiction.marked_at().is_none());
        assert!(state.location.windows().pvp_kill_victim.is_none());
    }

    #[tokio::test]
    async fn test_history_dir_hot_reload() {
        let dir = tempdir().unwrap();
        let (ctx, sink) = setup(dir.path());
        let mut coordinator = Coordinator::new(Arc::clone(&ctx), sink);

        let other = dir.path().join("other");
        fs::create_dir_all(&other).unwrap();
        write_history(&other, &[(7, BASE_EPOCH)]);

        let mut settings = ctx.settings();
        settings.history_dir = other;
        ctx.update_settings(settings);

        let decision = coordinator.tick();
        assert_eq!(decision.notify.len(), 1);
        assert_eq!(decision.notify[0].commander_id, 7);
    }

    #[tokio::test]
    async fn test_worker_runs_and_shuts_down() {
        let dir = tempdir().unwrap();
        let (ctx, sink) = setup(dir.path());
        write_history(&dir.path().join("history"), &[(42, BASE_EPOCH)]);

        let worker = spawn_worker(Arc::clone(&ctx), sink.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(worker.shutdown(Duration::from_secs(2)).await);

        assert_eq!(sink.notified.lock().unwrap().len(), 1);
        assert!(ctx.lock().store.contains(42));
    }

    #[tokio::test]
    async fn test_worker_survives_failing_pass() {
        let dir = tempdir().unwrap();
        let (ctx, _) = setup(dir.path());
        let history = dir.path().join("history");
        let sink = Arc::new(FlakySink::default());
        write_history(&history, &[(42, BASE_EPOCH)]);

        let worker = spawn_worker(Arc::clone(&ctx), sink.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(sink.failed.load(Ordering::SeqCst));
        assert!(sink.inner.notified.lock().unwrap().is_empty());

        write_history(&history, &[(7, BASE_EPOCH + 1)]);
        fs::File::options()
            .write(true)
            .open(history.join("Commander1.cmdrHistory"))
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(10))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(worker.shutdown(Duration::from_secs(2)).await);

        let notified = sink.inner.notified.lock().unwrap();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0][0].commander_id, 7);
        // The failed pass still recorded its commander.
        assert!(ctx.lock().store.contains(42));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_reset() {
        let dir = tempdir().unwrap();
        let (ctx, sink) = setup(dir.path());
        let mut settings = ctx.settings();
        settings.reset_delay_secs = 1;
        ctx.update_settings(settings);
        ctx.lock()
            .location
            .membership_mut()
            .add(1, LocationState::NormalSpace, "Sol", (LocationState::NormalSpace, "Sol"));

        let worker = spawn_worker(Arc::clone(&ctx), sink);
        ctx.trigger();
        assert!(ctx.lock().location.has_pending_reset());
        assert!(worker.shutdown(Duration::from_secs(2)).await);

        tokio::time::sleep(Duration::from_millis(1200)).await;
        let state = ctx.lock();
        assert!(!state.location.has_pending_reset());
        assert_eq!(state.location.membership().len(), 1);
    }
}
