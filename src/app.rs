use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{
    config::{ConfigManager, Settings},
    context::Context,
    coordinator,
    dispatch::{ChannelSink, EncounterEvent},
    journal::{self, JournalFollower},
    model::Actor,
    sounds::{self, SoundCatalog},
    store::ActorStore,
};

const JOURNAL_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Initialize Config
    let config_dir = std::env::args().nth(1).map_or_else(|| PathBuf::from("."), PathBuf::from);
    let config_manager = ConfigManager::new(&config_dir);
    let settings = config_manager.load();
    log::info!("Using settings from {:?}", config_manager.path());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(serve(settings));
}

async fn serve(settings: Settings) {
    let store = ActorStore::load_or_default(&settings.store_path);
    log::info!("{} known commanders in {:?}", store.len(), store.path());
    let sounds = SoundCatalog::scan(&settings.sounds_dir);

    let ctx = Context::new(settings, store, tokio::runtime::Handle::current());
    let (sink, mut events) = ChannelSink::new();
    let worker = coordinator::spawn_worker(Arc::clone(&ctx), Arc::new(sink));

    // Start the journal follower
    let journal_ctx = Arc::clone(&ctx);
    let journal_task = tokio::spawn(async move {
        let mut journal_dir = journal_ctx.settings().journal_dir;
        let mut follower = JournalFollower::new(journal_dir.clone());
        log::info!("Journal follower started. Monitoring: {:?}", journal_dir);

        loop {
            // Hot-reload: journal directory
            let current = journal_ctx.settings().journal_dir;
            if current != journal_dir {
                journal_dir = current;
                follower = JournalFollower::new(journal_dir.clone());
                log::info!("Journal directory changed to {:?}", journal_dir);
            }

            for event in follower.poll() {
                log::debug!("Journal: {:?}", event);
                journal::apply(&journal_ctx, &event);
            }
            tokio::time::sleep(JOURNAL_POLL_INTERVAL).await;
        }
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => handle_event(&ctx, &sounds, event),
                None => break,
            },
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                }
                log::info!("Shutting down");
                break;
            }
        }
    }

    journal_task.abort();
    worker.shutdown(SHUTDOWN_TIMEOUT).await;
    let saved = ctx.lock().store.save();
    if let Err(e) = saved {
        log::error!("Failed to save commander store: {}", e);
    }
}

fn handle_event(ctx: &Context, sounds: &SoundCatalog, event: EncounterEvent) {
    match event {
        EncounterEvent::Notify(batch) => {
            let settings = ctx.settings();
            if settings.mute {
                log::debug!("Muted, skipping beep for {} commanders", batch.len());
                return;
            }
            let Some(class) = sounds.select_for_batch(&batch) else {
                log::debug!("Nothing audible in a batch of {}", batch.len());
                return;
            };
            if let Some(file) = sounds.resolve(class) {
                log::info!(
                    "Beep '{}' ({:?}, gain {:.2}) for {}",
                    class,
                    file,
                    sounds::gain(settings.volume),
                    describe(&batch)
                );
            }
        }
        EncounterEvent::Display(batch) => {
            for actor in &batch {
                log::info!(
                    "Commander {} '{}' [{}] last seen {} ({})",
                    actor.commander_id,
                    actor.name,
                    actor.sound,
                    actor.last_seen.to_rfc3339(),
                    actor.interactions.join(", ")
                );
            }
        }
    }
}

fn describe(batch: &[Actor]) -> String {
    batch
        .iter()
        .map(|actor| format!("{} ({})", actor.name, actor.commander_id))
        .collect::<Vec<_>>()
        .join(", ")
}
