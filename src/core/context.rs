//! Shared watcher state.
//!
//! Settings, the commander store and the location tracker sit behind one lock
//! so the poll worker, the deferred reset task and any foreign caller (a UI
//! renaming a commander, the journal reader) always see a consistent view.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::runtime::Handle;

use super::config::Settings;
use super::location::LocationTracker;
use super::model::{Actor, ActorId, LocationState};
use super::store::ActorStore;

pub struct WatchState {
    pub settings: Settings,
    pub store: ActorStore,
    pub location: LocationTracker,
}

pub struct Context {
    state: Mutex<WatchState>,
    runtime: Handle,
}

impl Context {
    pub fn new(settings: Settings, store: ActorStore, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WatchState {
                settings,
                store,
                location: LocationTracker::new(),
            }),
            runtime,
        })
    }

    /// Locks the shared state. A panic on another holder does not make the
    /// state unusable; the poisoned guard is taken over.
    pub fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    pub fn update_settings(&self, settings: Settings) {
        self.lock().settings = settings;
    }

    pub fn actors(&self) -> Vec<Actor> {
        self.lock().store.actors().cloned().collect()
    }

    pub fn set_name(&self, id: ActorId, name: &str) -> bool {
        self.lock().store.set_name(id, name)
    }

    pub fn set_sound(&self, id: ActorId, sound: &str) -> bool {
        self.lock().store.set_sound(id, sound)
    }

    pub fn transition(&self, state: LocationState, system: &str) {
        self.lock().location.transition(state, system);
    }

    pub fn begin_jump(&self) {
        self.lock().location.begin_jump(Instant::now());
    }

    pub fn set_wing(&self, in_wing: bool) {
        let mut state = self.lock();
        state.location.set_wing(in_wing);
        state.location.note_wing_changed(Instant::now());
    }

    pub fn note_wing_changed(&self) {
        self.lock().location.note_wing_changed(Instant::now());
    }

    pub fn note_interdiction(&self) {
        self.lock().location.note_interdiction(Instant::now());
    }

    pub fn note_pvp_kill(&self, victim: &str) {
        self.lock().location.note_pvp_kill(victim, Instant::now());
    }

    pub fn expire_stale_interdiction(&self) {
        self.lock().location.expire_stale_interdiction(Instant::now());
    }

    /// Arms the deferred instance reset, replacing any pending one. If no
    /// commander history arrives within the configured delay, the instance is
    /// assumed empty.
    pub fn trigger(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let mut state = self.lock();
        let delay = state.settings.reset_delay();
        let runtime = self.runtime.clone();

        state.location.arm_deferred_reset(Instant::now(), |ticket| {
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(ctx) = weak.upgrade() {
                    ctx.lock().location.fire_deferred_reset(ticket);
                }
            })
        });
    }

    pub fn cancel_deferred_reset(&self) {
        self.lock().location.cancel_deferred_reset();
    }
}
