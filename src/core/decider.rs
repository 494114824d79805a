// Notification decider - turns raw history records into notify/display batches.
//
// Each accepted record is run through the suppression rules in order:
// jump backup, wing-join churn, instance membership toggle (with the
// interdiction and pvp-kill overrides), then the wing notification policy.

use std::time::{Duration, Instant};

use super::config::Settings;
use super::location::LocationTracker;
use super::model::{capitalize, Actor, RawEntry, TAG_KILLED, TAG_MET, TAG_WING_MEMBER};
use super::store::ActorStore;

/// Output of one decision pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    /// Commanders worth a beep.
    pub notify: Vec<Actor>,
    /// Every commander whose metadata changed (a superset of `notify`).
    pub display: Vec<Actor>,
}

impl Decision {
    pub fn is_empty(&self) -> bool {
        self.notify.is_empty() && self.display.is_empty()
    }
}

/// Which transient windows are live for this pass.
#[derive(Debug, Clone, Copy, Default)]
struct RecentEvents {
    jump: bool,
    wing_join: bool,
    interdiction: bool,
    pvp_kill: bool,
}

impl RecentEvents {
    fn at(location: &LocationTracker, now: Instant, window: Duration) -> Self {
        let windows = location.windows();
        Self {
            jump: windows.jump.is_active(now, window),
            wing_join: windows.wing_join.is_active(now, window),
            interdiction: windows.interdiction.is_active(now, window),
            pvp_kill: windows.pvp_kill.is_active(now, window),
        }
    }
}

pub struct NotificationDecider {
    window: Duration,
    wing_notify: bool,
}

impl NotificationDecider {
    pub fn new(window: Duration, wing_notify: bool) -> Self {
        Self {
            window,
            wing_notify,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.suppression_window(), settings.wing_notify)
    }

    /// Runs one pass over `entries`, updating instance membership and the
    /// store as it goes. Windows are left untouched; the caller consumes them
    /// once the batches are out.
    pub fn decide(
        &self,
        entries: &[RawEntry],
        location: &mut LocationTracker,
        store: &mut ActorStore,
        now: Instant,
    ) -> Decision {
        let mut decision = Decision::default();
        let recent = RecentEvents::at(location, now, self.window);

        for entry in entries {
            let id = entry.commander_id;
            if !entry.has_tag(TAG_MET) {
                continue;
            }
            let Some(timestamp) = entry.timestamp() else {
                log::debug!("Commander {} has an out-of-range epoch {}", id, entry.epoch);
                continue;
            };
            let previous = store.get(id).cloned();
            if previous.as_ref().is_some_and(|p| timestamp <= p.last_seen) {
                continue;
            }

            if recent.jump && location.jump_backup().is_some_and(|b| b.is_here(id)) {
                log::debug!("Commander {} was already here before the jump", id);
                continue;
            }
            let wing_member = entry.has_tag(TAG_WING_MEMBER);
            if wing_member && recent.wing_join {
                log::debug!("Commander {} joined with the wing", id);
                continue;
            }

            let newly_killed = entry.has_tag(TAG_KILLED)
                && !previous
                    .as_ref()
                    .is_some_and(|p| p.interactions.iter().any(|t| t == TAG_KILLED));
            let mut actor = previous
                .clone()
                .unwrap_or_else(|| Actor::new(id, timestamp));
            actor.last_seen = timestamp;
            actor.interactions = entry.interactions.clone();

            let (state, system) = location.current();
            let system = system.to_string();
            let victim = location.windows().pvp_kill_victim.clone();

            let membership = location.membership_mut();
            let mut beep = match membership.get_mut(id) {
                None => {
                    membership.add(id, state, &system, (state, &system));
                    true
                }
                Some(record) if recent.interdiction => {
                    record.here = false;
                    false
                }
                Some(record) if recent.pvp_kill => {
                    record.here = true;
                    if newly_killed && actor.has_default_name() {
                        if let Some(victim) = victim.as_deref() {
                            actor.name = capitalize(victim);
                            log::info!("Commander {} identified as {} by kill", id, actor.name);
                        }
                    }
                    false
                }
                Some(record) if record.here => {
                    // Repeat detection: treat as leaving and wait for the next arrival.
                    record.here = false;
                    false
                }
                Some(record) => {
                    record.here = true;
                    record.state = state;
                    record.system = system;
                    true
                }
            };

            if wing_member && !self.wing_notify {
                beep = false;
            }

            if previous.as_ref() != Some(&actor) {
                decision.display.push(actor.clone());
                if beep {
                    decision.notify.push(actor.clone());
                }
                store.upsert(actor);
            }
        }

        decision
    }
}
