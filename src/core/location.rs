//! Observer location state, transient event windows and instance resets.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use super::instance::InstanceMembership;
use super::model::LocationState;

/// Interdiction markers older than this are dropped on supercruise exit.
pub const INTERDICTION_MAX_AGE: Duration = Duration::from_secs(120);

/// A time-boxed marker recording that a contextual event happened recently.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransientWindow {
    marked_at: Option<Instant>,
}

impl TransientWindow {
    pub fn mark_at(&mut self, at: Instant) {
        self.marked_at = Some(at);
    }

    pub fn clear(&mut self) {
        self.marked_at = None;
    }

    pub fn marked_at(&self) -> Option<Instant> {
        self.marked_at
    }

    pub fn is_active(&self, now: Instant, window: Duration) -> bool {
        self.marked_at
            .is_some_and(|at| now.saturating_duration_since(at) <= window)
    }
}

#[derive(Clone, Debug, Default)]
pub struct TransientWindows {
    pub jump: TransientWindow,
    pub wing_join: TransientWindow,
    pub interdiction: TransientWindow,
    pub pvp_kill: TransientWindow,
    pub pvp_kill_victim: Option<String>,
}

impl TransientWindows {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Identifies one armed deferred reset. A reset only fires if its ticket is
/// still the latest one when it wakes up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResetTicket {
    pub generation: u64,
    pub armed_at: Instant,
}

#[derive(Debug, Default)]
pub struct LocationTracker {
    state: LocationState,
    system: String,
    prev_state: LocationState,
    prev_system: String,
    wing: bool,
    membership: InstanceMembership,
    jump_backup: Option<InstanceMembership>,
    windows: TransientWindows,
    pending_reset: Option<JoinHandle<()>>,
    reset_generation: u64,
    last_data_at: Option<Instant>,
}

impl LocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> (LocationState, &str) {
        (self.state, &self.system)
    }

    pub fn previous(&self) -> (LocationState, &str) {
        (self.prev_state, &self.prev_system)
    }

    pub fn in_wing(&self) -> bool {
        self.wing
    }

    pub fn set_wing(&mut self, in_wing: bool) {
        self.wing = in_wing;
    }

    pub fn membership(&self) -> &InstanceMembership {
        &self.membership
    }

    pub fn membership_mut(&mut self) -> &mut InstanceMembership {
        &mut self.membership
    }

    pub fn jump_backup(&self) -> Option<&InstanceMembership> {
        self.jump_backup.as_ref()
    }

    pub fn windows(&self) -> &TransientWindows {
        &self.windows
    }

    /// Records a move to `(state, system)`.
    ///
    /// The instance is considered left only when both the state and the system
    /// change at once; membership is emptied in that case.
    pub fn transition(&mut self, state: LocationState, system: &str) {
        if state != self.state && system != self.system {
            if !self.membership.is_empty() {
                log::debug!(
                    "Leaving instance {:?}/{} for {:?}/{}, forgetting {} commanders",
                    self.state,
                    self.system,
                    state,
                    system,
                    self.membership.len()
                );
            }
            self.membership.clear();
        }

        self.prev_state = self.state;
        self.prev_system = std::mem::replace(&mut self.system, system.to_string());
        self.state = state;
    }

    /// Called when a jump sequence starts. Only a jump that actually changed
    /// system snapshots the membership; otherwise any stale jump marker goes.
    pub fn begin_jump(&mut self, now: Instant) {
        if self.prev_system != self.system {
            log::debug!(
                "Jump {} -> {}: backing up {} commanders",
                self.prev_system,
                self.system,
                self.membership.len()
            );
            self.windows.jump.mark_at(now);
            self.jump_backup = Some(self.membership.take());
        } else {
            self.windows.jump.clear();
            self.jump_backup = None;
        }
    }

    pub fn note_wing_changed(&mut self, now: Instant) {
        self.windows.wing_join.mark_at(now);
    }

    pub fn note_interdiction(&mut self, now: Instant) {
        self.windows.interdiction.mark_at(now);
    }

    /// Marks a kill. An empty victim name still opens the window but leaves
    /// nothing to attribute.
    pub fn note_pvp_kill(&mut self, victim: &str, now: Instant) {
        self.windows.pvp_kill.mark_at(now);
        let victim = victim.trim();
        self.windows.pvp_kill_victim = (!victim.is_empty()).then(|| victim.to_string());
    }

    /// Drops an interdiction marker that has outlived `INTERDICTION_MAX_AGE`.
    pub fn expire_stale_interdiction(&mut self, now: Instant) {
        if let Some(at) = self.windows.interdiction.marked_at() {
            if now.saturating_duration_since(at) > INTERDICTION_MAX_AGE {
                self.windows.interdiction.clear();
            }
        }
    }

    /// Ends a decision pass: every window is consumed and the jump backup dropped.
    pub fn finish_pass(&mut self) {
        self.windows.clear();
        self.jump_backup = None;
    }

    pub fn note_data_received(&mut self, now: Instant) {
        self.last_data_at = Some(now);
    }

    /// Arms a deferred reset, cancelling any pending one. `spawn` starts the
    /// delayed task and must hand the ticket back to `fire_deferred_reset`.
    pub fn arm_deferred_reset<F>(&mut self, now: Instant, spawn: F)
    where
        F: FnOnce(ResetTicket) -> JoinHandle<()>,
    {
        self.cancel_deferred_reset();
        self.reset_generation = self.reset_generation.wrapping_add(1);
        let ticket = ResetTicket {
            generation: self.reset_generation,
            armed_at: now,
        };
        self.pending_reset = Some(spawn(ticket));
    }

    /// Runs an armed reset. Returns true when the membership was cleared,
    /// false when the ticket was superseded or fresh feed data arrived since
    /// it was armed.
    pub fn fire_deferred_reset(&mut self, ticket: ResetTicket) -> bool {
        if ticket.generation != self.reset_generation || self.pending_reset.is_none() {
            return false;
        }
        self.pending_reset = None;

        if self.last_data_at.is_some_and(|at| at >= ticket.armed_at) {
            return false;
        }
        log::info!(
            "No commander history within reset delay, assuming empty instance ({} forgotten)",
            self.membership.len()
        );
        self.membership.clear();
        true
    }

    pub fn cancel_deferred_reset(&mut self) {
        if let Some(task) = self.pending_reset.take() {
            task.abort();
        }
    }

    pub fn has_pending_reset(&self) -> bool {
        self.pending_reset.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_in(state: LocationState, system: &str) -> LocationTracker {
        let mut tracker = LocationTracker::new();
        tracker.transition(state, system);
        tracker
    }

    fn add_present(tracker: &mut LocationTracker, id: u64) {
        let (state, system) = tracker.current();
        let system = system.to_string();
        tracker
            .membership_mut()
            .add(id, state, &system, (state, &system));
    }

    #[test]
    fn test_transition_records_previous() {
        let mut tracker = tracker_in(LocationState::Supercruise, "Sol");
        tracker.transition(LocationState::NormalSpace, "Sol");

        assert_eq!(tracker.current(), (LocationState::NormalSpace, "Sol"));
        assert_eq!(tracker.previous(), (LocationState::Supercruise, "Sol"));
    }

    #[test]
    fn test_transition_resets_only_on_state_and_system_change() {
        let mut tracker = tracker_in(LocationState::Supercruise, "Sol");
        add_present(&mut tracker, 1);

        // Same system, new state: instance kept.
        tracker.transition(LocationState::NormalSpace, "Sol");
        assert_eq!(tracker.membership().len(), 1);

        // Same state, new system: instance kept.
        tracker.transition(LocationState::NormalSpace, "Lave");
        assert_eq!(tracker.membership().len(), 1);

        // Both change: instance reset.
        tracker.transition(LocationState::Supercruise, "Diso");
        assert!(tracker.membership().is_empty());
    }

    #[test]
    fn test_begin_jump_snapshots_on_system_change() {
        let mut tracker = tracker_in(LocationState::Supercruise, "Sol");
        add_present(&mut tracker, 1);
        tracker.transition(LocationState::Supercruise, "Lave");

        let now = Instant::now();
        tracker.begin_jump(now);

        assert!(tracker.membership().is_empty());
        assert!(tracker.jump_backup().unwrap().is_here(1));
        assert_eq!(tracker.windows().jump.marked_at(), Some(now));
    }

    #[test]
    fn test_begin_jump_without_system_change_clears_marker() {
        let mut tracker = tracker_in(LocationState::Supercruise, "Sol");
        tracker.transition(LocationState::Supercruise, "Lave");
        tracker.begin_jump(Instant::now());
        assert!(tracker.jump_backup().is_some());

        tracker.transition(LocationState::Supercruise, "Lave");
        add_present(&mut tracker, 2);
        tracker.begin_jump(Instant::now());

        assert!(tracker.jump_backup().is_none());
        assert!(tracker.windows().jump.marked_at().is_none());
        assert_eq!(tracker.membership().len(), 1);
    }

    #[test]
    fn test_window_activity() {
        let now = Instant::now();
        let window = Duration::from_secs(60);
        let mut marker = TransientWindow::default();
        assert!(!marker.is_active(now, window));

        marker.mark_at(now);
        assert!(marker.is_active(now + Duration::from_secs(60), window));
        assert!(!marker.is_active(now + Duration::from_secs(61), window));
    }

    #[test]
    fn test_finish_pass_clears_everything() {
        let mut tracker = tracker_in(LocationState::Supercruise, "Sol");
        tracker.transition(LocationState::Supercruise, "Lave");
        let now = Instant::now();
        tracker.begin_jump(now);
        tracker.note_wing_changed(now);
        tracker.note_interdiction(now);
        tracker.note_pvp_kill("jameson", now);

        tracker.finish_pass();

        let windows = tracker.windows();
        assert!(windows.jump.marked_at().is_none());
        assert!(windows.wing_join.marked_at().is_none());
        assert!(windows.interdiction.marked_at().is_none());
        assert!(windows.pvp_kill.marked_at().is_none());
        assert!(windows.pvp_kill_victim.is_none());
        assert!(tracker.jump_backup().is_none());
    }

    #[test]
    fn test_stale_interdiction_expires() {
        let mut tracker = LocationTracker::new();
        let then = Instant::now();
        tracker.note_interdiction(then);

        tracker.expire_stale_interdiction(then + Duration::from_secs(30));
        assert!(tracker.windows().interdiction.marked_at().is_some());

        tracker.expire_stale_interdiction(then + Duration::from_secs(121));
        assert!(tracker.windows().interdiction.marked_at().is_none());
    }

    #[tokio::test]
    async fn test_deferred_reset_clears_without_data() {
        let mut tracker = tracker_in(LocationState::NormalSpace, "Sol");
        add_present(&mut tracker, 1);

        let mut armed = None;
        tracker.arm_deferred_reset(Instant::now(), |ticket| {
            armed = Some(ticket);
            tokio::spawn(async {})
        });

        assert!(tracker.fire_deferred_reset(armed.unwrap()));
        assert!(tracker.membership().is_empty());
        assert!(!tracker.has_pending_reset());
    }

    #[tokio::test]
    async fn test_deferred_reset_skipped_after_fresh_data() {
        let mut tracker = tracker_in(LocationState::NormalSpace, "Sol");
        add_present(&mut tracker, 1);

        let now = Instant::now();
        let mut armed = None;
        tracker.arm_deferred_reset(now, |ticket| {
            armed = Some(ticket);
            tokio::spawn(async {})
        });
        tracker.note_data_received(now + Duration::from_millis(10));

        assert!(!tracker.fire_deferred_reset(armed.unwrap()));
        assert_eq!(tracker.membership().len(), 1);
    }

    #[tokio::test]
    async fn test_rearming_supersedes_pending_reset() {
        let mut tracker = tracker_in(LocationState::NormalSpace, "Sol");
        add_present(&mut tracker, 1);

        let mut first = None;
        tracker.arm_deferred_reset(Instant::now(), |ticket| {
            first = Some(ticket);
            tokio::spawn(async {})
        });
        let mut second = None;
        tracker.arm_deferred_reset(Instant::now(), |ticket| {
            second = Some(ticket);
            tokio::spawn(async {})
        });

        assert!(!tracker.fire_deferred_reset(first.unwrap()));
        assert_eq!(tracker.membership().len(), 1);
        assert!(tracker.fire_deferred_reset(second.unwrap()));
        assert!(tracker.membership().is_empty());
    }
}
