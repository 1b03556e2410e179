//! Lighting scheduler: keeps one time-ordered queue of on/off transitions
//! and switches device groups when they come due.
//!
//! Every leader group has exactly one pending event: whichever of its next
//! ON and next OFF instants comes first.  The queue is only ever touched
//! through [`ScheduleEngine::reschedule`], which purges the group's old event
//! before inserting the new one, so the at-most-one-per-action rule holds
//! after every mutation.  Follower groups (`follow = "<leader>"`) have no
//! events of their own and copy the leader's scheduled actions.
//!
//! ## Per-group cycle
//!
//! ```text
//!        next_on < next_off                    next_off < next_on
//!  OFF ──[TURN_ON queued]──▶ fire ──▶ ON ──[TURN_OFF queued]──▶ fire ──▶ OFF
//!   ▲                                                                    │
//!   └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A timer-disabled group keeps cycling through the queue, but firing it
//! issues no physical action.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::device::{Brightness, ClockTime, DeviceGroup, DeviceKind, ScheduleMode};
use crate::mqtt::Publisher;
use crate::solar::{at_local, local_date, SolarClock};
use crate::state::SharedState;

/// Upper bound on how long the run loop sleeps between queue checks.
const MAX_WAIT: StdDuration = StdDuration::from_secs(1);

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    TurnOn,
    TurnOff,
}

impl Action {
    fn is_on(self) -> bool {
        matches!(self, Self::TurnOn)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleEvent {
    pub at: DateTime<Utc>,
    pub group: String,
    pub action: Action,
}

/// Which transition of a group an operator change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edge {
    On,
    Off,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("unknown group '{0}'")]
    UnknownGroup(String),
    #[error("invalid time")]
    InvalidTime,
    #[error("group '{0}' is not dimmable")]
    NotDimmable(String),
    #[error("brightness {0} out of range 0-254")]
    InvalidBrightness(i64),
    #[error("group '{0}' follows another group and has no schedule of its own")]
    Follower(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupStatus {
    pub name: String,
    pub kind: DeviceKind,
    pub members: Vec<String>,
    pub state: bool,
    pub brightness: Option<u8>,
    pub on_mode: ScheduleMode,
    pub on_time: ClockTime,
    pub off_mode: ScheduleMode,
    pub off_time: ClockTime,
    pub timer: bool,
    pub follow: Option<String>,
    pub next_on: Option<DateTime<Utc>>,
    pub next_off: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueuedEvent {
    pub at: DateTime<Utc>,
    /// `at` in the engine's timezone, for display.
    pub local: String,
    pub group: String,
    pub action: Action,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleSnapshot {
    pub city: String,
    pub timezone: String,
    pub groups: Vec<GroupStatus>,
    pub queue: Vec<QueuedEvent>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ScheduleEngine {
    groups: Vec<DeviceGroup>,
    /// Sorted by `at`; ties keep insertion order.
    queue: Vec<ScheduleEvent>,
    solar: SolarClock,
    tz: Tz,
    base_topic: String,
    publisher: Arc<dyn Publisher>,
    /// Device actions since the last drain, for the dashboard event log.
    journal: Vec<String>,
}

impl ScheduleEngine {
    pub fn new(
        groups: Vec<DeviceGroup>,
        solar: SolarClock,
        base_topic: &str,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        let tz = solar.timezone();
        Self {
            groups,
            queue: Vec::new(),
            solar,
            tz,
            base_topic: base_topic.to_string(),
            publisher,
            journal: Vec::new(),
        }
    }

    /// Push configured brightness to every bulb group and schedule every
    /// group, forcing devices into their desired state.
    pub fn start(&mut self, now: DateTime<Utc>) {
        for g in self.groups.iter_mut().filter(|g| g.kind.is_dimmable()) {
            let level = g.brightness;
            g.set_brightness(level, self.publisher.as_ref(), &self.base_topic);
        }
        let leaders: Vec<usize> = (0..self.groups.len())
            .filter(|&i| self.groups[i].follow.is_none())
            .collect();
        for idx in leaders {
            if self.stuck_off(&self.groups[idx]) {
                let g = &self.groups[idx];
                warn!(group = %g.name, "dusk and dawn share the 17:00 fallback, group will stay off");
                self.journal.push(format!(
                    "{} stays OFF: dusk and dawn both fall back to 17:00",
                    g.name
                ));
            }
            self.reschedule_idx(idx, now, true);
        }
        info!(
            groups = self.groups.len(),
            pending = self.queue.len(),
            tz = %self.tz,
            "scheduler initialised"
        );
    }

    /// True when both edges are solar and the city is unknown, so both
    /// resolve to the same fallback instant.
    fn stuck_off(&self, group: &DeviceGroup) -> bool {
        !self.solar.is_known()
            && group.on_mode != ScheduleMode::Fixed
            && group.off_mode != ScheduleMode::Fixed
    }

    // -- Next-instant computation -------------------------------------------

    pub fn compute_next_on(&self, group: &DeviceGroup, now: DateTime<Utc>) -> DateTime<Utc> {
        self.next_instant(group.on_mode, group.on_time, now)
    }

    pub fn compute_next_off(&self, group: &DeviceGroup, now: DateTime<Utc>) -> DateTime<Utc> {
        self.next_instant(group.off_mode, group.off_time, now)
    }

    fn next_instant(&self, mode: ScheduleMode, time: ClockTime, now: DateTime<Utc>) -> DateTime<Utc> {
        match mode {
            ScheduleMode::Fixed => next_fixed(self.tz, time, now),
            ScheduleMode::Dusk => roll_forward(self.solar.next_dusk(now), now),
            ScheduleMode::Dawn => roll_forward(self.solar.next_dawn(now), now),
        }
    }

    /// Desired state right now and the event that ends it. A tie resolves
    /// to OFF with a TURN_OFF event. With an unknown city dusk and dawn both
    /// fall back to 17:00, so a group switched by dusk and dawn ties every
    /// day and stays OFF.
    fn plan(&self, group: &DeviceGroup, now: DateTime<Utc>) -> (bool, ScheduleEvent) {
        let next_on = self.compute_next_on(group, now);
        let next_off = self.compute_next_off(group, now);
        let (desired_on, at, action) = if next_off < next_on {
            (true, next_off, Action::TurnOff)
        } else if next_on < next_off {
            (false, next_on, Action::TurnOn)
        } else {
            (false, next_off, Action::TurnOff)
        };
        (
            desired_on,
            ScheduleEvent {
                at,
                group: group.name.clone(),
                action,
            },
        )
    }

    // -- Queue mutation ------------------------------------------------------

    pub fn reschedule(&mut self, name: &str, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let idx = self.index_of(name)?;
        self.reschedule_idx(idx, now, false);
        Ok(())
    }

    fn reschedule_idx(&mut self, idx: usize, now: DateTime<Utc>, force: bool) {
        let name = self.groups[idx].name.clone();
        self.queue.retain(|e| e.group != name);

        if let Some(leader) = self.groups[idx].follow.clone() {
            // Followers only sync to an enabled leader.
            let Some(lead) = self.groups.iter().find(|g| g.name == leader) else {
                return;
            };
            if lead.timer_enabled && self.groups[idx].timer_enabled {
                let (desired_on, _) = self.plan(lead, now);
                self.apply(idx, desired_on, force, "follow");
            }
            return;
        }

        let (desired_on, event) = self.plan(&self.groups[idx], now);
        debug!(group = %name, at = %event.at, action = ?event.action, "event queued");
        self.insert(event);

        if self.groups[idx].timer_enabled {
            self.apply(idx, desired_on, force, "sync");
            self.cascade(&name, desired_on, force);
        }
    }

    fn insert(&mut self, event: ScheduleEvent) {
        let pos = self.queue.partition_point(|e| e.at <= event.at);
        self.queue.insert(pos, event);
    }

    /// Fire one event: switch the group (if its timer is enabled), cascade to
    /// followers, then queue the group's next transition.
    pub fn fire(&mut self, event: &ScheduleEvent, now: DateTime<Utc>) {
        let Ok(idx) = self.index_of(&event.group) else {
            warn!(group = %event.group, "dropping event for unknown group");
            return;
        };
        let on = event.action.is_on();

        if self.groups[idx].timer_enabled {
            self.apply(idx, on, true, "scheduled");
            self.cascade(&event.group, on, true);
        } else {
            debug!(group = %event.group, action = ?event.action, "timer disabled, event skipped");
        }

        self.reschedule_idx(idx, now, false);
    }

    /// Fire every event due at or before `now`. Returns how many fired.
    pub fn fire_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut fired = 0;
        while self.queue.first().is_some_and(|e| e.at <= now) {
            let event = self.queue.remove(0);
            self.fire(&event, now);
            fired += 1;
        }
        fired
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.queue.first().map(|e| e.at)
    }

    // -- Physical actions ------------------------------------------------------

    fn apply(&mut self, idx: usize, on: bool, force: bool, reason: &str) {
        let g = &mut self.groups[idx];
        if !force && g.state == on {
            return;
        }
        if on {
            g.turn_on(self.publisher.as_ref(), &self.base_topic);
        } else {
            g.turn_off(self.publisher.as_ref(), &self.base_topic);
        }
        self.journal
            .push(format!("{} {} ({reason})", g.name, if on { "ON" } else { "OFF" }));
    }

    fn cascade(&mut self, leader: &str, on: bool, force: bool) {
        let followers: Vec<usize> = (0..self.groups.len())
            .filter(|&i| {
                let g = &self.groups[i];
                g.follow.as_deref() == Some(leader) && g.timer_enabled
            })
            .collect();
        for idx in followers {
            self.apply(idx, on, force, "follow");
        }
    }

    // -- Operator operations --------------------------------------------------

    /// Change the mode (and optionally the clock time) of one edge. A fixed
    /// mode without a time is rejected and nothing changes. Followers take
    /// their leader's actions, so their own modes cannot be changed.
    pub fn set_mode(
        &mut self,
        name: &str,
        edge: Edge,
        mode: ScheduleMode,
        time: Option<ClockTime>,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        let idx = self.index_of(name)?;
        if self.groups[idx].follow.is_some() {
            return Err(ScheduleError::Follower(name.to_string()));
        }
        if mode == ScheduleMode::Fixed && time.is_none() {
            return Err(ScheduleError::InvalidTime);
        }
        let g = &mut self.groups[idx];
        match edge {
            Edge::On => {
                g.on_mode = mode;
                if let Some(t) = time {
                    g.on_time = t;
                }
            }
            Edge::Off => {
                g.off_mode = mode;
                if let Some(t) = time {
                    g.off_time = t;
                }
            }
        }
        info!(group = %name, ?edge, %mode, time = ?time.map(|t| t.to_string()), "schedule changed");
        self.reschedule_idx(idx, now, false);
        Ok(())
    }

    pub fn set_timer(&mut self, name: &str, enabled: bool, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        let idx = self.index_of(name)?;
        self.groups[idx].timer_enabled = enabled;
        info!(group = %name, enabled, "timer changed");
        self.reschedule_idx(idx, now, false);
        Ok(())
    }

    /// Switch a group immediately. The queue is left alone and followers are
    /// not touched.
    pub fn force(&mut self, name: &str, on: bool) -> Result<(), ScheduleError> {
        let idx = self.index_of(name)?;
        self.apply(idx, on, true, "manual");
        Ok(())
    }

    pub fn set_brightness(&mut self, name: &str, raw: i64) -> Result<(), ScheduleError> {
        let idx = self.index_of(name)?;
        if !self.groups[idx].kind.is_dimmable() {
            return Err(ScheduleError::NotDimmable(name.to_string()));
        }
        let level = Brightness::try_from(raw).map_err(ScheduleError::InvalidBrightness)?;
        let g = &mut self.groups[idx];
        g.set_brightness(level, self.publisher.as_ref(), &self.base_topic);
        self.journal
            .push(format!("{} brightness {}", g.name, level.value()));
        Ok(())
    }

    // -- Snapshots -------------------------------------------------------------

    #[cfg(test)]
    pub fn group(&self, name: &str) -> Option<&DeviceGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    #[cfg(test)]
    pub fn queue(&self) -> &[ScheduleEvent] {
        &self.queue
    }

    pub fn status(&self, now: DateTime<Utc>) -> ScheduleSnapshot {
        let groups = self
            .groups
            .iter()
            .map(|g| {
                let leader = g.follow.is_none();
                GroupStatus {
                    name: g.name.clone(),
                    kind: g.kind,
                    members: g.members.clone(),
                    state: g.state,
                    brightness: g.kind.is_dimmable().then(|| g.brightness.value()),
                    on_mode: g.on_mode,
                    on_time: g.on_time,
                    off_mode: g.off_mode,
                    off_time: g.off_time,
                    timer: g.timer_enabled,
                    follow: g.follow.clone(),
                    next_on: leader.then(|| self.compute_next_on(g, now)),
                    next_off: leader.then(|| self.compute_next_off(g, now)),
                }
            })
            .collect();

        let queue = self
            .queue
            .iter()
            .map(|e| QueuedEvent {
                at: e.at,
                local: e.at.with_timezone(&self.tz).format("%a %Y-%m-%d %H:%M %Z").to_string(),
                group: e.group.clone(),
                action: e.action,
            })
            .collect();

        ScheduleSnapshot {
            city: self.solar.location().to_string(),
            timezone: self.tz.name().to_string(),
            groups,
            queue,
        }
    }

    pub fn drain_journal(&mut self) -> Vec<String> {
        std::mem::take(&mut self.journal)
    }

    fn index_of(&self, name: &str) -> Result<usize, ScheduleError> {
        self.groups
            .iter()
            .position(|g| g.name == name)
            .ok_or_else(|| ScheduleError::UnknownGroup(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Next occurrence of a local clock time strictly after `now`.
fn next_fixed(tz: Tz, time: ClockTime, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = local_date(tz, now);
    let mut at = at_local(tz, today, time.to_naive());
    for days in 1..=2 {
        if at > now {
            break;
        }
        at = at_local(tz, today + Duration::days(days), time.to_naive());
    }
    roll_forward(at, now)
}

/// Advance `at` by whole days until it is after `now`.
fn roll_forward(at: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    if at > now {
        return at;
    }
    let days = (now - at).num_days() + 1;
    at + Duration::days(days)
}

// ---------------------------------------------------------------------------
// Shared handle and run loop
// ---------------------------------------------------------------------------

/// Cloneable handle: one mutex serialises the run loop and operator calls.
#[derive(Clone)]
pub struct Scheduler {
    engine: Arc<Mutex<ScheduleEngine>>,
    shared: SharedState,
}

impl Scheduler {
    pub fn new(engine: ScheduleEngine, shared: SharedState) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            shared,
        }
    }

    pub async fn start(&self, now: DateTime<Utc>) {
        let mut engine = self.engine.lock().await;
        engine.start(now);
        self.flush(&mut engine).await;
    }

    pub async fn set_mode(
        &self,
        name: &str,
        edge: Edge,
        mode: ScheduleMode,
        time: Option<ClockTime>,
    ) -> Result<(), ScheduleError> {
        let mut engine = self.engine.lock().await;
        let result = engine.set_mode(name, edge, mode, time, Utc::now());
        self.flush(&mut engine).await;
        result
    }

    pub async fn set_timer(&self, name: &str, enabled: bool) -> Result<(), ScheduleError> {
        let mut engine = self.engine.lock().await;
        let result = engine.set_timer(name, enabled, Utc::now());
        self.flush(&mut engine).await;
        result
    }

    pub async fn force(&self, name: &str, on: bool) -> Result<(), ScheduleError> {
        let mut engine = self.engine.lock().await;
        let result = engine.force(name, on);
        self.flush(&mut engine).await;
        result
    }

    pub async fn set_brightness(&self, name: &str, raw: i64) -> Result<(), ScheduleError> {
        let mut engine = self.engine.lock().await;
        let result = engine.set_brightness(name, raw);
        self.flush(&mut engine).await;
        result
    }

    pub async fn status(&self) -> ScheduleSnapshot {
        self.engine.lock().await.status(Utc::now())
    }

    /// Fire due events and return how long to sleep before the next check.
    async fn tick(&self) -> StdDuration {
        let mut engine = self.engine.lock().await;
        let now = Utc::now();
        let fired = engine.fire_due(now);
        if fired > 0 {
            debug!(fired, "scheduled events fired");
        }
        self.flush(&mut engine).await;
        // An overdue event yields a zero wait.
        engine.next_due().map_or(MAX_WAIT, |at| {
            (at - Utc::now())
                .to_std()
                .unwrap_or(StdDuration::ZERO)
                .min(MAX_WAIT)
        })
    }

    async fn flush(&self, engine: &mut ScheduleEngine) {
        let notes = engine.drain_journal();
        if notes.is_empty() {
            return;
        }
        let mut st = self.shared.write().await;
        for note in notes {
            st.record_device(note);
        }
    }
}

/// Run the scheduler loop until `shutdown` flips to true or its sender is
/// dropped.  Intended to be `tokio::spawn`-ed from main.
pub async fn run(scheduler: Scheduler, mut shutdown: watch::Receiver<bool>) {
    info!("scheduler loop started");
    loop {
        let wait = scheduler.tick().await;
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("scheduler loop stopped");
}

// ===========================================================================
// Tests
// ===========================================================================
