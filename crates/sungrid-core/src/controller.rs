//! Simulation Controller.
//!
//! Owns the per-session state machine (`Idle` → `Detected` → `Simulated`),
//! orchestrates the remote service with sticky fallback to local
//! generation, feeds results through the assignment engine into the
//! metrics history, and drives the auto-repeat timer.
//!
//! Concurrency model: one mutex guards all mutable session state and is
//! held only across pure state mutation, never across a service call.
//! Every state-producing operation allocates a monotonically increasing
//! issue number before calling out; a completion older than the last
//! applied one is discarded, so a superseded upload or step can never
//! overwrite newer state.

use crate::assign;
use crate::config::AutoRepeatConfig;
use crate::history::MetricsHistory;
use crate::{
    AggregateStats, MetricsSample, PanelService, PanelState, Result, SimulationRequest,
    SungridError,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Result source for the current session.
///
/// Becomes `Fallback` the first time any remote call fails and stays that
/// way until an explicit `reset()` or a successful re-upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControllerMode {
    Live,
    Fallback,
}

/// Lifecycle phase of the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No panels loaded.
    Idle,
    /// Panels loaded, no simulation step run yet.
    Detected,
    /// At least one simulation step completed.
    Simulated,
}

/// Read-only view of the session for the presentation layer.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub phase: Phase,
    pub mode: ControllerMode,
    pub total_panels: u32,
    pub states: Vec<PanelState>,
    pub stats: AggregateStats,
    pub required_on: Option<u32>,
    pub auto_repeat: bool,
    pub annotated_image: Option<String>,
}

/// Interval between stop-flag checks in the timer thread. Keeps cancel
/// latency low even with multi-second periods.
const TIMER_SLICE: Duration = Duration::from_millis(25);

/// Panel state and simulation controller.
///
/// Cheap to clone; clones share the same session. All methods take `&self`
/// and are safe to call from any thread.
#[derive(Clone)]
pub struct SimulationController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    primary: Box<dyn PanelService>,
    fallback: Box<dyn PanelService>,
    period: Duration,
    session: Mutex<Session>,
}

struct Session {
    phase: Phase,
    mode: ControllerMode,
    total_panels: u32,
    hotspot_panels: BTreeSet<u32>,
    required_on: Option<u32>,
    states: Vec<PanelState>,
    stats: AggregateStats,
    annotated_image: Option<String>,
    history: MetricsHistory,
    timer: Option<RepeatTimer>,
    /// Next issue number to hand out.
    next_issue: u64,
    /// Issue number of the last applied completion.
    applied_issue: u64,
}

impl Session {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            mode: ControllerMode::Live,
            total_panels: 0,
            hotspot_panels: BTreeSet::new(),
            required_on: None,
            states: Vec::new(),
            stats: AggregateStats::default(),
            annotated_image: None,
            history: MetricsHistory::new(),
            timer: None,
            next_issue: 1,
            applied_issue: 0,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            mode: self.mode,
            total_panels: self.total_panels,
            states: self.states.clone(),
            stats: self.stats,
            required_on: self.required_on,
            auto_repeat: self.timer.is_some(),
            annotated_image: self.annotated_image.clone(),
        }
    }
}

impl SimulationController {
    /// Create a controller over a primary (remote) service and a local
    /// fallback service.
    pub fn new(
        primary: Box<dyn PanelService>,
        fallback: Box<dyn PanelService>,
        auto_repeat: AutoRepeatConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                primary,
                fallback,
                period: Duration::from_millis(auto_repeat.period_ms),
                session: Mutex::new(Session::new()),
            }),
        }
    }

    /// Run detection over an uploaded image and enter `Detected`.
    ///
    /// Always attempts the remote service first, even in a degraded
    /// session; success restores `Live` mode, failure (re-)degrades to
    /// `Fallback` and serves the detection locally. Either path clears the
    /// metrics history and cancels auto-repeat.
    pub fn upload_image(&self, image: &[u8], filename: &str) -> Result<Snapshot> {
        let issue = {
            let mut s = self.inner.session();
            let issue = s.next_issue;
            s.next_issue += 1;
            issue
        };

        let (mode, detection) = match self.inner.primary.detect(image, filename) {
            Ok(detection) => (ControllerMode::Live, detection),
            Err(SungridError::ServiceUnavailable(reason)) => {
                tracing::warn!(%reason, "remote detect failed, degrading session to fallback");
                (ControllerMode::Fallback, self.inner.fallback.detect(image, filename)?)
            }
            Err(other) => return Err(other),
        };

        let assignment =
            assign::assign_detection(detection.total_panels, &detection.hotspot_panels)?;

        let stale_timer;
        let snapshot = {
            let mut s = self.inner.session();
            if issue < s.applied_issue {
                tracing::warn!(issue, applied = s.applied_issue, "discarding stale detection");
                return Ok(s.snapshot());
            }
            stale_timer = s.timer.take();
            s.phase = Phase::Detected;
            s.mode = mode;
            s.total_panels = detection.total_panels;
            s.hotspot_panels = detection.hotspot_panels;
            s.states = assignment.states;
            s.stats = assignment.stats;
            s.annotated_image = detection.annotated_image;
            s.history.clear();
            s.applied_issue = issue;
            s.snapshot()
        };
        // Joining the cancelled timer outside the lock: a blocked tick can
        // still acquire the session and bail out via its ownership check.
        drop(stale_timer);
        Ok(snapshot)
    }

    /// Run one simulation step.
    ///
    /// Requires a loaded panel set and a `required_on` value, otherwise
    /// reports `InputRequired` without touching any state. A remote
    /// failure degrades the session to fallback permanently and retries
    /// the same logical step locally, so the call still produces a result.
    pub fn run_step(&self) -> Result<Snapshot> {
        self.inner.step(None)
    }

    /// Set or clear the requested number of panels to keep on. Clearing it
    /// cancels an active auto-repeat timer.
    pub fn set_required_on(&self, required_on: Option<u32>) {
        let cancelled = {
            let mut s = self.inner.session();
            s.required_on = required_on;
            if required_on.is_none() {
                s.timer.take()
            } else {
                None
            }
        };
        drop(cancelled);
    }

    /// Flip auto-repeat. Turning it on requires a loaded panel set and a
    /// `required_on` value; at most one timer exists at any instant.
    /// Returns the new enabled state.
    pub fn toggle_auto_repeat(&self) -> Result<bool> {
        let existing = {
            let mut s = self.inner.session();
            match s.timer.take() {
                Some(timer) => timer,
                None => {
                    if s.total_panels == 0 {
                        return Err(SungridError::InputRequired(
                            "upload a panel image before enabling auto-repeat".into(),
                        ));
                    }
                    if s.required_on.is_none() {
                        return Err(SungridError::InputRequired(
                            "set required_on before enabling auto-repeat".into(),
                        ));
                    }
                    let timer =
                        RepeatTimer::spawn(Arc::downgrade(&self.inner), self.inner.period);
                    s.timer = Some(timer);
                    return Ok(true);
                }
            }
        };
        drop(existing);
        Ok(false)
    }

    /// Return the session to `Idle`: cancel the timer, clear the panel
    /// vector and history, restore `Live` eligibility. In-flight
    /// completions from before the reset are discarded when they arrive.
    pub fn reset(&self) {
        let timer = {
            let mut s = self.inner.session();
            s.timer.take()
        };
        // Join first so no tick applies between the clear below and the
        // timer actually stopping.
        drop(timer);

        let mut s = self.inner.session();
        s.phase = Phase::Idle;
        s.mode = ControllerMode::Live;
        s.total_panels = 0;
        s.hotspot_panels.clear();
        s.required_on = None;
        s.states.clear();
        s.stats = AggregateStats::default();
        s.annotated_image = None;
        s.history.clear();
        // Invalidate every issue handed out so far.
        s.applied_issue = s.next_issue;
        s.next_issue += 1;
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.session().snapshot()
    }

    pub fn history(&self) -> Vec<MetricsSample> {
        self.inner.session().history.samples().to_vec()
    }

    pub fn phase(&self) -> Phase {
        self.inner.session().phase
    }

    pub fn mode(&self) -> ControllerMode {
        self.inner.session().mode
    }

    pub fn auto_repeat_enabled(&self) -> bool {
        self.inner.session().timer.is_some()
    }
}

impl ControllerInner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Shared step body for manual calls and timer ticks. `owner`
    /// identifies the calling timer; a tick whose timer is no longer the
    /// session's bails out before issuing anything.
    fn step(&self, owner: Option<&Arc<AtomicBool>>) -> Result<Snapshot> {
        let (issue, request, mode) = {
            let mut s = self.session();
            if let Some(owner) = owner {
                let still_owned = matches!(&s.timer, Some(t) if Arc::ptr_eq(&t.stop, owner));
                if !still_owned {
                    return Err(SungridError::InputRequired(
                        "auto-repeat timer was cancelled".into(),
                    ));
                }
            }
            if s.phase == Phase::Idle || s.total_panels == 0 {
                return Err(SungridError::InputRequired(
                    "upload a panel image before running a simulation step".into(),
                ));
            }
            let required_on = s.required_on.ok_or_else(|| {
                SungridError::InputRequired(
                    "enter how many panels should remain on before running a step".into(),
                )
            })?;
            let issue = s.next_issue;
            s.next_issue += 1;
            let request = SimulationRequest {
                total_panels: s.total_panels,
                hotspot_panels: s.hotspot_panels.clone(),
                required_on,
            };
            (issue, request, s.mode)
        };

        let result = match mode {
            ControllerMode::Fallback => self.fallback.simulate(&request)?,
            ControllerMode::Live => match self.primary.simulate(&request) {
                Ok(result) => result,
                Err(SungridError::ServiceUnavailable(reason)) => {
                    tracing::warn!(%reason, "remote simulate failed, degrading session to fallback");
                    // Sticky for the rest of the session, unless a reset or
                    // a newer completion already superseded this step.
                    let mut s = self.session();
                    if issue >= s.applied_issue {
                        s.mode = ControllerMode::Fallback;
                    }
                    drop(s);
                    self.fallback.simulate(&request)?
                }
                Err(other) => return Err(other),
            },
        };

        let assignment = assign::assign_step(
            request.total_panels,
            &result.panels_on,
            &result.hotspot_panels,
            result.damage_percent,
            result.efficiency_percent,
        )?;

        let mut s = self.session();
        if issue < s.applied_issue {
            tracing::warn!(issue, applied = s.applied_issue, "discarding stale step result");
            return Ok(s.snapshot());
        }
        s.phase = Phase::Simulated;
        s.states = assignment.states;
        s.stats = assignment.stats;
        let sample = s.history.append(
            result.damage_percent,
            result.efficiency_percent,
            result.hotspot_panels.len() as u32,
        );
        s.applied_issue = issue;
        tracing::debug!(
            step = sample.step,
            efficiency = result.efficiency_percent,
            damage = result.damage_percent,
            "simulation step applied"
        );
        Ok(s.snapshot())
    }
}

/// Handle to the auto-repeat timer thread. Dropping it signals the thread
/// to stop and joins it, so cancellation is tied to scope: taking the
/// handle out of the session and dropping it is the only cancel path.
struct RepeatTimer {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl RepeatTimer {
    fn spawn(inner: Weak<ControllerInner>, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let owner = Arc::clone(&stop);

        let join = thread::spawn(move || {
            let mut next = Instant::now() + period;
            while !stop_flag.load(Ordering::Relaxed) {
                let now = Instant::now();
                if now < next {
                    thread::sleep(TIMER_SLICE.min(next - now));
                    continue;
                }
                next = now + period;
                let Some(inner) = inner.upgrade() else { break };
                match inner.step(Some(&owner)) {
                    Ok(_) => {}
                    // Inputs went away or the timer was superseded; the
                    // session no longer owns this thread.
                    Err(SungridError::InputRequired(_)) => break,
                    Err(err) => {
                        tracing::warn!(%err, "auto-repeat step failed");
                    }
                }
            }
        });

        Self { stop, join: Some(join) }
    }
}

impl Drop for RepeatTimer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            // A tick can hold the last controller handle, which makes the
            // timer thread the one running this drop; joining itself would
            // deadlock. The stop flag already ends its loop in that case.
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
    }
}
