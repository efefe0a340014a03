//! # Circuit Breaker Implementation
//!
//! Failure-driven admission control with three states:
//! Operational (traffic flows), Blocking (requests suppressed locally) and
//! Trial (exactly one probe request allowed through).
//!
//! Reaching `threshold` failures moves the breaker to Blocking and arms a
//! reset timer. When it fires (or when a caller asks for a manual retry) the
//! breaker enters Trial with its failure count at `threshold - 1`, so one more
//! failure blocks again while a success clears everything.
//!
//! Admission is handed out as a [`BreakerPermit`]. A trial permit that is
//! dropped without being settled (its request was cancelled) gives the trial
//! slot back, so the next request can run the trial instead.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::resilience::CircuitBreakerConfig;

/// Breaker status as derived from its counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerStatus {
    /// Too many failures: requests are suppressed
    Blocking,
    /// Normal operation: all requests allowed
    Operational,
    /// Recovery probe: one request allowed
    Trial,
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerStatus::Blocking => f.write_str("BLOCKING"),
            BreakerStatus::Operational => f.write_str("OPERATIONAL"),
            BreakerStatus::Trial => f.write_str("TRIAL"),
        }
    }
}

/// How a request got past the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    /// Holder owns the trial slot of the given trial round
    Trial(u64),
}

// == Breaker ==
/// Admission control seam used by the coordinator.
///
/// State transitions never fail; they are plain updates.
pub trait Breaker: Send + Sync + fmt::Debug {
    fn status(&self) -> BreakerStatus;

    /// Asks to send one request. Always admitted while Operational, admitted
    /// as the trial for the first caller only while in Trial, refused while
    /// Blocking.
    fn try_acquire(&self) -> Option<Admission>;

    fn fail(&self);

    fn success(&self);

    /// Gives back a claimed trial slot whose request never settled. Ignored
    /// once `round` is over.
    fn abandon_trial(&self, _round: u64) {}

    /// Manual trial, e.g. a user-initiated retry.
    fn half_open(&self);

    /// Cancels any pending timer.
    fn dispose(&self) {}

    fn is_blocking(&self) -> bool {
        self.status() == BreakerStatus::Blocking
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerState {
    pub failure_count: u32,
    pub trial_in_flight: bool,
    /// Set once the single trial request has been admitted
    trial_claimed: bool,
    /// Bumped each time the breaker enters Trial
    trial_round: u64,
}

impl BreakerState {
    fn status(&self, threshold: u32) -> BreakerStatus {
        if self.trial_in_flight {
            BreakerStatus::Trial
        } else if self.failure_count >= threshold {
            BreakerStatus::Blocking
        } else {
            BreakerStatus::Operational
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    reset_timer: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for BreakerInner {
    fn drop(&mut self) {
        if let Some(timer) = self.reset_timer.get_mut().take() {
            timer.abort();
        }
    }
}

// == Circuit Breaker ==
/// Counting circuit breaker. Clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: String, config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(
            component = %name,
            threshold = config.threshold,
            reset_timeout_ms = config.reset_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Ok(Self {
            inner: Arc::new(BreakerInner {
                name,
                config,
                state: Mutex::new(BreakerState::default()),
                reset_timer: Mutex::new(None),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.inner.config
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.state.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerState {
        *self.inner.state.lock()
    }

    fn threshold(&self) -> u32 {
        self.inner.config.threshold
    }

    /// Moves a blocking breaker into Trial. Returns false if it was not
    /// blocking.
    fn enter_trial(&self) -> bool {
        let threshold = self.threshold();
        {
            let mut state = self.inner.state.lock();
            if state.status(threshold) != BreakerStatus::Blocking {
                return false;
            }
            state.trial_in_flight = true;
            state.trial_claimed = false;
            state.trial_round = state.trial_round.wrapping_add(1);
            state.failure_count = threshold - 1;
        }
        self.cancel_reset_timer();
        info!(component = %self.inner.name, "Circuit breaker entering trial");
        true
    }

    fn arm_reset_timer(&self) {
        let Ok(handle) = Handle::try_current() else {
            warn!(
                component = %self.inner.name,
                "No async runtime available, breaker will only reset manually"
            );
            return;
        };

        let weak: Weak<BreakerInner> = Arc::downgrade(&self.inner);
        let reset_timeout = self.inner.config.reset_timeout;
        let timer = handle.spawn(async move {
            tokio::time::sleep(reset_timeout).await;
            if let Some(inner) = weak.upgrade() {
                let breaker = CircuitBreaker { inner };
                // Detach first so entering trial does not abort this task.
                breaker.inner.reset_timer.lock().take();
                breaker.enter_trial();
            }
        });

        if let Some(previous) = self.inner.reset_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    fn cancel_reset_timer(&self) {
        if let Some(timer) = self.inner.reset_timer.lock().take() {
            timer.abort();
        }
    }
}

impl Breaker for CircuitBreaker {
    fn status(&self) -> BreakerStatus {
        self.inner.state.lock().status(self.threshold())
    }

    fn try_acquire(&self) -> Option<Admission> {
        let threshold = self.threshold();
        let mut state = self.inner.state.lock();
        match state.status(threshold) {
            BreakerStatus::Operational => Some(Admission::Normal),
            BreakerStatus::Trial if !state.trial_claimed => {
                state.trial_claimed = true;
                debug!(component = %self.inner.name, "Trial request admitted");
                Some(Admission::Trial(state.trial_round))
            }
            BreakerStatus::Trial | BreakerStatus::Blocking => None,
        }
    }

    fn abandon_trial(&self, round: u64) {
        let mut state = self.inner.state.lock();
        if state.trial_in_flight && state.trial_claimed && state.trial_round == round {
            state.trial_claimed = false;
            debug!(component = %self.inner.name, "Trial request abandoned, slot released");
        }
    }

    fn fail(&self) {
        let threshold = self.threshold();
        let (was, now, failures) = {
            let mut state = self.inner.state.lock();
            let was = state.status(threshold);
            state.failure_count = state.failure_count.saturating_add(1);
            state.trial_in_flight = false;
            state.trial_claimed = false;
            (was, state.status(threshold), state.failure_count)
        };

        debug!(component = %self.inner.name, failures, "Circuit breaker recorded failure");
        if now == BreakerStatus::Blocking && was != BreakerStatus::Blocking {
            warn!(
                component = %self.inner.name,
                failures,
                previous = %was,
                "Circuit breaker blocking requests"
            );
            self.arm_reset_timer();
        }
    }

    fn success(&self) {
        let was = {
            let mut state = self.inner.state.lock();
            let was = state.status(self.threshold());
            *state = BreakerState::default();
            was
        };
        self.cancel_reset_timer();

        if was != BreakerStatus::Operational {
            info!(component = %self.inner.name, previous = %was, "Circuit breaker operational");
        }
    }

    fn half_open(&self) {
        if !self.enter_trial() {
            debug!(
                component = %self.inner.name,
                "Manual trial ignored, breaker is not blocking"
            );
        }
    }

    fn dispose(&self) {
        self.cancel_reset_timer();
    }
}

// == No-op Breaker ==
/// Breaker for callers that opt out: never blocks, ignores every signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBreaker;

impl Breaker for NoopBreaker {
    fn status(&self) -> BreakerStatus {
        BreakerStatus::Operational
    }

    fn try_acquire(&self) -> Option<Admission> {
        Some(Admission::Normal)
    }

    fn fail(&self) {}

    fn success(&self) {}

    fn half_open(&self) {}
}

// == Breaker Permit ==
/// One admitted request. Settle it with [`success`](Self::success) or
/// [`fail`](Self::fail); dropping an unsettled trial permit releases the
/// trial slot.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<dyn Breaker>,
    admission: Admission,
    settled: bool,
}

impl BreakerPermit {
    /// None while the breaker refuses requests.
    pub fn acquire(breaker: &Arc<dyn Breaker>) -> Option<Self> {
        let admission = breaker.try_acquire()?;
        Some(Self {
            breaker: Arc::clone(breaker),
            admission,
            settled: false,
        })
    }

    pub fn admission(&self) -> Admission {
        self.admission
    }

    pub fn is_trial(&self) -> bool {
        matches!(self.admission, Admission::Trial(_))
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.success();
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.breaker.fail();
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if let (false, Admission::Trial(round)) = (self.settled, self.admission) {
            self.breaker.abandon_trial(round);
        }
    }
}
