//! Waiting for prompts and answering them
//!
//! [`wait_for_prompt`] polls a session until a prompt is accepted or the
//! deadline passes. The accept/defer/reject decisions live in
//! [`WaitMachine`], which is driven by explicit elapsed times and can be
//! exercised without a connection.

use crate::core::prompt::{FieldValue, FieldVerdict, InputKind, PromptMatch};
use crate::core::session::{Session, SessionError};
use crate::core::transport::TransportError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Polling policy for [`wait_for_prompt`]
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Only accept prompts whose id contains this substring
    pub expected: Option<String>,
    /// Overall deadline
    pub timeout: Duration,
    /// Fraction of the timeout after which a non-idle match is accepted
    pub idle_grace_ratio: f64,
    /// Unchanged time after which a screen counts as idle
    pub idle_threshold: Duration,
    /// Upper bound on a single read
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            expected: None,
            timeout: Duration::from_secs(10),
            idle_grace_ratio: 0.8,
            idle_threshold: Duration::from_secs(2),
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl WaitOptions {
    #[must_use]
    pub fn expect(mut self, id_part: &str) -> Self {
        self.expected = Some(id_part.to_string());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }

    #[must_use]
    pub fn idle_grace_ratio(mut self, ratio: f64) -> Self {
        self.idle_grace_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Point after which a match no longer needs an idle screen
    pub fn grace_deadline(&self) -> Duration {
        self.timeout.mul_f64(self.idle_grace_ratio.clamp(0.0, 1.0))
    }
}

/// Why a detected prompt was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Screen still changing and the grace point has not passed
    NotIdle,
    /// Id does not contain the expected substring
    ExpectedMismatch,
    /// The accept callback said no
    CallbackReject,
}

type AcceptFn = Box<dyn Fn(&PromptMatch) -> bool + Send + Sync>;
type SeenFn = Box<dyn Fn(&PromptMatch) + Send + Sync>;
type RejectFn = Box<dyn Fn(&PromptMatch, RejectReason) + Send + Sync>;

/// Optional observers for [`wait_for_prompt`]
#[derive(Default)]
pub struct WaitCallbacks {
    accept: Option<AcceptFn>,
    seen: Option<SeenFn>,
    reject: Option<RejectFn>,
}

impl WaitCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Final say on an otherwise acceptable prompt
    #[must_use]
    pub fn on_accept<F>(mut self, f: F) -> Self
    where
        F: Fn(&PromptMatch) -> bool + Send + Sync + 'static,
    {
        self.accept = Some(Box::new(f));
        self
    }

    /// Called with every detected prompt before filtering
    #[must_use]
    pub fn on_seen<F>(mut self, f: F) -> Self
    where
        F: Fn(&PromptMatch) + Send + Sync + 'static,
    {
        self.seen = Some(Box::new(f));
        self
    }

    /// Called whenever a detected prompt is passed over
    #[must_use]
    pub fn on_reject<F>(mut self, f: F) -> Self
    where
        F: Fn(&PromptMatch, RejectReason) + Send + Sync + 'static,
    {
        self.reject = Some(Box::new(f));
        self
    }

    fn accepts(&self, prompt: &PromptMatch) -> bool {
        self.accept.as_ref().map_or(true, |f| f(prompt))
    }
}

impl std::fmt::Debug for WaitCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitCallbacks")
            .field("accept", &self.accept.is_some())
            .field("seen", &self.seen.is_some())
            .field("reject", &self.reject.is_some())
            .finish()
    }
}

/// Wait loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// Reading, nothing promising yet
    Polling,
    /// A prompt is on screen but the screen is still changing
    IdleGraceWait,
    /// Done, a prompt was accepted
    Matched,
    /// Done, the deadline passed
    TimedOut,
}

/// What the loop should do after one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep reading
    Poll,
    /// Keep reading; the observed prompt was passed over
    Reject(RejectReason),
    /// Return the observed prompt
    Accept,
    /// Give up
    TimedOut,
}

/// Accept/defer/reject decisions for one wait
#[derive(Debug, Clone)]
pub struct WaitMachine {
    expected: Option<String>,
    timeout: Duration,
    grace_deadline: Duration,
    state: WaitState,
}

impl WaitMachine {
    pub fn new(options: &WaitOptions) -> Self {
        Self {
            expected: options.expected.clone(),
            timeout: options.timeout,
            grace_deadline: options.grace_deadline(),
            state: WaitState::Polling,
        }
    }

    pub fn state(&self) -> WaitState {
        self.state
    }

    /// Feed one observation taken `elapsed` after the wait began
    pub fn step<F>(
        &mut self,
        elapsed: Duration,
        prompt: Option<&PromptMatch>,
        idle: bool,
        accept: F,
    ) -> Step
    where
        F: FnOnce(&PromptMatch) -> bool,
    {
        match self.state {
            WaitState::Matched => return Step::Accept,
            WaitState::TimedOut => return Step::TimedOut,
            WaitState::Polling | WaitState::IdleGraceWait => {}
        }

        if let Some(prompt) = prompt {
            let step = if !idle && elapsed < self.grace_deadline {
                self.state = WaitState::IdleGraceWait;
                Step::Reject(RejectReason::NotIdle)
            } else if self
                .expected
                .as_deref()
                .is_some_and(|want| !prompt.prompt_id.contains(want))
            {
                self.state = WaitState::Polling;
                Step::Reject(RejectReason::ExpectedMismatch)
            } else if !accept(prompt) {
                self.state = WaitState::Polling;
                Step::Reject(RejectReason::CallbackReject)
            } else {
                self.state = WaitState::Matched;
                return Step::Accept;
            };

            if elapsed >= self.timeout {
                self.state = WaitState::TimedOut;
                return Step::TimedOut;
            }
            return step;
        }

        if elapsed >= self.timeout {
            self.state = WaitState::TimedOut;
            return Step::TimedOut;
        }
        self.state = WaitState::Polling;
        Step::Poll
    }
}

/// An accepted prompt
#[derive(Debug, Clone, Serialize)]
pub struct PromptResult {
    /// Screen text at acceptance
    pub text: String,
    pub prompt_id: String,
    pub input_kind: InputKind,
    pub matched_text: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub verdict: FieldVerdict,
    /// Screen was idle when accepted
    pub idle: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Poll `session` until a prompt is accepted or `options.timeout` passes.
///
/// Connection loss ends the wait immediately. The final read is shortened
/// so the wait never overruns the deadline by more than one poll interval.
pub async fn wait_for_prompt(
    session: &Session,
    options: &WaitOptions,
    callbacks: &WaitCallbacks,
) -> Result<PromptResult, SessionError> {
    let started = Instant::now();
    let mut machine = WaitMachine::new(options);
    let max_bytes = session.options().read_max_bytes;

    loop {
        if !session.is_connected() {
            return Err(SessionError::Connection(TransportError::Disconnected));
        }

        let remaining = options.timeout.saturating_sub(started.elapsed());
        let read = session
            .read(options.poll_interval.min(remaining), max_bytes)
            .await?;
        let idle = read.since_change >= options.idle_threshold;

        if let (Some(prompt), Some(seen)) = (read.prompt.as_ref(), callbacks.seen.as_ref()) {
            seen(prompt);
        }

        let elapsed = started.elapsed();
        match machine.step(elapsed, read.prompt.as_ref(), idle, |p| callbacks.accepts(p)) {
            Step::Accept => {
                if let Some(prompt) = read.prompt {
                    tracing::debug!(
                        prompt_id = %prompt.prompt_id,
                        idle,
                        ?elapsed,
                        "prompt accepted"
                    );
                    return Ok(PromptResult {
                        text: read.snapshot.text,
                        prompt_id: prompt.prompt_id,
                        input_kind: prompt.input_kind,
                        matched_text: prompt.matched_text,
                        fields: prompt.fields,
                        verdict: prompt.verdict,
                        idle,
                        elapsed,
                    });
                }
            }
            Step::Reject(reason) => {
                if let (Some(prompt), Some(reject)) =
                    (read.prompt.as_ref(), callbacks.reject.as_ref())
                {
                    reject(prompt, reason);
                }
                tracing::trace!(?reason, "prompt passed over");
            }
            Step::Poll => {}
            Step::TimedOut => {
                tracing::debug!(?elapsed, expected = ?options.expected, "wait timed out");
                return Err(SessionError::Timeout { elapsed });
            }
        }
    }
}

/// Bytes sent for `keys` under `kind`
pub fn input_bytes(keys: &str, kind: InputKind) -> Vec<u8> {
    match kind {
        InputKind::SingleKey => keys.as_bytes().to_vec(),
        InputKind::Line => {
            let mut bytes = keys.as_bytes().to_vec();
            bytes.push(b'\r');
            bytes
        }
        InputKind::AnyKey => vec![b' '],
    }
}

/// Send `keys` the way `kind` expects, then pause for `wait_after`
pub async fn send_input(
    session: &Session,
    keys: &str,
    kind: InputKind,
    wait_after: Duration,
) -> Result<(), SessionError> {
    let bytes = input_bytes(keys, kind);
    tracing::debug!(session = %session.id(), %kind, len = bytes.len(), "sending input");
    session.send(&bytes).await?;
    if !wait_after.is_zero() {
        tokio::time::sleep(wait_after).await;
    }
    Ok(())
}
