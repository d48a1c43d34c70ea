//! Send/expect batch model and the validated-send rewrite.
//!
//! A batch is an ordered list of steps executed against a console stream.
//! `validate_send_expect` checks that a batch strictly alternates sends and
//! expects and rewrites every expect so it can only match output produced
//! after the preceding send was echoed back by the console.

use std::fmt;

use crate::error::{CheckupError, CheckupResult};

/// Marker inserted between the echoed send and the expected pattern. Matches
/// any byte, including ones that are not valid UTF-8.
const ANY_OUTPUT: &str = "((?s-u:.)*)";

const MINIMUM_VALIDATED_STEPS: usize = 2;

/// What happens after a [`Case`] matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseAction {
    /// Keep listening. Consumes one unit of the case's retry budget.
    Next,
    /// Finish the switch successfully.
    Succeed,
    /// Finish the switch with a permission-denied failure carrying this message.
    Fail(String),
}

/// One alternative of a switch step: a pattern, an optional reply, and the
/// action taken on match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Case {
    pub pattern: String,
    pub send: Option<String>,
    pub action: CaseAction,
    /// How many times a `Next` case may re-arm before the switch fails.
    pub retries: u32,
    /// Name logged when the case matches.
    pub label: Option<String>,
}

impl Case {
    pub fn new(pattern: impl Into<String>, action: CaseAction) -> Self {
        Self {
            pattern: pattern.into(),
            send: None,
            action,
            retries: 0,
            label: None,
        }
    }

    pub fn with_send(mut self, send: impl Into<String>) -> Self {
        self.send = Some(send.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// A single step of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batcher {
    /// Write literal text to the console.
    Send(String),
    /// Wait for a regular expression to match the console output.
    Expect(String),
    /// Wait for whichever of several cases matches first.
    SwitchCase(Vec<Case>),
}

impl Batcher {
    pub fn send(text: impl Into<String>) -> Self {
        Self::Send(text.into())
    }

    pub fn expect(pattern: impl Into<String>) -> Self {
        Self::Expect(pattern.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Send(_) => "send",
            Self::Expect(_) => "expect",
            Self::SwitchCase(_) => "switch-case",
        }
    }

    /// The literal text or pattern carried by the step, if any.
    pub fn arg(&self) -> Option<&str> {
        match self {
            Self::Send(s) | Self::Expect(s) => Some(s),
            Self::SwitchCase(_) => None,
        }
    }
}

/// Output captured by one expecting step of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchRes {
    /// Index of the step inside the batch.
    pub index: usize,
    /// Console output consumed up to and including the match.
    pub output: String,
    /// Full match followed by capture groups (empty string for unmatched groups).
    pub captures: Vec<String>,
}

/// A failed batch together with everything captured before the failure.
#[derive(Debug)]
pub struct BatchError {
    pub partial: Vec<BatchRes>,
    pub error: CheckupError,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<BatchError> for CheckupError {
    fn from(err: BatchError) -> Self {
        err.error
    }
}

/// Validate a send/expect batch and rewrite its expects against stale matches.
///
/// Each expect pattern `P` is replaced by `escape(S) + "((?s-u:.)*)" + P`, where
/// `S` is the text of the preceding send without its trailing newline (the
/// console echoes `\n` back as `\r\n`). Fails without touching the batch
/// contents if it is shorter than two steps, contains two sequential sends or
/// expects, or contains any other kind of step.
pub fn validate_send_expect(batch: &[Batcher]) -> CheckupResult<Vec<Batcher>> {
    if batch.len() < MINIMUM_VALIDATED_STEPS {
        return Err(CheckupError::BatchTooShort(batch.len()));
    }

    let mut rewritten = Vec::with_capacity(batch.len());
    let mut previous: Option<&Batcher> = None;
    let mut previous_send = "";

    for (index, step) in batch.iter().enumerate() {
        match step {
            Batcher::Expect(pattern) => {
                if matches!(previous, Some(Batcher::Expect(_))) {
                    return Err(CheckupError::SequentialExpect(index));
                }
                let echoed = regex::escape(previous_send.strip_suffix('\n').unwrap_or(previous_send));
                rewritten.push(Batcher::Expect(format!("{echoed}{ANY_OUTPUT}{pattern}")));
            }
            Batcher::Send(text) => {
                if matches!(previous, Some(Batcher::Send(_))) {
                    return Err(CheckupError::SequentialSend(index));
                }
                previous_send = text;
                rewritten.push(step.clone());
            }
            Batcher::SwitchCase(_) => {
                return Err(CheckupError::UnsupportedStep {
                    index,
                    kind: step.kind(),
                });
            }
        }
        previous = Some(step);
    }

    Ok(rewritten)
}
