//! Session notifications
//!
//! The presentation layer receives typed events through an injected
//! [`Notifier`]. Notifiers are called from whatever task produced the
//! event and must not block.

use std::fmt;

use gdpi_core::grouping::DomainGroup;
use gdpi_core::{ApplyOutcome, SkipReason, StateSnapshot};

/// Who started an apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyOrigin {
    /// User action
    Manual,
    /// Autopilot reacting to a discovery event
    Auto,
}

impl fmt::Display for ApplyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Auto => "auto_apply",
        })
    }
}

/// Something the user may want to see
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A transaction is about to capture its snapshot
    ApplyStarted {
        /// Apply target
        host_key: String,
        /// Who started it
        origin: ApplyOrigin,
    },
    /// A transaction finished
    ApplyFinished {
        /// Result
        outcome: ApplyOutcome,
        /// Who started it
        origin: ApplyOrigin,
    },
    /// The autopilot ignored a discovery event
    AutoApplySkipped {
        /// Host from the event
        host_key: String,
        /// Why
        reason: SkipReason,
    },
    /// Live state differs from before
    OptionsChanged(StateSnapshot),
    /// Re-test units were queued
    RetestEnqueued {
        /// Verified target
        target: String,
        /// Number of units
        units: usize,
    },
    /// A base suffix became a family target
    SuffixPromoted(String),
    /// A co-occurrence group was learned
    GroupLearned(DomainGroup),
}

/// Receiver of session events
pub trait Notifier: Send + Sync {
    /// Handle one event
    fn notify(&self, event: SessionEvent);
}

impl<F> Notifier for F
where
    F: Fn(SessionEvent) + Send + Sync,
{
    fn notify(&self, event: SessionEvent) {
        self(event);
    }
}

/// Notifier that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: SessionEvent) {}
}
