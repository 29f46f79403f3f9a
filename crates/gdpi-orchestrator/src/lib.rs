//! # GoodbyeDPI Orchestrator
//!
//! Async engine that applies diagnosis plans to the live bypass state.
//!
//! ## Architecture
//!
//! - **Gate** - single-slot mutual exclusion, one for manual applies and one
//!   for the autopilot
//! - **Transaction** - snapshot, apply, DoH reconcile and commit under a
//!   cancellation scope, with rollback on every other exit
//! - **Throttle** and **Policy** - decide whether a discovery event may
//!   trigger an automatic apply
//! - **Verification** - queue a short re-test after a commit
//! - **Session** - [`Orchestrator`], owning all of the above
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gdpi_core::{BypassPlan, Config, StrategyId};
//! use gdpi_orchestrator::{CancellationToken, Orchestrator};
//! use gdpi_platform::{ChannelRetestSink, InMemoryDns, InMemoryPacketEngine};
//!
//! # async fn run() -> gdpi_core::Result<()> {
//! let (sink, _units) = ChannelRetestSink::channel();
//! let session = Orchestrator::builder(
//!     Config::default(),
//!     Arc::new(InMemoryPacketEngine::default()),
//!     Arc::new(InMemoryDns::default()),
//!     Arc::new(sink),
//! )
//! .build()?;
//!
//! let plan = BypassPlan::new("SNI filtering").with_strategy(StrategyId::TlsFragment);
//! let outcome = session
//!     .apply_plan(plan, "example.com", None, CancellationToken::new())
//!     .await?;
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cancel;
pub mod gate;
pub mod notify;
pub mod plans;
pub mod policy;
pub mod session;
pub mod store;
pub mod throttle;
pub mod transaction;
pub mod verify;

pub use cancel::CancelScope;
pub use gate::{ApplyGate, GateHandle};
pub use notify::{ApplyOrigin, NoopNotifier, Notifier, SessionEvent};
pub use policy::AutoApplyPolicy;
pub use session::{AutoApplyDecision, Orchestrator, OrchestratorBuilder};
pub use store::OptionsStore;
pub use throttle::{AutoApplyThrottler, Reservation, TargetState};
pub use transaction::{PlanTransaction, TransactionReport};
pub use verify::{CandidateSource, VerificationScheduler};

// Outcome types callers match on
pub use gdpi_core::{AbortReason, ApplyOutcome, ApplyStatus, CancelReason, RollbackStatus, SkipReason};
pub use tokio_util::sync::CancellationToken;
