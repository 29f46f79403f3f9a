//! # GoodbyeDPI Core
//!
//! Platform-independent model for applying diagnosis plans.
//!
//! ## Architecture
//!
//! This crate provides:
//! - **Plans** - strategy recommendations from the diagnosis engine
//! - **Options** - live bypass configuration with its invariants
//! - **Mapping** - pure plan-to-options translation with fragment presets
//! - **Grouping** - subdomain families, learned groups and card merging
//! - **Configuration** - TOML configuration and best-effort session state
//!
//! ## Example
//!
//! ```rust
//! use gdpi_core::{map_plan, BypassOptions, BypassPlan, PresetCatalog, StrategyId};
//!
//! let plan = BypassPlan::new("SNI filtering")
//!     .with_strategy(StrategyId::TlsFragment)
//!     .with_strategy(StrategyId::DropRst);
//!
//! let mapped = map_plan(&plan, &BypassOptions::default(), &PresetCatalog::default());
//! assert!(mapped.options.fragment_enabled());
//! assert_eq!(mapped.options.summary(), "Fragment + DROP RST");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod domain;
pub mod error;
pub mod grouping;
pub mod mapper;
pub mod noise;
pub mod options;
pub mod outcome;
pub mod persist;
pub mod plan;
pub mod preset;

// Re-exports for convenience
pub use config::Config;
pub use error::{Error, Result};
pub use mapper::{map_plan, MappedPlan};
pub use noise::NoiseHostFilter;
pub use options::{BypassOptions, DnsState, StateSnapshot};
pub use outcome::{AbortReason, ApplyOutcome, ApplyStatus, CancelReason, RollbackStatus, SkipReason};
pub use plan::{BypassPlan, RiskLevel, StrategyAction, StrategyId};
pub use preset::{FragmentPreset, PresetCatalog};
