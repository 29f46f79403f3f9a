//! Domain and host grouping
//!
//! Collapses events for related hosts into one logical target:
//!
//! - [`DomainFamilyGrouping`] promotes a registrable domain once enough
//!   shard-like subhosts were seen in a rolling window
//! - [`DomainGroupLearner`] learns groups of domains that co-occur
//! - [`TestStatus::merge`] and [`merge_cards`] fold per-host result cards

mod family;
mod learner;
mod status;

pub use family::{looks_like_shard, DomainFamilyGrouping, FamilyStats};
pub use learner::{learned_group_key, DomainGroup, DomainGroupCatalog, DomainGroupLearner, CATALOG_VERSION};
pub use status::{merge_cards, ResultCard, TestStatus};
