//! # GoodbyeDPI Platform
//!
//! Interfaces to everything the apply engine does not own: the packet
//! engine running the options, the system DNS toggler, the live-testing
//! pipeline, name resolution and the outcome probe.
//!
//! The [`memory`] module carries in-process implementations used by the CLI
//! simulation and by tests. [`net`] carries the system-backed resolver and
//! TCP probe.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod error;
pub mod memory;
pub mod net;
pub mod traits;

pub use cache::ObservedAddressCache;
pub use error::{PlatformError, Result};
pub use memory::{ChannelRetestSink, InMemoryDns, InMemoryPacketEngine, StaticProbe, StaticResolver};
pub use net::{SystemResolver, TcpConnectProbe};
pub use traits::{DnsController, HostDiscovered, HostResolver, OutcomeProbe, PacketEngine, ProbeResult, RetestSink, Transport};
