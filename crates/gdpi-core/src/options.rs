//! Live bypass configuration
//!
//! [`BypassOptions`] is what the packet engine runs with. Fragmentation and
//! disorder are mutually exclusive: the flags are private and can only be
//! changed through methods that keep at most one of them set.

use serde::Serialize;
use std::fmt;

use crate::preset::{normalize_sizes_or_default, FragmentPreset, DEFAULT_FRAGMENT_SIZES, PRESET_PROFILE};

/// Bypass flags and fragment settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BypassOptions {
    fragment: bool,
    disorder: bool,
    /// Fake packets with low TTL
    pub fake: bool,
    /// Drop injected RST packets
    pub drop_rst: bool,
    /// Drop UDP/443 so QUIC falls back to TCP
    pub drop_udp443: bool,
    /// Allow connections without SNI
    pub allow_no_sni: bool,
    /// HTTP Host header tricks
    pub http_host_tricks: bool,
    /// Fake packets with a bad checksum
    pub bad_checksum: bool,
    /// Let the engine shrink fragments further when it sees resets
    pub auto_adjust_aggressive: bool,
    /// Ordered fragment sizes, 1 to 4 entries, each at least 4
    pub fragment_sizes: Vec<u16>,
    /// Name of the preset the sizes came from
    pub preset_name: String,
}

impl Default for BypassOptions {
    fn default() -> Self {
        Self {
            fragment: false,
            disorder: false,
            fake: false,
            drop_rst: false,
            drop_udp443: false,
            allow_no_sni: false,
            http_host_tricks: false,
            bad_checksum: false,
            auto_adjust_aggressive: false,
            fragment_sizes: DEFAULT_FRAGMENT_SIZES.to_vec(),
            preset_name: PRESET_PROFILE.to_string(),
        }
    }
}

impl BypassOptions {
    /// Whether TLS fragmentation is on
    pub fn fragment_enabled(&self) -> bool {
        self.fragment
    }

    /// Whether TLS disorder is on
    pub fn disorder_enabled(&self) -> bool {
        self.disorder
    }

    /// Turn fragmentation on and disorder off
    pub fn enable_fragment(&mut self) {
        self.fragment = true;
        self.disorder = false;
    }

    /// Turn disorder on and fragmentation off
    pub fn enable_disorder(&mut self) {
        self.disorder = true;
        self.fragment = false;
    }

    /// Turn both splitting modes off
    pub fn disable_splitting(&mut self) {
        self.fragment = false;
        self.disorder = false;
    }

    /// Take sizes and name from a preset
    pub fn use_preset(&mut self, preset: &FragmentPreset) {
        self.fragment_sizes = preset.sizes.clone();
        self.preset_name = preset.name.clone();
    }

    /// Re-establish size bounds
    pub fn normalize(&mut self) {
        let raw: Vec<i64> = self.fragment_sizes.iter().map(|&s| i64::from(s)).collect();
        self.fragment_sizes = normalize_sizes_or_default(&raw);
        if self.preset_name.trim().is_empty() {
            self.preset_name = PRESET_PROFILE.to_string();
        }
    }

    /// Whether any technique is active
    pub fn is_any_enabled(&self) -> bool {
        self.fragment
            || self.disorder
            || self.fake
            || self.drop_rst
            || self.drop_udp443
            || self.allow_no_sni
            || self.http_host_tricks
            || self.bad_checksum
    }

    /// Readable strategy summary, e.g. `Fragment + DROP RST`, or `off`
    pub fn summary(&self) -> String {
        let parts: Vec<&str> = [
            (self.fragment, "Fragment"),
            (self.disorder, "Disorder"),
            (self.fake, "Fake"),
            (self.drop_rst, "DROP RST"),
            (self.drop_udp443, "DROP UDP/443"),
            (self.allow_no_sni, "AllowNoSNI"),
            (self.http_host_tricks, "HTTP Host tricks"),
            (self.bad_checksum, "BadChecksum"),
        ]
        .into_iter()
        .filter_map(|(on, label)| on.then_some(label))
        .collect();

        if parts.is_empty() {
            "off".to_string()
        } else {
            parts.join(" + ")
        }
    }
}

impl fmt::Display for BypassOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())?;
        if self.fragment || self.disorder {
            let sizes = self
                .fragment_sizes
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join("/");
            write!(f, " [{} {}]", self.preset_name, sizes)?;
        }
        if self.auto_adjust_aggressive {
            write!(f, " (auto-adjust)")?;
        }
        Ok(())
    }
}

/// System DNS state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DnsState {
    /// DNS-over-HTTPS active
    pub doh_enabled: bool,
    /// DoH provider preset
    pub dns_preset: String,
}

impl DnsState {
    /// DoH off with the given preset remembered
    pub fn disabled(dns_preset: impl Into<String>) -> Self {
        Self {
            doh_enabled: false,
            dns_preset: dns_preset.into(),
        }
    }
}

impl Default for DnsState {
    fn default() -> Self {
        Self::disabled(DEFAULT_DNS_PRESET)
    }
}

/// DoH provider used when nothing else is configured
pub const DEFAULT_DNS_PRESET: &str = "Cloudflare";

/// Everything an apply may change, captured for rollback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    /// Packet engine options
    pub options: BypassOptions,
    /// DNS state
    pub dns: DnsState,
}

impl StateSnapshot {
    /// Create a snapshot
    pub fn new(options: BypassOptions, dns: DnsState) -> Self {
        Self { options, dns }
    }

    /// One-line state summary for logs and user messages
    pub fn summary(&self) -> String {
        let doh = if self.dns.doh_enabled {
            format!("DoH on ({})", self.dns.dns_preset)
        } else {
            "DoH off".to_string()
        };
        format!("{} | {}", self.options, doh)
    }
}
