//! Bypass plans as emitted by the diagnosis engine
//!
//! A plan is an immutable recommendation: a diagnosis label, a confidence
//! score and an ordered list of strategies. Order matters and is preserved
//! through mapping, signatures and summaries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Strategy identifier
///
/// Unknown identifiers survive deserialization as [`StrategyId::Other`] so
/// that a newer diagnosis engine never breaks plan parsing; the mapper skips
/// them with a warning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StrategyId {
    /// TLS ClientHello fragmentation
    TlsFragment,
    /// Fragmentation with the aggressive preset and auto-adjust
    AggressiveFragment,
    /// TLS segment reordering
    TlsDisorder,
    /// Fake packets with a low TTL
    TlsFakeTtl,
    /// Drop injected RST packets
    DropRst,
    /// Switch system DNS to DNS-over-HTTPS
    UseDoh,
    /// QUIC to TCP fallback by dropping UDP/443
    QuicObfuscation,
    /// HTTP Host header tricks
    HttpHostTricks,
    /// Fake packets with a bad checksum
    BadChecksum,
    /// Identifier this build does not know
    Other(String),
}

impl StrategyId {
    /// All identifiers this build knows
    pub const KNOWN: [StrategyId; 9] = [
        StrategyId::TlsFragment,
        StrategyId::AggressiveFragment,
        StrategyId::TlsDisorder,
        StrategyId::TlsFakeTtl,
        StrategyId::DropRst,
        StrategyId::UseDoh,
        StrategyId::QuicObfuscation,
        StrategyId::HttpHostTricks,
        StrategyId::BadChecksum,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &str {
        match self {
            Self::TlsFragment => "TlsFragment",
            Self::AggressiveFragment => "AggressiveFragment",
            Self::TlsDisorder => "TlsDisorder",
            Self::TlsFakeTtl => "TlsFakeTtl",
            Self::DropRst => "DropRst",
            Self::UseDoh => "UseDoh",
            Self::QuicObfuscation => "QuicObfuscation",
            Self::HttpHostTricks => "HttpHostTricks",
            Self::BadChecksum => "BadChecksum",
            Self::Other(name) => name,
        }
    }

    /// Token used in plan summaries
    pub fn token(&self) -> String {
        match self {
            Self::TlsFragment => "TLS_FRAGMENT".to_string(),
            Self::AggressiveFragment => "TLS_FRAGMENT_AGGRESSIVE".to_string(),
            Self::TlsDisorder => "TLS_DISORDER".to_string(),
            Self::TlsFakeTtl => "TLS_FAKE_TTL".to_string(),
            Self::DropRst => "DROP_RST".to_string(),
            Self::UseDoh => "DOH".to_string(),
            Self::QuicObfuscation => "QUIC_TO_TCP".to_string(),
            Self::HttpHostTricks => "HTTP_HOST_TRICKS".to_string(),
            Self::BadChecksum => "BAD_CHECKSUM".to_string(),
            Self::Other(name) => name.to_uppercase(),
        }
    }

    /// Whether this build knows how to map the identifier
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<&str> for StrategyId {
    fn from(value: &str) -> Self {
        let trimmed = value.trim();
        Self::KNOWN
            .iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(trimmed))
            .cloned()
            .unwrap_or_else(|| Self::Other(trimmed.to_string()))
    }
}

impl From<String> for StrategyId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<StrategyId> for String {
    fn from(id: StrategyId) -> Self {
        match id {
            StrategyId::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational risk of a strategy, used by the auto-apply policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Safe to apply unattended
    #[default]
    Low,
    /// May affect unrelated traffic
    Medium,
    /// Needs explicit user intent
    High,
}

/// One recommended strategy with optional parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAction {
    /// Strategy identifier
    pub id: StrategyId,
    /// Free-form parameters (fragment sizes, preset name, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    /// Risk classification
    #[serde(default)]
    pub risk: RiskLevel,
}

impl StrategyAction {
    /// Create an action without parameters
    pub fn new(id: impl Into<StrategyId>) -> Self {
        Self {
            id: id.into(),
            parameters: BTreeMap::new(),
            risk: RiskLevel::Low,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Set the risk level
    pub fn with_risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }
}

impl From<StrategyId> for StrategyAction {
    fn from(id: StrategyId) -> Self {
        Self::new(id)
    }
}

/// A diagnosis engine recommendation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BypassPlan {
    /// Diagnosis label the plan answers
    pub for_diagnosis: String,
    /// Confidence 0-100
    pub plan_confidence: u8,
    /// Ordered strategies
    pub strategies: Vec<StrategyAction>,
    /// Assist flag: drop UDP/443 so QUIC falls back to TCP
    pub drop_udp443: bool,
    /// Assist flag: allow connections without SNI
    pub allow_no_sni: bool,
    /// Human-readable reasoning
    pub reasoning: String,
}

impl BypassPlan {
    /// Create an empty plan for a diagnosis
    pub fn new(for_diagnosis: impl Into<String>) -> Self {
        Self {
            for_diagnosis: for_diagnosis.into(),
            ..Default::default()
        }
    }

    /// Append a strategy
    pub fn with_strategy(mut self, action: impl Into<StrategyAction>) -> Self {
        self.strategies.push(action.into());
        self
    }

    /// Set the confidence, clamped to 100
    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.plan_confidence = confidence.min(100);
        self
    }

    /// Set the UDP/443 assist flag
    pub fn with_drop_udp443(mut self, value: bool) -> Self {
        self.drop_udp443 = value;
        self
    }

    /// Set the no-SNI assist flag
    pub fn with_allow_no_sni(mut self, value: bool) -> Self {
        self.allow_no_sni = value;
        self
    }

    /// Set the reasoning text
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    /// Confidence clamped to 0-100
    pub fn confidence(&self) -> u8 {
        self.plan_confidence.min(100)
    }

    /// Whether applying the plan would change anything at all
    pub fn has_applicable_actions(&self) -> bool {
        !self.strategies.is_empty() || self.drop_udp443 || self.allow_no_sni
    }

    /// Whether the plan asks for DNS-over-HTTPS
    pub fn requests_doh(&self) -> bool {
        self.strategies.iter().any(|s| s.id == StrategyId::UseDoh)
    }

    /// Order-preserving fingerprint used for change detection
    ///
    /// Format: `"{ids joined by ','}|U{0|1}|N{0|1}"`.
    pub fn signature(&self) -> String {
        let ids = self
            .strategies
            .iter()
            .map(|s| s.id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{ids}|U{}|N{}",
            u8::from(self.drop_udp443),
            u8::from(self.allow_no_sni)
        )
    }

    /// Token summary such as `TLS_FRAGMENT + DROP_RST + DROP_UDP_443`
    pub fn plan_text(&self) -> String {
        let mut tokens: Vec<String> = self.strategies.iter().map(|s| s.id.token()).collect();
        if self.drop_udp443 {
            tokens.push("DROP_UDP_443".to_string());
        }
        if self.allow_no_sni {
            tokens.push("ALLOW_NO_SNI".to_string());
        }
        if tokens.is_empty() {
            "(empty)".to_string()
        } else {
            tokens.join(" + ")
        }
    }
}
