//! Plan-to-options mapping
//!
//! A pure fold over the plan's strategies, in order, on a working copy of
//! the current options. Unknown strategies and unusable parameters are
//! skipped and reported; they never fail the mapping.

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::options::BypassOptions;
use crate::plan::{BypassPlan, StrategyAction, StrategyId};
use crate::preset::{FragmentPreset, PresetCatalog, PRESET_AGGRESSIVE};

/// Parameter keys that may carry a preset name
pub const PRESET_NAME_KEYS: [&str; 5] = [
    "TlsFragmentPreset",
    "TlsFragmentPresetName",
    "Preset",
    "PresetName",
    "FragmentPreset",
];

/// Parameter key for explicit fragment sizes
pub const SIZES_KEY: &str = "TlsFragmentSizes";

/// Parameter key for the auto-adjust flag
pub const AUTO_ADJUST_KEY: &str = "AutoAdjustAggressive";

/// Fragment parameters extracted from a strategy action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentParams {
    /// Requested preset name
    pub preset_name: Option<String>,
    /// Raw requested sizes, not yet normalized
    pub sizes: Option<Vec<i64>>,
    /// Explicit auto-adjust choice
    pub auto_adjust: Option<bool>,
}

impl FragmentParams {
    /// Parse the known keys; unparseable values are dropped with a warning
    pub fn parse(parameters: &BTreeMap<String, String>) -> Self {
        let lookup = |key: &str| {
            parameters
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.trim())
                .filter(|v| !v.is_empty())
        };

        let preset_name = PRESET_NAME_KEYS
            .iter()
            .find_map(|key| lookup(*key))
            .map(str::to_string);

        let sizes = lookup(SIZES_KEY).and_then(|raw| {
            let parsed = parse_sizes(raw);
            if parsed.is_none() {
                warn!(value = raw, "Ignoring unparseable {SIZES_KEY}");
            }
            parsed
        });

        let auto_adjust = lookup(AUTO_ADJUST_KEY).and_then(|raw| {
            let parsed = parse_bool(raw);
            if parsed.is_none() {
                warn!(value = raw, "Ignoring unparseable {AUTO_ADJUST_KEY}");
            }
            parsed
        });

        Self {
            preset_name,
            sizes,
            auto_adjust,
        }
    }
}

/// Accepts a JSON array (`[32, 32]`) or a list split on `,;/` and spaces
fn parse_sizes(raw: &str) -> Option<Vec<i64>> {
    if raw.starts_with('[') {
        return serde_json::from_str::<Vec<i64>>(raw).ok();
    }
    let values: Vec<i64> = raw
        .split(|c: char| matches!(c, ',' | ';' | '/') || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect();
    (!values.is_empty()).then_some(values)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Output of [`map_plan`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedPlan {
    /// Options to hand to the packet engine
    pub options: BypassOptions,
    /// The plan asked for DNS-over-HTTPS
    pub doh_requested: bool,
    /// Preset synthesized from explicit sizes, to register on commit
    pub synthesized_preset: Option<FragmentPreset>,
    /// Strategies that were not applied, with the reason
    pub skipped: Vec<String>,
}

/// Translate a plan into options, starting from `current`
pub fn map_plan(plan: &BypassPlan, current: &BypassOptions, presets: &PresetCatalog) -> MappedPlan {
    let mut mapped = MappedPlan {
        options: current.clone(),
        doh_requested: false,
        synthesized_preset: None,
        skipped: Vec::new(),
    };
    let mut explicit_auto_adjust = false;

    for action in &plan.strategies {
        explicit_auto_adjust |= apply_action(action, presets, &mut mapped);
    }

    mapped.options.drop_udp443 |= plan.drop_udp443;
    mapped.options.allow_no_sni |= plan.allow_no_sni;

    if mapped.options.preset_name == PRESET_AGGRESSIVE && !explicit_auto_adjust {
        mapped.options.auto_adjust_aggressive = true;
    }

    mapped.options.normalize();
    mapped
}

/// Fold one action into the working copy; returns true if it set auto-adjust explicitly
fn apply_action(action: &StrategyAction, presets: &PresetCatalog, mapped: &mut MappedPlan) -> bool {
    let options = &mut mapped.options;
    match &action.id {
        StrategyId::TlsFragment => {
            options.enable_fragment();
            let params = FragmentParams::parse(&action.parameters);

            if let Some(raw) = &params.sizes {
                let resolved = presets.resolve_or_synthesize(raw);
                options.use_preset(&resolved.preset);
                if resolved.synthesized {
                    mapped.synthesized_preset = Some(resolved.preset);
                }
            } else if let Some(name) = &params.preset_name {
                match presets.find(name) {
                    Some(preset) => options.use_preset(preset),
                    None => {
                        warn!(preset = %name, "Unknown fragment preset in plan, keeping current sizes");
                        mapped.skipped.push(format!("preset '{name}' not found"));
                    }
                }
            }

            if let Some(auto) = params.auto_adjust {
                options.auto_adjust_aggressive = auto;
                return true;
            }
        }
        StrategyId::AggressiveFragment => {
            options.enable_fragment();
            if let Some(preset) = presets.find(PRESET_AGGRESSIVE) {
                options.use_preset(preset);
            }
            options.auto_adjust_aggressive = true;
            return true;
        }
        StrategyId::TlsDisorder => options.enable_disorder(),
        StrategyId::TlsFakeTtl => options.fake = true,
        StrategyId::DropRst => options.drop_rst = true,
        StrategyId::UseDoh => mapped.doh_requested = true,
        StrategyId::QuicObfuscation => options.drop_udp443 = true,
        StrategyId::HttpHostTricks => options.http_host_tricks = true,
        StrategyId::BadChecksum => options.bad_checksum = true,
        StrategyId::Other(name) => {
            warn!(strategy = %name, "Skipping unrecognized strategy");
            mapped.skipped.push(format!("unrecognized strategy '{name}'"));
        }
    }
    debug!(strategy = %action.id, "Mapped strategy");
    false
}
