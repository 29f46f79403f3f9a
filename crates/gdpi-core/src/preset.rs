//! TLS fragment presets
//!
//! Built-in presets plus presets synthesized from explicit plan sizes.
//! Synthesized presets are deduplicated by sizes before registration.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Balanced built-in preset
pub const PRESET_STANDARD: &str = "Стандарт";
/// Larger first fragment
pub const PRESET_MODERATE: &str = "Умеренный";
/// Two small fragments, paired with auto-adjust
pub const PRESET_AGGRESSIVE: &str = "Агрессивный";
/// Sizes taken from the active profile
pub const PRESET_PROFILE: &str = "Профиль";
/// Name given to presets synthesized from plan sizes
pub const PRESET_SYNTHESIZED: &str = "План";

/// Sizes used when nothing usable was supplied
pub const DEFAULT_FRAGMENT_SIZES: [u16; 1] = [64];

/// Smallest fragment the packet engine accepts
pub const MIN_FRAGMENT_SIZE: u16 = 4;

/// Most fragments a preset may carry
pub const MAX_FRAGMENTS: usize = 4;

/// A named list of fragment sizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentPreset {
    /// Display name
    pub name: String,
    /// Ordered fragment sizes
    pub sizes: Vec<u16>,
    /// Short description
    pub description: String,
}

impl FragmentPreset {
    /// Create a preset, normalizing its sizes
    pub fn new(name: impl Into<String>, sizes: &[u16], description: impl Into<String>) -> Self {
        let raw: Vec<i64> = sizes.iter().map(|&s| i64::from(s)).collect();
        Self {
            name: name.into(),
            sizes: normalize_sizes_or_default(&raw),
            description: description.into(),
        }
    }
}

/// Normalize raw fragment sizes
///
/// Non-positive values are dropped, the rest are floored at
/// [`MIN_FRAGMENT_SIZE`] and only the first [`MAX_FRAGMENTS`] are kept.
/// The result may be empty.
pub fn normalize_sizes(raw: &[i64]) -> Vec<u16> {
    raw.iter()
        .copied()
        .filter(|&v| v > 0)
        .map(|v| u16::try_from(v).unwrap_or(u16::MAX).max(MIN_FRAGMENT_SIZE))
        .take(MAX_FRAGMENTS)
        .collect()
}

/// Like [`normalize_sizes`] but never empty
pub fn normalize_sizes_or_default(raw: &[i64]) -> Vec<u16> {
    let sizes = normalize_sizes(raw);
    if sizes.is_empty() {
        DEFAULT_FRAGMENT_SIZES.to_vec()
    } else {
        sizes
    }
}

/// Map a short alias to a built-in preset name
pub fn resolve_alias(name: &str) -> Option<&'static str> {
    match name.trim().to_lowercase().as_str() {
        "standard" | "std" => Some(PRESET_STANDARD),
        "moderate" | "medium" => Some(PRESET_MODERATE),
        "aggressive" | "agg" => Some(PRESET_AGGRESSIVE),
        "profile" => Some(PRESET_PROFILE),
        _ => None,
    }
}

/// Result of resolving sizes against the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPreset {
    /// The preset to use
    pub preset: FragmentPreset,
    /// True if the preset is new and should be registered on commit
    pub synthesized: bool,
}

/// Known fragment presets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetCatalog {
    presets: Vec<FragmentPreset>,
}

impl PresetCatalog {
    /// Built-in presets, with the profile preset using `profile_sizes`
    pub fn builtin(profile_sizes: &[u16]) -> Self {
        Self {
            presets: vec![
                FragmentPreset::new(PRESET_STANDARD, &[64], "Balanced: one split after 64 bytes"),
                FragmentPreset::new(PRESET_MODERATE, &[96], "Gentler: one split after 96 bytes"),
                FragmentPreset::new(PRESET_AGGRESSIVE, &[32, 32], "Two small fragments, auto-adjusted"),
                FragmentPreset::new(PRESET_PROFILE, profile_sizes, "Sizes from the active profile"),
            ],
        }
    }

    /// Find a preset by exact name (case-insensitive) or alias
    pub fn find(&self, name: &str) -> Option<&FragmentPreset> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        self.presets
            .iter()
            .find(|p| p.name.to_lowercase() == name.to_lowercase())
            .or_else(|| {
                let alias = resolve_alias(name)?;
                self.presets.iter().find(|p| p.name == alias)
            })
    }

    /// Find a preset with exactly these sizes
    pub fn find_by_sizes(&self, sizes: &[u16]) -> Option<&FragmentPreset> {
        self.presets.iter().find(|p| p.sizes == sizes)
    }

    /// Reuse a preset with matching sizes or synthesize a new one
    pub fn resolve_or_synthesize(&self, raw_sizes: &[i64]) -> ResolvedPreset {
        let sizes = normalize_sizes_or_default(raw_sizes);
        if let Some(existing) = self.find_by_sizes(&sizes) {
            return ResolvedPreset {
                preset: existing.clone(),
                synthesized: false,
            };
        }

        let label = sizes.iter().map(u16::to_string).collect::<Vec<_>>().join("/");
        debug!(sizes = %label, "Synthesizing fragment preset from plan sizes");
        ResolvedPreset {
            preset: FragmentPreset {
                name: PRESET_SYNTHESIZED.to_string(),
                sizes,
                description: format!("From diagnosis plan: {label}"),
            },
            synthesized: true,
        }
    }

    /// Add a preset unless one with the same sizes exists
    ///
    /// Names may repeat: every synthesized preset shares one name. Returns
    /// true when the preset was added.
    pub fn register(&mut self, preset: FragmentPreset) -> bool {
        if self.find_by_sizes(&preset.sizes).is_some() {
            return false;
        }
        self.presets.push(preset);
        true
    }

    /// Iterate over all presets
    pub fn iter(&self) -> impl Iterator<Item = &FragmentPreset> {
        self.presets.iter()
    }

    /// Number of presets
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::builtin(&DEFAULT_FRAGMENT_SIZES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_sizes() {
        assert_eq!(normalize_sizes(&[2, 4, 8, 16, 999]), vec![4, 4, 8, 16]);
        assert_eq!(normalize_sizes(&[0, -5, 40]), vec![40]);
        assert!(normalize_sizes(&[0, -1]).is_empty());
        assert_eq!(normalize_sizes_or_default(&[]), vec![64]);
        assert_eq!(normalize_sizes(&[100_000]), vec![u16::MAX]);
    }

    #[test]
    fn test_find_by_alias() {
        let catalog = PresetCatalog::default();
        assert_eq!(catalog.find("aggressive").unwrap().name, PRESET_AGGRESSIVE);
        assert_eq!(catalog.find("AGG").unwrap().sizes, vec![32, 32]);
        assert_eq!(catalog.find("Стандарт").unwrap().sizes, vec![64]);
        assert!(catalog.find("turbo").is_none());
        assert!(catalog.find("  ").is_none());
    }

    #[test]
    fn test_resolve_reuses_existing_sizes() {
        let catalog = PresetCatalog::default();
        let resolved = catalog.resolve_or_synthesize(&[96]);
        assert!(!resolved.synthesized);
        assert_eq!(resolved.preset.name, PRESET_MODERATE);
    }

    #[test]
    fn test_resolve_synthesizes_new_sizes() {
        let catalog = PresetCatalog::default();
        let resolved = catalog.resolve_or_synthesize(&[8, 16]);
        assert!(resolved.synthesized);
        assert_eq!(resolved.preset.name, PRESET_SYNTHESIZED);
        assert_eq!(resolved.preset.sizes, vec![8, 16]);
    }

    #[test]
    fn test_register_dedupes_by_sizes() {
        let mut catalog = PresetCatalog::default();
        let before = catalog.len();
        assert!(!catalog.register(FragmentPreset::new("Copy", &[64], "")));
        assert!(catalog.register(FragmentPreset::new(PRESET_SYNTHESIZED, &[8, 16], "")));
        assert!(!catalog.register(FragmentPreset::new("Other", &[8, 16], "")));
        assert!(catalog.register(FragmentPreset::new(PRESET_SYNTHESIZED, &[12], "")));
        assert_eq!(catalog.len(), before + 2);
    }

    proptest! {
        #[test]
        fn prop_normalized_sizes_are_bounded(raw in proptest::collection::vec(-100i64..100_000, 0..12)) {
            let sizes = normalize_sizes(&raw);
            prop_assert!(sizes.len() <= MAX_FRAGMENTS);
            prop_assert!(sizes.iter().all(|&s| s >= MIN_FRAGMENT_SIZE));
        }
    }
}
