//! Noise host filter
//!
//! Telemetry, ad and analytics hosts are operationally irrelevant for bypass
//! decisions. Patterns are wildcards (`*.doubleclick.net`) compiled to
//! anchored case-insensitive regexes. Exclude patterns win over hosts.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::NoiseConfig;
use crate::domain::normalize_host;
use crate::error::{Error, Result};

/// Patterns that are always noise
pub const FALLBACK_PATTERNS: [&str; 4] = ["*.1e100.net", "*.arpa", "*.local", "*.localdomain"];

/// Common telemetry and ad endpoints
pub const DEFAULT_PATTERNS: [&str; 10] = [
    "*.doubleclick.net",
    "*.google-analytics.com",
    "*.googletagmanager.com",
    "*.googlesyndication.com",
    "*.app-measurement.com",
    "*.scorecardresearch.com",
    "*.events.data.microsoft.com",
    "*.telemetry.*",
    "*.crashlytics.com",
    "*.adnxs.com",
];

/// On-disk pattern file: `{"patterns": {category: {"hosts": [], "exclude": []}}}`
#[derive(Debug, Default, Deserialize)]
struct PatternFile {
    #[serde(default)]
    patterns: BTreeMap<String, PatternCategory>,
}

#[derive(Debug, Default, Deserialize)]
struct PatternCategory {
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

/// Classifies hosts as noise
#[derive(Debug, Clone)]
pub struct NoiseHostFilter {
    hosts: Vec<Regex>,
    excludes: Vec<Regex>,
}

impl NoiseHostFilter {
    /// Fallback and default patterns, no excludes
    pub fn with_defaults() -> Self {
        let mut filter = Self::empty();
        for pattern in FALLBACK_PATTERNS.iter().chain(DEFAULT_PATTERNS.iter()) {
            if let Err(e) = filter.add_host_pattern(pattern) {
                warn!("Skipping built-in noise pattern: {}", e);
            }
        }
        filter
    }

    /// Filter that matches nothing
    pub fn empty() -> Self {
        Self {
            hosts: Vec::new(),
            excludes: Vec::new(),
        }
    }

    /// Build from explicit pattern lists
    pub fn from_patterns<S: AsRef<str>>(hosts: &[S], excludes: &[S]) -> Result<Self> {
        let mut filter = Self::empty();
        for pattern in hosts {
            filter.add_host_pattern(pattern.as_ref())?;
        }
        for pattern in excludes {
            filter.add_exclude_pattern(pattern.as_ref())?;
        }
        Ok(filter)
    }

    /// Load a JSON pattern file on top of the fallback patterns
    ///
    /// Invalid individual patterns are skipped with a warning; an unreadable
    /// or malformed file is an error.
    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let file: PatternFile = serde_json::from_str(&content)?;

        let mut filter = Self::empty();
        for pattern in FALLBACK_PATTERNS {
            filter.add_host_pattern(pattern)?;
        }
        for (category, entry) in &file.patterns {
            for pattern in &entry.hosts {
                if let Err(e) = filter.add_host_pattern(pattern) {
                    warn!(category = %category, "{}", e);
                }
            }
            for pattern in &entry.exclude {
                if let Err(e) = filter.add_exclude_pattern(pattern) {
                    warn!(category = %category, "{}", e);
                }
            }
        }

        info!(
            "Loaded {} noise patterns ({} excludes) from {}",
            filter.hosts.len(),
            filter.excludes.len(),
            path.display()
        );
        Ok(filter)
    }

    /// Build from configuration: the pattern file (or built-ins) plus extras
    pub fn from_config(config: &NoiseConfig) -> Result<Self> {
        let mut filter = match &config.pattern_file {
            Some(path) => Self::load_json(path)?,
            None => Self::with_defaults(),
        };
        for pattern in &config.extra_patterns {
            filter.add_host_pattern(pattern)?;
        }
        for pattern in &config.exclude_patterns {
            filter.add_exclude_pattern(pattern)?;
        }
        Ok(filter)
    }

    /// Add a noise pattern
    pub fn add_host_pattern(&mut self, pattern: &str) -> Result<()> {
        self.hosts.push(compile_wildcard(pattern)?);
        Ok(())
    }

    /// Add an exclusion pattern
    pub fn add_exclude_pattern(&mut self, pattern: &str) -> Result<()> {
        self.excludes.push(compile_wildcard(pattern)?);
        Ok(())
    }

    /// Whether the host is noise
    pub fn is_noise(&self, host: &str) -> bool {
        let host = normalize_host(host);
        if host.is_empty() {
            return false;
        }
        if self.excludes.iter().any(|re| re.is_match(&host)) {
            return false;
        }
        let matched = self.hosts.iter().any(|re| re.is_match(&host));
        if matched {
            debug!(host = %host, "Noise host");
        }
        matched
    }

    /// Number of noise patterns
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Check if there are no noise patterns
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl Default for NoiseHostFilter {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// `*.example.com` also matches `example.com` itself
fn compile_wildcard(pattern: &str) -> Result<Regex> {
    let pattern = pattern.trim().to_lowercase();
    if pattern.is_empty() {
        return Err(Error::NoisePattern {
            pattern,
            message: "empty pattern".to_string(),
        });
    }

    let body = regex::escape(&pattern).replace(r"\*", ".*").replace(r"\?", ".");
    let source = match body.strip_prefix(r".*\.") {
        Some(rest) => format!(r"(?i)^(?:.*\.)?{rest}$"),
        None => format!("(?i)^{body}$"),
    };
    Regex::new(&source).map_err(|e| Error::NoisePattern {
        pattern,
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_patterns() {
        let filter = NoiseHostFilter::with_defaults();
        assert!(filter.is_noise("ssl.google-analytics.com"));
        assert!(filter.is_noise("google-analytics.com"));
        assert!(filter.is_noise("lhr25s10-in-f14.1e100.net"));
        assert!(filter.is_noise("4.3.2.1.in-addr.arpa"));
        assert!(filter.is_noise("printer.local"));
        assert!(!filter.is_noise("www.youtube.com"));
        assert!(!filter.is_noise(""));
    }

    #[test]
    fn test_excludes_take_precedence() {
        let filter = NoiseHostFilter::from_patterns(&["*.example.com"], &["keep.example.com"]).unwrap();
        assert!(filter.is_noise("ads.example.com"));
        assert!(!filter.is_noise("keep.example.com"));
    }

    #[test]
    fn test_wildcard_is_anchored() {
        let filter = NoiseHostFilter::from_patterns(&["ads.*"], &[] as &[&str]).unwrap();
        assert!(filter.is_noise("ads.example.com"));
        assert!(!filter.is_noise("myads.example.com"));
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"patterns": {{"ads": {{"hosts": ["*.adserver.net"], "exclude": ["cdn.adserver.net"]}}}}}}"#
        )
        .unwrap();

        let filter = NoiseHostFilter::load_json(file.path()).unwrap();
        assert!(filter.is_noise("x.adserver.net"));
        assert!(!filter.is_noise("cdn.adserver.net"));
        assert!(filter.is_noise("host.localdomain"));
    }

    #[test]
    fn test_from_config() {
        let config = NoiseConfig {
            pattern_file: None,
            extra_patterns: vec!["*.metrics.example".to_string()],
            exclude_patterns: vec!["keep.local".to_string()],
        };
        let filter = NoiseHostFilter::from_config(&config).unwrap();
        assert!(filter.is_noise("a.metrics.example"));
        assert!(filter.is_noise("nas.local"));
        assert!(!filter.is_noise("keep.local"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        let mut filter = NoiseHostFilter::empty();
        assert!(filter.add_host_pattern("  ").is_err());
    }
}
