//! Host key utilities
//!
//! Normalization, IP detection and registrable-domain extraction shared by
//! the throttler, the grouping and the verification scheduler.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

/// Second-level public suffixes that need three labels for a registrable domain
static COMPOUND_SUFFIXES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "co.uk", "org.uk", "ac.uk", "gov.uk", "me.uk",
        "com.tr", "net.tr", "org.tr", "gov.tr", "edu.tr", "gen.tr", "web.tr", "bel.tr",
        "com.au", "net.au", "org.au", "edu.au",
        "co.jp", "ne.jp", "or.jp",
        "com.br", "net.br", "org.br",
        "co.kr", "or.kr",
        "com.cn", "net.cn", "org.cn",
        "co.in", "net.in", "org.in",
        "com.ru", "net.ru", "org.ru",
        "com.ua", "net.ua", "org.ua",
        "co.nz", "co.za", "com.mx", "com.ar", "com.sg", "com.hk", "com.tw",
    ]
    .into_iter()
    .collect()
});

/// Lowercase, trim whitespace and dots, strip a port or IPv6 brackets
pub fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('.');
    if let Ok(addr) = trimmed.parse::<SocketAddr>() {
        return addr.ip().to_string();
    }
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    if let Ok(ip) = unbracketed.parse::<IpAddr>() {
        return ip.to_string();
    }
    let host = match unbracketed.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) && !host.contains(':') => host,
        _ => unbracketed,
    };
    host.trim_matches('.').to_lowercase()
}

/// Parse a host key as an IP address
pub fn parse_ip(host: &str) -> Option<IpAddr> {
    normalize_host(host).parse().ok()
}

/// Whether the host key is an IP literal
pub fn is_ip_literal(host: &str) -> bool {
    parse_ip(host).is_some()
}

/// Registrable domain (base suffix) of a host
///
/// `a.b.example.com` gives `example.com`, `www.bbc.co.uk` gives `bbc.co.uk`.
/// Returns `None` for IPs and single-label names.
pub fn registrable_domain(host: &str) -> Option<String> {
    let host = normalize_host(host);
    if host.is_empty() || host.parse::<IpAddr>().is_ok() {
        return None;
    }

    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    if labels.len() < 2 {
        return None;
    }

    let last_two = labels[labels.len() - 2..].join(".");
    if COMPOUND_SUFFIXES.contains(last_two.as_str()) {
        if labels.len() < 3 {
            return None;
        }
        return Some(labels[labels.len() - 3..].join("."));
    }
    Some(last_two)
}

/// Whether `host` is `suffix` or one of its subdomains
pub fn is_host_in_suffix(host: &str, suffix: &str) -> bool {
    let host = normalize_host(host);
    let suffix = normalize_host(suffix);
    if host.is_empty() || suffix.is_empty() {
        return false;
    }
    host == suffix || host.ends_with(&format!(".{suffix}"))
}

/// Normalized auto-apply target for a raw host key
///
/// IPs pass through, domains widen to their registrable domain, names
/// without one stay as they are. Empty input gives `None`.
pub fn resolve_target_host(raw: &str) -> Option<String> {
    let host = normalize_host(raw);
    if host.is_empty() {
        return None;
    }
    if host.parse::<IpAddr>().is_ok() {
        return Some(host);
    }
    Some(registrable_domain(&host).unwrap_or(host))
}
