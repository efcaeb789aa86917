// flowsieve/src/engine/heuristic.rs
//
// Deterministic risk scorer used when the model path is unavailable.
//
// Score = protocol base + content adjustments + address adjustment, with no
// floor or ceiling:
//
//   base        视频流量 10 · HTTP/HTTPS 15 · DNS 8 · 恶意流量 35 · other 25
//   content     −5 per distinct normal path token (max −15) · wp-content +8
//               · ≥4 slashes +10 · ≤1 slash −5   (non-empty content only)
//   addresses   private→private −10 · public→private +8
//
// Thresholds: ≤12 white · ≤25 normal · ≤40 suspicious · above malicious.

use std::net::IpAddr;
use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use ipnetwork::IpNetwork;

use crate::events::{Category, ConnectionRecord};

static NORMAL_PATHS: OnceLock<AhoCorasick> = OnceLock::new();

const NORMAL_PATH_TOKENS: &[&str] = &["app", "blog", "category", "main", "posts", "tags", "list", "categories"];

fn normal_paths() -> &'static AhoCorasick {
    NORMAL_PATHS.get_or_init(|| {
        AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(NORMAL_PATH_TOKENS)
            .expect("normal path AC build failed")
    })
}

/// Score breakdown, kept for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskScore {
    pub base:      i32,
    pub content:   i32,
    pub addresses: i32,
}

impl RiskScore {
    pub fn total(&self) -> i32 {
        self.base + self.content + self.addresses
    }

    pub fn category(&self) -> Category {
        match self.total() {
            i32::MIN..=12 => Category::White,
            13..=25       => Category::Normal,
            26..=40       => Category::Suspicious,
            _             => Category::Malicious,
        }
    }
}

pub fn score(conn: &ConnectionRecord) -> RiskScore {
    RiskScore {
        base:      protocol_base(&conn.protocol_label),
        content:   content_adjustment(&conn.content),
        addresses: address_adjustment(&conn.source_address, &conn.dest_address),
    }
}

fn protocol_base(label: &str) -> i32 {
    match label.trim() {
        "视频流量"        => 10,
        "HTTP" | "HTTPS" => 15,
        "DNS"            => 8,
        "恶意流量"        => 35,
        _                => 25,
    }
}

fn content_adjustment(content: &str) -> i32 {
    if content.is_empty() {
        return 0;
    }
    let mut adj = 0;

    let mut seen = [false; NORMAL_PATH_TOKENS.len()];
    for m in normal_paths().find_overlapping_iter(content) {
        seen[m.pattern().as_usize()] = true;
    }
    let distinct = seen.iter().filter(|s| **s).count() as i32;
    adj -= (distinct * 5).min(15);

    if content.to_lowercase().contains("wp-content") {
        adj += 8;
    }

    match content.matches('/').count() {
        n if n >= 4 => adj += 10,
        0 | 1       => adj -= 5,
        _           => {}
    }
    adj
}

fn address_adjustment(src: &str, dst: &str) -> i32 {
    match (is_internal(src), is_internal(dst)) {
        (true, true)  => -10,
        (false, true) => 8,
        _             => 0,
    }
}

/// Non-global ranges, the same table as Python's `ipaddress` `is_private`.
const INTERNAL_RANGES: [&str; 24] = [
    "0.0.0.0/8",
    "10.0.0.0/8",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/29",
    "192.0.0.170/31",
    "192.0.2.0/24",
    "192.168.0.0/16",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "240.0.0.0/4",
    "255.255.255.255/32",
    "::1/128",
    "::/128",
    "::ffff:0:0/96",
    "100::/64",
    "2001::/23",
    "2001:2::/48",
    "2001:db8::/32",
    "2001:10::/28",
    "fc00::/7",
    "fe80::/10",
];

static INTERNAL: OnceLock<Vec<IpNetwork>> = OnceLock::new();

fn internal_ranges() -> &'static [IpNetwork] {
    INTERNAL.get_or_init(|| {
        INTERNAL_RANGES
            .iter()
            .map(|r| r.parse().expect("fixed range table must parse"))
            .collect()
    })
}

/// Unparsable input counts as public.
pub fn is_internal(ip: &str) -> bool {
    match ip.trim().parse::<IpAddr>() {
        Ok(addr) => internal_ranges().iter().any(|net| net.contains(addr)),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(src: &str, dst: &str, proto: &str, content: &str) -> ConnectionRecord {
        ConnectionRecord::new(src, dst, proto, content)
    }

    #[test]
    fn video_between_private_hosts_is_white() {
        let s = score(&conn("172.16.0.5", "172.16.0.9", "视频流量", ""));
        assert_eq!(s, RiskScore { base: 10, content: 0, addresses: -10 });
        assert_eq!(s.total(), 0);
        assert_eq!(s.category(), Category::White);
    }

    #[test]
    fn inbound_malicious_wordpress_path_is_malicious() {
        let s = score(&conn("203.0.114.7", "10.0.0.8", "恶意流量", "/wp-content/a/b/c/d"));
        assert_eq!(s.total(), 61);
        assert_eq!(s.category(), Category::Malicious);
    }

    #[test]
    fn normal_tokens_are_distinct_and_capped() {
        assert_eq!(content_adjustment("/blog/blog/x"), -5);
        // app, blog, main, tags → capped at 15; 4 slashes → +10
        assert_eq!(content_adjustment("/app/blog/main/tags"), -15 + 10);
        // overlapping tokens are found independently
        assert_eq!(content_adjustment("/category/categories"), -10);
        assert_eq!(content_adjustment("/APP"), -5 - 5);
    }

    #[test]
    fn thresholds() {
        let at = |total| RiskScore { base: total, content: 0, addresses: 0 }.category();
        assert_eq!(at(-40), Category::White);
        assert_eq!(at(12), Category::White);
        assert_eq!(at(13), Category::Normal);
        assert_eq!(at(25), Category::Normal);
        assert_eq!(at(26), Category::Suspicious);
        assert_eq!(at(40), Category::Suspicious);
        assert_eq!(at(41), Category::Malicious);
    }

    #[test]
    fn internal_ranges() {
        assert!(is_internal("10.0.0.1"));
        assert!(is_internal("127.0.0.1"));
        assert!(is_internal("169.254.1.1"));
        assert!(is_internal("fd00::1"));
        assert!(!is_internal("8.8.8.8"));
        assert!(!is_internal("2001:4860::8888"));
        assert!(!is_internal("garbage"));
    }

    #[test]
    fn special_purpose_ranges_are_internal() {
        for ip in ["192.0.0.5", "198.19.255.1", "198.51.100.7", "203.0.113.9", "240.1.2.3", "0.1.2.3"] {
            assert!(is_internal(ip), "{ip}");
        }
        for ip in ["2001:db8::1", "fe80::1", "fc00::1", "::ffff:8.8.8.8", "::", "100::1"] {
            assert!(is_internal(ip), "{ip}");
        }
        for ip in ["192.0.0.8", "198.20.0.1", "100.64.0.1", "2606:4700::1111"] {
            assert!(!is_internal(ip), "{ip}");
        }
    }
}
