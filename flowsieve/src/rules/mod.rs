// flowsieve/src/rules/mod.rs
//
// Tenant allow-rules. A matching active rule short-circuits classification to
// white traffic.
//
// Pattern grammar per rule kind (comma-separated lists, tried in order):
//
//   ip        CIDR block | exact address | glob with `*`, against src OR dst
//   domain    substring | glob with `*`, case-insensitive, against dst OR content
//   port      `start-end` against every `:NNN` in content | single port as
//             `:NNN` or ` NNN ` substring of content
//   protocol  token equal to the protocol label, case-insensitive
//
// A malformed pattern is a non-match for that pattern only.

pub mod store;

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::OnceLock;

use dashmap::DashMap;
use ipnetwork::IpNetwork;
use regex::Regex;
use tracing::debug;

use crate::error::RuleError;
use crate::events::{ConnectionRecord, Rule, RuleKind, TenantId};

pub use store::{CachedRuleStore, EmptyRuleStore, JsonRuleStore, MemoryRuleStore, RuleStore};

static PORT_TOKEN: OnceLock<Regex> = OnceLock::new();

fn port_token() -> &'static Regex {
    PORT_TOKEN.get_or_init(|| Regex::new(r":(\d+)").expect("port token regex"))
}

/// Evaluates rules against connections. Compiled glob patterns are cached
/// across calls.
#[derive(Default)]
pub struct RuleMatcher {
    globs: DashMap<(String, bool), Regex>,
}

impl RuleMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// First active rule owned by `tenant` that matches `conn`, in slice order.
    pub fn first_match<'r>(&self, rules: &'r [Rule], conn: &ConnectionRecord, tenant: TenantId) -> Option<&'r Rule> {
        rules
            .iter()
            .filter(|r| r.active && r.owner == tenant)
            .find(|r| self.matches(r, conn))
    }

    pub fn matches(&self, rule: &Rule, conn: &ConnectionRecord) -> bool {
        let ok = |pattern: &str, hit: Result<bool, RuleError>| {
            hit.unwrap_or_else(|e| {
                debug!(rule = %rule.name, pattern, error = %e, "rule pattern skipped");
                false
            })
        };
        rule.patterns().any(|pattern| match rule.kind {
            RuleKind::Ip => {
                ok(pattern, self.ip_matches(pattern, &conn.source_address))
                    || ok(pattern, self.ip_matches(pattern, &conn.dest_address))
            }
            RuleKind::Domain => {
                ok(pattern, self.domain_matches(pattern, &conn.dest_address))
                    || ok(pattern, self.domain_matches(pattern, &conn.content))
            }
            RuleKind::Port     => ok(pattern, port_matches(pattern, &conn.content)),
            RuleKind::Protocol => protocol_matches(pattern, &conn.protocol_label),
        })
    }

    fn ip_matches(&self, pattern: &str, ip: &str) -> Result<bool, RuleError> {
        if pattern.contains('/') {
            let net = parse_cidr(pattern)?;
            let addr = IpAddr::from_str(ip.trim()).map_err(|_| RuleError::BadAddress(ip.to_string()))?;
            return Ok(net.contains(addr));
        }
        if pattern == ip {
            return Ok(true);
        }
        if pattern.contains('*') {
            return Ok(self.glob(pattern, true)?.is_match(ip));
        }
        Ok(false)
    }

    fn domain_matches(&self, pattern: &str, text: &str) -> Result<bool, RuleError> {
        if pattern.contains('*') {
            return Ok(self.glob(pattern, false)?.is_match(text));
        }
        Ok(text.to_lowercase().contains(&pattern.to_lowercase()))
    }

    /// Anchored globs match the whole string case-sensitively; unanchored
    /// globs search anywhere, ignoring case.
    fn glob(&self, pattern: &str, anchored: bool) -> Result<Regex, RuleError> {
        let key = (pattern.to_string(), anchored);
        if let Some(re) = self.globs.get(&key) {
            return Ok(re.clone());
        }
        let re = compile_glob(pattern, anchored)?;
        self.globs.insert(key, re.clone());
        Ok(re)
    }
}

fn compile_glob(pattern: &str, anchored: bool) -> Result<Regex, RuleError> {
    let body = pattern.split('*').map(regex::escape).collect::<Vec<_>>().join(".*");
    let source = if anchored { format!("^{body}$") } else { format!("(?i){body}") };
    Regex::new(&source).map_err(|source| RuleError::BadWildcard { pattern: pattern.to_string(), source })
}

fn parse_cidr(pattern: &str) -> Result<IpNetwork, RuleError> {
    IpNetwork::from_str(pattern)
        .map_err(|e| RuleError::BadCidr { pattern: pattern.to_string(), reason: e.to_string() })
}

fn parse_port_range(pattern: &str) -> Result<(u32, u32), RuleError> {
    let bad = || RuleError::BadPortRange(pattern.to_string());
    let (start, end) = pattern.split_once('-').ok_or_else(bad)?;
    let start: u32 = start.trim().parse().map_err(|_| bad())?;
    let end: u32 = end.trim().parse().map_err(|_| bad())?;
    Ok((start, end))
}

fn port_matches(pattern: &str, content: &str) -> Result<bool, RuleError> {
    if pattern.contains('-') {
        let (start, end) = parse_port_range(pattern)?;
        return Ok(port_token()
            .captures_iter(content)
            .filter_map(|c| c.get(1)?.as_str().parse::<u32>().ok())
            .any(|p| (start..=end).contains(&p)));
    }
    Ok(content.contains(&format!(":{pattern}")) || content.contains(&format!(" {pattern} ")))
}

/// Rule tokens arrive trimmed; the connection's label is compared as given.
fn protocol_matches(pattern: &str, label: &str) -> bool {
    pattern.to_uppercase() == label.to_uppercase()
}

impl Rule {
    /// Strict check of every pattern, for rejecting bad rules at creation time.
    /// Evaluation tolerates anything this rejects.
    pub fn validate(&self) -> Result<(), RuleError> {
        for pattern in self.patterns() {
            match self.kind {
                RuleKind::Ip if pattern.contains('/') => {
                    parse_cidr(pattern)?;
                }
                RuleKind::Ip | RuleKind::Domain if pattern.contains('*') => {
                    compile_glob(pattern, self.kind == RuleKind::Ip)?;
                }
                RuleKind::Ip => {
                    if IpAddr::from_str(pattern).is_err() {
                        return Err(RuleError::BadAddress(pattern.to_string()));
                    }
                }
                RuleKind::Port if pattern.contains('-') => {
                    let (start, end) = parse_port_range(pattern)?;
                    if start > end || end > u16::MAX as u32 {
                        return Err(RuleError::BadPortRange(pattern.to_string()));
                    }
                }
                RuleKind::Port => {
                    if pattern.parse::<u16>().is_err() {
                        return Err(RuleError::BadPortRange(pattern.to_string()));
                    }
                }
                RuleKind::Domain | RuleKind::Protocol => {}
            }
        }
        Ok(())
    }
}
