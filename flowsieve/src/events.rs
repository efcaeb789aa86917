// flowsieve/src/events.rs
//
// Shared domain types flowing through flowsieve.
//
//   ConnectionRecord  one live connection handed to the engine by a caller
//   Classification    structured engine output (category + matched rule)
//   Rule              tenant-scoped allow-rule
//   TrainingRecord    one row of the labeled flow table the trainer consumes

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

pub type TenantId = i64;

// ── Inference input ───────────────────────────────────────────────────────────

/// Connection tuple as received from the caller. Never persisted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub source_address: String,
    pub dest_address:   String,
    /// Free-form protocol / traffic-type label, e.g. "HTTP" or "恶意流量".
    pub protocol_label: String,
    /// URL or payload excerpt, may be empty.
    #[serde(default)]
    pub content:        String,
    #[serde(default)]
    pub tenant_id:      Option<TenantId>,
}

impl ConnectionRecord {
    pub fn new(
        source_address: impl Into<String>,
        dest_address:   impl Into<String>,
        protocol_label: impl Into<String>,
        content:        impl Into<String>,
    ) -> Self {
        Self {
            source_address: source_address.into(),
            dest_address:   dest_address.into(),
            protocol_label: protocol_label.into(),
            content:        content.into(),
            tenant_id:      None,
        }
    }

    pub fn for_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant_id = Some(tenant);
        self
    }
}

impl std::fmt::Display for ConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} → {} [{}]", self.source_address, self.dest_address, self.protocol_label)
    }
}

// ── Engine output ─────────────────────────────────────────────────────────────

/// Business risk category. Ordered from least to most risky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    White,
    Normal,
    Suspicious,
    Malicious,
}

impl Category {
    pub const ALL: [Category; 4] = [Self::White, Self::Normal, Self::Suspicious, Self::Malicious];

    /// Display label used by the surrounding application.
    pub fn label(self) -> &'static str {
        match self {
            Self::White      => "白流量",
            Self::Normal     => "正常流量",
            Self::Suspicious => "可疑流量",
            Self::Malicious  => "恶意流量",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label.trim())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Which link of the decision chain produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Rule,
    Model,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub category:     Category,
    pub matched_rule: Option<String>,
    pub source:       DecisionSource,
    /// Max class probability (model path only).
    pub confidence:   Option<f64>,
    /// Accumulated risk score (heuristic path only).
    pub risk_score:   Option<i32>,
}

impl Classification {
    pub fn rule_match(rule_name: impl Into<String>) -> Self {
        Self {
            category:     Category::White,
            matched_rule: Some(rule_name.into()),
            source:       DecisionSource::Rule,
            confidence:   None,
            risk_score:   None,
        }
    }

    pub fn from_model(category: Category, confidence: f64) -> Self {
        Self {
            category,
            matched_rule: None,
            source:       DecisionSource::Model,
            confidence:   Some(confidence),
            risk_score:   None,
        }
    }

    pub fn from_heuristic(category: Category, risk_score: i32) -> Self {
        Self {
            category,
            matched_rule: None,
            source:       DecisionSource::Heuristic,
            confidence:   None,
            risk_score:   Some(risk_score),
        }
    }

    /// Presentation string, e.g. `白流量 (匹配规则: 内网IP白名单)`.
    pub fn display_label(&self) -> String {
        match &self.matched_rule {
            Some(name) => format!("{} (匹配规则: {})", Category::White.label(), name),
            None       => self.category.label().to_string(),
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_label())
    }
}

// ── Allow-rules ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    Ip,
    Domain,
    Port,
    Protocol,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", match self {
            Self::Ip       => "ip",
            Self::Domain   => "domain",
            Self::Port     => "port",
            Self::Protocol => "protocol",
        })
    }
}

/// Tenant-owned allow-rule. `value` is a comma-separated pattern list whose
/// grammar depends on `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id:          i64,
    pub name:        String,
    #[serde(rename = "rule_type")]
    pub kind:        RuleKind,
    #[serde(rename = "rule_value")]
    pub value:       String,
    #[serde(default = "default_active")]
    pub active:      bool,
    pub owner:       TenantId,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_active() -> bool { true }

impl Rule {
    pub fn new(id: i64, name: impl Into<String>, kind: RuleKind, value: impl Into<String>, owner: TenantId) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            value: value.into(),
            active: true,
            owner,
            description: None,
        }
    }

    /// Non-empty, trimmed patterns in listed order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.value.split(',').map(str::trim).filter(|p| !p.is_empty())
    }
}

// ── Training table ────────────────────────────────────────────────────────────

/// Ground-truth label of a simulated flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrafficLabel {
    Normal,
    #[serde(rename = "DDoS")]
    Ddos,
    #[serde(rename = "Port_Scan")]
    PortScan,
    #[serde(rename = "Brute_Force")]
    BruteForce,
    #[serde(rename = "SQL_Injection")]
    SqlInjection,
    Malware,
}

impl TrafficLabel {
    pub const ALL: [TrafficLabel; 6] = [
        Self::Normal, Self::Ddos, Self::PortScan, Self::BruteForce, Self::SqlInjection, Self::Malware,
    ];

    pub const ATTACKS: [TrafficLabel; 5] = [
        Self::Ddos, Self::PortScan, Self::BruteForce, Self::SqlInjection, Self::Malware,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal       => "Normal",
            Self::Ddos         => "DDoS",
            Self::PortScan     => "Port_Scan",
            Self::BruteForce   => "Brute_Force",
            Self::SqlInjection => "SQL_Injection",
            Self::Malware      => "Malware",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.as_str() == s.trim())
    }

    /// Fixed mapping from training label to business category.
    pub fn category(self) -> Category {
        match self {
            Self::Normal   => Category::Normal,
            Self::PortScan => Category::Suspicious,
            Self::Ddos | Self::BruteForce | Self::SqlInjection | Self::Malware => Category::Malicious,
        }
    }
}

impl std::fmt::Display for TrafficLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One simulated (or externally supplied) flow. The three rate fields are
/// always derived from the counters; build rows through [`TrainingRecord::derive`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp:          DateTime<Utc>,
    pub src_ip:             String,
    pub dst_ip:             String,
    pub src_port:           u16,
    pub dst_port:           u16,
    pub protocol:           String,
    pub packet_count:       u64,
    pub byte_count:         u64,
    pub duration:           f64,
    pub packets_per_second: f64,
    pub bytes_per_packet:   f64,
    pub bytes_per_second:   f64,
    pub is_weekend:         u8,
    pub hour_of_day:        u8,
    pub label:              TrafficLabel,
}

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS[.frac]` (also with a `T`
/// separator) taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp {raw:?}")))
}

/// Counters for one flow before the derived rate fields are filled in.
#[derive(Debug, Clone)]
pub struct FlowCounters {
    pub timestamp:    DateTime<Utc>,
    pub src_ip:       String,
    pub dst_ip:       String,
    pub src_port:     u16,
    pub dst_port:     u16,
    pub protocol:     String,
    pub packet_count: u64,
    pub byte_count:   u64,
    pub duration:     f64,
    pub is_weekend:   u8,
    pub hour_of_day:  u8,
}

impl TrainingRecord {
    pub fn derive(c: FlowCounters, label: TrafficLabel) -> Self {
        let packets_per_second = c.packet_count as f64 / c.duration.max(0.1);
        let bytes_per_packet   = c.byte_count as f64 / c.packet_count.max(1) as f64;
        let bytes_per_second   = c.byte_count as f64 / c.duration.max(0.1);
        Self {
            timestamp:    c.timestamp,
            src_ip:       c.src_ip,
            dst_ip:       c.dst_ip,
            src_port:     c.src_port,
            dst_port:     c.dst_port,
            protocol:     c.protocol,
            packet_count: c.packet_count,
            byte_count:   c.byte_count,
            duration:     c.duration,
            packets_per_second,
            bytes_per_packet,
            bytes_per_second,
            is_weekend:   c.is_weekend,
            hour_of_day:  c.hour_of_day,
            label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_match_display_label() {
        let c = Classification::rule_match("内网IP白名单");
        assert_eq!(c.display_label(), "白流量 (匹配规则: 内网IP白名单)");
        assert_eq!(c.category, Category::White);
    }

    #[test]
    fn category_labels_round_trip() {
        for c in Category::ALL {
            assert_eq!(Category::from_label(c.label()), Some(c));
        }
        assert_eq!(Category::from_label("分析失败"), None);
    }

    #[test]
    fn label_mapping_collapses_attacks() {
        assert_eq!(TrafficLabel::Normal.category(), Category::Normal);
        assert_eq!(TrafficLabel::PortScan.category(), Category::Suspicious);
        for l in [TrafficLabel::Ddos, TrafficLabel::BruteForce, TrafficLabel::SqlInjection, TrafficLabel::Malware] {
            assert_eq!(l.category(), Category::Malicious);
        }
    }

    #[test]
    fn rule_deserializes_from_store_shape() {
        let json = r#"{"id":1,"name":"lan","rule_type":"ip","rule_value":"10.0.0.0/8, 192.168.*","owner":7}"#;
        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.kind, RuleKind::Ip);
        assert!(rule.active);
        assert_eq!(rule.patterns().collect::<Vec<_>>(), vec!["10.0.0.0/8", "192.168.*"]);
    }

    #[test]
    fn timestamps_in_both_layouts() {
        let naive = parse_timestamp("2025-01-01 12:00:00.123456").unwrap();
        assert_eq!(naive.to_rfc3339(), "2025-01-01T12:00:00.123456+00:00");
        assert_eq!(parse_timestamp("2025-01-01 12:00:00"), parse_timestamp("2025-01-01T12:00:00Z"));
        assert_eq!(
            parse_timestamp("2025-01-01T20:00:00+08:00"),
            parse_timestamp("2025-01-01 12:00:00")
        );
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn zero_duration_is_clamped() {
        let r = TrainingRecord::derive(FlowCounters {
            timestamp: Utc::now(),
            src_ip: "10.0.0.1".into(),
            dst_ip: "10.0.0.2".into(),
            src_port: 40000,
            dst_port: 80,
            protocol: "TCP".into(),
            packet_count: 0,
            byte_count: 500,
            duration: 0.0,
            is_weekend: 0,
            hour_of_day: 3,
        }, TrafficLabel::Normal);
        assert_eq!(r.packets_per_second, 0.0);
        assert_eq!(r.bytes_per_packet, 500.0);
        assert_eq!(r.bytes_per_second, 5000.0);
    }
}
