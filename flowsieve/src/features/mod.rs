// flowsieve/src/features/mod.rs
//
// Feature engineering shared by training and live inference.
//
// A FlowObservation is a raw flow in which every column may be absent. Each
// derivation is skipped when its source column is missing; absent numeric
// values are filled with training-batch medians and absent categoricals encode
// to the encoder's unseen code. The output layout is fixed:
//
//   numeric      packet_count .. is_common_port   (NUMERIC_FEATURES, 14)
//   categorical  protocol, src/dst ip class, port category (4, label-encoded)

pub mod encoders;

use std::net::Ipv4Addr;

use chrono::{DateTime, Datelike, Timelike, Utc};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::config::LiveDefaults;
use crate::events::{ConnectionRecord, TrafficLabel, TrainingRecord};
use encoders::{CategoricalEncoders, CategoricalFeature, NumericImputer};

pub const NUMERIC_FEATURES: [&str; 14] = [
    "packet_count",
    "byte_count",
    "duration",
    "packets_per_second",
    "bytes_per_packet",
    "bytes_per_second",
    "hour_of_day",
    "is_weekend",
    "day_of_week",
    "pps_log",
    "bps_log",
    "src_ip_private",
    "dst_ip_private",
    "is_common_port",
];

const N_NUMERIC: usize = NUMERIC_FEATURES.len();
const N_CATEGORICAL: usize = CategoricalFeature::ALL.len();
pub const N_FEATURES: usize = N_NUMERIC + N_CATEGORICAL;

const COMMON_PORTS: [u16; 12] = [80, 443, 22, 21, 25, 53, 110, 143, 993, 995, 587, 465];

/// Ordered names of the model's input columns.
pub fn feature_names() -> Vec<String> {
    NUMERIC_FEATURES
        .iter()
        .map(|s| s.to_string())
        .chain(CategoricalFeature::ALL.iter().map(|f| f.name().to_string()))
        .collect()
}

// ── Raw input ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowObservation {
    pub timestamp:          Option<DateTime<Utc>>,
    pub src_ip:             Option<String>,
    pub dst_ip:             Option<String>,
    pub dst_port:           Option<u16>,
    pub protocol:           Option<String>,
    pub packet_count:       Option<f64>,
    pub byte_count:         Option<f64>,
    pub duration:           Option<f64>,
    pub packets_per_second: Option<f64>,
    pub bytes_per_packet:   Option<f64>,
    pub bytes_per_second:   Option<f64>,
    pub hour_of_day:        Option<f64>,
    pub is_weekend:         Option<f64>,
}

impl From<&TrainingRecord> for FlowObservation {
    fn from(r: &TrainingRecord) -> Self {
        Self {
            timestamp:          Some(r.timestamp),
            src_ip:             Some(r.src_ip.clone()),
            dst_ip:             Some(r.dst_ip.clone()),
            dst_port:           Some(r.dst_port),
            protocol:           Some(r.protocol.clone()),
            packet_count:       Some(r.packet_count as f64),
            byte_count:         Some(r.byte_count as f64),
            duration:           Some(r.duration),
            packets_per_second: Some(r.packets_per_second),
            bytes_per_packet:   Some(r.bytes_per_packet),
            bytes_per_second:   Some(r.bytes_per_second),
            hour_of_day:        Some(r.hour_of_day as f64),
            is_weekend:         Some(r.is_weekend as f64),
        }
    }
}

/// One training or evaluation row: a possibly sparse flow and its label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledFlow {
    pub flow:  FlowObservation,
    pub label: TrafficLabel,
}

impl From<&TrainingRecord> for LabeledFlow {
    fn from(r: &TrainingRecord) -> Self {
        Self { flow: FlowObservation::from(r), label: r.label }
    }
}

impl FlowObservation {
    /// A live connection carries addresses and a protocol label only; the
    /// volumetric columns come from the configured defaults. No timestamp or
    /// port is assumed.
    pub fn live(conn: &ConnectionRecord, d: &LiveDefaults) -> Self {
        Self {
            timestamp:          None,
            src_ip:             Some(conn.source_address.clone()),
            dst_ip:             Some(conn.dest_address.clone()),
            dst_port:           None,
            protocol:           Some(conn.protocol_label.clone()),
            packet_count:       Some(d.packet_count),
            byte_count:         Some(d.byte_count),
            duration:           Some(d.duration),
            packets_per_second: Some(d.packets_per_second),
            bytes_per_packet:   Some(d.bytes_per_packet),
            bytes_per_second:   Some(d.bytes_per_second),
            hour_of_day:        Some(d.hour_of_day),
            is_weekend:         Some(d.is_weekend),
        }
    }
}

// ── Derivations ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpClass {
    A,
    B,
    C,
    Other,
    Invalid,
}

impl IpClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A       => "A",
            Self::B       => "B",
            Self::C       => "C",
            Self::Other   => "Other",
            Self::Invalid => "Invalid",
        }
    }
}

/// Classful bucket of the first octet. Anything that does not start with a
/// decimal octet is `Invalid`.
pub fn ip_class(ip: &str) -> IpClass {
    match ip.split('.').next().map(str::trim).and_then(|o| o.parse::<u32>().ok()) {
        Some(1..=126)   => IpClass::A,
        Some(128..=191) => IpClass::B,
        Some(192..=223) => IpClass::C,
        Some(_)         => IpClass::Other,
        None            => IpClass::Invalid,
    }
}

/// RFC 1918 ranges plus 127.0.0.1. Unparsable input is treated as public.
pub fn is_private_ip(ip: &str) -> bool {
    match ip.trim().parse::<Ipv4Addr>() {
        Ok(addr) => addr.is_private() || addr == Ipv4Addr::LOCALHOST,
        Err(_) => false,
    }
}

pub fn is_common_port(port: u16) -> bool {
    COMMON_PORTS.contains(&port)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortCategory {
    System,
    Registered,
    Dynamic,
}

impl PortCategory {
    pub fn of(port: u16) -> Self {
        match port {
            0..=1023     => Self::System,
            1024..=49151 => Self::Registered,
            _            => Self::Dynamic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::System     => "system",
            Self::Registered => "registered",
            Self::Dynamic    => "dynamic",
        }
    }
}

/// Numeric columns (possibly absent) and categorical values (possibly absent)
/// for one observation, before imputation and encoding.
#[derive(Debug, Clone)]
struct Derived {
    numeric:     [Option<f64>; N_NUMERIC],
    categorical: [Option<String>; N_CATEGORICAL],
}

fn derive(obs: &FlowObservation) -> Derived {
    let mut hour_of_day = obs.hour_of_day;
    let mut is_weekend  = obs.is_weekend;
    let mut day_of_week = None;
    if let Some(ts) = obs.timestamp {
        let dow = ts.weekday().num_days_from_monday();
        hour_of_day = Some(ts.hour() as f64);
        day_of_week = Some(dow as f64);
        is_weekend  = Some(if dow >= 5 { 1.0 } else { 0.0 });
    }

    // rates missing from the table are rebuilt from the counters when those exist
    let per_second = |count: Option<f64>| Some(count? / obs.duration?.max(0.1));
    let packets_per_second = obs.packets_per_second.or_else(|| per_second(obs.packet_count));
    let bytes_per_second   = obs.bytes_per_second.or_else(|| per_second(obs.byte_count));
    let bytes_per_packet   = obs
        .bytes_per_packet
        .or_else(|| Some(obs.byte_count? / obs.packet_count?.max(1.0)));

    let flag = |b: bool| if b { 1.0 } else { 0.0 };

    let numeric = [
        obs.packet_count,
        obs.byte_count,
        obs.duration,
        packets_per_second,
        bytes_per_packet,
        bytes_per_second,
        hour_of_day,
        is_weekend,
        day_of_week,
        packets_per_second.map(|v| v.max(0.0).ln_1p()),
        bytes_per_second.map(|v| v.max(0.0).ln_1p()),
        obs.src_ip.as_deref().map(|ip| flag(is_private_ip(ip))),
        obs.dst_ip.as_deref().map(|ip| flag(is_private_ip(ip))),
        obs.dst_port.map(|p| flag(is_common_port(p))),
    ];

    let categorical = [
        obs.protocol.clone(),
        obs.src_ip.as_deref().map(|ip| ip_class(ip).as_str().to_string()),
        obs.dst_ip.as_deref().map(|ip| ip_class(ip).as_str().to_string()),
        obs.dst_port.map(|p| PortCategory::of(p).as_str().to_string()),
    ];

    Derived { numeric, categorical }
}

// ── Engineer ──────────────────────────────────────────────────────────────────

/// Fitted preprocessing state: categorical encoders + numeric medians.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureEngineer {
    pub encoders: CategoricalEncoders,
    pub imputer:  NumericImputer,
}

impl FeatureEngineer {
    /// Fit encoders and medians over a training batch.
    pub fn fit(rows: &[FlowObservation]) -> Self {
        let derived: Vec<Derived> = rows.iter().map(derive).collect();
        let numeric: Vec<[Option<f64>; N_NUMERIC]> = derived.iter().map(|d| d.numeric).collect();
        let categorical: Vec<[Option<String>; N_CATEGORICAL]> =
            derived.into_iter().map(|d| d.categorical).collect();
        Self {
            encoders: CategoricalEncoders::fit(&categorical),
            imputer:  NumericImputer::fit(&numeric),
        }
    }

    pub fn transform(&self, obs: &FlowObservation) -> Array1<f64> {
        let d = derive(obs);
        let mut out = Array1::<f64>::zeros(N_FEATURES);
        for (col, value) in d.numeric.iter().enumerate() {
            out[col] = self.imputer.fill(col, *value);
        }
        for f in CategoricalFeature::ALL {
            let code = self.encoders.get(f).encode_opt(d.categorical[f.index()].as_deref());
            out[N_NUMERIC + f.index()] = code as f64;
        }
        out
    }

    pub fn transform_batch(&self, rows: &[FlowObservation]) -> Array2<f64> {
        let mut x = Array2::<f64>::zeros((rows.len(), N_FEATURES));
        for (i, obs) in rows.iter().enumerate() {
            x.row_mut(i).assign(&self.transform(obs));
        }
        x
    }

    /// True once fitted against the current feature layout.
    pub fn matches_layout(&self) -> bool {
        self.imputer.len() == N_NUMERIC
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(protocol: &str, dst_port: u16, pps: f64) -> FlowObservation {
        FlowObservation {
            timestamp: Some(Utc.with_ymd_and_hms(2024, 6, 8, 22, 15, 0).unwrap()), // Saturday
            src_ip: Some("10.1.2.3".into()),
            dst_ip: Some("8.8.8.8".into()),
            dst_port: Some(dst_port),
            protocol: Some(protocol.into()),
            packet_count: Some(100.0),
            byte_count: Some(6400.0),
            duration: Some(10.0),
            packets_per_second: Some(pps),
            bytes_per_packet: Some(64.0),
            bytes_per_second: Some(640.0),
            hour_of_day: Some(3.0),
            is_weekend: Some(0.0),
        }
    }

    fn col(name: &str) -> usize {
        feature_names().iter().position(|n| n == name).unwrap()
    }

    #[test]
    fn ip_classes() {
        assert_eq!(ip_class("10.0.0.1"), IpClass::A);
        assert_eq!(ip_class("172.16.0.1"), IpClass::B);
        assert_eq!(ip_class("192.168.1.1"), IpClass::C);
        assert_eq!(ip_class("127.0.0.1"), IpClass::Other);
        assert_eq!(ip_class("240.0.0.1"), IpClass::Other);
        assert_eq!(ip_class("example.com"), IpClass::Invalid);
        assert_eq!(ip_class(""), IpClass::Invalid);
    }

    #[test]
    fn private_ranges() {
        assert!(is_private_ip("10.9.9.9"));
        assert!(is_private_ip("172.31.255.1"));
        assert!(!is_private_ip("172.32.0.1"));
        assert!(is_private_ip("192.168.0.10"));
        assert!(is_private_ip("127.0.0.1"));
        assert!(!is_private_ip("8.8.8.8"));
        assert!(!is_private_ip("not-an-ip"));
    }

    #[test]
    fn port_categories() {
        assert_eq!(PortCategory::of(443), PortCategory::System);
        assert_eq!(PortCategory::of(8080), PortCategory::Registered);
        assert_eq!(PortCategory::of(50000), PortCategory::Dynamic);
        assert!(is_common_port(465));
        assert!(!is_common_port(8080));
    }

    #[test]
    fn timestamp_overrides_time_columns() {
        let eng = FeatureEngineer::fit(&[record("TCP", 80, 10.0)]);
        let v = eng.transform(&record("TCP", 80, 10.0));
        assert_eq!(v[col("hour_of_day")], 22.0);
        assert_eq!(v[col("day_of_week")], 5.0);
        assert_eq!(v[col("is_weekend")], 1.0);
        assert!((v[col("pps_log")] - 11f64.ln()).abs() < 1e-12);
        assert_eq!(v[col("src_ip_private")], 1.0);
        assert_eq!(v[col("dst_ip_private")], 0.0);
        assert_eq!(v[col("is_common_port")], 1.0);
    }

    #[test]
    fn absent_columns_are_imputed_not_fatal() {
        let eng = FeatureEngineer::fit(&[record("TCP", 80, 10.0), record("UDP", 53, 30.0)]);
        let sparse = FlowObservation { protocol: Some("ICMP".into()), ..Default::default() };
        let v = eng.transform(&sparse);
        assert_eq!(v.len(), N_FEATURES);
        assert_eq!(v[col("packets_per_second")], 20.0);
        assert_eq!(v[col("protocol")], eng.encoders.protocol.unseen() as f64);
        assert_eq!(v[col("port_category")], eng.encoders.port_category.unseen() as f64);
    }

    #[test]
    fn missing_rates_come_from_counters() {
        let eng = FeatureEngineer::fit(&[record("TCP", 80, 10.0)]);
        let counters_only = FlowObservation {
            packet_count: Some(200.0),
            byte_count: Some(12800.0),
            duration: Some(4.0),
            ..Default::default()
        };
        let v = eng.transform(&counters_only);
        assert_eq!(v[col("packets_per_second")], 50.0);
        assert_eq!(v[col("bytes_per_second")], 3200.0);
        assert_eq!(v[col("bytes_per_packet")], 64.0);
        assert!((v[col("pps_log")] - 51f64.ln()).abs() < 1e-12);

        let no_duration = FlowObservation { packet_count: Some(200.0), ..Default::default() };
        assert_eq!(eng.transform(&no_duration)[col("packets_per_second")], 10.0);
    }

    #[test]
    fn live_connection_uses_defaults() {
        let conn = ConnectionRecord::new("192.168.1.5", "10.0.0.2", "HTTP", "/index");
        let obs = FlowObservation::live(&conn, &LiveDefaults::default());
        assert_eq!(obs.packet_count, Some(50.0));
        assert_eq!(obs.hour_of_day, Some(14.0));
        assert!(obs.timestamp.is_none());
        assert!(obs.dst_port.is_none());
    }

    #[test]
    fn layout_names_match_width() {
        assert_eq!(feature_names().len(), N_FEATURES);
        assert!(FeatureEngineer::fit(&[record("TCP", 22, 1.0)]).matches_layout());
        assert!(!FeatureEngineer::default().matches_layout());
    }
}
