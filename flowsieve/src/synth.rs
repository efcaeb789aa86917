// flowsieve/src/synth.rs
//
// Synthetic labeled flow table for training.
//
// 70% of the requested rows are Normal; the remaining 30% is split evenly
// across the five attack labels with integer division. The remainder of that
// division is dropped, so `generate_dataset(n)` can return up to four rows
// fewer than `n`:
//
//   normal   = n * 7 / 10
//   attack   = n - normal
//   per_type = attack / 5
//   rows     = normal + 5 * per_type
//
// Normal flows originate inside the network; attack flows come from outside
// and always target an internal host.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::events::{FlowCounters, TrafficLabel, TrainingRecord};

// ── Fixed tables ──────────────────────────────────────────────────────────────

const SERVICE_PORTS: [(&str, &[u16]); 10] = [
    ("HTTP",   &[80, 8080, 8000, 3000]),
    ("HTTPS",  &[443, 8443]),
    ("SSH",    &[22]),
    ("FTP",    &[21, 20]),
    ("DNS",    &[53]),
    ("SMTP",   &[25, 587]),
    ("POP3",   &[110, 995]),
    ("IMAP",   &[143, 993]),
    ("TELNET", &[23]),
    ("SNMP",   &[161, 162]),
];

const NORMAL_PROTOCOLS: &[&str] = &["TCP", "UDP", "ICMP"];

/// Per-label value ranges. Ranges are inclusive for counters and half-open for
/// duration.
#[derive(Debug, Clone, Copy)]
struct TrafficProfile {
    packets:     (u64, u64),
    bytes:       (u64, u64),
    duration:    (f64, f64),
    protocols:   &'static [&'static str],
    random_port: bool,
}

fn profile(label: TrafficLabel) -> TrafficProfile {
    match label {
        TrafficLabel::Normal => TrafficProfile {
            packets: (1, 1_000), bytes: (64, 100_000), duration: (0.1, 300.0),
            protocols: NORMAL_PROTOCOLS, random_port: false,
        },
        TrafficLabel::Ddos => TrafficProfile {
            packets: (10_000, 100_000), bytes: (1_000_000, 50_000_000), duration: (1.0, 30.0),
            protocols: &["TCP", "UDP", "ICMP"], random_port: false,
        },
        TrafficLabel::PortScan => TrafficProfile {
            packets: (100, 1_000), bytes: (5_000, 50_000), duration: (10.0, 300.0),
            protocols: &["TCP"], random_port: true,
        },
        TrafficLabel::BruteForce => TrafficProfile {
            packets: (50, 500), bytes: (2_000, 20_000), duration: (60.0, 1_800.0),
            protocols: &["TCP"], random_port: false,
        },
        TrafficLabel::SqlInjection => TrafficProfile {
            packets: (10, 100), bytes: (1_000, 10_000), duration: (1.0, 60.0),
            protocols: &["TCP"], random_port: false,
        },
        TrafficLabel::Malware => TrafficProfile {
            packets: (100, 2_000), bytes: (10_000, 200_000), duration: (30.0, 600.0),
            protocols: &["TCP", "UDP"], random_port: false,
        },
    }
}

/// Row counts produced for a requested total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPlan {
    pub normal:   usize,
    pub per_type: usize,
}

impl SplitPlan {
    pub fn for_total(total: usize) -> Self {
        let normal = total * 7 / 10;
        let attack = total - normal;
        Self { normal, per_type: attack / TrafficLabel::ATTACKS.len() }
    }

    pub fn rows(&self) -> usize {
        self.normal + self.per_type * TrafficLabel::ATTACKS.len()
    }
}

// ── Generator ─────────────────────────────────────────────────────────────────

pub struct SyntheticDataGenerator {
    rng: StdRng,
    now: DateTime<Utc>,
}

impl SyntheticDataGenerator {
    pub fn new(seed: u64) -> Self {
        Self::with_clock(seed, Utc::now())
    }

    /// Timestamps are drawn from the 24 hours before `now`.
    pub fn with_clock(seed: u64, now: DateTime<Utc>) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), now }
    }

    pub fn generate_dataset(&mut self, total_samples: usize) -> Vec<TrainingRecord> {
        let plan = SplitPlan::for_total(total_samples);
        let mut rows = Vec::with_capacity(plan.rows());

        for _ in 0..plan.normal {
            rows.push(self.flow(TrafficLabel::Normal));
        }
        for label in TrafficLabel::ATTACKS {
            for _ in 0..plan.per_type {
                rows.push(self.flow(label));
            }
        }
        rows.shuffle(&mut self.rng);

        info!(
            requested = total_samples,
            rows      = rows.len(),
            normal    = plan.normal,
            per_attack = plan.per_type,
            "synthetic dataset generated"
        );
        rows
    }

    fn flow(&mut self, label: TrafficLabel) -> TrainingRecord {
        let p = profile(label);
        let timestamp = self.now - Duration::seconds(self.rng.gen_range(0..=86_400));

        let (src_ip, dst_ip) = if label == TrafficLabel::Normal {
            let dst_internal = self.rng.gen_bool(0.5);
            (self.internal_ip(), self.address(dst_internal))
        } else {
            (self.external_ip(), self.internal_ip())
        };

        let dst_port = if p.random_port {
            self.rng.gen_range(1..=65_535)
        } else {
            self.service_port()
        };

        let duration = self.rng.gen_range(p.duration.0..p.duration.1);
        let counters = FlowCounters {
            timestamp,
            src_ip,
            dst_ip,
            src_port:     self.rng.gen_range(1024..=65_535),
            dst_port,
            protocol:     p.protocols.choose(&mut self.rng).copied().unwrap_or("TCP").to_string(),
            packet_count: self.rng.gen_range(p.packets.0..=p.packets.1),
            byte_count:   self.rng.gen_range(p.bytes.0..=p.bytes.1),
            duration:     (duration * 100.0).round() / 100.0,
            is_weekend:   u8::from(timestamp.weekday().num_days_from_monday() >= 5),
            hour_of_day:  timestamp.hour() as u8,
        };
        TrainingRecord::derive(counters, label)
    }

    fn service_port(&mut self) -> u16 {
        let (_, ports) = SERVICE_PORTS[self.rng.gen_range(0..SERVICE_PORTS.len())];
        ports[self.rng.gen_range(0..ports.len())]
    }

    fn address(&mut self, internal: bool) -> String {
        if internal { self.internal_ip() } else { self.external_ip() }
    }

    fn internal_ip(&mut self) -> String {
        let r = &mut self.rng;
        match r.gen_range(0..3) {
            0 => format!("192.168.{}.{}", r.gen_range(1..=255), r.gen_range(1..=254)),
            1 => format!("10.{}.{}.{}", r.gen_range(1..=255), r.gen_range(1..=255), r.gen_range(1..=254)),
            _ => format!("172.{}.{}.{}", r.gen_range(16..=31), r.gen_range(0..=255), r.gen_range(1..=254)),
        }
    }

    fn external_ip(&mut self) -> String {
        let r = &mut self.rng;
        loop {
            let first: u8 = r.gen_range(1..=223);
            let second: u8 = r.gen_range(1..=255);
            let candidate = format!("{first}.{second}.{}.{}", r.gen_range(1..=255), r.gen_range(1..=254));
            // Skip private and loopback blocks so "external" stays external.
            if !crate::features::is_private_ip(&candidate) && first != 127 {
                return candidate;
            }
        }
    }
}
