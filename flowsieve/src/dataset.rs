// flowsieve/src/dataset.rs
//
// Tabular I/O.
//
//   training table   written from TrainingRecord rows; read back (or from an
//                    external table) as LabeledFlow rows. Every feature column
//                    is optional, `label` is required, and an unreadable row
//                    fails the read
//   connection batch rows to classify, from CSV (aliased headers) or a plain
//                    text file of `id,src,dst,type[,content]` lines; malformed
//                    rows are skipped with a warning

use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{DatasetError, TrainingError};
use crate::events::{parse_timestamp, ConnectionRecord, TenantId, TrafficLabel, TrainingRecord};
use crate::features::{FlowObservation, LabeledFlow};

// ── Training table ────────────────────────────────────────────────────────────

pub fn write_training_csv(path: &Path, records: &[TrainingRecord]) -> Result<(), TrainingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut w = csv::Writer::from_path(path)?;
    for r in records {
        w.serialize(r)?;
    }
    w.flush()?;
    info!(path = %path.display(), rows = records.len(), "training table written");
    Ok(())
}

/// Feature columns of a training table as found on disk; any may be absent.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TrainingRow {
    timestamp:          Option<String>,
    src_ip:             Option<String>,
    dst_ip:             Option<String>,
    dst_port:           Option<u16>,
    protocol:           Option<String>,
    packet_count:       Option<f64>,
    byte_count:         Option<f64>,
    duration:           Option<f64>,
    packets_per_second: Option<f64>,
    bytes_per_packet:   Option<f64>,
    bytes_per_second:   Option<f64>,
    hour_of_day:        Option<f64>,
    is_weekend:         Option<f64>,
    label:              Option<String>,
}

impl TrainingRow {
    fn into_flow(self, line: usize) -> Result<LabeledFlow, TrainingError> {
        let raw_label = self.label.unwrap_or_default();
        let label = TrafficLabel::parse(&raw_label).ok_or(TrainingError::UnknownLabel { line, label: raw_label })?;
        let timestamp = self.timestamp.as_deref().and_then(|raw| {
            let ts = parse_timestamp(raw);
            if ts.is_none() {
                warn!(line, raw, "unparsable timestamp treated as absent");
            }
            ts
        });
        let flow = FlowObservation {
            timestamp,
            src_ip:             self.src_ip,
            dst_ip:             self.dst_ip,
            dst_port:           self.dst_port,
            protocol:           self.protocol,
            packet_count:       self.packet_count,
            byte_count:         self.byte_count,
            duration:           self.duration,
            packets_per_second: self.packets_per_second,
            bytes_per_packet:   self.bytes_per_packet,
            bytes_per_second:   self.bytes_per_second,
            hour_of_day:        self.hour_of_day,
            is_weekend:         self.is_weekend,
        };
        Ok(LabeledFlow { flow, label })
    }
}

pub fn read_training_csv(path: &Path) -> Result<Vec<LabeledFlow>, TrainingError> {
    let rows = read_training_table(std::fs::File::open(path)?)?;
    info!(path = %path.display(), rows = rows.len(), "training table loaded");
    Ok(rows)
}

/// Header-addressed; columns may appear in any order and unknown columns are
/// ignored. Accepts both this crate's RFC 3339 timestamps and naive
/// `YYYY-MM-DD HH:MM:SS.ffffff` ones.
pub fn read_training_table<R: std::io::Read>(input: R) -> Result<Vec<LabeledFlow>, TrainingError> {
    let mut reader = csv::Reader::from_reader(input);
    let headers = reader.headers()?.clone();
    if !headers.iter().any(|h| h.trim() == "label") {
        return Err(TrainingError::MissingLabelColumn);
    }
    let present: Vec<&str> = headers.iter().map(str::trim).collect();
    let absent: Vec<&str> = FEATURE_COLUMNS.iter().copied().filter(|c| !present.contains(c)).collect();
    if !absent.is_empty() {
        warn!(columns = ?absent, "training table lacks columns, values will be imputed");
    }

    let mut rows = Vec::new();
    for (n, row) in reader.deserialize::<TrainingRow>().enumerate() {
        rows.push(row?.into_flow(n + 1)?);
    }
    Ok(rows)
}

const FEATURE_COLUMNS: [&str; 13] = [
    "timestamp",
    "src_ip",
    "dst_ip",
    "dst_port",
    "protocol",
    "packet_count",
    "byte_count",
    "duration",
    "packets_per_second",
    "bytes_per_packet",
    "bytes_per_second",
    "hour_of_day",
    "is_weekend",
];

// ── Connection batches ────────────────────────────────────────────────────────

/// One row of a batch file, ready for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    pub id:         String,
    pub connection: ConnectionRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Source,
    Dest,
    Kind,
    Content,
}

impl Column {
    const REQUIRED: [Column; 4] = [Self::Source, Self::Dest, Self::Kind, Self::Content];

    fn canonical(self) -> &'static str {
        match self {
            Self::Source  => "源IP",
            Self::Dest    => "目标IP",
            Self::Kind    => "流量类型",
            Self::Content => "请求内容摘要",
        }
    }

    fn from_header(h: &str) -> Option<Self> {
        let h = h.trim();
        if let Some(c) = Self::REQUIRED.into_iter().find(|c| c.canonical() == h) {
            return Some(c);
        }
        match h.to_ascii_lowercase().as_str() {
            "source_ip" | "src_ip"                     => Some(Self::Source),
            "dest_ip" | "destination_ip" | "dst_ip"    => Some(Self::Dest),
            "traffic_type" | "protocol"                => Some(Self::Kind),
            "content" | "request"                      => Some(Self::Content),
            _                                          => None,
        }
    }
}

/// CSV or text, chosen by the `.csv` extension.
pub fn read_connection_file(path: &Path, tenant: Option<TenantId>) -> Result<Vec<BatchRow>, DatasetError> {
    let is_csv = path.extension().is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        let file = std::fs::File::open(path).map_err(|source| DatasetError::Io { path: path.to_path_buf(), source })?;
        read_connection_csv(file, tenant)
    } else {
        let content = std::fs::read_to_string(path)
            .map_err(|source| DatasetError::Io { path: path.to_path_buf(), source })?;
        Ok(parse_connection_text(&content, tenant))
    }
}

/// All four logical columns must be present under some accepted header name.
/// An optional `id` column is used for row ids, otherwise the 1-based row
/// number.
pub fn read_connection_csv<R: std::io::Read>(input: R, tenant: Option<TenantId>) -> Result<Vec<BatchRow>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(input);
    let headers = reader.headers()?.clone();

    let mut index = [None::<usize>; 4];
    let mut id_col = None;
    for (i, h) in headers.iter().enumerate() {
        if h.trim().eq_ignore_ascii_case("id") {
            id_col = Some(i);
        } else if let Some(c) = Column::from_header(h) {
            index[c as usize].get_or_insert(i);
        }
    }
    let missing: Vec<String> = Column::REQUIRED
        .into_iter()
        .filter(|c| index[*c as usize].is_none())
        .map(|c| c.canonical().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DatasetError::MissingColumns(missing));
    }
    let [Some(src), Some(dst), Some(kind), Some(content)] = index else {
        return Err(DatasetError::MissingColumns(Vec::new()));
    };

    let mut rows = Vec::new();
    for (n, record) in reader.records().enumerate() {
        let line = n + 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                warn!(line, error = %e, "unreadable batch row skipped");
                continue;
            }
        };
        let field = |i: usize| record.get(i).map(str::trim);
        let (Some(s), Some(d), Some(k), Some(c)) = (field(src), field(dst), field(kind), field(content)) else {
            warn!(line, fields = record.len(), "short batch row skipped");
            continue;
        };
        let id = id_col.and_then(field).map_or_else(|| line.to_string(), str::to_string);
        rows.push(batch_row(id, s, d, k, c, tenant));
    }
    Ok(rows)
}

/// `id,src,dst,type[,content]` per line. Blank lines are ignored; lines with
/// fewer than four fields are skipped.
pub fn parse_connection_text(content: &str, tenant: Option<TenantId>) -> Vec<BatchRow> {
    let mut rows = Vec::new();
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parts: Vec<&str> = line.split(',').map(str::trim).collect();
        if parts.len() < 4 {
            warn!(line = n + 1, fields = parts.len(), "short batch line skipped");
            continue;
        }
        let content = parts.get(4).copied().unwrap_or("");
        rows.push(batch_row(parts[0], parts[1], parts[2], parts[3], content, tenant));
    }
    rows
}

fn batch_row(id: impl Into<String>, src: &str, dst: &str, kind: &str, content: &str, tenant: Option<TenantId>) -> BatchRow {
    let mut connection = ConnectionRecord::new(src, dst, kind, content);
    connection.tenant_id = tenant;
    BatchRow { id: id.into(), connection }
}
