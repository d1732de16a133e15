//! At-exit report
//!
//! Dumps interpreter counters when a run finishes, controlled by the
//! `PSI_REPORT` env var:
//! - Unset → no report
//! - `1` → human-readable to stderr
//! - `json` → JSON to stderr
//! - `json:/path` → JSON to file
//!
//! JSON output needs the `report-json` feature (enabled by default); without
//! it the human format is used.

use crate::scheduler::SchedulerStats;
use crate::stats::InterpStats;
use std::io::Write;
use std::time::Duration;
use tracing::warn;

// =============================================================================
// Report Configuration (parsed from PSI_REPORT env var)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportDestination {
    Stderr,
    File(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportConfig {
    pub format: ReportFormat,
    pub destination: ReportDestination,
}

impl ReportConfig {
    /// Parse from the PSI_REPORT environment variable
    pub fn from_env() -> Option<Self> {
        let val = std::env::var("PSI_REPORT").ok()?;
        Self::parse(&val)
    }

    pub fn parse(val: &str) -> Option<Self> {
        match val {
            "" | "0" => None,
            "1" => Some(ReportConfig {
                format: ReportFormat::Human,
                destination: ReportDestination::Stderr,
            }),
            "json" => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::Stderr,
            }),
            s if s.starts_with("json:") => Some(ReportConfig {
                format: ReportFormat::Json,
                destination: ReportDestination::File(s[5..].to_string()),
            }),
            _ => {
                warn!(value = val, "PSI_REPORT not recognized, ignoring");
                None
            }
        }
    }
}

// =============================================================================
// Report Data
// =============================================================================

#[derive(Debug, Clone)]
pub struct ReportData {
    pub wall_clock_ms: u64,
    pub interp: InterpStats,
    pub scheduler: Option<SchedulerStats>,
}

impl ReportData {
    pub fn new(elapsed: Duration, interp: InterpStats) -> Self {
        ReportData {
            wall_clock_ms: elapsed.as_millis() as u64,
            interp,
            scheduler: None,
        }
    }
}

// =============================================================================
// Formatting
// =============================================================================

pub fn format_human(data: &ReportData) -> String {
    let s = &data.interp;
    let mut out = String::new();
    out.push_str("=== PSI REPORT ===\n");
    out.push_str(&format!("Wall clock:      {} ms\n", data.wall_clock_ms));
    out.push_str(&format!("Dispatched:      {}\n", s.dispatched));
    out.push_str(&format!("Literal pushes:  {}\n", s.literals));
    out.push_str(&format!(
        "Name lookups:    {} ({:.1}% cached)\n",
        s.name_lookups,
        s.cache_hit_rate() * 100.0
    ));
    out.push_str(&format!("Operator calls:  {}\n", s.operator_calls));
    out.push_str(&format!("Fast-path ops:   {}\n", s.fast_ops));
    out.push_str(&format!("Procedures:      {}\n", s.proc_entries));
    out.push_str(&format!("Slices:          {}\n", s.slices));
    out.push_str(&format!(
        "Collections:     {} ({} objects freed)\n",
        s.collections, s.objects_freed
    ));
    out.push_str(&format!(
        "Stack growths:   o={} e={} d={}\n",
        s.ostack_growths, s.estack_growths, s.dstack_growths
    ));
    out.push_str(&format!("Block pops:      {}\n", s.block_pops));
    out.push_str(&format!("Errors handled:  {}\n", s.errors_handled));

    if let Some(sched) = &data.scheduler {
        out.push_str("\n--- Scheduler ---\n");
        out.push_str(&format!("Tasks spawned:   {}\n", sched.spawned));
        out.push_str(&format!("Tasks done:      {}\n", sched.completed));
        out.push_str(&format!("Tasks failed:    {}\n", sched.failed));
        out.push_str(&format!("Peak tasks:      {}\n", sched.peak_tasks));
    }

    out.push_str("==================\n");
    out
}

#[cfg(feature = "report-json")]
pub fn format_json(data: &ReportData) -> String {
    let mut map = serde_json::Map::new();
    map.insert(
        "wall_clock_ms".into(),
        serde_json::Value::Number(data.wall_clock_ms.into()),
    );
    if let Ok(v) = serde_json::to_value(data.interp) {
        map.insert("interp".into(), v);
    }
    if let Some(sched) = data.scheduler {
        if let Ok(v) = serde_json::to_value(sched) {
            map.insert("scheduler".into(), v);
        }
    }
    serde_json::to_string(&serde_json::Value::Object(map)).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(not(feature = "report-json"))]
pub fn format_json(data: &ReportData) -> String {
    warn!("PSI_REPORT=json requires the 'report-json' feature, using the human format");
    format_human(data)
}

// =============================================================================
// Emit
// =============================================================================

/// Write the report for `data` as `config` asks.
pub fn emit(config: &ReportConfig, data: &ReportData) {
    let output = match config.format {
        ReportFormat::Human => format_human(data),
        ReportFormat::Json => format_json(data),
    };

    match &config.destination {
        ReportDestination::Stderr => {
            let _ = std::io::stderr().write_all(output.as_bytes());
        }
        ReportDestination::File(path) => {
            if let Ok(mut f) = std::fs::File::create(path) {
                let _ = f.write_all(output.as_bytes());
            } else {
                warn!(path = %path, "could not write report, using stderr");
                let _ = std::io::stderr().write_all(output.as_bytes());
            }
        }
    }
}

/// Emit a report if `PSI_REPORT` asks for one.
pub fn emit_from_env(data: &ReportData) {
    if let Some(config) = ReportConfig::from_env() {
        emit(&config, data);
    }
}
