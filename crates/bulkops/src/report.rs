//! Run reports: plain text, JSON and CSV.

use crate::error::{Error, Result};
use crate::outcome::{Outcome, RunResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::{self, Display, Write as _};
use std::fs;
use std::hash::Hash;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Output format for a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
    Csv,
}

impl ReportFormat {
    /// Conventional file extension.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(Error::UnknownFormat(other.to_string())),
        }
    }
}

impl Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Csv => "csv",
        })
    }
}

/// Format a duration as `0.42s`, `12.3s` or `3m 05s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        if secs < 10.0 {
            format!("{secs:.2}s")
        } else {
            format!("{secs:.1}s")
        }
    } else {
        let whole = duration.as_secs();
        format!("{}m {:02}s", whole / 60, whole % 60)
    }
}

/// One-line summary of the counters and duration.
pub fn summary<K>(result: &RunResult<K>) -> String
where
    K: Clone + Eq + Hash,
{
    format!(
        "{} total, {} succeeded, {} failed, {} skipped in {}",
        result.total(),
        result.succeeded(),
        result.failed(),
        result.skipped(),
        format_duration(result.elapsed)
    )
}

/// Failed and skipped entries, one per line. Empty when everything succeeded.
pub fn detailed<K>(result: &RunResult<K>) -> String
where
    K: Clone + Eq + Hash + Display,
{
    let mut out = String::new();

    let failed: Vec<_> = result.outcomes.iter().filter(|(_, o)| o.is_failure()).collect();
    if !failed.is_empty() {
        out.push_str("Failed:\n");
        for (key, outcome) in failed {
            match outcome.detail() {
                Some(detail) => {
                    let _ = writeln!(out, "  {key}: {detail}");
                }
                None => {
                    let _ = writeln!(out, "  {key}");
                }
            }
        }
    }

    let skipped: Vec<_> = result.outcomes.iter().filter(|(_, o)| o.is_skipped()).collect();
    if !skipped.is_empty() {
        out.push_str("Skipped:\n");
        for (key, outcome) in skipped {
            let _ = writeln!(out, "  {key}: {}", outcome.tag());
        }
    }

    out
}

#[derive(Serialize)]
struct JsonReport<'a, K> {
    total: usize,
    succeeded: usize,
    failed: usize,
    skipped: usize,
    started_at: &'a DateTime<Utc>,
    duration_secs: f64,
    outcomes: Vec<JsonEntry<'a, K>>,
}

#[derive(Serialize)]
struct JsonEntry<'a, K> {
    id: &'a K,
    #[serde(flatten)]
    outcome: &'a Outcome,
}

/// `{total, succeeded, failed, skipped, started_at, duration_secs, outcomes: [...]}`
pub fn render_json<K>(result: &RunResult<K>) -> Result<String>
where
    K: Clone + Eq + Hash + Serialize,
{
    let report = JsonReport {
        total: result.total(),
        succeeded: result.succeeded(),
        failed: result.failed(),
        skipped: result.skipped(),
        started_at: &result.started_at,
        duration_secs: result.elapsed.as_secs_f64(),
        outcomes: result
            .outcomes
            .iter()
            .map(|(id, outcome)| JsonEntry { id, outcome })
            .collect(),
    };
    serde_json::to_string_pretty(&report).map_err(|e| Error::Serialize(e.to_string()))
}

/// `status,id` rows under a header line.
pub fn render_csv<K>(result: &RunResult<K>) -> String
where
    K: Clone + Eq + Hash + Display,
{
    let mut out = String::from("status,id\n");
    for (key, outcome) in result.outcomes.iter() {
        let _ = writeln!(
            out,
            "{},{}",
            csv_field(outcome.tag()),
            csv_field(&key.to_string())
        );
    }
    out
}

/// Render in the requested format. Text is the summary plus the details.
pub fn render<K>(result: &RunResult<K>, format: ReportFormat) -> Result<String>
where
    K: Clone + Eq + Hash + Display + Serialize,
{
    match format {
        ReportFormat::Text => {
            let mut out = summary(result);
            out.push('\n');
            out.push_str(&detailed(result));
            Ok(out)
        }
        ReportFormat::Json => render_json(result),
        ReportFormat::Csv => Ok(render_csv(result)),
    }
}

/// Render and write to `path`.
pub fn write_report<K>(result: &RunResult<K>, format: ReportFormat, path: &Path) -> Result<()>
where
    K: Clone + Eq + Hash + Display + Serialize,
{
    let content = render(result, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| Error::Io {
            action: "Failed to create directory",
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, content).map_err(|source| Error::Io {
        action: "Failed to write report",
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("Wrote {format} report to {}", path.display());
    Ok(())
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{RunRecorder, SkipReason};

    fn sample() -> RunResult<u32> {
        let mut recorder = RunRecorder::start(4);
        recorder.record(100, Outcome::Success);
        recorder.record(101, Outcome::failure("locked"));
        recorder.record(102, Outcome::skipped(SkipReason::NotFound));
        recorder.record(103, Outcome::failed());
        let mut result = recorder.finish();
        result.elapsed = Duration::from_millis(1500);
        result
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert_eq!("csv".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
        assert_eq!("txt".parse::<ReportFormat>().unwrap(), ReportFormat::Text);
        assert!("xml".parse::<ReportFormat>().is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(420)), "0.42s");
        assert_eq!(format_duration(Duration::from_millis(12_300)), "12.3s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m 05s");
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            summary(&sample()),
            "4 total, 1 succeeded, 2 failed, 1 skipped in 1.50s"
        );
    }

    #[test]
    fn test_detailed_lists_failures_and_skips() {
        let text = detailed(&sample());
        assert!(text.contains("Failed:\n  101: locked\n  103\n"));
        assert!(text.contains("Skipped:\n  102: not found\n"));
    }

    #[test]
    fn test_detailed_empty_when_all_succeed() {
        let mut recorder = RunRecorder::start(1);
        recorder.record(1u32, Outcome::Success);
        assert!(detailed(&recorder.finish()).is_empty());
    }

    #[test]
    fn test_render_json() {
        let json = render_json(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["total"], 4);
        assert_eq!(value["succeeded"], 1);
        assert_eq!(value["failed"], 2);
        assert_eq!(value["skipped"], 1);
        assert_eq!(value["duration_secs"], 1.5);
        assert_eq!(value["outcomes"][0]["id"], 100);
        assert_eq!(value["outcomes"][0]["status"], "success");
        assert_eq!(value["outcomes"][1]["detail"], "locked");
        assert_eq!(value["outcomes"][2]["reason"], "not found");
    }

    #[test]
    fn test_render_csv() {
        let csv = render_csv(&sample());
        assert_eq!(
            csv,
            "status,id\nsuccess,100\nfailure,101\nnot found,102\nfailure,103\n"
        );
    }

    #[test]
    fn test_csv_quotes_awkward_names() {
        let mut recorder = RunRecorder::start(1);
        recorder.record("node,\"a\"".to_string(), Outcome::Success);
        let csv = render_csv(&recorder.finish());
        assert_eq!(csv, "status,id\nsuccess,\"node,\"\"a\"\"\"\n");
    }

    #[test]
    fn test_write_report_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.csv");
        write_report(&sample(), ReportFormat::Csv, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("status,id\n"));
    }
}
