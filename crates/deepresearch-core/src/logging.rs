//! Append-only audit trail of completed research runs.

use anyhow::{Context, Result};
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions, create_dir_all};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

const RESEARCH_LOG: &str = "research.jsonl";
const AUDIT_LOG: &str = "audit.jsonl";

static REDACTION_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "api_key",
            Regex::new(r"(?i)(api[_-]?key\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid api_key regex"),
        ),
        (
            "secret",
            Regex::new(r"(?i)(secret\s*[:=]\s*)([A-Za-z0-9\-_.+/]+)")
                .expect("invalid secret regex"),
        ),
        (
            "bearer",
            Regex::new(r"(?i)(bearer\s+)([A-Za-z0-9\-_.+=/]+)").expect("invalid bearer regex"),
        ),
        (
            "google_key",
            Regex::new(r"(AIza[0-9A-Za-z\-_]{35})").expect("invalid google_key regex"),
        ),
        (
            "sk_token",
            Regex::new(r"(sk-[A-Za-z0-9]{16,})").expect("invalid sk_token regex"),
        ),
    ]
});

#[derive(Debug, Clone)]
pub struct ResearchLogInput {
    pub interaction_id: String,
    pub query: String,
    pub resumed: bool,
    pub report_chars: usize,
}

#[derive(Serialize)]
struct ResearchLogRecord {
    timestamp: String,
    interaction_id: String,
    query: String,
    resumed: bool,
    report_chars: usize,
    redactions: Vec<String>,
}

#[derive(Serialize)]
struct AuditLogRecord {
    timestamp: String,
    interaction_id: String,
    redactions: Vec<String>,
}

/// JSONL audit log rooted at `dir`, partitioned by `YYYY/MM`.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
    retention_days: u64,
}

impl AuditLog {
    /// `retention_days == 0` disables pruning.
    pub fn new(dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            dir: dir.into(),
            retention_days,
        }
    }

    pub fn record_completion(&self, input: ResearchLogInput) -> Result<()> {
        let timestamp = Utc::now();
        let mut redactions = HashSet::new();
        let query = sanitize_text(&input.query, &mut redactions);

        let mut redactions: Vec<String> = redactions.into_iter().map(str::to_string).collect();
        redactions.sort();

        let record = ResearchLogRecord {
            timestamp: timestamp.to_rfc3339(),
            interaction_id: input.interaction_id.clone(),
            query,
            resumed: input.resumed,
            report_chars: input.report_chars,
            redactions,
        };

        let month_dir = self
            .dir
            .join(format!("{:04}", timestamp.year()))
            .join(format!("{:02}", timestamp.month()));
        append_json_line(&month_dir.join(RESEARCH_LOG), &record)?;

        if !record.redactions.is_empty() {
            let audit = AuditLogRecord {
                timestamp: record.timestamp.clone(),
                interaction_id: input.interaction_id.clone(),
                redactions: record.redactions.clone(),
            };
            append_json_line(&month_dir.join(AUDIT_LOG), &audit)?;
            warn!(
                interaction_id = %input.interaction_id,
                fields = ?record.redactions,
                "redacted potential secrets from research log"
            );
        }

        self.enforce_retention()
    }

    /// Drop every logged line belonging to one of `interaction_ids`.
    pub fn remove_interactions(&self, interaction_ids: &[String]) -> Result<()> {
        if interaction_ids.is_empty() || !self.dir.exists() {
            return Ok(());
        }
        let ids: BTreeSet<&str> = interaction_ids.iter().map(String::as_str).collect();

        for year_entry in fs::read_dir(&self.dir)? {
            let year_entry = year_entry?;
            if !year_entry.file_type()?.is_dir() {
                continue;
            }
            for month_entry in fs::read_dir(year_entry.path())? {
                let month_entry = month_entry?;
                if !month_entry.file_type()?.is_dir() {
                    continue;
                }
                for name in [RESEARCH_LOG, AUDIT_LOG] {
                    let path = month_entry.path().join(name);
                    rewrite_jsonl_without(&path, &ids)?;
                    cleanup_empty_file(&path)?;
                }
                if month_entry.path().read_dir()?.next().is_none() {
                    fs::remove_dir(month_entry.path()).ok();
                }
            }
            if year_entry.path().read_dir()?.next().is_none() {
                fs::remove_dir(year_entry.path()).ok();
            }
        }

        Ok(())
    }

    fn enforce_retention(&self) -> Result<()> {
        if self.retention_days == 0 || !self.dir.exists() {
            return Ok(());
        }
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(self.retention_days.saturating_mul(86_400)))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        prune_directory(&self.dir, cutoff)
    }
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .with_context(|| format!("failed to create log directory {}", parent.display()))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let line = serde_json::to_string(value)?;
    writeln!(writer, "{}", line)
        .with_context(|| format!("failed to append log entry to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

fn sanitize_text(input: &str, redactions: &mut HashSet<&'static str>) -> String {
    let mut output = input.to_string();
    for (name, regex) in REDACTION_PATTERNS.iter() {
        let mut matched = false;
        output = regex
            .replace_all(&output, |caps: &Captures| {
                matched = true;
                if caps.len() > 2 {
                    format!("{}[REDACTED]", &caps[1])
                } else {
                    "[REDACTED]".to_string()
                }
            })
            .to_string();
        if matched {
            redactions.insert(*name);
        }
    }
    output
}

fn prune_directory(dir: &Path, cutoff: SystemTime) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            prune_directory(&path, cutoff)?;
            if path.read_dir()?.next().is_none() {
                fs::remove_dir(&path).ok();
            }
        } else if metadata.is_file()
            && metadata
                .modified()
                .map(|time| time < cutoff)
                .unwrap_or(false)
        {
            fs::remove_file(&path).ok();
        }
    }

    Ok(())
}

fn rewrite_jsonl_without(path: &Path, ids: &BTreeSet<&str>) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let file =
        File::open(path).with_context(|| format!("failed to open log file {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut retained = Vec::new();
    let mut removed = false;
    for line in reader.lines() {
        let line = line?;
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line)
            && let Some(id) = value.get("interaction_id").and_then(|v| v.as_str())
            && ids.contains(id)
        {
            removed = true;
            continue;
        }
        retained.push(line);
    }

    if removed {
        let file = File::create(path)
            .with_context(|| format!("failed to rewrite log file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for line in retained {
            writeln!(writer, "{}", line)?;
        }
        writer.flush()?;
    }

    Ok(())
}

fn cleanup_empty_file(path: &Path) -> Result<()> {
    if path.exists() {
        let metadata = path.metadata()?;
        if metadata.len() == 0 {
            fs::remove_file(path).ok();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    fn month_dir(root: &Path) -> PathBuf {
        let year_dir = root.read_dir().unwrap().next().unwrap().unwrap().path();
        year_dir.read_dir().unwrap().next().unwrap().unwrap().path()
    }

    #[test]
    fn completion_is_sanitized_and_persisted() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let log = AuditLog::new(temp.path(), 0);

        log.record_completion(ResearchLogInput {
            interaction_id: "J1".to_string(),
            query: "Summarize api_key=abcd1234 usage".to_string(),
            resumed: false,
            report_chars: 42,
        })?;

        let month = month_dir(temp.path());
        let line = fs::read_to_string(month.join(RESEARCH_LOG))?;
        let record: Value = serde_json::from_str(line.trim())?;
        assert_eq!(record["interaction_id"], "J1");
        assert_eq!(record["report_chars"], 42);
        assert_eq!(record["query"], "Summarize api_key=[REDACTED] usage");
        assert!(month.join(AUDIT_LOG).exists());
        Ok(())
    }

    #[test]
    fn clean_query_writes_no_audit_entry() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let log = AuditLog::new(temp.path(), 0);
        log.record_completion(ResearchLogInput {
            interaction_id: "J1".to_string(),
            query: "What is quantum computing?".to_string(),
            resumed: true,
            report_chars: 1,
        })?;

        assert!(!month_dir(temp.path()).join(AUDIT_LOG).exists());
        Ok(())
    }

    #[test]
    fn removing_interactions_keeps_other_lines() -> Result<()> {
        let temp = TempDir::new().expect("temp dir");
        let log = AuditLog::new(temp.path(), 0);
        for id in ["J1", "J2"] {
            log.record_completion(ResearchLogInput {
                interaction_id: id.to_string(),
                query: "topic".to_string(),
                resumed: false,
                report_chars: 0,
            })?;
        }

        log.remove_interactions(&["J1".to_string()])?;
        let contents = fs::read_to_string(month_dir(temp.path()).join(RESEARCH_LOG))?;
        assert!(!contents.contains("\"J1\""));
        assert!(contents.contains("\"J2\""));

        log.remove_interactions(&["J2".to_string()])?;
        assert!(temp.path().read_dir()?.next().is_none());
        Ok(())
    }
}
