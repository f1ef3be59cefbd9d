use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::PrepError;

// ---------------------------------------------------------------------------
// Summary – aggregate counts every stage reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub processed: usize,
    pub skipped: usize,
    pub unpaired_images: usize,
    pub unpaired_masks: usize,
}

impl Summary {
    pub fn log(&self, stage: &str) {
        log::info!(
            "=== SUMMARY ({stage}) === processed={}, skipped={}, unpaired_images={}, unpaired_masks={}",
            self.processed,
            self.skipped,
            self.unpaired_images,
            self.unpaired_masks
        );
    }
}

/// A file the stage gave up on, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skip {
    pub path: PathBuf,
    pub reason: String,
}

impl Skip {
    /// Record a per-file failure, logging it with the full error chain.
    pub fn from_error(path: &Path, err: &anyhow::Error) -> Self {
        log::warn!("Skip {}: {err:#}", path.display());
        Self {
            path: path.to_path_buf(),
            reason: format!("{err:#}"),
        }
    }
}

/// Flat per-item row, one per action or diagnostic, used for CSV export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemRecord {
    pub stage: &'static str,
    pub action: String,
    pub source: String,
    pub destination: String,
    pub detail: String,
}

impl ItemRecord {
    pub fn new(stage: &'static str, action: impl Into<String>, source: &Path) -> Self {
        Self {
            stage,
            action: action.into(),
            source: source.display().to_string(),
            destination: String::new(),
            detail: String::new(),
        }
    }

    pub fn to(mut self, destination: &Path) -> Self {
        self.destination = destination.display().to_string();
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

/// Common surface of the per-stage reports.
pub trait StageReport: Serialize {
    const STAGE: &'static str;

    fn summary(&self) -> Summary;

    fn items(&self) -> Vec<ItemRecord>;
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Csv,
}

impl ReportFormat {
    /// Pick the format from the report path's extension.
    pub fn from_path(path: &Path) -> Result<Self, PrepError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            _ => Err(PrepError::UnsupportedReport {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Write a stage report: the full structure as JSON, or the item rows as CSV.
pub fn write_report<R: StageReport>(report: &R, path: &Path) -> Result<()> {
    let format = ReportFormat::from_path(path)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    match format {
        ReportFormat::Json => {
            let file = File::create(path).context("creating JSON report")?;
            serde_json::to_writer_pretty(BufWriter::new(file), report)
                .context("writing JSON report")?;
        }
        ReportFormat::Csv => {
            let mut writer = csv::Writer::from_path(path).context("creating CSV report")?;
            for item in report.items() {
                writer.serialize(item).context("writing CSV row")?;
            }
            writer.flush().context("flushing CSV report")?;
        }
    }

    log::info!("Report written to {}", path.display());
    Ok(())
}
