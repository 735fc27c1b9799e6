//! JSON views of analysis results.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::batch::{BatchSummary, SpecificationReport};
use crate::error::{self, SpatialError, Stage};
use crate::gwr::{BandwidthSelection, GwrDiagnostics, GwrResult};
use crate::regression::{GlobalModelResult, ModelType};

/// Success or failure of one fit, as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome<T> {
    Ok { result: T },
    Failed { stage: Stage, error: String },
}

impl<T> Outcome<T> {
    pub fn from_result<U>(result: &error::Result<U>, view: impl FnOnce(&U) -> T) -> Self {
        match result {
            Ok(value) => Outcome::Ok { result: view(value) },
            Err(e) => Outcome::failed(e),
        }
    }

    fn failed(e: &SpatialError) -> Self {
        Outcome::Failed { stage: e.stage(), error: e.to_string() }
    }
}

/// Surface-level summary of a GWR fit. Per-unit estimates go to CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GwrRecord {
    pub bandwidth: crate::gwr::Bandwidth,
    pub selection: Option<BandwidthSelection>,
    pub diagnostics: GwrDiagnostics,
}

impl From<&GwrResult> for GwrRecord {
    fn from(result: &GwrResult) -> Self {
        Self {
            bandwidth: result.bandwidth,
            selection: result.selection.clone(),
            diagnostics: result.diagnostics.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRecord {
    pub model: ModelType,
    #[serde(flatten)]
    pub outcome: Outcome<GlobalModelResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecificationRecord {
    pub spec: String,
    pub models: Vec<ModelRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gwr: Option<Outcome<GwrRecord>>,
}

impl From<&SpecificationReport> for SpecificationRecord {
    fn from(report: &SpecificationReport) -> Self {
        Self {
            spec: report.spec.to_string(),
            models: report.models.iter()
                .map(|o| ModelRecord { model: o.model, outcome: Outcome::from_result(&o.result, GlobalModelResult::clone) })
                .collect(),
            gwr: report.gwr.as_ref().map(|r| Outcome::from_result(r, |g| GwrRecord::from(g))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchDocument {
    pub summary: BatchSummary,
    pub specifications: Vec<SpecificationRecord>,
}

impl BatchDocument {
    pub fn new(reports: &[SpecificationReport]) -> Self {
        Self {
            summary: BatchSummary::from_reports(reports),
            specifications: reports.iter().map(SpecificationRecord::from).collect(),
        }
    }
}

/// Write any serializable value as pretty JSON. Non-finite numbers become null.
pub fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("[io::results] Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("[io::results] Failed to write {}", path.display()))?;
    writer.flush().with_context(|| format!("[io::results] Failed to flush {}", path.display()))
}

pub fn write_batch_report(reports: &[SpecificationReport], path: &Path) -> Result<()> {
    write_json(&BatchDocument::new(reports), path)
}
