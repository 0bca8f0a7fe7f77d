//! JSON problem and report files used by the CLI
//!
//! A problem file carries the labels and either a precomputed kernel matrix
//! or dense points with a kernel name. A report bundles the trained model,
//! the run diagnostics and some metadata about how it was produced.

use crate::core::{Diagnostics, Model, Result, SolverConfig, SolverError, TrainingResult};
use crate::kernel::{GaussianKernel, Kernel, LinearKernel, PrecomputedKernel};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Kernel section of a problem file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KernelSpec {
    /// Full symmetric kernel matrix
    Precomputed { matrix: Vec<Vec<f64>> },
    Linear { points: Vec<Vec<f64>> },
    /// `exp(-gamma ||x - y||²)`; gamma defaults to 1 / dimension
    Gaussian {
        points: Vec<Vec<f64>>,
        #[serde(default)]
        gamma: Option<f64>,
    },
}

impl KernelSpec {
    pub fn build(&self) -> Result<Box<dyn Kernel>> {
        let kernel: Box<dyn Kernel> = match self {
            KernelSpec::Precomputed { matrix } => {
                Box::new(PrecomputedKernel::from_rows(matrix.clone())?)
            }
            KernelSpec::Linear { points } => Box::new(LinearKernel::new(points.clone())?),
            KernelSpec::Gaussian {
                points,
                gamma: Some(gamma),
            } => Box::new(GaussianKernel::new(points.clone(), *gamma)?),
            KernelSpec::Gaussian {
                points,
                gamma: None,
            } => Box::new(GaussianKernel::with_auto_gamma(points.clone())?),
        };
        Ok(kernel)
    }

    pub fn name(&self) -> &'static str {
        match self {
            KernelSpec::Precomputed { .. } => "precomputed",
            KernelSpec::Linear { .. } => "linear",
            KernelSpec::Gaussian { .. } => "gaussian",
        }
    }
}

/// Training problem as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemFile {
    pub labels: Vec<f64>,
    pub kernel: KernelSpec,
    /// Per-example multipliers of C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linear_term: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_alpha: Option<Vec<f64>>,
}

impl ProblemFile {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let problem = serde_json::from_reader(BufReader::new(file))?;
        Ok(problem)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Where a report came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub library_version: String,
    /// RFC 3339 UTC timestamp
    pub created_at: String,
    pub n_examples: usize,
    pub kernel: String,
    pub config: SolverConfig,
}

/// Model and diagnostics of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model: Model,
    pub diagnostics: Diagnostics,
    pub metadata: ReportMetadata,
}

impl TrainingReport {
    pub fn new(result: &TrainingResult, config: &SolverConfig, kernel: &str) -> Self {
        Self {
            model: result.model.clone(),
            diagnostics: result.diagnostics.clone(),
            metadata: ReportMetadata {
                library_version: env!("CARGO_PKG_VERSION").to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
                n_examples: result.alpha.len(),
                kernel: kernel.to_string(),
                config: config.clone(),
            },
        }
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.to_writer(&mut writer)?;
        writer.flush().map_err(SolverError::IoError)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let report = serde_json::from_reader(BufReader::new(file))?;
        Ok(report)
    }
}
