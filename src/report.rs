//src/report.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::phylo::{ClassificationResult, PhyloAssignment};
use crate::types::{CoverageRecord, GenePresenceCall, PhenotypeCall, TypedVariants};

/// Classification as written into the report: present taxa per level plus the primary path.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhylogeneticsReport {
    pub phylo_group: Vec<PhyloAssignment>,
    pub median_depth: Option<f64>,
    pub is_mixed: bool,
    #[serde(flatten)]
    pub levels: BTreeMap<String, BTreeMap<String, CoverageRecord>>,
}

impl From<&ClassificationResult> for PhylogeneticsReport {
    fn from(result: &ClassificationResult) -> Self {
        Self {
            phylo_group: result.phylo_group.clone(),
            median_depth: result.median_depth,
            is_mixed: result.is_mixed,
            levels: result
                .by_level()
                .into_iter()
                .map(|(level, taxa)| (level.to_string(), taxa))
                .collect(),
        }
    }
}

/// Everything produced for one sample. When a stage fails, the sections
/// filled so far are kept and `error` says why the rest is missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleReport {
    pub panels: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phylogenetics: Option<PhylogeneticsReport>,
    pub typed_presence: Vec<GenePresenceCall>,
    pub typed_variants: TypedVariants,
    /// Predictor name -> drug -> call.
    pub susceptibility: BTreeMap<String, BTreeMap<String, PhenotypeCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SampleReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Sample id -> report, serialized as one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AmrReport {
    pub samples: BTreeMap<String, SampleReport>,
}

impl AmrReport {
    pub fn insert(&mut self, sample: impl Into<String>, report: SampleReport) {
        self.samples.insert(sample.into(), report);
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
