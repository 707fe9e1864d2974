//src/types.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};

/// Organism groups: each has its own panels and resistance predictor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Species {
    Staph,
    Tb,
    Gn,
}

impl Species {
    pub fn as_str(&self) -> &'static str {
        match self {
            Species::Staph => "staph",
            Species::Tb => "tb",
            Species::Gn => "gn",
        }
    }

    /// Group named by the leading token of a panel or probe name
    /// (`staph-amr-genes`, `tb_rpoB_S450L`).
    pub fn from_prefix(name: &str) -> Option<Self> {
        let token = name.split(['-', '_']).next()?;
        token.parse().ok()
    }
}

impl FromStr for Species {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "staph" => Ok(Species::Staph),
            "tb" => Ok(Species::Tb),
            "gn" => Ok(Species::Gn),
            other => Err(AtlasError::config(format!(
                "unknown species '{other}' (expected staph, tb or gn)"
            ))),
        }
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coverage summary of one probe, as reported by the k-mer coverage tool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageRecord {
    /// Percent of the probe's k-mers seen at least once (0-100).
    pub percent_coverage: f64,
    pub median_depth: f64,
    pub min_depth: f64,
}

impl CoverageRecord {
    pub fn new(percent_coverage: f64, median_depth: f64, min_depth: f64) -> Self {
        Self {
            percent_coverage,
            median_depth,
            min_depth,
        }
    }
}

/// Levels of the phylogenetic hierarchy, shallowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaxonLevel {
    Complex,
    SubComplex,
    Species,
    #[serde(alias = "sub-species")]
    Lineage,
}

impl TaxonLevel {
    pub const ALL: [TaxonLevel; 4] = [
        TaxonLevel::Complex,
        TaxonLevel::SubComplex,
        TaxonLevel::Species,
        TaxonLevel::Lineage,
    ];

    /// Parses the `level` probe parameter. `sub-species` is the older name for lineage.
    pub fn from_param(value: &str) -> Option<Self> {
        match value {
            "complex" => Some(TaxonLevel::Complex),
            "sub-complex" => Some(TaxonLevel::SubComplex),
            "species" => Some(TaxonLevel::Species),
            "lineage" | "sub-species" => Some(TaxonLevel::Lineage),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonLevel::Complex => "complex",
            TaxonLevel::SubComplex => "sub-complex",
            TaxonLevel::Species => "species",
            TaxonLevel::Lineage => "lineage",
        }
    }
}

impl fmt::Display for TaxonLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceGenotype {
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VariantGenotype {
    Ref,
    Het,
    Alt,
    NoCall,
}

/// Typed presence of one gene, collapsed to its best-supported version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenePresenceCall {
    pub gene_name: String,
    pub version: String,
    pub coverage: CoverageRecord,
    pub genotype: PresenceGenotype,
    /// 0-1, coverage fraction scaled by how well depth matches the expected depth.
    pub confidence: f64,
    /// Organism group of the panel the gene came from; `None` applies to every group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Species>,
}

impl GenePresenceCall {
    pub fn is_present(&self) -> bool {
        self.genotype == PresenceGenotype::Present
    }

    pub fn belongs_to(&self, group: Species) -> bool {
        self.group.map_or(true, |g| g == group)
    }
}

/// Typed call for one alternate allele of a variant site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantCall {
    pub variant_id: String,
    pub reference: CoverageRecord,
    pub alternate: CoverageRecord,
    /// Position of this alternate among the site's alternates, in stream order.
    pub alt_index: usize,
    pub genotype: VariantGenotype,
    pub gene: Option<String>,
    /// `<gene>_<mut>` when both parameters were present on the probe.
    pub mutation: Option<String>,
    /// alt / (alt + ref) depth ratio; `None` for no-calls.
    pub alt_fraction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Species>,
}

impl VariantCall {
    /// Untagged calls belong to every group.
    pub fn belongs_to(&self, group: Species) -> bool {
        self.group.map_or(true, |g| g == group)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Susceptibility {
    Resistant,
    Susceptible,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhenotypeCall {
    pub drug: String,
    pub call: Susceptibility,
    pub supporting_evidence: BTreeSet<String>,
}

/// Gene name -> version -> coverage, only for probes with non-zero coverage.
pub type GenePresenceCovgs = BTreeMap<String, BTreeMap<String, CoverageRecord>>;

/// Gene name -> organism group of the panels it was seen in; `None` when
/// untagged or seen in more than one group.
pub type GeneGroups = BTreeMap<String, Option<Species>>;

/// One variant site: its reference probe and every alternate probe, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantCoverage {
    pub variant_id: String,
    pub group: Option<Species>,
    pub gene: Option<String>,
    pub mutation: Option<String>,
    pub reference: CoverageRecord,
    pub alternates: Vec<CoverageRecord>,
}

/// Variant id -> site coverage.
pub type VariantCovgs = BTreeMap<String, VariantCoverage>;

/// Variant id -> one call per alternate.
pub type TypedVariants = BTreeMap<String, Vec<VariantCall>>;
