//src/config.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};
use crate::store::RetryPolicy;
pub use crate::types::Species;

/// Published TB resistance catalogues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TbPanel {
    #[default]
    #[serde(rename = "bradley-2015")]
    Bradley2015,
    #[serde(rename = "walker-2015")]
    Walker2015,
}

impl FromStr for TbPanel {
    type Err = AtlasError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bradley-2015" => Ok(TbPanel::Bradley2015),
            "walker-2015" => Ok(TbPanel::Walker2015),
            other => Err(AtlasError::config(format!(
                "unknown TB panel '{other}' (expected bradley-2015 or walker-2015)"
            ))),
        }
    }
}

/// Thresholds used by the presence and variant typers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingThresholds {
    /// A gene needs at least this percent coverage to be called present.
    pub presence_min_percent_coverage: f64,
    /// Alternates at or below this percent coverage contribute no alt depth.
    pub alt_support_min_percent_coverage: f64,
    /// r below this is `ref`.
    pub ref_below: f64,
    /// r above this is `alt`; `[ref_below, alt_above]` is the het band.
    pub alt_above: f64,
    /// Fraction of the smallest expected depth a call needs.
    pub min_relative_depth: f64,
    pub min_absolute_depth: f64,
    /// Keep `ref` calls in the typed output.
    pub include_ref_calls: bool,
}

impl Default for TypingThresholds {
    fn default() -> Self {
        Self {
            presence_min_percent_coverage: 80.0,
            alt_support_min_percent_coverage: 30.0,
            ref_below: 0.2,
            alt_above: 0.8,
            min_relative_depth: 0.2,
            min_absolute_depth: 1.0,
            include_ref_calls: true,
        }
    }
}

impl TypingThresholds {
    /// Smallest median depth that still counts as real signal given the expected depths.
    pub fn min_call_depth(&self, expected_depths: &[f64]) -> f64 {
        let lowest = expected_depths
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        if lowest.is_finite() {
            self.min_absolute_depth.max(self.min_relative_depth * lowest)
        } else {
            self.min_absolute_depth
        }
    }
}

/// Presence thresholds for taxon probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhyloThresholds {
    pub min_percent_coverage: f64,
    pub min_median_depth: f64,
}

impl Default for PhyloThresholds {
    fn default() -> Self {
        Self {
            min_percent_coverage: 90.0,
            min_median_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParsePolicy {
    /// Drop probes with an ambiguous encoding instead of failing the sample.
    pub skip_invalid_probes: bool,
}

/// Where and how the external k-mer coverage tool runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub binary: PathBuf,
    pub skeleton_dir: PathBuf,
    pub work_dir: PathBuf,
    pub timeout_secs: u64,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("mccortex31"),
            skeleton_dir: PathBuf::from("data/skeletons"),
            work_dir: std::env::temp_dir(),
            timeout_secs: 3600,
        }
    }
}

/// Panel files and optional hierarchy definitions for each organism group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeciesPanels {
    pub staph: Vec<PathBuf>,
    pub tb_bradley_2015: Vec<PathBuf>,
    pub tb_walker_2015: Vec<PathBuf>,
    pub gn: Vec<PathBuf>,
    pub staph_hierarchy: Option<PathBuf>,
    pub tb_hierarchy: Option<PathBuf>,
    pub gn_hierarchy: Option<PathBuf>,
}

fn panel_stem(panel: &Path) -> Option<&str> {
    panel.file_stem()?.to_str()
}

fn paths(list: &[&str]) -> Vec<PathBuf> {
    list.iter().map(PathBuf::from).collect()
}

impl Default for SpeciesPanels {
    fn default() -> Self {
        Self {
            staph: paths(&[
                "data/panels/Coagneg.fasta",
                "data/panels/Staphaureus.fasta",
                "data/panels/Saureus.fasta",
                "data/panels/Sepidermidis.fasta",
                "data/panels/Shaemolyticus.fasta",
                "data/panels/Sother.fasta",
                "data/panels/staph-amr-genes.fasta",
                "data/panels/staph-amr-mutations.fasta",
            ]),
            tb_bradley_2015: paths(&[
                "data/panels/tb-species-160227.fasta",
                "data/panels/tb-amr-bradley_2015.fasta",
            ]),
            tb_walker_2015: paths(&[
                "data/panels/tb-species-160227.fasta",
                "data/panels/tb-amr-walker_2015.fasta",
            ]),
            gn: paths(&[
                "data/panels/gn-amr-genes.fasta",
                "data/panels/Escherichia_coli.fasta",
                "data/panels/Klebsiella_pneumoniae.fasta",
                "data/panels/gn-amr-genes-extended.fasta",
            ]),
            staph_hierarchy: None,
            tb_hierarchy: Some(PathBuf::from("data/phylo/mtbc_hierarchy.json")),
            gn_hierarchy: None,
        }
    }
}

/// Everything a run needs, read once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AmrConfig {
    pub kmer: u32,
    /// Rebuild skeletons and coverage files even if they already exist.
    pub force: bool,
    /// Restrict the run to one organism group; `None` runs every panel.
    pub species: Option<Species>,
    pub tb_panel: TbPanel,
    pub panels: SpeciesPanels,
    /// Overrides the per-species hierarchy definition.
    pub hierarchy_file: Option<PathBuf>,
    pub typing: TypingThresholds,
    pub phylo: PhyloThresholds,
    pub tool: ToolConfig,
    pub retry: RetryPolicy,
    pub parse: ParsePolicy,
    /// Directory relative panel and hierarchy paths resolve against; the
    /// config file's own directory when loaded from one.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Default for AmrConfig {
    fn default() -> Self {
        Self {
            kmer: 15,
            force: false,
            species: None,
            tb_panel: TbPanel::default(),
            panels: SpeciesPanels::default(),
            hierarchy_file: None,
            typing: TypingThresholds::default(),
            phylo: PhyloThresholds::default(),
            tool: ToolConfig::default(),
            retry: RetryPolicy::default(),
            parse: ParsePolicy::default(),
            base_dir: None,
        }
    }
}

impl AmrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON config; missing fields keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let mut config: AmrConfig = serde_json::from_str(&text)?;
        config.base_dir = path.as_ref().parent().map(Path::to_path_buf);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.kmer == 0 || self.kmer % 2 == 0 {
            return Err(AtlasError::config(format!(
                "kmer must be a positive odd number, got {}",
                self.kmer
            )));
        }
        let t = &self.typing;
        for (name, value) in [("ref_below", t.ref_below), ("alt_above", t.alt_above)] {
            if !(value > 0.0 && value < 1.0) {
                return Err(AtlasError::config(format!(
                    "{name} must lie strictly between 0 and 1, got {value}"
                )));
            }
        }
        if t.ref_below > t.alt_above {
            return Err(AtlasError::config(format!(
                "het band is empty: ref_below {} > alt_above {}",
                t.ref_below, t.alt_above
            )));
        }
        let non_negative = [
            ("presence_min_percent_coverage", t.presence_min_percent_coverage),
            ("alt_support_min_percent_coverage", t.alt_support_min_percent_coverage),
            ("min_relative_depth", t.min_relative_depth),
            ("min_absolute_depth", t.min_absolute_depth),
            ("phylo.min_percent_coverage", self.phylo.min_percent_coverage),
            ("phylo.min_median_depth", self.phylo.min_median_depth),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0) {
                return Err(AtlasError::config(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(AtlasError::config("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn group_panels(&self, group: Species) -> &[PathBuf] {
        match group {
            Species::Staph => self.panels.staph.as_slice(),
            Species::Tb => match self.tb_panel {
                TbPanel::Bradley2015 => self.panels.tb_bradley_2015.as_slice(),
                TbPanel::Walker2015 => self.panels.tb_walker_2015.as_slice(),
            },
            Species::Gn => self.panels.gn.as_slice(),
        }
    }

    /// Panel files for the selected organism group, or all of them.
    pub fn panel_paths(&self) -> Vec<PathBuf> {
        let groups = match self.species {
            Some(group) => vec![group],
            None => vec![Species::Tb, Species::Gn, Species::Staph],
        };
        groups
            .into_iter()
            .flat_map(|group| self.group_panels(group))
            .map(|panel| self.resolve(panel))
            .collect()
    }

    /// Organism group of the first configured panel whose file stem is `name`.
    fn group_of_panel_name(&self, name: &str) -> Option<Species> {
        [Species::Tb, Species::Gn, Species::Staph]
            .into_iter()
            .find(|&group| {
                self.group_panels(group)
                    .iter()
                    .any(|panel| panel_stem(panel) == Some(name))
            })
    }

    pub fn panel_group(&self, panel: &Path) -> Option<Species> {
        self.group_of_panel_name(panel_stem(panel)?)
    }

    /// Group of a coverage summary named `<panel>.covgs` or
    /// `<sample>-<k>_<panel>.covgs` (optionally gzipped).
    pub fn coverage_group(&self, coverage: &Path) -> Option<Species> {
        let name = coverage.file_name()?.to_str()?;
        let name = name.strip_suffix(".gz").unwrap_or(name);
        let name = name.strip_suffix(".covgs").unwrap_or(name);
        if let Some(group) = self.group_of_panel_name(name) {
            return Some(group);
        }
        name.match_indices('_')
            .find_map(|(i, _)| self.group_of_panel_name(&name[i + 1..]))
    }

    pub fn hierarchy_path(&self) -> Option<PathBuf> {
        let path = match (&self.hierarchy_file, self.species) {
            (Some(path), _) => Some(path),
            (None, Some(Species::Staph)) => self.panels.staph_hierarchy.as_ref(),
            (None, Some(Species::Tb)) => self.panels.tb_hierarchy.as_ref(),
            (None, Some(Species::Gn)) => self.panels.gn_hierarchy.as_ref(),
            (None, None) => None,
        };
        path.map(|p| self.resolve(p))
    }

    /// Name under which typed calls are stored for a sample.
    pub fn analysis_name(&self) -> &'static str {
        match self.species {
            Some(Species::Staph) => "staph-amr",
            Some(Species::Tb) => "tb-amr",
            Some(Species::Gn) => "gn-amr",
            None => "tb-gn-staph-amr",
        }
    }
}
