//src/phylo.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::PhyloThresholds;
use crate::covgs::TaxonCoverage;
use crate::error::{AtlasError, Result};
use crate::types::{CoverageRecord, TaxonLevel};

/// One checkpoint of a hierarchy definition:
/// ```json
/// {"name": "Mycobacterium_tuberculosis_complex", "level": "complex",
///  "children": [{"name": "Mycobacterium_tuberculosis", "level": "species"}]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub name: String,
    pub level: TaxonLevel,
    #[serde(default)]
    pub children: Vec<HierarchyNode>,
}

/// Tree of named checkpoints for an organism group. Order of declaration
/// breaks depth ties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hierarchy {
    pub roots: Vec<HierarchyNode>,
}

impl Hierarchy {
    pub fn new(roots: Vec<HierarchyNode>) -> Result<Self> {
        fn check(node: &HierarchyNode) -> Result<()> {
            for child in &node.children {
                if child.level <= node.level {
                    return Err(AtlasError::config(format!(
                        "hierarchy node {} ({}) must be deeper than its parent {} ({})",
                        child.name, child.level, node.name, node.level
                    )));
                }
                check(child)?;
            }
            Ok(())
        }
        for root in &roots {
            check(root)?;
        }
        Ok(Self { roots })
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let roots: Vec<HierarchyNode> = serde_json::from_str(text)?;
        Self::new(roots)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            AtlasError::config(format!("cannot read hierarchy {}: {e}", path.display()))
        })?;
        let hierarchy = Self::from_json_str(&text)?;
        log::info!(
            "Loaded hierarchy {} with {} top-level groups",
            path.display(),
            hierarchy.roots.len()
        );
        Ok(hierarchy)
    }

    /// Every species probe of the stream as a flat, single-level hierarchy.
    pub fn flat_species(coverage: &TaxonCoverage) -> Self {
        let roots = coverage
            .level(TaxonLevel::Species)
            .map(|level| {
                level
                    .iter()
                    .map(|(name, _)| HierarchyNode {
                        name: name.to_string(),
                        level: TaxonLevel::Species,
                        children: Vec::new(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { roots }
    }
}

/// A taxon that passed the presence thresholds, with its present children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonNode {
    pub level: TaxonLevel,
    pub name: String,
    pub coverage: CoverageRecord,
    pub children: Vec<TaxonNode>,
}

/// One step of the primary phylo group path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhyloAssignment {
    pub level: TaxonLevel,
    pub name: String,
    pub coverage: CoverageRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClassificationResult {
    /// Root-to-leaf path through the deepest present node of each level.
    pub phylo_group: Vec<PhyloAssignment>,
    /// Median depth of the last node in `phylo_group`.
    pub median_depth: Option<f64>,
    /// Two or more sibling taxa passed the presence thresholds.
    pub is_mixed: bool,
    /// Every present taxon; absent subtrees are pruned.
    pub tree: Vec<TaxonNode>,
}

impl ClassificationResult {
    /// Present taxa grouped by level, for the report.
    pub fn by_level(&self) -> BTreeMap<TaxonLevel, BTreeMap<String, CoverageRecord>> {
        fn walk(
            nodes: &[TaxonNode],
            out: &mut BTreeMap<TaxonLevel, BTreeMap<String, CoverageRecord>>,
        ) {
            for node in nodes {
                out.entry(node.level)
                    .or_default()
                    .insert(node.name.clone(), node.coverage);
                walk(&node.children, out);
            }
        }
        let mut out = BTreeMap::new();
        walk(&self.tree, &mut out);
        out
    }

    /// Top-level group of the primary path.
    pub fn root_name(&self) -> Option<&str> {
        self.phylo_group.first().map(|a| a.name.as_str())
    }

    /// Primary path names, deepest first.
    pub fn lineage_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.phylo_group.iter().rev().map(|a| a.name.as_str())
    }
}

/// Walks a hierarchy from the top, descending only into present taxa.
pub struct SpeciesClassifier<'a> {
    thresholds: &'a PhyloThresholds,
    hierarchy: Option<&'a Hierarchy>,
}

impl<'a> SpeciesClassifier<'a> {
    /// Without a hierarchy the classifier checks species presence only.
    pub fn new(thresholds: &'a PhyloThresholds, hierarchy: Option<&'a Hierarchy>) -> Self {
        Self {
            thresholds,
            hierarchy,
        }
    }

    pub fn is_present(&self, coverage: &CoverageRecord) -> bool {
        coverage.percent_coverage >= self.thresholds.min_percent_coverage
            && coverage.median_depth >= self.thresholds.min_median_depth
    }

    fn present_nodes(
        &self,
        defs: &[HierarchyNode],
        coverage: &TaxonCoverage,
        is_mixed: &mut bool,
    ) -> Vec<TaxonNode> {
        let mut present = Vec::new();
        for def in defs {
            let Some(record) = coverage.get(def.level, &def.name) else {
                continue;
            };
            if !self.is_present(record) {
                continue;
            }
            let children = self.present_nodes(&def.children, coverage, is_mixed);
            present.push(TaxonNode {
                level: def.level,
                name: def.name.clone(),
                coverage: *record,
                children,
            });
        }
        if present.len() >= 2 {
            *is_mixed = true;
        }
        present
    }

    /// Deepest sibling wins; the first declared wins a tie.
    fn dominant(nodes: &[TaxonNode]) -> Option<&TaxonNode> {
        let mut best: Option<&TaxonNode> = None;
        for node in nodes {
            match best {
                Some(b) if node.coverage.median_depth <= b.coverage.median_depth => {}
                _ => best = Some(node),
            }
        }
        best
    }

    pub fn classify(&self, coverage: &TaxonCoverage) -> ClassificationResult {
        let flat;
        let hierarchy = match self.hierarchy {
            Some(h) => h,
            None => {
                flat = Hierarchy::flat_species(coverage);
                &flat
            }
        };

        let mut is_mixed = false;
        let tree = self.present_nodes(&hierarchy.roots, coverage, &mut is_mixed);

        let mut phylo_group = Vec::new();
        let mut level_nodes: &[TaxonNode] = &tree;
        while let Some(node) = Self::dominant(level_nodes) {
            phylo_group.push(PhyloAssignment {
                level: node.level,
                name: node.name.clone(),
                coverage: node.coverage,
            });
            level_nodes = &node.children;
        }
        let median_depth = phylo_group.last().map(|a| a.coverage.median_depth);

        match phylo_group.last() {
            Some(last) => log::info!(
                "Phylo group {} ({}) at median depth {}{}",
                last.name,
                last.level,
                last.coverage.median_depth,
                if is_mixed { ", mixed sample" } else { "" }
            ),
            None => log::warn!("No taxon passed the presence thresholds"),
        }

        ClassificationResult {
            phylo_group,
            median_depth,
            is_mixed,
            tree,
        }
    }
}
