// src/typing/presence.rs

use std::cmp::Ordering;

use super::expected_baseline;
use crate::config::TypingThresholds;
use crate::error::{AtlasError, Result};
use crate::types::{CoverageRecord, GenePresenceCall, GenePresenceCovgs, PresenceGenotype};

/// Calls genes present or absent and collapses each gene to one version.
#[derive(Debug, Clone)]
pub struct PresenceTyper {
    thresholds: TypingThresholds,
}

/// Best version first: deeper, then better covered, then lexicographically smaller.
fn rank_versions(a: &(&String, &CoverageRecord), b: &(&String, &CoverageRecord)) -> Ordering {
    b.1.median_depth
        .total_cmp(&a.1.median_depth)
        .then(b.1.percent_coverage.total_cmp(&a.1.percent_coverage))
        .then(a.0.cmp(b.0))
}

impl PresenceTyper {
    pub fn new(thresholds: TypingThresholds) -> Self {
        Self { thresholds }
    }

    /// Coverage fraction scaled by depth support against the best-matching expected depth.
    pub fn confidence(&self, coverage: &CoverageRecord, expected_depths: &[f64]) -> f64 {
        let depth_support = expected_depths
            .iter()
            .map(|&e| (coverage.median_depth / e).min(1.0))
            .fold(0.0, f64::max);
        (coverage.percent_coverage / 100.0).clamp(0.0, 1.0) * depth_support
    }

    pub fn is_present(&self, coverage: &CoverageRecord, expected_depths: &[f64]) -> bool {
        coverage.percent_coverage >= self.thresholds.presence_min_percent_coverage
            && coverage.median_depth >= self.thresholds.min_call_depth(expected_depths)
    }

    /// One call per gene. Among versions called present the best-ranked one is
    /// kept; a gene with no present version reports its best-ranked absent version.
    pub fn genotype(
        &self,
        covgs: &GenePresenceCovgs,
        expected_depths: &[f64],
    ) -> Result<Vec<GenePresenceCall>> {
        let expected = expected_baseline(expected_depths)?;
        if covgs.is_empty() {
            return Err(AtlasError::insufficient("no gene presence coverage to type"));
        }

        let mut calls = Vec::with_capacity(covgs.len());
        for (gene, versions) in covgs {
            let mut candidates: Vec<(&String, &CoverageRecord)> = versions.iter().collect();
            candidates.sort_by(rank_versions);

            let chosen = candidates
                .iter()
                .find(|(_, c)| self.is_present(c, &expected))
                .or_else(|| candidates.first());

            let Some(&(version, coverage)) = chosen else {
                continue;
            };
            let genotype = if self.is_present(coverage, &expected) {
                PresenceGenotype::Present
            } else {
                PresenceGenotype::Absent
            };
            calls.push(GenePresenceCall {
                gene_name: gene.clone(),
                version: version.clone(),
                coverage: *coverage,
                genotype,
                confidence: self.confidence(coverage, &expected),
                group: None,
            });
        }
        Ok(calls)
    }
}
