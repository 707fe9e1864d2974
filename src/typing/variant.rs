// src/typing/variant.rs

use super::expected_baseline;
use crate::config::TypingThresholds;
use crate::error::{AtlasError, Result};
use crate::types::{
    CoverageRecord, TypedVariants, VariantCall, VariantCoverage, VariantCovgs, VariantGenotype,
};

/// Bands an alt depth ratio. Total on `[0, 1]`: `ref` below `ref_below`,
/// `alt` above `alt_above`, `het` on the closed band between them.
pub fn classify_ratio(r: f64, thresholds: &TypingThresholds) -> VariantGenotype {
    if r > thresholds.alt_above {
        VariantGenotype::Alt
    } else if r < thresholds.ref_below {
        VariantGenotype::Ref
    } else {
        VariantGenotype::Het
    }
}

/// Types every alternate of every variant site by its depth ratio against the reference.
#[derive(Debug, Clone)]
pub struct VariantTyper {
    thresholds: TypingThresholds,
}

impl VariantTyper {
    pub fn new(thresholds: TypingThresholds) -> Self {
        Self { thresholds }
    }

    /// Alt depth that counts towards the ratio; weakly covered alternates count as zero.
    fn supported_alt_depth(&self, alternate: &CoverageRecord) -> f64 {
        if alternate.percent_coverage > self.thresholds.alt_support_min_percent_coverage {
            alternate.median_depth
        } else {
            0.0
        }
    }

    fn type_alternate(
        &self,
        site: &VariantCoverage,
        alt_index: usize,
        alternate: &CoverageRecord,
        min_call_depth: f64,
    ) -> VariantCall {
        let ref_depth = site.reference.median_depth;
        let alt_depth = self.supported_alt_depth(alternate);
        let total = ref_depth + alt_depth;

        let (genotype, alt_fraction) =
            if (ref_depth < min_call_depth && alt_depth < min_call_depth) || total <= 0.0 {
                (VariantGenotype::NoCall, None)
            } else {
                let r = alt_depth / total;
                (classify_ratio(r, &self.thresholds), Some(r))
            };

        VariantCall {
            variant_id: site.variant_id.clone(),
            reference: site.reference,
            alternate: *alternate,
            alt_index,
            genotype,
            gene: site.gene.clone(),
            mutation: site.mutation.clone(),
            alt_fraction,
            group: site.group,
        }
    }

    /// One call per declared alternate. Low-quality sites become no-calls;
    /// only an empty input or an empty depth baseline is an error.
    pub fn genotype(&self, covgs: &VariantCovgs, expected_depths: &[f64]) -> Result<TypedVariants> {
        let expected = expected_baseline(expected_depths)?;
        if covgs.is_empty() {
            return Err(AtlasError::insufficient("no variant coverage to type"));
        }
        let min_call_depth = self.thresholds.min_call_depth(&expected);

        let mut typed = TypedVariants::new();
        for (variant_id, site) in covgs {
            let calls = site
                .alternates
                .iter()
                .enumerate()
                .map(|(i, alt)| self.type_alternate(site, i, alt, min_call_depth))
                .collect();
            typed.insert(variant_id.clone(), calls);
        }
        Ok(typed)
    }
}
