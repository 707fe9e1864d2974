// src/typing/mod.rs
pub mod presence;
pub mod variant;

pub use presence::PresenceTyper;
pub use variant::{classify_ratio, VariantTyper};

use serde::Serialize;

use crate::config::TypingThresholds;
use crate::covgs::PanelCoverage;
use crate::error::{AtlasError, Result};
use crate::store::{with_retry, CallSetRepository, RetryPolicy};
use crate::types::{GenePresenceCall, Species, TypedVariants, VariantCall, VariantGenotype};

/// Usable expected depths: finite and positive. Typing without one is meaningless.
pub(crate) fn expected_baseline(expected_depths: &[f64]) -> Result<Vec<f64>> {
    let usable: Vec<f64> = expected_depths
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > 0.0)
        .collect();
    if usable.is_empty() {
        return Err(AtlasError::insufficient(
            "no expected sequencing depth to genotype against",
        ));
    }
    Ok(usable)
}

/// Typed calls of one sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TypedCalls {
    pub presence: Vec<GenePresenceCall>,
    pub variants: TypedVariants,
}

impl TypedCalls {
    pub fn variant_calls(&self) -> impl Iterator<Item = &VariantCall> + '_ {
        self.variants.values().flatten()
    }

    /// Calls that apply to `group`: its own plus the untagged ones.
    pub fn for_group(&self, group: Species) -> TypedCalls {
        let presence = self
            .presence
            .iter()
            .filter(|c| c.belongs_to(group))
            .cloned()
            .collect();
        let variants = self
            .variants
            .iter()
            .filter_map(|(id, calls)| {
                let calls: Vec<VariantCall> =
                    calls.iter().filter(|c| c.belongs_to(group)).cloned().collect();
                (!calls.is_empty()).then(|| (id.clone(), calls))
            })
            .collect();
        TypedCalls { presence, variants }
    }
}

/// Runs both typers for one sample and, when a repository is injected,
/// replaces the sample's stored variant calls.
pub struct Genotyper<'a> {
    thresholds: &'a TypingThresholds,
    expected_depths: Vec<f64>,
    store: Option<(&'a dyn CallSetRepository, &'a RetryPolicy)>,
}

impl<'a> Genotyper<'a> {
    pub fn new(thresholds: &'a TypingThresholds, expected_depths: Vec<f64>) -> Self {
        Self {
            thresholds,
            expected_depths,
            store: None,
        }
    }

    pub fn with_store(mut self, store: &'a dyn CallSetRepository, retry: &'a RetryPolicy) -> Self {
        self.store = Some((store, retry));
        self
    }

    pub fn run(&self, sample: &str, analysis: &str, coverage: &PanelCoverage) -> Result<TypedCalls> {
        expected_baseline(&self.expected_depths)?;
        if coverage.gene_presence.is_empty() && coverage.variants.is_empty() {
            return Err(AtlasError::insufficient(format!(
                "sample {sample} has no gene or variant coverage to type"
            )));
        }

        let mut typed = TypedCalls::default();
        if !coverage.gene_presence.is_empty() {
            typed.presence = PresenceTyper::new(self.thresholds.clone())
                .genotype(&coverage.gene_presence, &self.expected_depths)?;
            for call in &mut typed.presence {
                call.group = coverage.gene_groups.get(&call.gene_name).copied().flatten();
            }
        }
        if !coverage.variants.is_empty() {
            typed.variants = VariantTyper::new(self.thresholds.clone())
                .genotype(&coverage.variants, &self.expected_depths)?;
        }
        if !self.thresholds.include_ref_calls {
            for calls in typed.variants.values_mut() {
                calls.retain(|c| c.genotype != VariantGenotype::Ref);
            }
            typed.variants.retain(|_, calls| !calls.is_empty());
        }

        log::info!(
            "{sample}: typed {} genes ({} present) and {} variant sites",
            typed.presence.len(),
            typed.presence.iter().filter(|c| c.is_present()).count(),
            typed.variants.len()
        );

        if let Some((store, retry)) = self.store {
            let call_set = with_retry(retry, "get_or_create_call_set", || {
                store.get_or_create_call_set(sample, analysis)
            })?;
            let calls: Vec<VariantCall> = typed.variant_calls().cloned().collect();
            with_retry(retry, "replace_variant_calls", || {
                store.replace_variant_calls(&call_set, &calls)
            })?;
            log::debug!("stored {} variant calls in call set {}", calls.len(), call_set.name);
        }

        Ok(typed)
    }
}
