// src/predict/mod.rs
pub mod gram_neg;
pub mod staph;
pub mod tb;

use std::collections::{BTreeMap, BTreeSet};

pub use gram_neg::GramNegPredictor;
pub use staph::StaphPredictor;
pub use tb::TbPredictor;

use crate::phylo::ClassificationResult;
use crate::types::{
    GenePresenceCall, PhenotypeCall, Species, Susceptibility, TypedVariants, VariantCall,
    VariantGenotype,
};

/// Something whose detection confers resistance to a drug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Determinant {
    /// A gene called present, by exact name.
    Gene(&'static str),
    /// Any present gene whose name starts with the prefix (e.g. `blaCTX-M`).
    GeneFamily(&'static str),
    /// An alt call in `gene`; `mutation: None` matches any typed site of the gene.
    Mutation {
        gene: &'static str,
        mutation: Option<&'static str>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResistanceRule {
    pub drug: &'static str,
    pub determinant: Determinant,
}

pub(crate) const fn gene(drug: &'static str, name: &'static str) -> ResistanceRule {
    ResistanceRule {
        drug,
        determinant: Determinant::Gene(name),
    }
}

pub(crate) const fn family(drug: &'static str, prefix: &'static str) -> ResistanceRule {
    ResistanceRule {
        drug,
        determinant: Determinant::GeneFamily(prefix),
    }
}

pub(crate) const fn mutation(
    drug: &'static str,
    gene: &'static str,
    mutation: Option<&'static str>,
) -> ResistanceRule {
    ResistanceRule {
        drug,
        determinant: Determinant::Mutation { gene, mutation },
    }
}

fn variant_label(call: &VariantCall) -> String {
    call.mutation
        .clone()
        .unwrap_or_else(|| call.variant_id.clone())
}

fn matches_mutation(call: &VariantCall, gene: &str, mutation: Option<&str>) -> bool {
    if call.gene.as_deref() != Some(gene) {
        return false;
    }
    match mutation {
        None => true,
        Some(m) => call.mutation.as_deref() == Some(format!("{gene}_{m}").as_str()),
    }
}

/// Maps typed calls of one sample to per-drug calls with a fixed rule table.
///
/// A drug is resistant when any of its determinants is present / alt,
/// inconclusive when none is but a matching variant site is het or no-call,
/// and susceptible otherwise.
pub trait PhenotypePredictor: Sync {
    /// Section name in the report.
    fn name(&self) -> &'static str;

    /// Organism group whose typed calls this predictor reads.
    fn group(&self) -> Species;

    fn rules(&self) -> &'static [ResistanceRule];

    /// Drugs in rule-table order.
    fn drugs(&self) -> Vec<&'static str> {
        let mut drugs: Vec<&'static str> = Vec::new();
        for rule in self.rules() {
            if !drugs.contains(&rule.drug) {
                drugs.push(rule.drug);
            }
        }
        drugs
    }

    fn classify(
        &self,
        variant_calls: &TypedVariants,
        gene_calls: &[GenePresenceCall],
    ) -> Vec<PhenotypeCall> {
        let present_genes: Vec<&str> = gene_calls
            .iter()
            .filter(|g| g.is_present())
            .map(|g| g.gene_name.as_str())
            .collect();

        let mut calls = Vec::new();
        for drug in self.drugs() {
            let mut resistant = BTreeSet::new();
            let mut uncertain = BTreeSet::new();

            for rule in self.rules().iter().filter(|r| r.drug == drug) {
                match rule.determinant {
                    Determinant::Gene(name) => {
                        if present_genes.contains(&name) {
                            resistant.insert(name.to_string());
                        }
                    }
                    Determinant::GeneFamily(prefix) => {
                        for g in present_genes.iter().filter(|g| g.starts_with(prefix)) {
                            resistant.insert(g.to_string());
                        }
                    }
                    Determinant::Mutation { gene, mutation } => {
                        for call in variant_calls
                            .values()
                            .flatten()
                            .filter(|c| matches_mutation(c, gene, mutation))
                        {
                            match call.genotype {
                                VariantGenotype::Alt => {
                                    resistant.insert(variant_label(call));
                                }
                                VariantGenotype::Het | VariantGenotype::NoCall => {
                                    uncertain.insert(variant_label(call));
                                }
                                VariantGenotype::Ref => {}
                            }
                        }
                    }
                }
            }

            let (call, supporting_evidence) = if !resistant.is_empty() {
                (Susceptibility::Resistant, resistant)
            } else if !uncertain.is_empty() {
                (Susceptibility::Inconclusive, uncertain)
            } else {
                (Susceptibility::Susceptible, BTreeSet::new())
            };
            calls.push(PhenotypeCall {
                drug: drug.to_string(),
                call,
                supporting_evidence,
            });
        }
        calls
    }
}

/// Taxon names that select each predictor.
pub static PREDICTORS: &[(&str, &'static (dyn PhenotypePredictor + Sync))] = &[
    ("Staphaureus", &StaphPredictor),
    ("Staphylococcus_aureus", &StaphPredictor),
    ("Mycobacterium_tuberculosis_complex", &TbPredictor),
    ("Mycobacterium_tuberculosis", &TbPredictor),
    ("Klebsiella_pneumoniae", &GramNegPredictor),
    ("Escherichia_coli", &GramNegPredictor),
];

/// The predictor registered for the deepest taxon of the primary phylo group.
pub fn predictor_for(
    result: &ClassificationResult,
) -> Option<&'static (dyn PhenotypePredictor + Sync)> {
    result.lineage_names().find_map(|name| {
        PREDICTORS
            .iter()
            .find(|(taxon, _)| *taxon == name)
            .map(|(_, predictor)| *predictor)
    })
}

/// Drug -> call, as written into the report.
pub fn calls_by_drug(calls: Vec<PhenotypeCall>) -> BTreeMap<String, PhenotypeCall> {
    calls.into_iter().map(|c| (c.drug.clone(), c)).collect()
}
