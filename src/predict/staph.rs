// src/predict/staph.rs

use super::{gene, mutation, PhenotypePredictor, ResistanceRule};
use crate::types::Species;

static RULES: &[ResistanceRule] = &[
    gene("penicillin", "blaZ"),
    gene("methicillin", "mecA"),
    gene("erythromycin", "ermA"),
    gene("erythromycin", "ermB"),
    gene("erythromycin", "ermC"),
    gene("erythromycin", "ermT"),
    gene("erythromycin", "ermY"),
    gene("erythromycin", "msrA"),
    gene("clindamycin", "ermA"),
    gene("clindamycin", "ermB"),
    gene("clindamycin", "ermC"),
    gene("clindamycin", "ermT"),
    gene("clindamycin", "ermY"),
    gene("tetracycline", "tetK"),
    gene("tetracycline", "tetL"),
    gene("tetracycline", "tetM"),
    gene("fusidic_acid", "fusB"),
    gene("fusidic_acid", "fusC"),
    mutation("fusidic_acid", "fusA", None),
    gene("mupirocin", "mupA"),
    gene("mupirocin", "mupB"),
    gene("gentamicin", "aacAaphD"),
    gene("trimethoprim", "dfrA"),
    gene("trimethoprim", "dfrG"),
    gene("trimethoprim", "dfrK"),
    mutation("trimethoprim", "dfrB", Some("F99Y")),
    gene("vancomycin", "vanA"),
    mutation("ciprofloxacin", "gyrA", Some("S84L")),
    mutation("ciprofloxacin", "grlA", Some("S80F")),
    mutation("ciprofloxacin", "grlA", Some("S80Y")),
    mutation("rifampicin", "rpoB", None),
];

/// *S. aureus* resistance genes and mutations.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaphPredictor;

impl PhenotypePredictor for StaphPredictor {
    fn name(&self) -> &'static str {
        "staph"
    }

    fn group(&self) -> Species {
        Species::Staph
    }

    fn rules(&self) -> &'static [ResistanceRule] {
        RULES
    }
}
