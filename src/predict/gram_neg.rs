// src/predict/gram_neg.rs

use super::{family, gene, mutation, PhenotypePredictor, ResistanceRule};
use crate::types::Species;

static RULES: &[ResistanceRule] = &[
    family("ampicillin", "blaTEM"),
    family("ampicillin", "blaSHV"),
    family("ampicillin", "blaCTX-M"),
    family("ceftazidime", "blaCTX-M"),
    family("ceftazidime", "blaCMY"),
    family("cefotaxime", "blaCTX-M"),
    family("cefotaxime", "blaCMY"),
    family("meropenem", "blaKPC"),
    family("meropenem", "blaNDM"),
    family("meropenem", "blaVIM"),
    family("meropenem", "blaIMP"),
    family("meropenem", "blaOXA-48"),
    family("ciprofloxacin", "qnrA"),
    family("ciprofloxacin", "qnrB"),
    family("ciprofloxacin", "qnrS"),
    gene("ciprofloxacin", "aac(6')-Ib-cr"),
    mutation("ciprofloxacin", "gyrA", Some("S83L")),
    mutation("ciprofloxacin", "gyrA", Some("D87N")),
    mutation("ciprofloxacin", "parC", Some("S80I")),
    family("gentamicin", "aac(3)"),
    gene("tetracycline", "tetA"),
    gene("tetracycline", "tetB"),
    family("colistin", "mcr"),
    family("trimethoprim", "dfrA"),
    gene("sulfamethoxazole", "sul1"),
    gene("sulfamethoxazole", "sul2"),
    gene("sulfamethoxazole", "sul3"),
];

/// *E. coli* / *K. pneumoniae* acquired genes and QRDR mutations.
#[derive(Debug, Clone, Copy, Default)]
pub struct GramNegPredictor;

impl PhenotypePredictor for GramNegPredictor {
    fn name(&self) -> &'static str {
        "gn"
    }

    fn group(&self) -> Species {
        Species::Gn
    }

    fn rules(&self) -> &'static [ResistanceRule] {
        RULES
    }
}
