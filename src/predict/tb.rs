// src/predict/tb.rs

use super::{mutation, PhenotypePredictor, ResistanceRule};
use crate::types::Species;

static RULES: &[ResistanceRule] = &[
    mutation("rifampicin", "rpoB", None),
    mutation("isoniazid", "katG", Some("S315T")),
    mutation("isoniazid", "katG", Some("S315N")),
    mutation("isoniazid", "fabG1", Some("C-15T")),
    mutation("isoniazid", "fabG1", Some("T-8C")),
    mutation("isoniazid", "inhA", Some("S94A")),
    mutation("ethambutol", "embB", Some("M306V")),
    mutation("ethambutol", "embB", Some("M306I")),
    mutation("ethambutol", "embB", Some("M306L")),
    mutation("ethambutol", "embB", Some("G406A")),
    mutation("ethambutol", "embB", Some("Q497R")),
    mutation("pyrazinamide", "pncA", None),
    mutation("moxifloxacin", "gyrA", Some("A90V")),
    mutation("moxifloxacin", "gyrA", Some("S91P")),
    mutation("moxifloxacin", "gyrA", Some("D94G")),
    mutation("moxifloxacin", "gyrA", Some("D94N")),
    mutation("moxifloxacin", "gyrA", Some("D94Y")),
    mutation("moxifloxacin", "gyrA", Some("D94A")),
    mutation("ofloxacin", "gyrA", Some("A90V")),
    mutation("ofloxacin", "gyrA", Some("S91P")),
    mutation("ofloxacin", "gyrA", Some("D94G")),
    mutation("ofloxacin", "gyrA", Some("D94N")),
    mutation("ofloxacin", "gyrA", Some("D94Y")),
    mutation("ofloxacin", "gyrA", Some("D94A")),
    mutation("streptomycin", "rpsL", Some("K43R")),
    mutation("streptomycin", "rpsL", Some("K88R")),
    mutation("streptomycin", "rrs", Some("A514C")),
    mutation("amikacin", "rrs", Some("A1401G")),
    mutation("capreomycin", "rrs", Some("A1401G")),
    mutation("kanamycin", "rrs", Some("A1401G")),
    mutation("kanamycin", "eis", Some("C-14T")),
];

/// *M. tuberculosis* complex resistance mutations.
#[derive(Debug, Clone, Copy, Default)]
pub struct TbPredictor;

impl PhenotypePredictor for TbPredictor {
    fn name(&self) -> &'static str {
        "tb"
    }

    fn group(&self) -> Species {
        Species::Tb
    }

    fn rules(&self) -> &'static [ResistanceRule] {
        RULES
    }
}
