// src/lib.rs
pub mod types;
pub mod error;
pub mod config;
pub mod covgs;
pub mod typing;
pub mod phylo;
pub mod predict;
pub mod store;
pub mod cortex;
pub mod report;

use std::path::PathBuf;

use rayon::prelude::*;

use crate::config::{AmrConfig, Species};
use crate::cortex::KmerCoverageTool;
use crate::covgs::{PanelCoverage, PanelParser};
use crate::error::{AtlasError, Result};
use crate::phylo::{Hierarchy, SpeciesClassifier};
use crate::predict::{calls_by_drug, predictor_for};
use crate::report::{AmrReport, PhylogeneticsReport, SampleReport};
use crate::store::CallSetRepository;
use crate::typing::Genotyper;

/// Reads of one sample, or coverage summaries already computed for it.
#[derive(Debug, Clone, Default)]
pub struct SampleInput {
    pub sample: String,
    pub seqs: Vec<PathBuf>,
    /// When non-empty the external tool is skipped and these are parsed instead.
    pub coverage_files: Vec<PathBuf>,
}

impl SampleInput {
    pub fn from_seqs(sample: impl Into<String>, seqs: Vec<PathBuf>) -> Self {
        Self {
            sample: sample.into(),
            seqs,
            coverage_files: Vec::new(),
        }
    }

    pub fn from_coverage(sample: impl Into<String>, coverage_files: Vec<PathBuf>) -> Self {
        Self {
            sample: sample.into(),
            seqs: Vec::new(),
            coverage_files,
        }
    }

    /// Reads without precomputed coverage go through the external tool.
    fn needs_tool(&self) -> bool {
        self.coverage_files.is_empty() && !self.seqs.is_empty()
    }
}

fn empty_report(config: &AmrConfig, input: &SampleInput) -> SampleReport {
    SampleReport {
        panels: config.panel_paths(),
        files: input.seqs.clone(),
        ..Default::default()
    }
}

fn failed_report(config: &AmrConfig, input: &SampleInput, error: String) -> SampleReport {
    log::error!("{}: {error}", input.sample);
    SampleReport {
        error: Some(error),
        ..empty_report(config, input)
    }
}

/// Builds the shared panel skeletons. Runs once, before any sample is genotyped.
fn build_skeletons(config: &AmrConfig) -> Result<()> {
    let tool = KmerCoverageTool::new(&config.tool, config.kmer, config.force);
    let built = tool.build_skeletons(&config.panel_paths())?;
    log::debug!("{} panel skeletons ready", built.len());
    Ok(())
}

/// Runs the whole pipeline for one sample.
///
/// Never fails as a whole: a stage error stops the run and is recorded in
/// the report next to whatever the earlier stages produced.
pub fn run_amr(
    config: &AmrConfig,
    input: &SampleInput,
    store: Option<&dyn CallSetRepository>,
) -> SampleReport {
    if input.needs_tool() {
        if let Err(e) = build_skeletons(config) {
            return failed_report(config, input, e.to_string());
        }
    }
    run_sample(config, input, store)
}

fn run_sample(
    config: &AmrConfig,
    input: &SampleInput,
    store: Option<&dyn CallSetRepository>,
) -> SampleReport {
    let mut report = empty_report(config, input);
    if let Err(e) = run_stages(config, input, store, &mut report) {
        log::error!("{}: {e}", input.sample);
        report.error = Some(e.to_string());
    }
    report
}

fn run_stages(
    config: &AmrConfig,
    input: &SampleInput,
    store: Option<&dyn CallSetRepository>,
    report: &mut SampleReport,
) -> Result<()> {
    // 1. Hierarchy (flat species check when none is configured)
    let hierarchy = config
        .hierarchy_path()
        .map(Hierarchy::from_json_file)
        .transpose()?;

    // 2. Coverage summaries, each with the organism group of its panel
    let coverage_files: Vec<(PathBuf, Option<Species>)> = if !input.coverage_files.is_empty() {
        input
            .coverage_files
            .iter()
            .map(|path| (path.clone(), config.coverage_group(path)))
            .collect()
    } else {
        if input.seqs.is_empty() {
            return Err(AtlasError::config(format!(
                "sample {} has neither reads nor coverage files",
                input.sample
            )));
        }
        let tool = KmerCoverageTool::new(&config.tool, config.kmer, config.force);
        report
            .panels
            .iter()
            .map(|panel| -> Result<(PathBuf, Option<Species>)> {
                let covgs = tool.coverage(&input.sample, panel, &input.seqs)?;
                Ok((covgs, config.panel_group(panel)))
            })
            .collect::<Result<Vec<_>>>()?
    };

    // 3. Parse every summary into one coverage set
    let parser = PanelParser::new(config.parse.clone());
    let mut coverage = PanelCoverage::default();
    for (path, group) in &coverage_files {
        log::debug!("Parsing coverage {}", path.display());
        parser.parse_group_file(path, *group, &mut coverage)?;
    }

    // 4. Species / lineage
    let classification = SpeciesClassifier::new(&config.phylo, hierarchy.as_ref())
        .classify(&coverage.taxa);
    report.phylogenetics = Some(PhylogeneticsReport::from(&classification));

    // 5. Expected depth comes from the primary phylo group
    let expected_depths: Vec<f64> = classification.median_depth.into_iter().collect();

    // 6. Genotype
    let mut genotyper = Genotyper::new(&config.typing, expected_depths);
    if let Some(store) = store {
        genotyper = genotyper.with_store(store, &config.retry);
    }
    let typed = genotyper.run(&input.sample, config.analysis_name(), &coverage)?;

    // 7. Phenotype, from the calls of the predictor's own organism group
    match predictor_for(&classification) {
        Some(predictor) => {
            let own = typed.for_group(predictor.group());
            let calls = predictor.classify(&own.variants, &own.presence);
            report
                .susceptibility
                .insert(predictor.name().to_string(), calls_by_drug(calls));
        }
        None => log::warn!(
            "{}: no resistance predictor for {}",
            input.sample,
            classification.root_name().unwrap_or("an unclassified sample")
        ),
    }

    report.typed_presence = typed.presence;
    report.typed_variants = typed.variants;
    Ok(())
}

/// Runs many samples in parallel and collects their reports.
///
/// Panel skeletons are built once up front; workers only read them.
pub fn run_batch(
    config: &AmrConfig,
    inputs: &[SampleInput],
    store: Option<&dyn CallSetRepository>,
) -> AmrReport {
    let skeletons = if inputs.iter().any(SampleInput::needs_tool) {
        build_skeletons(config).map_err(|e| e.to_string())
    } else {
        Ok(())
    };

    let reports: Vec<(String, SampleReport)> = inputs
        .par_iter()
        .map(|input| {
            let report = match &skeletons {
                Err(e) if input.needs_tool() => failed_report(config, input, e.clone()),
                _ => run_sample(config, input, store),
            };
            (input.sample.clone(), report)
        })
        .collect();

    let mut out = AmrReport::default();
    for (sample, report) in reports {
        out.insert(sample, report);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::{Susceptibility, TaxonLevel, VariantGenotype};
    use std::fs;

    const STAPH_COVGS: &str = "\
Staphaureus?name=Staphaureus&level=species\t0\t55\t0.99
staph-amr-genes?name=mecA&version=1\t0\t60\t0.98
staph-amr-genes?name=blaZ&version=1\t0\t0\t0.1
ref-gyrA_S84L?num_alts=1&gene=gyrA&mut=S84L\t0\t50\t1.0
alt-gyrA_S84L\t0\t0\t0.1
";

    fn staph_config() -> AmrConfig {
        AmrConfig {
            species: Some(Species::Staph),
            ..AmrConfig::default()
        }
    }

    fn write_covgs(dir: &tempfile::TempDir, name: &str, text: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn staph_sample_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let covgs = write_covgs(&dir, "s1.covgs", STAPH_COVGS);
        let store = InMemoryStore::new();

        let report = run_amr(
            &staph_config(),
            &SampleInput::from_coverage("s1", vec![covgs]),
            Some(&store),
        );
        assert!(report.is_complete(), "{:?}", report.error);

        let phylo = report.phylogenetics.as_ref().unwrap();
        assert_eq!(phylo.phylo_group[0].level, TaxonLevel::Species);
        assert_eq!(phylo.phylo_group[0].name, "Staphaureus");
        assert_eq!(phylo.median_depth, Some(55.0));

        assert_eq!(report.typed_presence.len(), 2);
        assert_eq!(report.typed_variants["gyrA_S84L"][0].genotype, VariantGenotype::Ref);

        let staph = &report.susceptibility["staph"];
        assert_eq!(staph["methicillin"].call, Susceptibility::Resistant);
        assert_eq!(staph["penicillin"].call, Susceptibility::Susceptible);
        assert_eq!(staph["ciprofloxacin"].call, Susceptibility::Susceptible);

        let call_set = store.get_or_create_call_set("s1", "staph-amr").unwrap();
        assert_eq!(store.variant_calls(&call_set).len(), 1);
    }

    #[test]
    fn rerun_replaces_stored_calls() {
        let dir = tempfile::tempdir().unwrap();
        let covgs = write_covgs(&dir, "s1.covgs", STAPH_COVGS);
        let store = InMemoryStore::new();
        let input = SampleInput::from_coverage("s1", vec![covgs]);

        let first = run_amr(&staph_config(), &input, Some(&store));
        let second = run_amr(&staph_config(), &input, Some(&store));
        assert_eq!(first, second);
        assert_eq!(store.call_set_count(), 1);
        let call_set = store.get_or_create_call_set("s1", "staph-amr").unwrap();
        assert_eq!(store.variant_calls(&call_set).len(), 1);
    }

    #[test]
    fn tb_sample_walks_bundled_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let covgs = write_covgs(
            &dir,
            "tb.covgs",
            "\
Mycobacterium_tuberculosis_complex?level=complex\t0\t80\t0.99
Mycobacterium_tuberculosis?level=species\t0\t70\t0.98
lineage4?level=sub-species\t0\t65\t0.95
ref-rpoB_S450L?num_alts=1&gene=rpoB&mut=S450L\t0\t1\t1.0
alt-rpoB_S450L\t0\t60\t1.0
",
        );
        let config = AmrConfig {
            species: Some(Species::Tb),
            hierarchy_file: Some(
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data/phylo/mtbc_hierarchy.json"),
            ),
            ..AmrConfig::default()
        };

        let report = run_amr(&config, &SampleInput::from_coverage("tb1", vec![covgs]), None);
        assert!(report.is_complete(), "{:?}", report.error);

        let phylo = report.phylogenetics.as_ref().unwrap();
        let path: Vec<&str> = phylo.phylo_group.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            path,
            vec!["Mycobacterium_tuberculosis_complex", "Mycobacterium_tuberculosis", "lineage4"]
        );
        assert_eq!(phylo.median_depth, Some(65.0));
        assert!(report.typed_presence.is_empty());

        let tb = &report.susceptibility["tb"];
        assert_eq!(tb["rifampicin"].call, Susceptibility::Resistant);
        assert_eq!(tb["isoniazid"].call, Susceptibility::Susceptible);
    }

    #[test]
    fn all_panels_keep_organism_groups_apart() {
        let dir = tempfile::tempdir().unwrap();
        let covgs = write_covgs(
            &dir,
            "s1.covgs",
            "\
Staphaureus?name=Staphaureus&level=species\t0\t55\t0.99
staph-amr-genes?name=mecA&version=1\t0\t60\t0.98
ref-tb_rpoB_S450L?num_alts=1&gene=rpoB&mut=S450L\t0\t0\t0.0
alt-tb_rpoB_S450L\t0\t0\t0.0
",
        );
        let report = run_amr(
            &AmrConfig::default(),
            &SampleInput::from_coverage("s1", vec![covgs]),
            None,
        );
        assert!(report.is_complete(), "{:?}", report.error);

        // the TB site is typed and reported, but does not reach the Staph rules
        let tb_site = &report.typed_variants["tb_rpoB_S450L"][0];
        assert_eq!(tb_site.genotype, VariantGenotype::NoCall);
        assert_eq!(tb_site.group, Some(Species::Tb));

        let staph = &report.susceptibility["staph"];
        assert_eq!(staph["rifampicin"].call, Susceptibility::Susceptible);
        assert_eq!(staph["methicillin"].call, Susceptibility::Resistant);
    }

    #[test]
    fn panel_named_coverage_tags_its_group() {
        let dir = tempfile::tempdir().unwrap();
        let staph = write_covgs(
            &dir,
            "s1-15_staph-amr-mutations.covgs",
            "\
Staphaureus?name=Staphaureus&level=species\t0\t55\t0.99
ref-rpoB_H481N?num_alts=1&gene=rpoB&mut=H481N\t0\t55\t1.0
alt-rpoB_H481N\t0\t0\t0.0
",
        );
        let tb = write_covgs(
            &dir,
            "s1-15_tb-amr-bradley_2015.covgs",
            "\
ref-rpoB_S450L?num_alts=1&gene=rpoB&mut=S450L\t0\t1\t1.0
alt-rpoB_S450L\t0\t60\t1.0
",
        );
        let report = run_amr(
            &AmrConfig::default(),
            &SampleInput::from_coverage("s1", vec![staph, tb]),
            None,
        );
        assert!(report.is_complete(), "{:?}", report.error);
        assert_eq!(report.typed_variants["rpoB_S450L"][0].genotype, VariantGenotype::Alt);
        assert_eq!(report.typed_variants["rpoB_H481N"][0].group, Some(Species::Staph));

        // rpoB S450L only comes from the TB panel
        let staph = &report.susceptibility["staph"];
        assert_eq!(staph["rifampicin"].call, Susceptibility::Susceptible);
    }

    #[test]
    fn missing_species_keeps_partial_report() {
        let dir = tempfile::tempdir().unwrap();
        let covgs = write_covgs(
            &dir,
            "s2.covgs",
            "staph-amr-genes?name=mecA&version=1\t0\t60\t0.98\n",
        );
        let report = run_amr(
            &staph_config(),
            &SampleInput::from_coverage("s2", vec![covgs]),
            None,
        );
        assert!(!report.is_complete());
        assert!(report.error.as_ref().unwrap().contains("expected"));
        let phylo = report.phylogenetics.as_ref().unwrap();
        assert!(phylo.phylo_group.is_empty());
        assert!(report.typed_presence.is_empty());
        assert!(report.susceptibility.is_empty());
    }

    #[test]
    fn malformed_stream_fails_before_classification() {
        let dir = tempfile::tempdir().unwrap();
        let covgs = write_covgs(&dir, "bad.covgs", "mecA\t0\tdeep\t0.9\n");
        let report = run_amr(
            &staph_config(),
            &SampleInput::from_coverage("s3", vec![covgs]),
            None,
        );
        assert!(report.error.as_ref().unwrap().contains("line 1"));
        assert!(report.phylogenetics.is_none());
    }

    #[test]
    fn sample_without_inputs_is_rejected() {
        let report = run_amr(&staph_config(), &SampleInput::default(), None);
        assert!(report.error.is_some());
    }

    #[test]
    fn batch_keys_reports_by_sample() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_covgs(&dir, "a.covgs", STAPH_COVGS);
        let bad = write_covgs(&dir, "b.covgs", "");
        let store = InMemoryStore::new();
        let inputs = vec![
            SampleInput::from_coverage("a", vec![good]),
            SampleInput::from_coverage("b", vec![bad]),
        ];

        let report = run_batch(&staph_config(), &inputs, Some(&store));
        assert_eq!(report.samples.len(), 2);
        assert!(report.samples["a"].is_complete());
        assert!(!report.samples["b"].is_complete());

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(
            json["a"]["susceptibility"]["staph"]["methicillin"]["call"],
            "resistant"
        );
        assert!(json["b"]["error"].is_string());
    }

    /// Stand-in for the k-mer tool: logs each subcommand, touches the
    /// skeleton on `build` and writes a fixed summary to `-o` on `geno`.
    #[cfg(unix)]
    fn fake_tool(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.path().join("calls.log");
        let script = dir.path().join("tool.sh");
        let body = format!(
            r#"#!/bin/sh
echo "$1" >> {log}
case "$1" in
build)
    for last; do :; done
    : > "$last"
    ;;
geno)
    while [ $# -gt 0 ]; do
        if [ "$1" = "-o" ]; then out="$2"; fi
        shift
    done
    printf 'Staphaureus?name=Staphaureus&level=species\t0\t55\t0.99\nstaph-amr-genes?name=mecA&version=1\t0\t60\t0.98\n' > "$out"
    ;;
esac
"#,
            log = log.display()
        );
        fs::write(&script, body).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        (script, log)
    }

    #[cfg(unix)]
    #[test]
    fn forced_batch_builds_each_skeleton_once() {
        let dir = tempfile::tempdir().unwrap();
        let (script, log) = fake_tool(&dir);
        let panel = write_covgs(&dir, "staph-amr-genes.fasta", ">mecA\nACGT\n");
        let reads = write_covgs(&dir, "reads.fq", "@r\nACGT\n+\nIIII\n");

        let mut config = staph_config();
        config.force = true;
        config.panels.staph = vec![panel];
        config.tool.binary = script;
        config.tool.skeleton_dir = dir.path().join("skeletons");
        config.tool.work_dir = dir.path().join("work");
        config.tool.timeout_secs = 30;

        let inputs: Vec<SampleInput> = ["a", "b", "c"]
            .iter()
            .map(|s| SampleInput::from_seqs(*s, vec![reads.clone()]))
            .collect();
        let report = run_batch(&config, &inputs, None);

        for sample in ["a", "b", "c"] {
            let sample_report = &report.samples[sample];
            assert!(sample_report.is_complete(), "{sample}: {:?}", sample_report.error);
            assert_eq!(
                sample_report.susceptibility["staph"]["methicillin"].call,
                Susceptibility::Resistant
            );
        }
        let calls = fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().filter(|l| *l == "build").count(), 1);
        assert_eq!(calls.lines().filter(|l| *l == "geno").count(), 3);
    }

    #[test]
    fn failed_skeleton_build_fails_tool_samples_only() {
        let dir = tempfile::tempdir().unwrap();
        let precomputed = write_covgs(&dir, "a.covgs", STAPH_COVGS);
        let mut config = staph_config();
        config.panels.staph = vec![dir.path().join("missing.fasta")];

        let inputs = vec![
            SampleInput::from_coverage("a", vec![precomputed]),
            SampleInput::from_seqs("b", vec![dir.path().join("reads.fq")]),
        ];
        let report = run_batch(&config, &inputs, None);
        assert!(report.samples["a"].is_complete());
        assert!(report.samples["b"].error.as_ref().unwrap().contains("panel"));
    }
}
