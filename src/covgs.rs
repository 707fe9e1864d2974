//src/covgs.rs

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::AHashMap;
use flate2::read::MultiGzDecoder;

use crate::config::ParsePolicy;
use crate::error::{AtlasError, Result};
use crate::types::{
    CoverageRecord, GeneGroups, GenePresenceCovgs, Species, TaxonLevel, VariantCoverage,
    VariantCovgs,
};

/// One row of the coverage tool's summary output.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRow {
    /// 1-based line in the source stream, kept for error messages.
    pub line: usize,
    pub probe_id: String,
    pub coverage: CoverageRecord,
}

/// Parses one summary row:
/// ```text
/// <probe_id>\t<unused>\t<median_depth>\t<coverage_fraction>[\t<min_depth>]
/// ```
/// Returns `None` for blank lines.
pub fn parse_row(line_no: usize, line: &str) -> Result<Option<CoverageRow>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Ok(None);
    }
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 4 {
        return Err(AtlasError::malformed(
            line_no,
            format!("expected at least 4 tab-separated columns, found {}", parts.len()),
        ));
    }

    let number = |field: &str, what: &str| -> Result<f64> {
        let value: f64 = field.trim().parse().map_err(|_| {
            AtlasError::malformed(line_no, format!("{what} '{field}' is not a number"))
        })?;
        if !value.is_finite() || value < 0.0 {
            return Err(AtlasError::malformed(
                line_no,
                format!("{what} must be a non-negative number, got {value}"),
            ));
        }
        Ok(value)
    };

    let median_depth = number(parts[2], "median depth")?;
    let fraction = number(parts[3], "coverage fraction")?;
    if fraction > 1.0 {
        return Err(AtlasError::malformed(
            line_no,
            format!("coverage fraction must be within [0, 1], got {fraction}"),
        ));
    }
    let min_depth = match parts.get(4) {
        Some(field) if !field.trim().is_empty() => number(field, "min depth")?,
        _ => 0.0,
    };

    Ok(Some(CoverageRow {
        line: line_no,
        probe_id: parts[0].trim().to_string(),
        coverage: CoverageRecord::new(100.0 * fraction, median_depth, min_depth),
    }))
}

pub fn rows_from_reader<R: BufRead>(reader: R) -> Result<Vec<CoverageRow>> {
    let mut rows = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if let Some(row) = parse_row(idx + 1, &line)? {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Reads a whole coverage file into memory; `.gz` files are decompressed on the fly.
pub fn read_coverage_rows<P: AsRef<Path>>(path: P) -> Result<Vec<CoverageRow>> {
    let path = path.as_ref();
    let f = File::open(path)?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    rows_from_reader(reader)
}

/// Splits `<encoded-name>?k=v&k=v` into the name and its parameters.
pub fn split_probe_id(probe_id: &str) -> Result<(&str, AHashMap<String, String>)> {
    let (name, param_str) = match probe_id.split_once('?') {
        Some((name, rest)) => (name, rest),
        None => (probe_id, ""),
    };
    let mut params = AHashMap::new();
    for pair in param_str.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| AtlasError::invalid_probe(probe_id))?;
        params.insert(key.to_string(), value.to_string());
    }
    Ok((name, params))
}

/// Reference probe of a variant site.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantSite {
    pub variant_id: String,
    /// Name the alternates must carry: the id after `ref-`, or the `name` parameter.
    pub name: String,
    /// `ref-<id>` sites take `alt-<id>` rows; unmarked sites take unmarked rows of the same name.
    pub marked: bool,
    pub num_alts: usize,
    pub gene: Option<String>,
    pub mutation: Option<String>,
    pub group: Option<Species>,
}

/// What a probe id says about its row.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeKind {
    Presence {
        name: String,
        version: String,
        group: Option<Species>,
    },
    Taxon {
        level: TaxonLevel,
        name: String,
    },
    VariantRef(VariantSite),
    VariantAlt {
        variant_id: String,
    },
}

fn variant_reference(
    probe_id: &str,
    name: &str,
    marked: bool,
    group: Option<Species>,
    params: &AHashMap<String, String>,
) -> Result<ProbeKind> {
    let num_alts = params
        .get("num_alts")
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| AtlasError::invalid_probe(probe_id))?;
    let gene = params.get("gene").cloned();
    let mutation = match (params.get("gene"), params.get("mut")) {
        (Some(gene), Some(m)) => Some(format!("{gene}_{m}")),
        _ => None,
    };
    // several unmarked sites may share a gene name
    let variant_id = match params.get("mut") {
        Some(m) if !marked => format!("{name}_{m}"),
        _ => name.to_string(),
    };
    Ok(ProbeKind::VariantRef(VariantSite {
        variant_id,
        name: name.to_string(),
        marked,
        num_alts,
        gene,
        mutation,
        group,
    }))
}

/// `alt-<id>` and numbered `alt-<id>_<n>` rows belong to site `<id>`.
fn is_alternate_of(alt_id: &str, site_id: &str) -> bool {
    match alt_id.strip_prefix(site_id) {
        Some(rest) => rest.is_empty() || rest.starts_with('_'),
        None => false,
    }
}

/// Classifies a probe id by its encoded prefix and parameters.
///
/// `ref-<id>` / `alt-<id>` mark variant probes. An unmarked probe with
/// `num_alts` is a variant reference, one with `level` is a taxon probe,
/// anything else is a gene presence probe. An empty marker is rejected.
/// The organism group, when there is one, is the leading token of the
/// panel prefix or variant id.
pub fn classify_probe(probe_id: &str) -> Result<ProbeKind> {
    let (encoded, params) = split_probe_id(probe_id)?;
    if encoded.is_empty() {
        return Err(AtlasError::invalid_probe(probe_id));
    }

    if let Some((marker, id)) = encoded.split_once('-') {
        match marker {
            "" => return Err(AtlasError::invalid_probe(probe_id)),
            "ref" | "alt" if id.is_empty() => return Err(AtlasError::invalid_probe(probe_id)),
            "ref" => {
                return variant_reference(probe_id, id, true, Species::from_prefix(id), &params)
            }
            "alt" => {
                return Ok(ProbeKind::VariantAlt {
                    variant_id: id.to_string(),
                })
            }
            // panel prefixes such as `staph-amr-genes`
            _ => {}
        }
    }

    let name = params
        .get("name")
        .cloned()
        .unwrap_or_else(|| encoded.to_string());

    let group = Species::from_prefix(encoded);
    if params.contains_key("num_alts") {
        return variant_reference(probe_id, &name, false, group, &params);
    }
    if let Some(level) = params.get("level") {
        let level =
            TaxonLevel::from_param(level).ok_or_else(|| AtlasError::invalid_probe(probe_id))?;
        return Ok(ProbeKind::Taxon { level, name });
    }
    Ok(ProbeKind::Presence {
        name,
        version: params
            .get("version")
            .cloned()
            .unwrap_or_else(|| "N/A".to_string()),
        group,
    })
}

/// Taxon coverages of one hierarchy level, remembering first-appearance order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelCoverage {
    order: Vec<String>,
    records: BTreeMap<String, CoverageRecord>,
}

impl LevelCoverage {
    /// Keeps the deepest record when a taxon has several probes.
    pub fn insert(&mut self, name: &str, coverage: CoverageRecord) {
        match self.records.get_mut(name) {
            Some(existing) => {
                if coverage.median_depth > existing.median_depth {
                    *existing = coverage;
                }
            }
            None => {
                self.order.push(name.to_string());
                self.records.insert(name.to_string(), coverage);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&CoverageRecord> {
        self.records.get(name)
    }

    /// Taxa in the order they first appeared.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CoverageRecord)> + '_ {
        self.order
            .iter()
            .filter_map(move |name| self.records.get(name).map(|c| (name.as_str(), c)))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Taxon coverages for every hierarchy level seen in the stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaxonCoverage {
    levels: BTreeMap<TaxonLevel, LevelCoverage>,
}

impl TaxonCoverage {
    pub fn insert(&mut self, level: TaxonLevel, name: &str, coverage: CoverageRecord) {
        self.levels.entry(level).or_default().insert(name, coverage);
    }

    pub fn level(&self, level: TaxonLevel) -> Option<&LevelCoverage> {
        self.levels.get(&level)
    }

    pub fn get(&self, level: TaxonLevel, name: &str) -> Option<&CoverageRecord> {
        self.level(level).and_then(|l| l.get(name))
    }

    pub fn is_empty(&self) -> bool {
        self.levels.values().all(LevelCoverage::is_empty)
    }
}

/// Everything the parser extracts from one or more coverage streams.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelCoverage {
    pub gene_presence: GenePresenceCovgs,
    pub gene_groups: GeneGroups,
    pub variants: VariantCovgs,
    pub taxa: TaxonCoverage,
}

/// Explicit position over pre-materialized rows.
struct RowCursor<'a> {
    rows: &'a [CoverageRow],
    pos: usize,
}

impl<'a> RowCursor<'a> {
    fn new(rows: &'a [CoverageRow]) -> Self {
        Self { rows, pos: 0 }
    }

    fn next(&mut self) -> Option<&'a CoverageRow> {
        let row = self.rows.get(self.pos)?;
        self.pos += 1;
        Some(row)
    }

    fn remaining(&self) -> usize {
        self.rows.len() - self.pos
    }

    /// Takes the next `n` rows as one slice, or nothing if fewer remain.
    fn window(&mut self, n: usize) -> Option<&'a [CoverageRow]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.rows[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }
}

/// Records the group a gene was seen in; a second, different group makes it shared.
fn tag_gene(groups: &mut GeneGroups, name: &str, group: Option<Species>) {
    match groups.get_mut(name) {
        Some(seen) if *seen != group => *seen = None,
        Some(_) => {}
        None => {
            groups.insert(name.to_string(), group);
        }
    }
}

/// Splits coverage rows into gene presence, variant and taxon coverages.
#[derive(Debug, Clone, Default)]
pub struct PanelParser {
    policy: ParsePolicy,
}

impl PanelParser {
    pub fn new(policy: ParsePolicy) -> Self {
        Self { policy }
    }

    pub fn parse_rows(&self, rows: &[CoverageRow]) -> Result<PanelCoverage> {
        let mut out = PanelCoverage::default();
        self.parse_into(rows, &mut out)?;
        Ok(out)
    }

    pub fn parse_file<P: AsRef<Path>>(&self, path: P, out: &mut PanelCoverage) -> Result<()> {
        self.parse_group_file(path, None, out)
    }

    /// Parses a coverage file computed against one organism group's panel.
    pub fn parse_group_file<P: AsRef<Path>>(
        &self,
        path: P,
        group: Option<Species>,
        out: &mut PanelCoverage,
    ) -> Result<()> {
        let rows = read_coverage_rows(path.as_ref())?;
        log::debug!("{} coverage rows in {}", rows.len(), path.as_ref().display());
        self.parse_group_into(&rows, group, out)
    }

    /// Adds the rows of one stream to `out`. A variant site's rows must be
    /// contiguous: the reference, then exactly `num_alts` alternates.
    pub fn parse_into(&self, rows: &[CoverageRow], out: &mut PanelCoverage) -> Result<()> {
        self.parse_group_into(rows, None, out)
    }

    /// Like [`parse_into`](Self::parse_into), tagging every gene and site
    /// with `group`. Without one, a row's group comes from its panel prefix.
    pub fn parse_group_into(
        &self,
        rows: &[CoverageRow],
        group: Option<Species>,
        out: &mut PanelCoverage,
    ) -> Result<()> {
        let mut cursor = RowCursor::new(rows);
        while let Some(row) = cursor.next() {
            let kind = match classify_probe(&row.probe_id) {
                Ok(kind) => kind,
                Err(err @ AtlasError::InvalidProbeEncoding { .. })
                    if self.policy.skip_invalid_probes =>
                {
                    log::warn!("Skipping probe at line {}: {err}", row.line);
                    continue;
                }
                Err(err) => return Err(err),
            };

            match kind {
                ProbeKind::Presence {
                    name,
                    version,
                    group: row_group,
                } => {
                    if row.coverage.percent_coverage > 0.0 {
                        tag_gene(&mut out.gene_groups, &name, group.or(row_group));
                        out.gene_presence
                            .entry(name)
                            .or_default()
                            .insert(version, row.coverage);
                    }
                }
                ProbeKind::Taxon { level, name } => {
                    out.taxa.insert(level, &name, row.coverage);
                }
                ProbeKind::VariantRef(mut site) => {
                    site.group = group.or(site.group);
                    let Some(site_row) = self.parse_variant_site(row, site, &mut cursor)? else {
                        continue;
                    };
                    if out.variants.contains_key(&site_row.variant_id) {
                        return Err(AtlasError::malformed(
                            row.line,
                            format!("variant {} appears more than once", site_row.variant_id),
                        ));
                    }
                    out.variants.insert(site_row.variant_id.clone(), site_row);
                }
                ProbeKind::VariantAlt { variant_id } => {
                    return Err(AtlasError::malformed(
                        row.line,
                        format!("alternate probe for {variant_id} without a preceding reference"),
                    ));
                }
            }
        }
        Ok(())
    }

    fn parse_variant_site(
        &self,
        reference: &CoverageRow,
        site: VariantSite,
        cursor: &mut RowCursor<'_>,
    ) -> Result<Option<VariantCoverage>> {
        if site.num_alts == 0 {
            return Err(AtlasError::malformed(
                reference.line,
                format!("variant {} declares no alternates", site.variant_id),
            ));
        }
        let remaining = cursor.remaining();
        let window = cursor.window(site.num_alts).ok_or_else(|| {
            AtlasError::malformed(
                reference.line,
                format!(
                    "variant {} declares {} alternates but only {} rows follow",
                    site.variant_id, site.num_alts, remaining
                ),
            )
        })?;

        let mut alternates = Vec::with_capacity(window.len());
        for alt in window {
            let kind = match classify_probe(&alt.probe_id) {
                Ok(kind) => kind,
                Err(err @ AtlasError::InvalidProbeEncoding { .. })
                    if self.policy.skip_invalid_probes =>
                {
                    log::warn!(
                        "Skipping variant {} at line {}: alternate at line {}: {err}",
                        site.variant_id,
                        reference.line,
                        alt.line
                    );
                    return Ok(None);
                }
                Err(err) => return Err(err),
            };
            let belongs = match kind {
                ProbeKind::VariantAlt { variant_id } if site.marked => {
                    is_alternate_of(&variant_id, &site.name)
                }
                ProbeKind::Presence { name, .. } if !site.marked => name == site.name,
                _ => false,
            };
            if !belongs {
                return Err(AtlasError::malformed(
                    alt.line,
                    format!(
                        "expected an alternate of {}, found {}",
                        site.variant_id, alt.probe_id
                    ),
                ));
            }
            alternates.push(alt.coverage);
        }

        Ok(Some(VariantCoverage {
            variant_id: site.variant_id,
            group: site.group,
            gene: site.gene,
            mutation: site.mutation,
            reference: reference.coverage,
            alternates,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn rows(text: &str) -> Vec<CoverageRow> {
        rows_from_reader(text.as_bytes()).expect("rows should parse")
    }

    const STREAM: &str = "\
staph-amr-genes?name=mecA&version=1\t0\t60\t0.98
staph-amr-genes?name=mecA&version=2\t0\t12\t0.40
staph-amr-genes?name=blaZ&version=1\t0\t0\t0.0
ref-rpoB_H481N?num_alts=2&gene=rpoB&mut=H481N\t0\t80\t0.95
alt-rpoB_H481N_1\t0\t75\t0.90
alt-rpoB_H481N_2\t0\t0\t0.10
Staphaureus?name=Staphaureus&level=species\t0\t55\t0.99
";

    #[test]
    fn splits_presence_and_variants() {
        let parsed = PanelParser::default().parse_rows(&rows(STREAM)).unwrap();

        let mec_a = &parsed.gene_presence["mecA"];
        assert_eq!(mec_a.len(), 2);
        assert_eq!(mec_a["1"].median_depth, 60.0);
        assert_eq!(mec_a["1"].percent_coverage, 98.0);
        // zero coverage rows are not candidates
        assert!(!parsed.gene_presence.contains_key("blaZ"));

        let site = &parsed.variants["rpoB_H481N"];
        assert_eq!(site.alternates.len(), 2);
        assert_eq!(site.reference.median_depth, 80.0);
        assert_eq!(site.alternates[0].median_depth, 75.0);
        assert_eq!(site.gene.as_deref(), Some("rpoB"));
        assert_eq!(site.mutation.as_deref(), Some("rpoB_H481N"));

        let staph = parsed
            .taxa
            .get(TaxonLevel::Species, "Staphaureus")
            .expect("taxon row routed by level");
        assert_eq!(staph.median_depth, 55.0);
    }

    #[test]
    fn unmarked_reference_uses_name_param() {
        let parsed = PanelParser::default()
            .parse_rows(&rows(
                "tb-amr?name=rpoB&version=1&num_alts=1\t0\t80\t0.95\ntb-amr?name=rpoB&version=1\t0\t75\t0.90\n",
            ))
            .unwrap();
        let site = &parsed.variants["rpoB"];
        assert_eq!(site.alternates, vec![CoverageRecord::new(90.0, 75.0, 0.0)]);
        assert!(parsed.gene_presence.is_empty());
    }

    #[test]
    fn unmarked_sites_of_one_gene_are_told_apart_by_mutation() {
        let text = "\
tb-amr?name=rpoB&gene=rpoB&mut=S450L&num_alts=1\t0\t80\t0.95
tb-amr?name=rpoB&gene=rpoB&mut=S450L\t0\t2\t0.20
tb-amr?name=rpoB&gene=rpoB&mut=H445Y&num_alts=1\t0\t3\t0.30
tb-amr?name=rpoB&gene=rpoB&mut=H445Y\t0\t70\t0.90
";
        let parsed = PanelParser::default().parse_rows(&rows(text)).unwrap();
        assert_eq!(parsed.variants.len(), 2);
        assert_eq!(parsed.variants["rpoB_S450L"].reference.median_depth, 80.0);
        assert_eq!(parsed.variants["rpoB_H445Y"].alternates[0].median_depth, 70.0);
        assert_eq!(parsed.variants["rpoB_H445Y"].group, Some(Species::Tb));
    }

    #[test]
    fn alternate_of_another_site_is_malformed() {
        let text = "ref-katG_S315T?num_alts=1\t0\t30\t1.0\nalt-rpoB_S450L\t0\t9\t0.9\n";
        let err = PanelParser::default().parse_rows(&rows(text)).unwrap_err();
        assert!(matches!(err, AtlasError::MalformedCoverageStream { line: 2, .. }));

        // a shared prefix is not enough
        let text = "ref-katG_S315T?num_alts=1\t0\t30\t1.0\nalt-katG_S315TX\t0\t9\t0.9\n";
        assert!(PanelParser::default().parse_rows(&rows(text)).is_err());
    }

    #[test]
    fn gene_row_inside_marked_window_is_malformed() {
        let text = "\
ref-katG_S315T?num_alts=2\t0\t30\t1.0
alt-katG_S315T_1\t0\t2\t0.5
staph-amr-genes?name=mecA&version=1\t0\t60\t0.98
";
        let err = PanelParser::default().parse_rows(&rows(text)).unwrap_err();
        assert!(matches!(err, AtlasError::MalformedCoverageStream { line: 3, .. }));
    }

    #[test]
    fn unmarked_window_needs_the_same_name() {
        let text = "tb-amr?name=rpoB&num_alts=1\t0\t80\t0.95\ntb-amr?name=katG\t0\t75\t0.90\n";
        let err = PanelParser::default().parse_rows(&rows(text)).unwrap_err();
        assert!(matches!(err, AtlasError::MalformedCoverageStream { line: 2, .. }));

        let text = "tb-amr?name=rpoB&num_alts=1\t0\t80\t0.95\nalt-rpoB\t0\t75\t0.90\n";
        assert!(PanelParser::default().parse_rows(&rows(text)).is_err());
    }

    #[test]
    fn skip_policy_drops_site_with_invalid_alternate() {
        let text = "\
ref-katG_S315T?num_alts=1\t0\t30\t1.0
-katG_S315T\t0\t2\t0.5
genes?name=tetK\t0\t40\t0.95
";
        let strict = PanelParser::default().parse_rows(&rows(text));
        assert!(matches!(strict, Err(AtlasError::InvalidProbeEncoding { .. })));

        let lenient = PanelParser::new(ParsePolicy {
            skip_invalid_probes: true,
        })
        .parse_rows(&rows(text))
        .unwrap();
        assert!(lenient.variants.is_empty());
        assert!(lenient.gene_presence.contains_key("tetK"));
    }

    #[test]
    fn file_group_overrides_row_prefix() {
        let text = "\
genes?name=mecA&version=1\t0\t60\t0.98
ref-rpoB_H481N?num_alts=1\t0\t40\t1.0
alt-rpoB_H481N\t0\t0\t0.0
";
        let parser = PanelParser::default();
        let mut untagged = PanelCoverage::default();
        parser.parse_into(&rows(text), &mut untagged).unwrap();
        assert_eq!(untagged.gene_groups["mecA"], None);
        assert_eq!(untagged.variants["rpoB_H481N"].group, None);

        let mut tagged = PanelCoverage::default();
        parser
            .parse_group_into(&rows(text), Some(Species::Staph), &mut tagged)
            .unwrap();
        assert_eq!(tagged.gene_groups["mecA"], Some(Species::Staph));
        assert_eq!(tagged.variants["rpoB_H481N"].group, Some(Species::Staph));
    }

    #[test]
    fn gene_seen_in_two_groups_is_shared() {
        let parser = PanelParser::default();
        let mut parsed = PanelCoverage::default();
        parser
            .parse_into(&rows("staph-amr-genes?name=aac\t0\t30\t0.9\n"), &mut parsed)
            .unwrap();
        assert_eq!(parsed.gene_groups["aac"], Some(Species::Staph));
        parser
            .parse_into(&rows("gn-amr-genes?name=aac\t0\t30\t0.9\n"), &mut parsed)
            .unwrap();
        assert_eq!(parsed.gene_groups["aac"], None);
        parser
            .parse_into(&rows("gn-amr-genes?name=aac\t0\t30\t0.9\n"), &mut parsed)
            .unwrap();
        assert_eq!(parsed.gene_groups["aac"], None);
    }

    #[test]
    fn parsing_is_repeatable() {
        let input = rows(STREAM);
        let parser = PanelParser::default();
        assert_eq!(
            parser.parse_rows(&input).unwrap(),
            parser.parse_rows(&input).unwrap()
        );
    }

    #[test]
    fn short_window_is_malformed() {
        let err = PanelParser::default()
            .parse_rows(&rows("ref-katG_S315T?num_alts=2\t0\t30\t1.0\nalt-katG_S315T\t0\t2\t0.5\n"))
            .unwrap_err();
        assert!(matches!(err, AtlasError::MalformedCoverageStream { line: 1, .. }));
    }

    #[test]
    fn reference_inside_window_is_malformed() {
        let err = PanelParser::default()
            .parse_rows(&rows(
                "ref-a?num_alts=1\t0\t30\t1.0\nref-b?num_alts=1\t0\t30\t1.0\nalt-b\t0\t1\t0.2\n",
            ))
            .unwrap_err();
        assert!(matches!(err, AtlasError::MalformedCoverageStream { line: 2, .. }));
    }

    #[test]
    fn orphan_alternate_is_malformed() {
        let err = PanelParser::default()
            .parse_rows(&rows("alt-gyrA_S84L\t0\t3\t0.5\n"))
            .unwrap_err();
        assert!(matches!(err, AtlasError::MalformedCoverageStream { .. }));
    }

    #[test]
    fn duplicate_site_is_malformed() {
        let text = "ref-a?num_alts=1\t0\t30\t1.0\nalt-a\t0\t1\t0.2\nref-a?num_alts=1\t0\t30\t1.0\nalt-a\t0\t1\t0.2\n";
        let err = PanelParser::default().parse_rows(&rows(text)).unwrap_err();
        assert!(matches!(err, AtlasError::MalformedCoverageStream { line: 3, .. }));
    }

    #[test]
    fn empty_marker_is_rejected() {
        assert!(matches!(
            classify_probe("-rpoB_S450L?num_alts=1"),
            Err(AtlasError::InvalidProbeEncoding { .. })
        ));
        assert!(matches!(
            classify_probe("ref-?num_alts=1"),
            Err(AtlasError::InvalidProbeEncoding { .. })
        ));
        assert!(matches!(
            classify_probe("ref-x?num_alts"),
            Err(AtlasError::InvalidProbeEncoding { .. })
        ));
    }

    #[test]
    fn skip_policy_drops_invalid_probes() {
        let text = "-bad?name=x\t0\t10\t0.9\ngenes?name=tetK\t0\t40\t0.95\n";
        let strict = PanelParser::default().parse_rows(&rows(text));
        assert!(matches!(strict, Err(AtlasError::InvalidProbeEncoding { .. })));

        let lenient = PanelParser::new(ParsePolicy {
            skip_invalid_probes: true,
        })
        .parse_rows(&rows(text))
        .unwrap();
        assert_eq!(lenient.gene_presence["tetK"]["N/A"].median_depth, 40.0);
    }

    #[test]
    fn classifies_probe_kinds() {
        assert_eq!(
            classify_probe("staph-amr-genes?name=mecA&version=1").unwrap(),
            ProbeKind::Presence {
                name: "mecA".into(),
                version: "1".into(),
                group: Some(Species::Staph),
            }
        );
        assert!(matches!(
            classify_probe("genes?name=tetK").unwrap(),
            ProbeKind::Presence { group: None, .. }
        ));
        match classify_probe("ref-tb_rpoB_S450L?num_alts=1&gene=rpoB&mut=S450L").unwrap() {
            ProbeKind::VariantRef(site) => {
                assert!(site.marked);
                assert_eq!(site.group, Some(Species::Tb));
            }
            other => panic!("expected a variant reference, got {other:?}"),
        }
        assert_eq!(
            classify_probe("lineage4?level=sub-species").unwrap(),
            ProbeKind::Taxon {
                level: TaxonLevel::Lineage,
                name: "lineage4".into()
            }
        );
        assert!(classify_probe("x?level=kingdom").is_err());
    }

    #[test]
    fn bad_rows_report_line() {
        assert!(matches!(
            parse_row(4, "probe\t0\t10"),
            Err(AtlasError::MalformedCoverageStream { line: 4, .. })
        ));
        assert!(parse_row(5, "probe\t0\tten\t0.5").is_err());
        assert!(parse_row(6, "probe\t0\t10\t1.5").is_err());
        assert_eq!(parse_row(7, "   ").unwrap(), None);
        let row = parse_row(8, "probe\t0\t10\t0.5\t3").unwrap().unwrap();
        assert_eq!(row.coverage, CoverageRecord::new(50.0, 10.0, 3.0));
    }

    #[test]
    fn reads_gzipped_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.covgs.gz");
        let mut enc = flate2::write::GzEncoder::new(
            File::create(&path).unwrap(),
            flate2::Compression::default(),
        );
        enc.write_all(STREAM.as_bytes()).unwrap();
        enc.finish().unwrap();

        let mut parsed = PanelCoverage::default();
        PanelParser::default().parse_file(&path, &mut parsed).unwrap();
        assert_eq!(parsed.variants.len(), 1);
        assert_eq!(parsed.gene_presence.len(), 1);
    }

    #[test]
    fn taxon_keeps_deepest_probe_in_first_seen_order() {
        let mut level = LevelCoverage::default();
        level.insert("b", CoverageRecord::new(95.0, 10.0, 0.0));
        level.insert("a", CoverageRecord::new(95.0, 20.0, 0.0));
        level.insert("b", CoverageRecord::new(99.0, 30.0, 0.0));
        let names: Vec<&str> = level.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(level.get("b").unwrap().median_depth, 30.0);
    }
}
