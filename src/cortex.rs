//src/cortex.rs

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::ToolConfig;
use crate::error::{AtlasError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Runs the external k-mer graph tool that turns reads into per-probe coverage.
///
/// Skeletons are shared by every sample and are built up front with
/// [`build_skeletons`](Self::build_skeletons); [`coverage`](Self::coverage)
/// only reads them. Failures are never retried: a half-written graph or
/// coverage file is removed rather than reused.
pub struct KmerCoverageTool<'a> {
    config: &'a ToolConfig,
    kmer: u32,
    force: bool,
}

/// Panel name used in skeleton and coverage file names (`data/panels/x.fasta` -> `x`).
pub fn panel_name(panel: &Path) -> String {
    panel
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| panel.to_string_lossy().into_owned())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl<'a> KmerCoverageTool<'a> {
    pub fn new(config: &'a ToolConfig, kmer: u32, force: bool) -> Self {
        Self {
            config,
            kmer,
            force,
        }
    }

    fn sample_tag(&self, sample: &str) -> String {
        format!("{sample}-{}", self.kmer)
    }

    pub fn skeleton_path(&self, panel: &Path) -> PathBuf {
        self.config
            .skeleton_dir
            .join(format!("{}_{}.ctx", panel_name(panel), self.kmer))
    }

    pub fn graph_path(&self, sample: &str, panel: &Path) -> PathBuf {
        self.config
            .work_dir
            .join(format!("{}_{}.ctx", self.sample_tag(sample), panel_name(panel)))
    }

    pub fn coverage_path(&self, sample: &str, panel: &Path) -> PathBuf {
        self.config
            .work_dir
            .join(format!("{}_{}.covgs", self.sample_tag(sample), panel_name(panel)))
    }

    fn check_panel(panel: &Path) -> Result<()> {
        if !panel.exists() {
            return Err(AtlasError::config(format!(
                "could not find a panel at {}",
                panel.display()
            )));
        }
        Ok(())
    }

    /// Builds the skeleton of every panel, one after the other. Must run
    /// before samples are genotyped against them.
    pub fn build_skeletons(&self, panels: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut built: Vec<PathBuf> = Vec::with_capacity(panels.len());
        for panel in panels {
            if built.contains(&self.skeleton_path(panel)) {
                continue;
            }
            built.push(self.build_skeleton_if_required(panel)?);
        }
        Ok(built)
    }

    /// Builds the panel's graph skeleton unless one exists and no rebuild was forced.
    pub fn build_skeleton_if_required(&self, panel: &Path) -> Result<PathBuf> {
        Self::check_panel(panel)?;
        let skeleton = self.skeleton_path(panel);
        if skeleton.exists() && !self.force {
            return Ok(skeleton);
        }
        remove_if_exists(&skeleton)?;
        fs::create_dir_all(&self.config.skeleton_dir)?;

        log::info!("Building skeleton {} for panel {}", skeleton.display(), panel.display());
        let args: Vec<OsString> = vec![
            "build".into(),
            "-q".into(),
            "-k".into(),
            self.kmer.to_string().into(),
            "-s".into(),
            panel_name(panel).into(),
            "-1".into(),
            panel.into(),
            skeleton.clone().into(),
        ];
        if let Err(e) = self.run(&args, "skeleton build") {
            remove_if_exists(&skeleton)?;
            return Err(e);
        }
        if !skeleton.exists() {
            return Err(AtlasError::tool(format!(
                "skeleton build finished without writing {}",
                skeleton.display()
            )));
        }
        Ok(skeleton)
    }

    /// Produces the coverage summary of `seqs` against `panel` and returns its path.
    /// The panel's skeleton must already exist; it is never modified here.
    pub fn coverage(&self, sample: &str, panel: &Path, seqs: &[PathBuf]) -> Result<PathBuf> {
        Self::check_panel(panel)?;
        let skeleton = self.skeleton_path(panel);
        if !skeleton.exists() {
            return Err(AtlasError::tool(format!(
                "no skeleton at {} for panel {}",
                skeleton.display(),
                panel.display()
            )));
        }
        let graph = self.graph_path(sample, panel);
        let covgs = self.coverage_path(sample, panel);

        if graph.exists() && covgs.exists() && !self.force {
            log::warn!(
                "Using pre-built coverage {}; run with force if the panel has changed",
                covgs.display()
            );
            return Ok(covgs);
        }
        remove_if_exists(&graph)?;
        remove_if_exists(&covgs)?;
        fs::create_dir_all(&self.config.work_dir)?;

        let mut args: Vec<OsString> = vec![
            "geno".into(),
            "-q".into(),
            "-I".into(),
            skeleton.into(),
            "-k".into(),
            self.kmer.to_string().into(),
            "-s".into(),
            self.sample_tag(sample).into(),
            "-o".into(),
            covgs.clone().into(),
        ];
        for seq in seqs {
            args.push("-1".into());
            args.push(seq.into());
        }
        args.push("-c".into());
        args.push(panel.into());
        args.push(graph.clone().into());

        log::info!("Genotyping {sample} against {}", panel.display());
        let outcome = self.run(&args, "coverage").and_then(|()| {
            if covgs.exists() {
                Ok(())
            } else {
                Err(AtlasError::tool(format!(
                    "coverage run finished without writing {}",
                    covgs.display()
                )))
            }
        });
        if let Err(e) = outcome {
            remove_if_exists(&graph)?;
            remove_if_exists(&covgs)?;
            return Err(e);
        }
        Ok(covgs)
    }

    fn run(&self, args: &[OsString], what: &str) -> Result<()> {
        let mut child = Command::new(&self.config.binary)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                AtlasError::tool(format!(
                    "could not start {} for {what}: {e}",
                    self.config.binary.display()
                ))
            })?;

        let deadline = Instant::now() + Duration::from_secs(self.config.timeout_secs);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AtlasError::tool(format!(
                    "{what} timed out after {}s",
                    self.config.timeout_secs
                )));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(AtlasError::tool(format!(
                "{what} exited with {status}"
            )));
        }
        Ok(())
    }
}
