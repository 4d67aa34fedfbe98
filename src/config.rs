//! Command-line and environment configuration surface.
//!
//! Every knob is settable both as a flag and as an environment variable
//! (via `clap`'s `env` feature) so PUS slots into a build system the same
//! way the tag extractor it depends on usually does: exported once in the
//! environment for a whole build, overridable per-invocation on the
//! command line.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::partition::PartitionConfig;

#[derive(Parser, Debug)]
#[command(
    name = "pus",
    version,
    about = "Splits a preprocessed C translation unit into independently-compilable partial units"
)]
pub struct Cli {
    /// The preprocessed (`.i`) translation unit to split.
    pub input: PathBuf,

    /// Directory partial units are written to.
    #[arg(short = 'o', long = "out-dir", env = "PUS_OUT_DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// Pre-generated tag stream to read instead of invoking `ctags_bin`.
    #[arg(long = "tags", env = "TAGS_FILE")]
    pub tags_file: Option<PathBuf>,

    /// Tag extractor binary to invoke when `--tags` isn't given.
    #[arg(long = "ctags-bin", env = "CTAGS_BIN", default_value = "ctags")]
    pub ctags_bin: String,

    /// Target number of primary definitions per partial unit once splitting
    /// is active.
    #[arg(long = "target-pu-size", env = "TARGET_PU_SIZE", default_value_t = 64)]
    pub target_pu_size: usize,

    /// Primary-definition count at or below which the whole unit passes
    /// through as a single partial unit.
    #[arg(
        long = "passthrough-threshold",
        env = "PASSTHROUGH_THRESHOLD",
        default_value_t = 8
    )]
    pub passthrough_threshold: usize,

    /// Force splitting even when under `passthrough-threshold`.
    #[arg(long = "split", env = "SPLIT")]
    pub split: bool,

    /// Partial unit id to emit; emits all when unset.
    #[arg(long = "pu", env = "PU_FILTER")]
    pub pu_filter: Option<usize>,
}

impl Cli {
    pub fn partition_config(&self) -> PartitionConfig {
        PartitionConfig {
            target_pu_size: self.target_pu_size,
            passthrough_threshold: self.passthrough_threshold,
            split: self.split,
            pu_filter: self.pu_filter.clone(),
        }
    }

    /// Obtain the tag stream text, either from `--tags`/`TAGS_FILE` or by
    /// invoking the configured tag extractor against `input`.
    pub fn load_tag_stream(&self) -> Result<String> {
        if let Some(path) = &self.tags_file {
            return std::fs::read_to_string(path)
                .with_context(|| format!("reading tag stream from {}", path.display()));
        }

        let output = Command::new(&self.ctags_bin)
            .arg("-x")
            .arg("--fields=+nKsS")
            .arg("--c-kinds=+lpx")
            .arg("-f")
            .arg("-")
            .arg(&self.input)
            .output()
            .with_context(|| format!("running tag extractor `{}`", self.ctags_bin))?;

        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                self.ctags_bin,
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }

        String::from_utf8(output.stdout).context("tag extractor output was not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::parse_from(["pus", "input.i"]);
        assert_eq!(cli.input, PathBuf::from("input.i"));
        assert_eq!(cli.target_pu_size, 64);
        assert!(!cli.split);
    }

    #[test]
    fn parses_pu_filter() {
        let cli = Cli::parse_from(["pus", "input.i", "--pu", "2"]);
        assert_eq!(cli.pu_filter, Some(2));
    }
}
