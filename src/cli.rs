//! Command-line surface. Mirrors the configuration table this tool's build
//! system integration expects: every option is an independent named input
//! threaded straight into the orchestrator, no subcommands.

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Synchronizes a freshly built Android application onto a device.")]
#[command(version)]
pub struct Cli {
    /// Path to the adb executable.
    #[clap(long, default_value = "adb")]
    pub adb: String,

    /// Extra argument inserted between `adb` and its subcommand. Repeatable.
    #[clap(long = "extra_adb_arg")]
    pub extra_adb_arg: Vec<String>,

    /// Worker-pool size for parallel pushes.
    #[clap(long, default_value_t = 2)]
    pub adb_jobs: usize,

    /// Base directory every local input path is resolved against.
    #[clap(long)]
    pub execroot: PathBuf,

    /// Local file whose second line (trimmed) is the application package.
    #[clap(long)]
    pub stub_datafile: PathBuf,

    /// Local path to the dex manifest consumed by the reconciler.
    #[clap(long)]
    pub dexmanifest: PathBuf,

    /// Local path to the resource archive.
    #[clap(long)]
    pub resource_apk: PathBuf,

    /// Optional stub apk; presence selects the full-install path.
    #[clap(long)]
    pub apk: Option<PathBuf>,

    /// Mutually exclusive with `apk`; presence selects the split-install path.
    #[clap(long)]
    pub split_main_apk: Option<PathBuf>,

    /// Split apk, repeatable; only meaningful with `split_main_apk`.
    #[clap(long = "split_apk")]
    pub split_apk: Vec<PathBuf>,

    /// Local path touched on success.
    #[clap(long)]
    pub output_marker: PathBuf,

    /// Launch the application after a successful sync.
    #[clap(long, default_value_t = false)]
    pub start_app: bool,

    /// Home directory injected into the adb child's environment.
    #[clap(long)]
    pub user_home_dir: String,

    /// "1" selects debug-level logging; anything else is info-level.
    #[clap(long, default_value = "0")]
    pub verbosity: String,

    /// Extra flags, one per line, merged into the parsed configuration.
    #[clap(long)]
    pub flagfile: Option<PathBuf>,
}

impl Cli {
    /// Parses `argv`, transparently re-merging a `--flagfile` if given.
    ///
    /// Mirrors the original's `FLAGS(sys.argv + flagfile_lines)` re-parse:
    /// read one flag per line, append to the real argv, then parse once.
    pub fn parse_with_flagfile() -> anyhow::Result<Cli> {
        let args: Vec<String> = std::env::args().collect();
        let first_pass = Cli::try_parse_from(&args)?;
        let Some(flagfile) = &first_pass.flagfile else {
            return Ok(first_pass);
        };
        let extra = fs::read_to_string(flagfile)?;
        let mut merged = args;
        merged.extend(extra.lines().map(str::to_string).filter(|l| !l.is_empty()));
        Ok(Cli::try_parse_from(merged)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Vec<&'static str> {
        vec![
            "adevice-sync",
            "--execroot",
            "/root",
            "--stub_datafile",
            "stub.dat",
            "--dexmanifest",
            "manifest.txt",
            "--resource_apk",
            "res.ap_",
            "--output_marker",
            "marker",
            "--user_home_dir",
            "/home/build",
        ]
    }

    #[test]
    fn defaults_apply() {
        let cli = Cli::try_parse_from(base_args()).unwrap();
        assert_eq!(cli.adb, "adb");
        assert_eq!(cli.adb_jobs, 2);
        assert!(cli.apk.is_none());
        assert!(!cli.start_app);
    }

    #[test]
    fn repeatable_split_apks_collect() {
        let mut args = base_args();
        args.extend(["--split_apk", "a.apk", "--split_apk", "b.apk"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.split_apk, vec![PathBuf::from("a.apk"), PathBuf::from("b.apk")]);
    }
}
