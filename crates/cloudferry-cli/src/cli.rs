use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cloudferry")]
#[command(about = "Migrate a folder tree between storage providers")]
#[command(
    after_help = "Settings not given on the command line are read from the config file, which is created with defaults on first use."
)]
pub struct Cli {
    /// Configuration file (JSON or TOML; defaults to <config dir>/config.json)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Override the configuration directory for this invocation
    #[arg(long, value_name = "PATH")]
    pub config_dir: Option<PathBuf>,
    /// Directory served as the source tree
    #[arg(long, value_name = "DIR")]
    pub source_dir: PathBuf,
    /// Directory that receives the migrated tree
    #[arg(long, value_name = "DIR")]
    pub dest_dir: PathBuf,
    /// Plan and log every action without changing the destination
    #[arg(long)]
    pub dry_run: bool,
    /// Skip files recorded in the checkpoint by an earlier run
    #[arg(long)]
    pub resume: bool,
    /// Migrate only the test folder, or the first few files when it is missing
    #[arg(long)]
    pub test: bool,
    /// Enable debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,
    /// Checkpoint file (defaults to <config dir>/checkpoint.jsonl)
    #[arg(long, value_name = "PATH")]
    pub checkpoint: Option<PathBuf>,
    /// Where to write the JSON report (defaults to <config dir>/report.json)
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_source_and_destination() {
        assert!(Cli::try_parse_from(["cloudferry", "--source-dir", "/src"]).is_err());
        let cli = Cli::try_parse_from(["cloudferry", "--source-dir", "/src", "--dest-dir", "/dst"])
            .expect("parse");
        assert_eq!(cli.source_dir, PathBuf::from("/src"));
        assert!(!cli.dry_run && !cli.resume && !cli.test);
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from([
            "cloudferry",
            "--source-dir",
            "/src",
            "--dest-dir",
            "/dst",
            "--dry-run",
            "--resume",
            "--test",
            "-v",
            "--no-progress",
            "--checkpoint",
            "/tmp/cp.jsonl",
        ])
        .expect("parse");
        assert!(cli.dry_run && cli.resume && cli.test && cli.verbose && cli.no_progress);
        assert_eq!(cli.checkpoint, Some(PathBuf::from("/tmp/cp.jsonl")));
        assert!(cli.report.is_none());
    }
}
