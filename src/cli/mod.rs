use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

mod check;
mod report;

/// ip-check - E-ARK Information Package validation
///
/// Analyse and validate the structure and metadata of information packages
/// against the E-ARK CSIP specification. Designed for simple integration
/// into automated work-flows.
#[derive(Parser)]
#[command(name = "ip-check")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// When analysing an information package recurse into representations.
    #[arg(short = 'r', long = "recurse", action = clap::ArgAction::Set,
          num_args = 0..=1, default_value_t = true, default_missing_value = "true")]
    recurse: bool,

    /// Calculate and verify file checksums in packages.
    #[arg(short = 'c', long = "checksum")]
    checksum: bool,

    /// Report results in verbose format (-v for info, -vv for debug).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run package structure tests only.
    #[arg(short = 's', long = "structure")]
    structure: bool,

    /// Root IP folders or archived IPs to check.
    #[arg(value_name = "FILE")]
    files: Vec<PathBuf>,
}

impl Cli {
    pub fn verbosity(&self) -> u8 {
        self.verbose
    }
}

pub fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
}

pub fn dispatch(cli: Cli) -> Result<()> {
    if cli.files.is_empty() {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        return Ok(());
    }
    let exit = check::run(&cli.files, cli.recurse, cli.checksum, cli.structure)?;
    if exit != 0 {
        std::process::exit(exit);
    }
    Ok(())
}
