//! # ip-check
//!
//! Command-line validation of E-ARK information packages against the CSIP
//! structure rules, the METS schema and the CSIP Schematron profile.
//!
//! ## Usage
//!
//! ```bash
//! # Validate an archived package
//! ip-check minimal_IP_with_schemas.zip
//!
//! # Structure checks only, several packages at once
//! ip-check --structure pkg-1/ pkg-2.tar.gz
//! ```

mod cli;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli::init_logging(cli.verbosity());
    cli::dispatch(cli)
}
