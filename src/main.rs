//! annc - offline compiler entry point.
//!
//! Parses a network specification, runs synthesis and emission, and writes
//! `<module>.c` (or `.cu`) and `<module>.h` into the current directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser)]
#[command(name = "annc")]
#[command(version)]
#[command(about = "Ahead-of-time neural network compiler", long_about = None)]
struct Cli {
    /// Print tagged error diagnostics to stderr
    #[arg(long)]
    debug: bool,

    /// Network specification file
    spec: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    annc::set_debug(cli.debug);

    let ir = annc::dsl::parse_file(&cli.spec)
        .with_context(|| format!("failed to parse '{}'", cli.spec.display()))?;
    let syn = annc::synthesize(&ir).context("synthesis failed")?;
    let (src, hdr) = annc::emit::write_files(&syn, Path::new(".")).context("emission failed")?;

    println!("wrote {} and {}", src.display(), hdr.display());
    Ok(())
}
