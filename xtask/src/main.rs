//! Build automation for the pooled data source workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

/// Workspace members with their own test suites.
const CRATES: &[&str] = &["datasource-core", "datasource-pool", "datasource-testing"];

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for the pooled data source")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Format check, clippy, tests and docs, stopping at the first failure
    Ci,
    /// Check formatting
    Fmt,
    /// Lint every target with warnings denied
    Clippy,
    /// Run tests, optionally for one crate
    Test {
        /// Only test this workspace crate
        #[arg(short, long)]
        package: Option<String>,
    },
    /// Build documentation with broken intra-doc links denied
    Doc,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh, None)?;
            doc(&sh)?;
            println!("ci: all checks passed");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test { package } => test(&sh, package.as_deref())?,
        Command::Doc => doc(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;
    let manifest = String::from_utf8(output.stdout).context("invalid UTF-8 in cargo output")?;

    PathBuf::from(manifest.trim())
        .parent()
        .map(PathBuf::from)
        .context("workspace manifest has no parent directory")
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("fmt: checking formatting");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("clippy: linting workspace");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>) -> Result<()> {
    match package {
        Some(package) => {
            if !CRATES.contains(&package) {
                bail!("unknown crate `{package}`, expected one of {CRATES:?}");
            }
            println!("test: {package}");
            cmd!(sh, "cargo test -p {package}").run()?;
        }
        None => {
            println!("test: workspace");
            cmd!(sh, "cargo test --workspace").run()?;
        }
    }
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("doc: building documentation");
    let _flags = sh.push_env("RUSTDOCFLAGS", "-D rustdoc::broken_intra_doc_links");
    cmd!(sh, "cargo doc --workspace --no-deps").run()?;
    Ok(())
}
