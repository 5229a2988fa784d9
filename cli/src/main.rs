//! `obtree`: inspect and edit a tree of demo entries from the shell.

mod entry;

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use storage::{BTree, StorageError, DEFAULT_DATA_PATH, DEFAULT_DEGREE};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::entry::Entry;

#[derive(Debug, Parser)]
#[command(name = "obtree", version, about = "Disk-resident B-tree of demo entries")]
struct Cli {
    /// Backing file of the tree
    #[arg(long, env = "OBTREE_PATH", default_value = DEFAULT_DATA_PATH)]
    path: PathBuf,

    /// Tree degree; must match the degree the file was created with
    #[arg(long, env = "OBTREE_DEGREE", default_value_t = DEFAULT_DEGREE)]
    degree: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Insert or overwrite an entry
    Put {
        #[arg(long, allow_hyphen_values = true)]
        key: i64,
        #[arg(long)]
        label: String,
        #[arg(long, default_value_t = 0.0)]
        score: f64,
        #[arg(long)]
        inactive: bool,
    },
    /// Print the entry stored under a key
    Get {
        #[arg(long, allow_hyphen_values = true)]
        key: i64,
    },
    /// Mark an entry as deleted
    Delete {
        #[arg(long, allow_hyphen_values = true)]
        key: i64,
    },
    /// Put generated entries for every key in FROM..=TO
    Fill {
        #[arg(long, allow_hyphen_values = true)]
        from: i64,
        #[arg(long, allow_hyphen_values = true)]
        to: i64,
    },
    /// Print every node of the tree
    Dump,
    /// Check the tree's structure and print a summary
    Verify,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    run(cli, &mut io::stdout().lock())
}

fn run(cli: Cli, out: &mut impl io::Write) -> Result<()> {
    debug!(path = %cli.path.display(), degree = cli.degree, "opening tree");
    let tree = BTree::<Entry>::open(&cli.path, cli.degree)
        .with_context(|| format!("failed to open {}", cli.path.display()))?;

    match cli.command {
        Command::Put {
            key,
            label,
            score,
            inactive,
        } => {
            tree.put(Entry {
                key,
                label,
                score,
                active: !inactive,
            })
            .with_context(|| format!("failed to put key {}", key))?;
        }
        Command::Get { key } => match tree.get(key) {
            Ok(entry) => writeln!(out, "{}", entry)?,
            Err(StorageError::NotFound(_)) => bail!("key {} not found", key),
            Err(err) => return Err(err).context("lookup failed"),
        },
        Command::Delete { key } => {
            tree.delete(key)
                .with_context(|| format!("failed to delete key {}", key))?;
        }
        Command::Fill { from, to } => {
            if from > to {
                bail!("--from {} is greater than --to {}", from, to);
            }
            let mut count: u64 = 0;
            for key in from..=to {
                tree.put(Entry {
                    key,
                    label: format!("entry {}", key),
                    score: key as f64,
                    active: true,
                })
                .with_context(|| format!("failed to put key {}", key))?;
                count += 1;
            }
            writeln!(out, "put {} entries", count)?;
        }
        Command::Dump => tree.dump(out).context("failed to dump tree")?,
        Command::Verify => {
            let stats = tree.verify().context("tree is inconsistent")?;
            writeln!(
                out,
                "height {}, {} nodes, {} live, {} deleted",
                stats.height, stats.nodes, stats.live, stats.tombstones
            )?;
        }
    }

    tree.close().context("failed to close tree")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn run_args(path: &std::path::Path, args: &[&str]) -> Result<String> {
        let mut argv = vec!["obtree", "--path", path.to_str().unwrap()];
        argv.extend_from_slice(args);
        let cli = Cli::try_parse_from(argv)?;

        let mut out = Vec::new();
        run(cli, &mut out)?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn test_put_get_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cli.bin");

        run_args(&path, &["put", "--key", "-4", "--label", "minus four", "--score", "1.5"]).unwrap();
        assert_eq!(
            run_args(&path, &["get", "--key", "-4"]).unwrap(),
            "-4\tminus four\t1.5\tactive\n"
        );

        run_args(&path, &["delete", "--key", "-4"]).unwrap();
        assert!(run_args(&path, &["get", "--key", "-4"]).is_err());
    }

    #[test]
    fn test_fill_and_verify() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cli.bin");

        assert_eq!(
            run_args(&path, &["fill", "--from", "-10", "--to", "10"]).unwrap(),
            "put 21 entries\n"
        );
        let summary = run_args(&path, &["verify"]).unwrap();
        assert!(summary.contains("21 live, 0 deleted"), "{}", summary);

        let dump = run_args(&path, &["dump"]).unwrap();
        assert!(dump.contains("(root)"));
    }

    #[test]
    fn test_fill_at_key_extremes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cli.bin");

        let from = (i64::MAX - 2).to_string();
        let to = i64::MAX.to_string();
        assert_eq!(
            run_args(&path, &["fill", "--from", &from, "--to", &to]).unwrap(),
            "put 3 entries\n"
        );

        let from = i64::MIN.to_string();
        let to = (i64::MIN + 1).to_string();
        assert_eq!(
            run_args(&path, &["fill", "--from", &from, "--to", &to]).unwrap(),
            "put 2 entries\n"
        );
        assert!(run_args(&path, &["get", "--key", &to]).is_ok());
    }

    #[test]
    fn test_fill_rejects_reversed_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cli.bin");
        assert!(run_args(&path, &["fill", "--from", "5", "--to", "1"]).is_err());
    }

    #[test]
    fn test_label_too_long() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cli.bin");
        let label = "x".repeat(entry::LABEL_MAX_LENGTH + 1);
        assert!(run_args(&path, &["put", "--key", "1", "--label", &label]).is_err());
    }
}
