//! `regmod`/`list-modules`/`unregister` subcommands (spec.md §6's CLI
//! surface, supplemented from `original_source/Source/g_module.cpp` /
//! `ModuleInfo.h` per SPEC_FULL.md's note on module-table symmetry).

use crate::bootstrap::Runtime;
use crate::db::{DbError, PackageDb};
use clap::{Parser, Subcommand};
use nirvana_core::config::NirvanaConfig;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nirvana", about = "Nirvana runtime package/module management")]
pub struct Cli {
    /// Path to the package database (spec.md §6 default).
    #[arg(long, global = true, default_value = crate::db::DEFAULT_PATH)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bring the kernel up (ports, heap, scheduler, binder, ORB, NS) and
    /// immediately tear it back down — a smoke test for the bootstrap
    /// sequence, standing in until there is a persistent server mode.
    Boot {
        /// Optional TOML config file (spec.md §9's ambient config layer).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Register a binary module with the package manager.
    Regmod {
        binary_path: String,
        module_name: String,
        /// Defaults to `{os}-{arch}` of the machine running `regmod`.
        #[arg(long)]
        platform: Option<String>,
    },
    /// List every registered module and its binaries.
    ListModules,
    /// Remove a module and everything registered under it.
    Unregister { module_name: String },
}

/// Runs the CLI's subcommand and returns the process exit code (spec.md
/// §6: "exit 0 on success, −1 on failure"). Errors are written to `stderr`
/// as a single category-prefixed line before returning.
pub fn run(cli: Cli) -> i32 {
    match cli.command {
        Command::Boot { config } => boot(config.as_deref()),
        Command::Regmod { binary_path, module_name, platform } => {
            run_db(&cli.db, |db| db.register_module(&binary_path, &module_name, &platform.unwrap_or_else(default_platform)))
        }
        Command::ListModules => run_db(&cli.db, |db| {
            for row in db.list_modules()? {
                match (row.platform, row.path) {
                    (Some(platform), Some(path)) => println!("{}\t{}\t{}", row.name, platform, path),
                    _ => println!("{}\t(no binary registered)", row.name),
                }
            }
            Ok(())
        }),
        Command::Unregister { module_name } => run_db(&cli.db, |db| db.unregister_module(&module_name)),
    }
}

fn run_db(db_path: &std::path::Path, f: impl FnOnce(&PackageDb) -> Result<(), DbError>) -> i32 {
    let outcome = PackageDb::open(db_path).and_then(|db| f(&db));
    match outcome {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}: {e}", category(&e));
            -1
        }
    }
}

fn boot(config_path: Option<&std::path::Path>) -> i32 {
    let config = match config_path {
        Some(path) => match NirvanaConfig::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("BAD_PARAM: failed to load config: {e}");
                return -1;
            }
        },
        None => NirvanaConfig::default(),
    };
    let runtime = Runtime::bootstrap(&config);
    runtime.shutdown();
    0
}

fn category(e: &DbError) -> &'static str {
    match e {
        DbError::ModuleNotFound(_) => "NOT_FOUND",
        DbError::Sqlite(_) => "PERSIST_STORE",
    }
}

fn default_platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
