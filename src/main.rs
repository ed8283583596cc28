//! YaoXiang instantiation engine - CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use yaoxiang_mono::mono::{CacheFile, IncrementalInput, InstantiationManager, MonoError};
use yaoxiang_mono::util::config::{load_project_config, MonoConfig};
use yaoxiang_mono::util::diagnostic::DiagnosticEngine;
use yaoxiang_mono::util::logger::{self, LogLevel};
use yaoxiang_mono::{load_package, save_package, NAME, VERSION};

/// Exit code used for internal compiler errors
const ICE_EXIT_CODE: u8 = 101;

/// Generic instantiation for resolved YaoXiang packages
#[derive(Parser, Debug)]
#[command(name = "yaoxiang-mono")]
#[command(author = "YaoXiang Team")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Instantiate every generic use in a package
    Instantiate {
        /// Resolved package (.json or .ron)
        #[arg(value_name = "PACKAGE")]
        package: PathBuf,

        /// Config file (defaults to ./yaoxiang.toml)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Cache file of the previous build
        #[arg(long, value_name = "FILE")]
        cache: Option<PathBuf>,

        /// Stable path of a template that did not change since the cached build
        #[arg(long, value_name = "PATH")]
        unchanged: Vec<String>,

        /// Write the cache file for the next build
        #[arg(long, value_name = "FILE")]
        save_cache: Option<PathBuf>,

        /// Stable path of a function to instrument with a mock
        #[arg(long, value_name = "PATH")]
        mock: Vec<String>,

        /// Print the dispatch map of every concrete type
        #[arg(long)]
        dispatch: bool,

        /// Write the instantiated package
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Print the contents of a cache file
    InspectCache {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print version information
    Version,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => match err.downcast_ref::<MonoError>() {
            Some(mono) if mono.is_internal() => {
                eprintln!("internal compiler error: {:#}", err);
                ExitCode::from(ICE_EXIT_CODE)
            }
            _ => {
                eprintln!("error: {:#}", err);
                ExitCode::FAILURE
            }
        },
    }
}

fn run(args: Args) -> Result<()> {
    if args.verbose {
        eprintln!("yaoxiang-mono version: {}", VERSION);
    }

    match args.command {
        Commands::Instantiate {
            package,
            config,
            cache,
            unchanged,
            save_cache,
            mock,
            dispatch,
            output,
        } => {
            let config = match config {
                Some(path) => MonoConfig::load(&path)
                    .with_context(|| format!("Failed to load config: {}", path.display()))?,
                None => load_project_config(Path::new(".")).context("Failed to load yaoxiang.toml")?,
            };
            logger::init_with_level(if args.verbose {
                LogLevel::Debug
            } else {
                config.log_level
            });

            let pkg = load_package(&package)?;
            let mut manager = InstantiationManager::new(pkg, config);

            if let Some(path) = cache.as_deref().filter(|p| p.exists()) {
                let file = CacheFile::load(path)
                    .with_context(|| format!("Failed to load cache: {}", path.display()))?;
                let mut input = IncrementalInput::new(Some(file));
                for template in unchanged {
                    input.mark_unchanged(template);
                }
                let report = manager.restore(input)?;
                println!(
                    "restored {} instance(s), re-instantiated {}, skipped {}",
                    report.restored.len(),
                    report.reinstantiated.len(),
                    report.skipped
                );
            }

            let summary = manager.instantiate_package()?;
            if !summary.broken.is_empty() {
                eprintln!(
                    "warning: {} declaration(s) reference broken code",
                    summary.broken.len()
                );
            }

            if !mock.is_empty() {
                let paths = manager.package().stable_path_index();
                let mut targets = Vec::new();
                for path in &mock {
                    let target = paths
                        .get(path)
                        .copied()
                        .with_context(|| format!("Unknown mock target: {}", path))?;
                    targets.push(target);
                }
                let mut diagnostics = DiagnosticEngine::new();
                manager.instrument_mocks(&targets, &mut diagnostics)?;
                if !diagnostics.diagnostics().is_empty() {
                    eprintln!("{}", diagnostics.render());
                }
                if diagnostics.has_errors() {
                    anyhow::bail!("{} mock error(s)", diagnostics.error_count());
                }
            }

            for (name, decl) in manager.instances() {
                println!("{:>6}  {}", decl.to_string(), name);
            }

            if dispatch {
                for ty in manager.concrete_types() {
                    if manager.package().decl(ty).broken {
                        continue;
                    }
                    for entry in manager.dispatch_table(ty)? {
                        println!(
                            "{} [{}] {} -> {}",
                            manager.package().display_name(entry.ty),
                            entry.slot,
                            manager.package().stable_path(entry.abstract_method),
                            manager.package().display_name(entry.implementation)
                        );
                    }
                }
            }

            if let Some(path) = save_cache {
                manager
                    .persist()
                    .save(&path)
                    .with_context(|| format!("Failed to write cache: {}", path.display()))?;
            }

            if let Some(path) = output {
                save_package(manager.package(), &path)?;
            }
        }
        Commands::InspectCache { file } => {
            let cache = CacheFile::load(&file)
                .with_context(|| format!("Failed to load cache: {}", file.display()))?;
            println!("package: {}", cache.package);
            println!("format:  {}", cache.version);
            println!("symbols: {}", cache.symbols.len());
            for instance in &cache.instances {
                println!(
                    "  {} ({} decl(s), {} expr(s)) from {}",
                    instance.mangled,
                    instance.decls.len(),
                    instance.exprs.len(),
                    instance.generic
                );
            }
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}
