//! resync - resource store inspection CLI
//!
//! Runs the offline parts of the update engine against an installed store.
//!
//! ## Usage
//!
//! ```sh
//! resync verify <config.json>
//! resync check <config.json>
//! resync pack-info <pack>
//! ```
//!
//! Logging follows `RUST_LOG` (default `info`).

use resync::manifest::pack::{open_pack, verify_data_region};
use resync::{BinaryManifestCodec, Event, NullDownloads, ResourceUpdater, UpdaterConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Simulated frame time between ticks.
const TICK: Duration = Duration::from_millis(16);

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug)]
enum Command {
    Verify { config: PathBuf },
    Check { config: PathBuf },
    PackInfo { pack: PathBuf },
    Version,
    Help,
}

fn parse_args() -> Result<Command, String> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        return Ok(Command::Help);
    }

    let path_arg = |what: &str| -> Result<PathBuf, String> {
        args.get(2)
            .map(PathBuf::from)
            .ok_or_else(|| format!("{} requires <{}>", args[1], what))
    };

    match args[1].as_str() {
        "verify" => Ok(Command::Verify {
            config: path_arg("config.json")?,
        }),
        "check" => Ok(Command::Check {
            config: path_arg("config.json")?,
        }),
        "pack-info" => Ok(Command::PackInfo {
            pack: path_arg("pack")?,
        }),
        "version" | "--version" | "-V" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        other => Err(format!("unknown command: {}", other)),
    }
}

// =============================================================================
// Commands
// =============================================================================

fn open_updater(config: &Path) -> Result<ResourceUpdater, String> {
    let config = UpdaterConfig::from_json_file(config).map_err(|e| format!("config: {}", e))?;
    ResourceUpdater::new(config, Box::new(NullDownloads)).map_err(|e| e.to_string())
}

/// Runs a verification pass to completion. Returns true if nothing failed.
fn run_verify(updater: &mut ResourceUpdater) -> Result<bool, String> {
    updater.verify_resources().map_err(|e| e.to_string())?;
    while updater.is_verifying() {
        updater.tick(TICK).map_err(|e| e.to_string())?;
    }

    let mut ok = true;
    for event in updater.drain_events() {
        match event {
            Event::VerifyFailure { id, reason } => println!("FAILED\t{}\t{}", id, reason),
            Event::VerifyComplete(done) => {
                println!(
                    "verified {} resources, {} failed",
                    done.verified_count, done.failed_count
                );
                ok = done.ok;
            }
            _ => {}
        }
    }
    Ok(ok)
}

fn cmd_verify(config: PathBuf) -> Result<(), String> {
    let mut updater = open_updater(&config)?;
    if run_verify(&mut updater)? {
        Ok(())
    } else {
        Err("verification found damaged resources".to_string())
    }
}

fn cmd_check(config: PathBuf) -> Result<(), String> {
    let mut updater = open_updater(&config)?;
    run_verify(&mut updater)?;

    let report = updater.check_resources().map_err(|e| e.to_string())?;
    let registry = updater.registry();
    println!(
        "version: {} (internal {})",
        registry.applicable_version().unwrap_or("-"),
        registry.internal_version().unwrap_or_default()
    );
    println!("ready:   {}/{}", registry.ready_count(), registry.resource_count());
    println!("moved:   {}", report.moved_count);
    println!("removed: {}", report.removed_count);
    println!(
        "update:  {} ({} bytes, {} compressed)",
        report.update_count, report.update_total_length, report.update_total_compressed_length
    );
    for candidate in updater.orchestrator().candidates() {
        println!(
            "  {}\t{}\t{}",
            candidate.id,
            candidate.length,
            candidate.container.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn cmd_pack_info(pack: PathBuf) -> Result<(), String> {
    let mut opened = open_pack(&BinaryManifestCodec, &pack).map_err(|e| e.to_string())?;
    let manifest = &opened.manifest;
    println!("pack:    {}", pack.display());
    println!("data:    offset {} length {}", manifest.offset, manifest.length);
    println!("hash:    {:08x}", manifest.hash);
    println!("entries: {}", manifest.resources.len());
    println!("ID\tKIND\tLENGTH\tCOMPRESSED\tOFFSET");
    for entry in &manifest.resources {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            entry.id, entry.load_kind, entry.length, entry.compressed_length, entry.offset
        );
    }

    if verify_data_region(&mut opened).map_err(|e| e.to_string())? {
        println!("data region: ok");
        Ok(())
    } else {
        Err("data region checksum mismatch".to_string())
    }
}

fn cmd_version() {
    println!("resync version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"resync - resource store inspection

USAGE:
    resync <command> [args]

COMMANDS:
    verify <config.json>     Verify the read-write area against its manifest
    check <config.json>      Verify, then reconcile against the cached target manifest
    pack-info <pack>         Print a pack's index and check its data region
    version                  Show version info
    help                     Show this help

ENVIRONMENT:
    RUST_LOG                 Log filter (default: info)
"#
    );
}

// =============================================================================
// Main
// =============================================================================

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    match parse_args() {
        Ok(cmd) => {
            let result = match cmd {
                Command::Verify { config } => cmd_verify(config),
                Command::Check { config } => cmd_check(config),
                Command::PackInfo { pack } => cmd_pack_info(pack),
                Command::Version => {
                    cmd_version();
                    Ok(())
                }
                Command::Help => {
                    cmd_help();
                    Ok(())
                }
            };
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            eprintln!("error: {}", e);
            cmd_help();
            ExitCode::FAILURE
        }
    }
}
