//! addonhost - Main entry point.
//!
//! Command-line front end for the addon lifecycle service.
//!
//! Usage: addonhost [OPTIONS] COMMAND
//!
//! Commands:
//!   list              Show installed addons
//!   create --name=X   Scaffold a new addon
//!   build --name=X    Package an addon into a zip archive
//!   backup --name=X   Archive an addon into the backup area
//!   enable --name=X   Enable an installed addon
//!   disable --name=X  Disable an installed addon
//!   remove --name=X   Uninstall an addon
//!   install --file=P  Install an addon from a local archive
//!
//! Options:
//!   --root=DIR        Host root directory (default ~/.addonhost)
//!   --config=FILE     Load host configuration from a TOML file
//!   --force           Overwrite an existing addon on install
//!   --verbose         Mirror log output to stderr
//!   --version, -v     Show version

use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use addonhost::addons::{AddonRegistry, AddonService, MemoryStore};
use addonhost::config::HostConfig;
use addonhost::logging::{self, LogConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version" || a == "-v") {
        println!("addonhost v{}", VERSION);
        return;
    }

    let command = match args.iter().find(|a| !a.starts_with('-')) {
        Some(c) => c.clone(),
        None => {
            eprintln!("Usage: addonhost [OPTIONS] COMMAND");
            eprintln!("Commands: list, create, build, backup, enable, disable, remove, install");
            process::exit(2);
        }
    };

    let log_config = LogConfig {
        stderr: args.iter().any(|a| a == "--verbose"),
        ..LogConfig::default()
    };
    if let Err(e) = logging::init(&log_config) {
        eprintln!("Warning: could not initialize logging: {}", e);
    }

    let config = match load_config(&args) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let service = AddonService::new(
        config,
        Arc::new(AddonRegistry::new()),
        Arc::new(MemoryStore::new()),
    );

    if let Err(e) = run_command(&service, &command, &args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_config(args: &[String]) -> Result<HostConfig, String> {
    if let Some(path) = flag_value(args, "--config") {
        return HostConfig::from_file(Path::new(&path)).map_err(|e| e.to_string());
    }
    Ok(match flag_value(args, "--root") {
        Some(root) => HostConfig::with_root(PathBuf::from(root)),
        None => HostConfig::default(),
    })
}

fn run_command(service: &AddonService, command: &str, args: &[String]) -> Result<(), String> {
    match command {
        "list" => {
            let addons = service.list().map_err(|e| e.to_string())?;
            if addons.is_empty() {
                println!("No addons installed.");
                return Ok(());
            }
            for descriptor in addons {
                let name = descriptor.get_str("name").unwrap_or_default();
                let version = descriptor.get_str("version").unwrap_or_default();
                let title = descriptor.get_str("title").unwrap_or_default();
                let state = match descriptor.state() {
                    addonhost::addons::AddonState::Enabled => "enabled",
                    addonhost::addons::AddonState::Disabled => "disabled",
                };
                println!("{:<20} {:<10} {:<9} {}", name, version, state, title);
            }
            Ok(())
        }
        "create" => {
            let dir = service.create(&require_name(args)?).map_err(|e| e.to_string())?;
            println!("Created {}", dir.display());
            Ok(())
        }
        "build" => {
            let archive = service.build(&require_name(args)?).map_err(|e| e.to_string())?;
            println!("Packaged {}", archive.display());
            Ok(())
        }
        "backup" => {
            let archive = service.backup(&require_name(args)?).map_err(|e| e.to_string())?;
            println!("Backed up to {}", archive.display());
            Ok(())
        }
        "enable" => {
            let name = require_name(args)?;
            service.enable(&name).map_err(|e| e.to_string())?;
            println!("Enabled '{}'", name);
            Ok(())
        }
        "disable" => {
            let name = require_name(args)?;
            service.disable(&name).map_err(|e| e.to_string())?;
            println!("Disabled '{}'", name);
            Ok(())
        }
        "remove" => {
            let name = require_name(args)?;
            let force = args.iter().any(|a| a == "--force");
            service.uninstall(&name, force).map_err(|e| e.to_string())?;
            println!("Removed '{}'", name);
            Ok(())
        }
        "install" => {
            let file = flag_value(args, "--file")
                .ok_or_else(|| "install requires --file=PATH".to_string())?;
            let force = args.iter().any(|a| a == "--force");
            let name = service
                .install_from_archive(Path::new(&file), force)
                .map_err(|e| e.to_string())?;
            println!("Installed '{}'", name);
            Ok(())
        }
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn require_name(args: &[String]) -> Result<String, String> {
    flag_value(args, "--name").ok_or_else(|| "missing --name=ADDON".to_string())
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    let prefix = format!("{}=", flag);
    args.iter()
        .find_map(|a| a.strip_prefix(&prefix).map(String::from))
}
