// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
//! The supervisor process: owns the runtime directory, spawns the bus
//! binary, and respawns it across abnormal exits subject to a minimum
//! uptime floor.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use mds::supervisor::{runtime_root_from_env, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "mds-supervisor", about = "Supervises the mds bus process")]
struct Args {
    /// Overrides MDS_RUNTIME_ROOT_DIRECTORY.
    #[arg(long)]
    runtime_root: Option<PathBuf>,

    /// Minimum uptime, in seconds, a spawn must reach before an abnormal
    /// exit is treated as respawn-worthy rather than a fatal loop.
    #[arg(long, default_value_t = 2)]
    respawn_floor_secs: u64,

    /// Path to the mds bus binary to spawn.
    #[arg(long)]
    mds_binary: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runtime_root = args.runtime_root.unwrap_or_else(runtime_root_from_env);
    info!(root = %runtime_root.display(), "supervisor starting");

    let supervisor = Supervisor::new(
        runtime_root,
        args.mds_binary,
        Duration::from_secs(args.respawn_floor_secs),
    );

    let mut initial = true;
    loop {
        let mut process = match supervisor.spawn(initial) {
            Ok(process) => process,
            Err(e) => {
                error!(error = %e, "failed to spawn bus process");
                std::process::exit(1);
            }
        };
        initial = false;

        match supervisor.should_respawn(&mut process) {
            Ok(true) => continue,
            Ok(false) => break,
            Err(e) => {
                error!(error = %e, "failed waiting on bus process");
                std::process::exit(1);
            }
        }
    }

    info!("supervisor exiting");
}
