// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
//! The bus process: accepts connections on a pre-bound socket fd handed
//! off by the supervisor and dispatches messages into the registry.

use std::io::Write;
use std::os::unix::io::FromRawFd;
use std::os::unix::net::UnixListener;
use std::os::unix::process::CommandExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use tracing::{error, info, warn};

use mds::bus::{run_connection, send_startup_handshake, ControlFlags};
use mds::marshal::BusState;
use mds::message::MessageParser;
use mds::Registry;

/// Env var carrying the path to a marshalled `BusState` left behind by the
/// process image this one replaced via `exec`. Present only immediately
/// after a re-exec; absent on a supervisor-driven initial spawn or respawn.
const REEXEC_STATE_ENV: &str = "MDS_REEXEC_STATE_PATH";

#[derive(Parser, Debug)]
#[command(name = "mds", about = "Micro display server bus")]
struct Args {
    /// File descriptor of a socket already bound and listening, handed off
    /// by the supervisor.
    #[arg(long)]
    socket_fd: i32,

    /// This is the first spawn of a fresh display, not a post-re-exec
    /// resume.
    #[arg(long, conflicts_with = "respawn")]
    initial_spawn: bool,

    /// This spawn follows a supervisor-driven respawn after an abnormal
    /// exit.
    #[arg(long)]
    respawn: bool,

    /// Display index, used only for log context.
    #[arg(long, default_value_t = 0)]
    display: u32,
}

fn install_signal_handlers(flags: ControlFlags) -> Result<(), std::io::Error> {
    let mut term_signals = signal_hook::iterator::Signals::new([signal_hook::consts::SIGTERM])?;
    let term_flags = flags.clone();
    thread::spawn(move || {
        for _ in term_signals.forever() {
            term_flags.terminating.store(true, Ordering::SeqCst);
            info!("received SIGTERM, shutting down");
        }
    });

    let mut reexec_signals = signal_hook::iterator::Signals::new([signal_hook::consts::SIGUSR1])?;
    thread::spawn(move || {
        for _ in reexec_signals.forever() {
            flags.reexecing.store(true, Ordering::SeqCst);
            info!("received SIGUSR1, preparing to re-exec");
        }
    });
    Ok(())
}

/// Marshals `registry`'s state to a fresh temp file and `exec`s the same
/// binary with the same arguments, passing the file's path via
/// [`REEXEC_STATE_ENV`]. On success this call never returns: the process
/// image is replaced. Returns an error if marshalling or `exec` itself
/// fails, in which case the caller should keep running the old image.
fn reexec_with_state(registry: &Registry) -> std::io::Result<std::convert::Infallible> {
    let state = BusState::capture(registry, &MessageParser::new(), true);

    let mut path = std::env::temp_dir();
    path.push(format!("mds-reexec-{}.state", std::process::id()));
    let mut file = std::fs::File::create(&path)?;
    state
        .marshal(&mut file)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
    file.flush()?;
    drop(file);

    let exe = std::env::current_exe()?;
    let args: Vec<String> = std::env::args().skip(1).collect();
    let err = std::process::Command::new(exe)
        .args(&args)
        .env(REEXEC_STATE_ENV, &path)
        .exec();
    // `exec` only returns on failure.
    Err(err)
}

/// If this process was just re-exec'd, reads back the marshalled state left
/// at [`REEXEC_STATE_ENV`], restores it into `registry`, and removes the
/// temp file. A missing or unreadable env var means this is an ordinary
/// spawn, not a resume, and is not an error.
fn restore_from_reexec(registry: &Registry) {
    let Some(path) = std::env::var_os(REEXEC_STATE_ENV) else {
        return;
    };
    let path = std::path::PathBuf::from(path);
    match std::fs::File::open(&path) {
        Ok(mut file) => match BusState::unmarshal(&mut file) {
            Ok(state) => {
                state.restore(registry);
                info!("restored bus state from re-exec");
            }
            Err(e) => {
                error!(error = %e, "failed unmarshalling re-exec state, starting empty");
            }
        },
        Err(e) => {
            warn!(error = %e, "re-exec state file missing, starting empty");
        }
    }
    let _ = std::fs::remove_file(&path);
    std::env::remove_var(REEXEC_STATE_ENV);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    info!(display = args.display, initial = args.initial_spawn, respawn = args.respawn, "starting bus");

    // SAFETY: `socket_fd` is an already-bound, listening socket passed
    // down by the supervisor across exec; this process is its sole owner.
    let listener = unsafe { UnixListener::from_raw_fd(args.socket_fd) };

    let flags = ControlFlags::new();
    if let Err(e) = install_signal_handlers(flags.clone()) {
        error!(error = %e, "failed installing signal handlers");
        std::process::exit(1);
    }

    let registry = Arc::new(Registry::new());
    restore_from_reexec(&registry);

    let handshake_sent = AtomicBool::new(false);

    for incoming in listener.incoming() {
        if flags.should_stop() {
            info!("shutdown requested, no longer accepting connections");
            break;
        }
        match incoming {
            Ok(mut stream) => {
                if !handshake_sent.swap(true, Ordering::SeqCst) {
                    if let Err(e) = send_startup_handshake(&mut stream) {
                        error!(error = %e, "failed sending startup handshake");
                    }
                }
                let registry = Arc::clone(&registry);
                let flags = flags.clone();
                thread::spawn(move || {
                    if let Err(e) = run_connection(stream, &registry, &flags) {
                        error!(error = %e, "connection loop terminated with error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "failed accepting connection");
            }
        }
    }

    if flags.reexecing.load(Ordering::SeqCst) {
        info!("re-exec requested, marshalling state and replacing process image");
        if let Err(e) = reexec_with_state(&registry) {
            error!(error = %e, "re-exec failed, continuing in current process image");
        }
    }

    info!("bus process exiting");
}
