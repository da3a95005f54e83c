// SPDX-License-Identifier: GPL-3.0-or-later
// SPDX-FileCopyrightText: 2026 mds contributors
//
//! A minimal interactive client: registers for a command on the bus, then
//! echoes any notifications it receives to stdout while forwarding typed
//! lines as `add` requests for other commands.

use std::io::{self, BufRead, Write};
use std::os::unix::net::UnixStream;
use std::thread;

use clap::Parser;
use tracing::{error, info};

use mds::message::MessageParser;

#[derive(Parser, Debug)]
#[command(name = "mds-demo-client", about = "Demo client for the mds bus")]
struct Args {
    /// Path to the bus's Unix domain socket.
    #[arg(long)]
    socket: String,

    /// Client ID in "high:low" form.
    #[arg(long, default_value = "1:1")]
    client_id: String,

    /// Command to register interest in on startup.
    #[arg(long)]
    command: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut stream = match UnixStream::connect(&args.socket) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed connecting to bus");
            std::process::exit(1);
        }
    };

    let register = format!(
        "Client ID: {}\nMessage ID: 0\nAction: wait\nLength: {}\n\n{}\n",
        args.client_id,
        args.command.len() + 1,
        args.command
    );
    if let Err(e) = stream.write_all(register.as_bytes()) {
        error!(error = %e, "failed sending registration");
        std::process::exit(1);
    }
    info!(command = args.command, "waiting for notification");

    let mut reader = stream.try_clone().expect("clone socket for reader thread");
    let recv_thread = thread::spawn(move || {
        let mut parser = MessageParser::new();
        loop {
            match parser.read(&mut reader) {
                Ok(msg) => {
                    let text = String::from_utf8_lossy(&msg.payload);
                    println!("notified: {text}");
                }
                Err(e) => {
                    info!(error = %e, "receive loop ending");
                    break;
                }
            }
        }
    });

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.is_empty() {
            continue;
        }
        let message = format!(
            "Client ID: {}\nMessage ID: 1\nAction: add\nLength: {}\n\n{}\n",
            args.client_id,
            line.len() + 1,
            line
        );
        if stream.write_all(message.as_bytes()).is_err() {
            break;
        }
    }

    let _ = recv_thread.join();
}
