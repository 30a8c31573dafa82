// Copyright (C) 2026 xup authors
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// TCP file uploader with XMODEM-style framing
mod crc;
mod packet;
mod protocol;
mod sender;
mod transport;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sender::{UploadConfig, run_upload};
use transport::TcpConnection;

#[derive(Parser)]
#[command(name = "xup")]
#[command(about = "Upload a file to a device over TCP using CRC-16 framed blocks", long_about = None)]
struct Cli {
    /// Host to connect to
    host: String,

    /// Port to connect to
    port: u16,

    /// Source file to upload
    source_file: PathBuf,

    /// Destination path on the device
    destination_path: String,

    /// Send a reset command after the upload completes
    #[arg(short, long)]
    reset: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let data = match std::fs::read(&cli.source_file) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Failed to read {}: {}", cli.source_file.display(), e);
            std::process::exit(1);
        }
    };

    println!("Connecting to {}:{}", cli.host, cli.port);
    let mut conn = match TcpConnection::connect(&cli.host, cli.port) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Failed to connect to {}:{}: {}", cli.host, cli.port, e);
            std::process::exit(1);
        }
    };

    println!(
        "Uploading {} ({} bytes) to {}",
        cli.source_file.display(),
        data.len(),
        cli.destination_path
    );

    let config = UploadConfig::default();
    match run_upload(&mut conn, &cli.destination_path, &data, &config, cli.reset) {
        Ok(report) => {
            println!("\nFile uploaded successfully!");
            if !report.trailing_output.is_empty() {
                println!("Server output:\n{}", report.trailing_output);
            }
            if let Some(reset) = report.reset {
                if reset.success {
                    println!("Device is rebooting");
                } else {
                    eprintln!("Reset command failed: \"{}\"", reset.response);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("Upload failed: {}", e);
            std::process::exit(1);
        }
    }
}
