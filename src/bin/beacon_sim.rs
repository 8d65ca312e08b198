//! Beacon simulator - replays a docking approach against gort-dock
//!
//! Scripted mode drives a full engagement: FILE, a few moving reports, a
//! run of boundary reports long enough to trigger the connect handshake,
//! DONE, quit. Alternatively --file replays raw protocol lines from disk.
//!
//! Usage:
//!   cargo run --bin beacon-sim -- --addr 127.0.0.1:9000 --tag 3

use clap::Parser;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(name = "beacon-sim")]
#[command(about = "Beacon protocol simulator for local testing")]
struct Args {
    /// Docking server address
    #[arg(long, default_value = "127.0.0.1:9000")]
    addr: String,

    /// Beacon tag to report
    #[arg(long, default_value = "3")]
    tag: i64,

    /// Boundary reports to send (connect threshold is 100 by default)
    #[arg(long, default_value = "110")]
    boundary_count: u32,

    /// Delay between lines in milliseconds
    #[arg(long, default_value = "10")]
    interval_ms: u64,

    /// Replay raw protocol lines from this file instead of the script
    #[arg(long)]
    file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let interval = Duration::from_millis(args.interval_ms);

    let stream = TcpStream::connect(&args.addr).await?;
    println!("connected to {}", args.addr);
    let (read_half, mut write_half) = stream.into_split();

    // Print replies as they arrive
    tokio::spawn(async move {
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            println!("<< {}", line);
        }
    });

    let script: Vec<String> = match &args.file {
        Some(path) => std::fs::read_to_string(path)?
            .lines()
            .map(String::from)
            .collect(),
        None => {
            let mut lines = Vec::new();
            lines.push("FILE".to_string());
            for i in 0..5 {
                lines.push(format!("Z +{} 8{} {}", 5 - i, i, args.tag));
            }
            for _ in 0..args.boundary_count {
                lines.push(format!("Z +0 12 {}", args.tag));
            }
            lines.push(format!(
                "2024-01-01T00:00:00;sim;{}",
                args.tag
            ));
            lines.push("DONE".to_string());
            lines.push("quit".to_string());
            lines
        }
    };

    for line in &script {
        println!(">> {}", line);
        write_half.write_all(line.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
        write_half.flush().await?;
        tokio::time::sleep(interval).await;
    }

    // Give the reply printer a moment to drain
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
