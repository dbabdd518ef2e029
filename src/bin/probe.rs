//! Bridge probe client
//!
//! Connects to a running simbridge gateway and drives one scripted
//! session: start sinus.m, update the parameters, switch to cosinus.m,
//! then stop. Responses are printed as they arrive.
//!
//! Usage:
//!   cargo run --bin probe
//!   cargo run --bin probe -- --url ws://127.0.0.1:8765

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(name = "probe", about = "Scripted simbridge session probe")]
struct Args {
    /// Gateway WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8765")]
    url: String,

    /// Seconds to collect responses after each command
    #[arg(long, default_value_t = 5)]
    collect_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    println!("connecting to {}", args.url);
    let (ws, _) = tokio_tungstenite::connect_async(args.url.as_str()).await?;
    let (mut tx, mut rx) = ws.split();
    let collect = Duration::from_secs(args.collect_secs);

    let script = [
        json!({"type": "start", "script": "sinus.m", "params": [5, 0.5, 0, 0.1, 1]}),
        json!({"type": "update", "params": [10, 1.0, 0, 0.1, 10]}),
        json!({"type": "update", "script": "cosinus.m", "params": [15, 2.0, 0, 0.1, 10]}),
        json!({"type": "stop"}),
    ];

    for command in script {
        let text = command.to_string();
        println!("-> {text}");
        tx.send(Message::Text(text)).await?;

        // Collect whatever arrives before moving on
        loop {
            match timeout(collect, rx.next()).await {
                Ok(Some(Ok(Message::Text(reply)))) => println!("<- {reply}"),
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                    println!("connection closed by gateway");
                    return Ok(());
                }
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => {
                    eprintln!("read error: {e}");
                    return Ok(());
                }
                Err(_) => break,
            }
        }
    }

    tx.close().await?;
    println!("done");
    Ok(())
}
