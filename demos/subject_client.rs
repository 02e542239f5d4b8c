//! Subject client demo
//!
//! Run with: cargo run --example subject_client [URL] [SUBJECT]
//!
//! Examples:
//!   cargo run --example subject_client                            # ws://localhost:2222, subject "chat"
//!   cargo run --example subject_client ws://localhost:2223 news
//!
//! Every line typed on stdin is published to the subject; envelopes
//! published by other clients on the same subject are printed. Start two
//! of these against one broker_server to see the fan-out.

use serde_json::json;
use tokio::io::AsyncBufReadExt;

use pushbus_rs::client::{BusConnector, ClientConfig, ClientEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let url = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "ws://localhost:2222".to_string());
    let subject = args.get(2).cloned().unwrap_or_else(|| "chat".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pushbus_rs=info".parse()?),
        )
        .init();

    let config = ClientConfig::new(&url).subject(&subject);
    let (mut client, mut events) = BusConnector::new(config);

    println!("Connecting to {} (subject: {})", url, subject);

    {
        let subject = subject.clone();
        client.on(subject.clone(), move |envelope| {
            let text = envelope
                .body
                .as_ref()
                .and_then(|body| body.get("text"))
                .and_then(|text| text.as_str())
                .unwrap_or("<no text>");
            println!("[{}] {}: {}", subject, envelope.from_id, text);
        });
    }

    let sender = client.sender();
    println!("Publishing as {}", sender.identity());
    tokio::spawn(client.run());

    // Surface lifecycle events while we read stdin
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ClientEvent::Connected => println!("(connected)"),
                ClientEvent::Disconnected => println!("(disconnected, retrying)"),
                ClientEvent::Envelope(_) => {}
            }
        }
    });

    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        if lines.read_line(&mut line).await? == 0 {
            break; // EOF
        }
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        sender.send(vec![subject.clone()], "", json!({ "text": text }));
    }

    Ok(())
}
