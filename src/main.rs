//! Demo binary: an echo server over the engine.

use std::sync::Arc;

use tracing::{debug, info};
use webweft::{Message, MessageReceiver, MessageSender, Server, ServerConfig};

#[tokio::main]
async fn main() -> webweft::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            toml::from_str(&raw).unwrap_or_else(|e| {
                eprintln!("invalid config {path}: {e}");
                std::process::exit(2);
            })
        }
        None => ServerConfig::default(),
    };

    let mut server = Server::new(config);
    server.on_open("/", echo);

    info!("webweft v{}", env!("CARGO_PKG_VERSION"));
    Arc::new(server).listen().await
}

async fn echo(receiver: MessageReceiver, sender: MessageSender) {
    loop {
        let msg: Message = match receiver.read_message(1 << 20).await {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "read failed");
                sender.send_close(1001, "", true, false).await;
                return;
            }
        };

        if msg.is_text() {
            if msg.data.as_ref() == b"close" {
                sender.send_close(1001, "", true, false).await;
                return;
            }
            let _ = sender.send_message(&msg, false).await;
        } else if msg.is_binary() {
            let _ = sender.send_message(&msg, false).await;
        } else if msg.is_close() {
            sender.send_close(1000, "", true, false).await;
            return;
        }
    }
}
