//! CLI for mqgate
//!
//! Subcommands:
//! - `server`: run the gateway
//! - `client`: subscribe to a topic, optionally publish to it, and print what arrives

use std::error::Error;
use std::sync::Arc;

use clap::Parser;
use mqgate::broker::Broker;
use mqgate::client::GatewayClient;
use mqgate::config::{DEFAULT_CONFIG_FILE, load_config, load_config_from};
use mqgate::forward::CallbackForwarder;
use mqgate::transport::{GatewayServer, ServerMessage};
use mqgate::upstream::MemoryUpstream;
use mqgate::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "mqgate")]
enum Command {
    /// Start the gateway
    Server {
        /// Configuration file, without extension
        #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
        config: String,
    },
    /// Run a simple client against a running gateway
    Client {
        #[arg(long, default_value = "ws://127.0.0.1:8080")]
        url: String,
        /// Defaults to `upstream.topic` from the configuration
        #[arg(long)]
        topic: Option<String>,
        /// Publish this body once subscribed
        #[arg(long)]
        body: Option<String>,
        /// Stop after this many stream messages
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    match cmd {
        Command::Server { config } => {
            if let Err(e) = run_server(&config).await {
                error!("Server failed: {e}");
                std::process::exit(1);
            }
        }
        Command::Client {
            url,
            topic,
            body,
            count,
        } => {
            logging::init("info");
            let topic = match topic {
                Some(topic) => topic,
                None => match load_config() {
                    Ok(settings) => settings.upstream.topic,
                    Err(e) => {
                        error!("Client failed: {e}");
                        std::process::exit(1);
                    }
                },
            };
            if let Err(e) = run_client(&url, &topic, body.as_deref(), count).await {
                error!("Client failed: {e}");
                std::process::exit(1);
            }
        }
    }
}

async fn run_server(config_path: &str) -> Result<(), Box<dyn Error>> {
    let settings = match load_config_from(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            return Err(e.into());
        }
    };
    logging::init(&settings.log.level);

    let upstream = MemoryUpstream::from_settings(&settings.upstream);
    let mut broker = Broker::new(Arc::new(upstream), settings.upstream.group.clone());
    if let Some(forwarder) = CallbackForwarder::from_settings(&settings.callback)? {
        info!("forwarding consumed messages to {}", forwarder.url());
        broker = broker.with_forwarder(forwarder);
    }
    let broker = Arc::new(broker);

    broker.init_producer().await?;
    let server = GatewayServer::bind(&settings.server.addr(), broker.clone()).await?;

    tokio::select! {
        _ = server.run() => {
            error!("WebSocket server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    broker.shutdown().await;
    Ok(())
}

async fn run_client(
    url: &str,
    topic: &str,
    body: Option<&str>,
    count: usize,
) -> Result<(), Box<dyn Error>> {
    let mut client = GatewayClient::connect(url).await?;

    let ack = client.subscribe(topic, None).await?;
    println!("{}", serde_json::to_string(&ack)?);

    if let Some(body) = body {
        let reply = client.send(topic, body).await?;
        println!("{}", serde_json::to_string(&reply)?);
    }

    let mut seen = 0;
    while seen < count {
        let event = client.next_event().await?;
        println!("{}", serde_json::to_string(&event)?);
        if matches!(event, ServerMessage::Message { .. }) {
            seen += 1;
        }
    }

    client.close().await?;
    Ok(())
}
