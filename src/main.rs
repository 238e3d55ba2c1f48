//! CLI for the messager
//!
//! Subcommands:
//! - `server`: run a relay server on the configured address
//! - `client`: connect to a relay, print what arrives and send `cmd.start = true`

use clap::Parser;
use messager::config::{LoggingSettings, load_config};
use messager::utils::logging;
use messager::{ClientMessager, Messager, ServerMessager, Topic, TopicRegistry};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "messager")]
enum Command {
    /// Start the relay server
    Server,
    /// Run the demo client
    Client {
        /// Relay URL (default: built from the configured server host and port)
        #[arg(long)]
        url: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Pose {
    x: f64,
    y: f64,
    heading: f64,
}

struct DemoTopics {
    registry: TopicRegistry,
    start: Topic<bool>,
    pose: Topic<Pose>,
}

fn demo_topics() -> Result<DemoTopics, Box<dyn std::error::Error>> {
    let mut builder = TopicRegistry::builder();
    let start = builder.declare_topic("cmd.start")?;
    let pose = builder.declare_topic("robot.state.pose")?;
    Ok(DemoTopics {
        registry: builder.build(),
        start,
        pose,
    })
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logging::init(&LoggingSettings {
                level: "info".to_string(),
            });
            error!("Failed to load configuration: {e}");
            return;
        }
    };
    logging::init(&config.logging);

    let result = match Command::parse() {
        Command::Server => run_server(&config).await,
        Command::Client { url } => {
            let url = url.unwrap_or_else(|| config.server.url());
            run_client(&config, &url).await
        }
    };
    if let Err(e) = result {
        error!("{e}");
    }
}

async fn run_server(config: &messager::config::Settings) -> Result<(), Box<dyn std::error::Error>> {
    let topics = demo_topics()?;
    let server = ServerMessager::new(topics.registry, config.server.addr());

    server.add_topic_listener(&topics.start, |go| info!("cmd.start = {go}"))?;
    server.add_topic_listener(&topics.pose, |pose| info!("robot.state.pose = {pose:?}"))?;
    server.add_messager_state_listener(|connected| {
        info!("{}", if connected { "first client joined" } else { "last client left" });
    });
    server.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully.");
    server.close();
    Ok(())
}

async fn run_client(
    config: &messager::config::Settings,
    url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let topics = demo_topics()?;
    let client = ClientMessager::new(
        topics.registry,
        url,
        config.connection.reconnect_policy(),
    );

    client.add_topic_listener(&topics.start, |go| info!("cmd.start = {go}"))?;
    client.add_topic_listener(&topics.pose, |pose| info!("robot.state.pose = {pose:?}"))?;

    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    client.add_messager_state_listener(move |connected| {
        let _ = state_tx.send(connected);
    });
    client.start()?;

    loop {
        tokio::select! {
            state = state_rx.recv() => match state {
                Some(true) => {
                    info!("Connected to {url}");
                    client.submit(&topics.start, true)?;
                }
                Some(false) => info!("Lost connection to {url}, retrying"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                break;
            }
        }
    }

    client.close();
    Ok(())
}
