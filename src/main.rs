//! CLI for homebus
//!
//! Subcommands:
//! - `serve`: run a broker on the configured address
//! - `ping`, `publish`, `request`: one-shot client operations
//! - `listen`: print messages as they arrive

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use homebus::broker::{Broker, LocalBroker};
use homebus::client::{Client, Handler, RequestOptions};
use homebus::config::{Settings, load_config};
use homebus::message::{Message, body};
use homebus::utils::{Result, logging};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "homebus", about = "Home automation message bus")]
struct Cli {
    /// Broker address (e.g. tcp://127.0.0.1:23100), overriding the configuration
    #[arg(long, global = true)]
    address: Option<String>,

    /// Device id to use, overriding the configuration
    #[arg(long, global = true)]
    name: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a broker
    Serve {
        /// Also accept web socket clients on this address (e.g. 127.0.0.1:23180)
        #[arg(long)]
        websocket: Option<String>,

        /// Log every routed message
        #[arg(long)]
        trace: bool,
    },
    /// Ping a device, or everyone else on the bus, and print who answers
    Ping {
        #[arg(long)]
        device: Option<String>,

        #[arg(long, default_value_t = 1)]
        count: u32,

        /// How long a broadcast ping collects answers
        #[arg(long, default_value_t = 1000)]
        wait_ms: u64,
    },
    /// Publish one message
    Publish {
        action: String,
        #[command(flatten)]
        body: MessageArgs,
    },
    /// Publish one message and print the reply
    Request {
        action: String,
        #[command(flatten)]
        body: MessageArgs,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print every message for an action until interrupted
    Listen {
        #[arg(default_value = "")]
        action: String,

        /// Device filter, `self` for this client
        #[arg(long, default_value = "")]
        device: String,
    },
}

#[derive(clap::Args)]
struct MessageArgs {
    #[arg(long)]
    text: Option<String>,

    #[arg(long)]
    destination: Option<String>,

    /// JSON payload
    #[arg(long)]
    payload: Option<String>,
}

impl MessageArgs {
    fn into_message(self, action: String) -> Result<Message> {
        let mut msg = Message::new(action);
        if let Some(text) = self.text {
            msg.text = text;
        }
        if let Some(destination) = self.destination {
            msg.destination = destination;
        }
        if let Some(payload) = self.payload {
            let value: serde_json::Value = serde_json::from_str(&payload)?;
            msg.encode_payload(&value)?;
        }
        Ok(msg)
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };
    if let Some(address) = cli.address {
        settings.net.address = address;
    }
    if let Some(name) = cli.name {
        settings.client.name = name;
    }
    logging::init(&settings.log.level);

    if let Err(e) = run(cli.command, settings).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(command: Command, settings: Settings) -> Result<()> {
    if let Command::Serve { websocket, trace } = command {
        return serve(&settings, websocket, trace).await;
    }

    let client = Client::from_settings(&settings.client);
    client.dial(&settings.net).await?;

    let result = match command {
        Command::Serve { .. } => Ok(()),
        Command::Ping {
            device,
            count,
            wait_ms,
        } => ping(&client, device, count, Duration::from_millis(wait_ms)).await,
        Command::Publish { action, body } => client.publish(body.into_message(action)?).await,
        Command::Request {
            action,
            body,
            timeout_ms,
        } => {
            let opts = RequestOptions {
                timeout: timeout_ms.map(Duration::from_millis),
                cancel: None,
            };
            let reply = client.request_with(body.into_message(action)?, opts).await?;
            println!("{}", serde_json::to_string_pretty(&reply)?);
            Ok(())
        }
        Command::Listen { action, device } => listen(&client, &action, &device).await,
    };

    client.disconnect().await?;
    result
}

async fn serve(settings: &Settings, websocket: Option<String>, trace: bool) -> Result<()> {
    let broker = LocalBroker::new();
    broker.trace_messages(trace);

    if let Some(addr) = websocket {
        let broker = broker.clone();
        tokio::spawn(async move {
            if let Err(e) = broker.serve_websocket(&addr).await {
                error!("WebSocket server failed: {e}");
            }
        });
    }

    tokio::select! {
        result = broker.listen(&settings.net) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
            Ok(())
        }
    }
}

async fn ping(client: &Client, device: Option<String>, count: u32, wait: Duration) -> Result<()> {
    let Some(device) = device else {
        let mut acks = collect_acks(client).await?;
        for _ in 0..count {
            let answers = ping_everyone(client, &mut acks, wait).await?;
            if answers.is_empty() {
                println!("no answer within {wait:?}");
            }
            for (source, rtt) in answers {
                println!("ack from {source} in {rtt:?}");
            }
        }
        return Ok(());
    };

    for _ in 0..count {
        let ping = Message::new(body::PING).with_destination(device.clone());
        let started = Instant::now();
        let ack = client.request(ping).await?;
        println!("ack from {} in {:?}", ack.source, started.elapsed());
    }
    Ok(())
}

/// Subscribes to acks sent to this client, leaving out the ones it sends to
/// itself.
async fn collect_acks(client: &Client) -> Result<mpsc::UnboundedReceiver<Message>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let own_id = client.device_id().to_string();
    let forward = Handler::new(move |msg: Message| {
        let tx = (msg.source != own_id).then(|| tx.clone());
        async move {
            if let Some(tx) = tx {
                let _ = tx.send(msg);
            }
        }
    });
    client.subscribe(body::ACK, "self", forward).await?;
    Ok(rx)
}

/// Broadcasts one ping and returns who acked it within `wait`, in order of
/// arrival.
async fn ping_everyone(
    client: &Client,
    acks: &mut mpsc::UnboundedReceiver<Message>,
    wait: Duration,
) -> Result<Vec<(String, Duration)>> {
    let ping = Message::new(body::PING);
    let id = ping.id.clone();
    let started = Instant::now();
    client.publish(ping).await?;

    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);
    let mut answers = Vec::new();
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            ack = acks.recv() => match ack {
                Some(ack) if ack.corr_id == id => answers.push((ack.source, started.elapsed())),
                Some(_) => {}
                None => break,
            },
        }
    }
    Ok(answers)
}

async fn listen(client: &Client, action: &str, device: &str) -> Result<()> {
    let lost = CancellationToken::new();
    client.on_connection_lost({
        let lost = lost.clone();
        move |_| lost.cancel()
    });

    let print = Handler::new(|msg: Message| async move {
        match serde_json::to_string(&msg) {
            Ok(json) => println!("{json}"),
            Err(_) => println!("{msg}"),
        }
    });
    client.subscribe(action, device, print).await?;

    tokio::select! {
        _ = lost.cancelled() => info!("Connection lost."),
        _ = tokio::signal::ctrl_c() => info!("Interrupted."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn local_client(broker: &LocalBroker, name: &str) -> Client {
        let client = Client::new(name);
        client.connect(broker.new_local_conn()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !broker.topics().contains(&format!("dev/{name}")) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        client
    }

    #[tokio::test]
    async fn test_broadcast_ping_skips_own_ack() {
        let broker = LocalBroker::new();
        let lamp = local_client(&broker, "lamp").await;
        let cli = local_client(&broker, "cli").await;

        let mut acks = collect_acks(&cli).await.unwrap();
        let answers = ping_everyone(&cli, &mut acks, Duration::from_millis(300))
            .await
            .unwrap();

        let sources: Vec<&str> = answers.iter().map(|(source, _)| source.as_str()).collect();
        assert_eq!(sources, vec![lamp.device_id()]);
    }
}
