//! HDMI Matrix Command-Line Tool
//!
//! Controls a 4x4 HDMI matrix switch over TCP, and can stand in for one.
//!
//! Usage:
//!   hdmx status            Show every output (probing unknown ones)
//!   hdmx status 2          Show OUT2
//!   hdmx set 2 3           Route IN3 to OUT2
//!   hdmx send OUT1_PLUS    Send a raw table command by key
//!   hdmx watch             Print unsolicited updates until Ctrl-C
//!   hdmx simulate          Run a virtual switch on 127.0.0.1:1110

mod settings;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use hdmx_client::MatrixClient;
use hdmx_protocol::{InputSource, MatrixCommand, OutputPort};
use hdmx_sim::{MatrixServer, ResponseFormat, VirtualMatrix, VirtualMatrixEvent};
use settings::Settings;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often `watch` checks that the switch is still there
const WATCH_POLL: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Control a 4x4 HDMI matrix switch
#[derive(Parser)]
#[command(name = "hdmx", version, about)]
struct Cli {
    /// Switch address (overrides the settings file)
    #[arg(long, env = "HDMX_HOST")]
    host: Option<String>,

    /// Switch TCP control port (overrides the settings file)
    #[arg(long, env = "HDMX_PORT")]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show which input an output is showing
    Status {
        /// Output 1-4; all outputs when omitted
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        output: Option<u8>,

        /// Report "unknown" rather than guessing when the switch stays silent
        #[arg(long)]
        safe: bool,
    },
    /// Route an input to an output
    Set {
        /// Output 1-4
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        output: u8,
        /// Input 1-4
        #[arg(value_parser = clap::value_parser!(u8).range(1..=4))]
        input: u8,
    },
    /// Send a table command by key, e.g. OUT2_IN3 or OUT1_MINUS
    Send { key: String },
    /// Print every unsolicited route change until Ctrl-C
    Watch,
    /// Run a simulated switch
    Simulate {
        /// Listen address (default from settings)
        #[arg(long)]
        listen: Option<String>,

        /// Status line format: legacy, named-pair, bypass-route, digit-pair, silent
        #[arg(long)]
        format: Option<ResponseFormat>,
    },
    /// Show the effective settings
    Config {
        /// Write them to the settings file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hdmx=info,hdmx_protocol=info,hdmx_client=info,hdmx_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load();
    if let Some(host) = cli.host {
        settings.host = host;
    }
    if let Some(port) = cli.port {
        settings.port = port;
    }

    match cli.command {
        Command::Status { output, safe } => status(&settings, output, safe).await,
        Command::Set { output, input } => {
            let client = connect(&settings).await?;
            let result = client.set_input_source(output, input).await;
            client.disconnect().await;
            result.with_context(|| format!("Failed to route IN{} to OUT{}", input, output))?;
            println!("OUT{}: IN{}", output, input);
            Ok(())
        }
        Command::Send { key } => {
            let command = MatrixCommand::from_key(&key)?;
            let client = connect(&settings).await?;
            let result = client.send_command(command).await;
            client.disconnect().await;
            result.with_context(|| format!("Failed to send {}", command))?;
            println!("Sent {}", command);
            Ok(())
        }
        Command::Watch => watch(&settings).await,
        Command::Simulate { listen, format } => simulate(&settings, listen, format).await,
        Command::Config { save } => {
            if save {
                let path = settings.save()?;
                println!("Saved to {}", path.display());
            } else if let Some(path) = Settings::settings_path() {
                println!("# {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn connect(settings: &Settings) -> Result<MatrixClient> {
    let client = MatrixClient::new(settings.client.clone());
    client
        .connect(&settings.host, settings.port)
        .await
        .with_context(|| format!("Could not reach matrix switch at {}:{}", settings.host, settings.port))?;
    Ok(client)
}

fn describe(input: Option<InputSource>) -> String {
    input.map_or_else(|| "unknown".to_string(), |input| input.label())
}

async fn status(settings: &Settings, output: Option<u8>, safe: bool) -> Result<()> {
    let client = connect(settings).await?;

    match output {
        Some(output) => {
            let input = if safe {
                client.get_current_status_safe(output).await
            } else {
                client.get_current_status(output).await
            };
            println!("OUT{}: {}", output, describe(input));
        }
        None => {
            for output in OutputPort::all() {
                let input = if safe {
                    client.get_current_status_safe(output.get()).await
                } else {
                    client.get_current_status(output.get()).await
                };
                println!("{}: {}", output, describe(input));
            }
        }
    }

    let connected = client.is_connected();
    client.disconnect().await;
    if !connected {
        bail!("Lost connection to matrix switch");
    }
    Ok(())
}

async fn watch(settings: &Settings) -> Result<()> {
    let client = connect(settings).await?;
    for output in OutputPort::all() {
        client.register_callback(output.get(), move |code| {
            match InputSource::from_device_code(code) {
                Ok(input) => println!("{}: {}", output, input),
                Err(e) => debug!("Ignoring callback payload: {}", e),
            }
        })?;
    }
    info!(
        "Watching {}:{} for route changes, Ctrl-C to stop",
        settings.host, settings.port
    );

    let mut poll = tokio::time::interval(WATCH_POLL);
    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                break signal.context("Failed to listen for Ctrl-C");
            }
            _ = poll.tick() => {
                if !client.is_connected() {
                    break Err(anyhow::anyhow!("Matrix switch closed the connection"));
                }
            }
        }
    };

    client.disconnect().await;
    result
}

async fn simulate(
    settings: &Settings,
    listen: Option<String>,
    format: Option<ResponseFormat>,
) -> Result<()> {
    let listen = listen.unwrap_or_else(|| settings.simulator.listen.clone());
    let mut config = settings.simulator.matrix.clone();
    if let Some(format) = format {
        config.format = format;
    }

    let server = MatrixServer::bind(listen.as_str(), VirtualMatrix::from_config(config))
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;
    let mut events = server.subscribe();
    println!("Simulated matrix listening on {}", server.local_addr());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            event = events.recv() => match event {
                Ok(VirtualMatrixEvent::CommandReceived(command)) => println!("<- {}", command),
                Ok(VirtualMatrixEvent::RouteChanged { output, input }) => {
                    println!("{}: {}", output, input)
                }
                Ok(VirtualMatrixEvent::ClientConnected) => println!("Client connected"),
                Ok(VirtualMatrixEvent::ClientDisconnected) => println!("Client disconnected"),
                Err(RecvError::Lagged(n)) => debug!("Missed {} simulator events", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    if let Some(matrix) = server.shutdown().await {
        println!("Final routes: {}", matrix.state_summary());
    }
    Ok(())
}
