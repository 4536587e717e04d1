use anyhow::{Context, Result};
use carelink_audio::{AudioCapturePipeline, CpalAudioSource, IngestClient};
use carelink_channel::{ConstantDelay, PersistentMessageChannel, WsConnector};
use carelink_core::{AppConfig, ChatMessage, EnvToken, StreamEvent, TokenProvider};
use carelink_stream::ReplyStream;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const TOKEN_ENV_VAR: &str = "CARELINK_TOKEN";

#[derive(Parser)]
#[command(name = "carelink", about = "Clinical portal realtime client")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream an assistant reply for a prompt
    Ask { message: String },
    /// Record from the microphone and print the transcript
    Transcribe {
        /// Recording length in seconds
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },
    /// Open a live chat channel and relay stdin lines to a peer
    Chat {
        /// Identity to connect as
        #[arg(long)]
        user: String,
        /// Peer receiving the messages
        peer: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from_file(&cli.config)
        .with_context(|| format!("failed to load config from {:?}", cli.config))?;

    let env_filter =
        EnvFilter::try_new(&config.general.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let token: Arc<dyn TokenProvider> = Arc::new(EnvToken::new(TOKEN_ENV_VAR));

    match cli.command {
        Command::Ask { message } => ask(&config, token, &message).await,
        Command::Transcribe { seconds } => transcribe(&config, token, seconds).await,
        Command::Chat { user, peer } => chat(&config, token, user, peer).await,
    }
}

async fn ask(config: &AppConfig, token: Arc<dyn TokenProvider>, message: &str) -> Result<()> {
    let stream = ReplyStream::new(config.stream.endpoint.clone(), token);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_flag.store(true, Ordering::Relaxed);
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                StreamEvent::Status { message } => tracing::info!("assistant: {message}"),
                StreamEvent::Metadata { payload } => tracing::debug!(?payload, "metadata"),
                StreamEvent::Error { message } => tracing::warn!("assistant error: {message}"),
                StreamEvent::Token { .. } | StreamEvent::Done | StreamEvent::Unrecognized => {}
            }
        }
    });

    let summary = stream
        .stream(message, events_tx, cancel)
        .await
        .context("reply stream failed")?;
    let _ = printer.await;

    println!("{}", summary.visible_text);
    tracing::debug!(outcome = ?summary.outcome, "reply finished");
    Ok(())
}

async fn transcribe(config: &AppConfig, token: Arc<dyn TokenProvider>, seconds: u64) -> Result<()> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let source = CpalAudioSource::new(config.audio.device_name.clone());
    let mut pipeline = AudioCapturePipeline::new(Box::new(source), done_tx);

    pipeline.start().context("failed to start recording")?;
    tracing::info!("recording for {seconds}s");
    tokio::time::sleep(Duration::from_secs(seconds)).await;
    pipeline.stop();

    let Ok(buffer) = done_rx.try_recv() else {
        tracing::warn!("no audio captured");
        return Ok(());
    };

    tracing::info!(samples = buffer.len(), "uploading recording");
    let ingest = IngestClient::new(config.audio.ingest_endpoint.clone(), token);
    let text = ingest
        .transcribe(&buffer)
        .await
        .context("transcription failed")?;
    println!("{text}");
    Ok(())
}

async fn chat(
    config: &AppConfig,
    token: Arc<dyn TokenProvider>,
    user: String,
    peer: String,
) -> Result<()> {
    let connector = Arc::new(WsConnector::new(config.channel.endpoint.clone(), token));
    let policy = Arc::new(ConstantDelay::new(Duration::from_millis(
        config.channel.reconnect_delay_ms,
    )));
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let mut channel = PersistentMessageChannel::open(connector, user.clone(), policy, inbound_tx);

    tracing::info!("chatting as {user} with {peer} (ctrl-c to leave)");
    let mut stdin_lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            inbound = inbound_rx.recv() => {
                match inbound {
                    Some(message) => println!("{}: {}", message.sender_id, message.message),
                    None => break,
                }
            }
            line = stdin_lines.next_line() => {
                match line.context("stdin read failed")? {
                    Some(line) if !line.trim().is_empty() => {
                        let message = ChatMessage {
                            id: None,
                            sender_id: user.clone(),
                            receiver_id: peer.clone(),
                            message: line,
                            created_at: None,
                        };
                        if let Err(e) = channel.send(message) {
                            tracing::warn!("message not delivered: {e}");
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    channel.close().await;
    Ok(())
}
