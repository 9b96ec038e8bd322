use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::fmt::time::ChronoLocal;
use voicelink::{ConnectionManager, ConnectionState};
use voicelink_core::{
    answer_pending_question, AutoSender, ExecutionDispatcher, ExecutionPoller, ExecutionSnapshot,
    OrchestratorApi, OrchestratorClient, PollConfig, PollPhase, SharedTranscript,
};
use voicelink_service::capture::{CaptureSource, FileCapture};
use voicelink_service::config::{Config, DEFAULT_CHUNK_BYTES, DEFAULT_CHUNK_INTERVAL_MS};
use voicelink_service::session::route_inbound;

#[derive(Parser)]
#[command(version, about = "Stream speech to a transcription server and run what you say")]
struct Cli {
    /// Raw encoded audio to stream, or `-` for stdin
    #[arg(long, default_value = "-")]
    input: CaptureSource,
    /// Bytes per audio frame
    #[arg(long, default_value_t = DEFAULT_CHUNK_BYTES)]
    chunk_bytes: usize,
    /// Milliseconds between audio frames
    #[arg(long, default_value_t = DEFAULT_CHUNK_INTERVAL_MS)]
    chunk_interval_ms: u64,
    /// Overrides VOICELINK_SERVER_URL
    #[arg(long)]
    server_url: Option<String>,
    /// Overrides VOICELINK_ORCHESTRATOR_URL
    #[arg(long)]
    orchestrator_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();
    tracing::info!("Configuration loaded successfully. Starting voicelink...");

    let mut ws_config = voicelink::Config::builder();
    if let Some(url) = args.server_url.as_ref().or(config.server_url.as_ref()) {
        ws_config = ws_config.with_base_url(url);
    }
    let manager = Arc::new(
        voicelink::connect_with_config(ws_config.build())
            .await
            .context("Failed to start speech connection")?,
    );

    let orchestrator_url = args
        .orchestrator_url
        .clone()
        .unwrap_or_else(|| config.orchestrator_url.clone());
    let api: Arc<dyn OrchestratorApi> = Arc::new(
        OrchestratorClient::new(&orchestrator_url).context("Failed to build orchestrator client")?,
    );

    let transcript = SharedTranscript::new();
    let (dispatcher, mut sessions) = ExecutionDispatcher::new(api.clone());
    let auto_sender = Arc::new(AutoSender::spawn(
        config.auto_send,
        transcript.clone(),
        Arc::new(dispatcher),
    ));

    let router = {
        let sender = auto_sender.clone();
        tokio::spawn(route_inbound(manager.subscribe(), transcript.clone(), move || {
            sender.on_word()
        }))
    };
    let state_watcher = tokio::spawn(watch_connection(manager.clone()));

    let answers_from_stdin = args.input != CaptureSource::Stdin;
    let capture = FileCapture::new(
        args.input,
        args.chunk_bytes,
        Duration::from_millis(args.chunk_interval_ms),
    );
    let mut capture_task = {
        let manager = manager.clone();
        tokio::spawn(async move { capture.run(move |chunk| manager.send_audio(chunk)).await })
    };
    let mut capture_running = true;

    let (answer_tx, mut answers) = mpsc::channel::<String>(8);
    if answers_from_stdin {
        tokio::spawn(read_answers(answer_tx));
    } else {
        tracing::info!("audio is read from stdin, answers cannot be typed");
    }

    let mut poller = ExecutionPoller::new(api.clone(), PollConfig::default());
    let mut snapshots = poller.subscribe();
    let mut last_rendered = None;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            Some(session) = sessions.recv() => poller.track(Some(session)),
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                render(&snapshot, &mut last_rendered);
            }
            Some(answer) = answers.recv() => {
                match answer_pending_question(api.as_ref(), &poller.snapshot(), &answer).await {
                    Ok(Some(resumed)) => tracing::info!(state = %resumed.state, "answer submitted"),
                    Ok(None) => tracing::warn!("no execution is waiting for an answer"),
                    Err(e) => tracing::error!("Failed to submit answer: {}", e),
                }
            }
            finished = &mut capture_task, if capture_running => {
                capture_running = false;
                match finished {
                    Ok(Ok(chunks)) => tracing::info!(chunks, "capture finished"),
                    Ok(Err(e)) => tracing::error!("capture failed: {:#}", e),
                    Err(e) => tracing::error!("capture task failed: {}", e),
                }
            }
        }
    }

    auto_sender.reset();
    poller.stop();
    if capture_running {
        capture_task.abort();
    }
    if let Err(e) = manager.disconnect().await {
        tracing::warn!("failed to disconnect: {}", e);
    }
    router.abort();
    state_watcher.abort();

    let stats = manager.stats();
    tracing::info!(
        sent = stats.frames_sent(),
        received = stats.frames_received(),
        dropped = stats.frames_dropped(),
        "session finished"
    );
    Ok(())
}

async fn watch_connection(manager: Arc<ConnectionManager>) {
    let mut states = manager.state_changes();
    while states.changed().await.is_ok() {
        let state = *states.borrow_and_update();
        match state {
            ConnectionState::Failed => {
                tracing::error!("Failed to connect after multiple attempts.");
            }
            state => tracing::info!(%state, "connection"),
        }
    }
}

async fn read_answers(answers: mpsc::Sender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if answers.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("failed to read answer: {}", e);
                break;
            }
        }
    }
}

/// Logs the parts of a snapshot that changed since the last render.
fn render(snapshot: &ExecutionSnapshot, last: &mut Option<(PollPhase, Option<String>)>) {
    let version = snapshot
        .context
        .as_ref()
        .map(|c| format!("{}@{}", c.state, c.updated_at));
    let current = (snapshot.phase, version);
    if last.as_ref() == Some(&current) {
        return;
    }
    *last = Some(current);

    if let Some(error) = snapshot.error() {
        tracing::error!("{}", error);
        return;
    }
    let Some(context) = snapshot.context.as_ref() else {
        if let Some(session) = &snapshot.session {
            tracing::info!(%session, "waiting for first execution update");
        }
        return;
    };

    tracing::info!(session = %context.session_id, state = %context.state, "execution update");
    for (command, result) in context.commands.iter().zip(&context.results) {
        match &result.error {
            Some(error) => tracing::warn!(%command, "{}", error),
            None => tracing::info!(%command, "{}", result.output),
        }
    }
    if let Some(question) = context.pending_question() {
        match &context.question_context {
            Some(why) => tracing::info!("question: {} ({}) - type an answer and press enter", question, why),
            None => tracing::info!("question: {} - type an answer and press enter", question),
        }
    }
    if let Some(message) = &context.error_message {
        tracing::error!("execution failed: {}", message);
    }
}
