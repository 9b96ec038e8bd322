//! Silence-triggered dispatch of unsent transcript text.
//!
//! Each word re-arms a debounce deadline. When the deadline passes with
//! enough words counted and unsent text available, the text is handed to a
//! [`Dispatcher`]. A `sending` lock guards the whole check, dispatch and
//! mark-sent sequence; words that arrive while it is held are dropped.
//! Resetting releases the lock but lets a dispatch already in flight finish
//! and mark its batch sent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::transcript::{SharedTranscript, UnsentText};

pub const DEFAULT_SILENCE_THRESHOLD: Duration = Duration::from_millis(1500);
pub const DEFAULT_MIN_WORDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoSendConfig {
    pub silence_threshold: Duration,
    pub min_words: usize,
}

impl Default for AutoSendConfig {
    fn default() -> Self {
        Self {
            silence_threshold: DEFAULT_SILENCE_THRESHOLD,
            min_words: DEFAULT_MIN_WORDS,
        }
    }
}

/// Receives text the coordinator decided to send.
///
/// An error leaves the text unsent; it is not retried.
#[async_trait]
pub trait Dispatcher: Send + Sync + 'static {
    async fn dispatch(&self, text: String) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutoSendStatus {
    pub word_count: usize,
    pub sending: bool,
    pub armed: bool,
}

/// Counter, debounce deadline and lock, without any timer or task.
#[derive(Debug)]
pub struct AutoSendState {
    config: AutoSendConfig,
    word_count: usize,
    deadline: Option<Instant>,
    sending: bool,
}

impl AutoSendState {
    pub fn new(config: AutoSendConfig) -> Self {
        Self {
            config,
            word_count: 0,
            deadline: None,
            sending: false,
        }
    }

    /// Counts a word and re-arms the deadline. Returns false when the word
    /// was dropped because a dispatch is in flight.
    pub fn on_word(&mut self, now: Instant) -> bool {
        if self.sending {
            return false;
        }
        self.word_count += 1;
        self.deadline = Some(now + self.config.silence_threshold);
        true
    }

    /// The deadline passed. Returns true when a dispatch should start, in
    /// which case the lock is now held.
    pub fn on_deadline(&mut self, has_text: bool) -> bool {
        self.deadline = None;
        if self.sending || self.word_count < self.config.min_words || !has_text {
            return false;
        }
        self.sending = true;
        true
    }

    /// A dispatch finished, successfully or not.
    pub fn finish(&mut self) {
        self.word_count = 0;
        self.sending = false;
    }

    pub fn reset(&mut self) {
        self.word_count = 0;
        self.deadline = None;
        self.sending = false;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn status(&self) -> AutoSendStatus {
        AutoSendStatus {
            word_count: self.word_count,
            sending: self.sending,
            armed: self.deadline.is_some(),
        }
    }
}

enum Command {
    Word,
    Reset,
}

/// Handle to the coordinator task. Dropping it stops the task; a dispatch
/// already in flight still runs to completion.
pub struct AutoSender {
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<AutoSendStatus>,
    task: JoinHandle<()>,
}

impl AutoSender {
    pub fn spawn(
        config: AutoSendConfig,
        transcript: SharedTranscript,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(AutoSendStatus::default());
        let actor = Coordinator {
            state: AutoSendState::new(config),
            transcript,
            dispatcher,
            cmd_rx,
            status_tx,
            inflight: None,
        };
        let task = tokio::spawn(actor.run());
        Self {
            cmd_tx,
            status_rx,
            task,
        }
    }

    pub fn on_word(&self) {
        if self.cmd_tx.send(Command::Word).is_err() {
            tracing::debug!("auto-send coordinator is gone, word ignored");
        }
    }

    /// Cancels the pending deadline, zeroes the counter and releases the lock.
    /// An in-flight dispatch is not cancelled.
    pub fn reset(&self) {
        if self.cmd_tx.send(Command::Reset).is_err() {
            tracing::debug!("auto-send coordinator is gone, reset ignored");
        }
    }

    pub fn status(&self) -> AutoSendStatus {
        *self.status_rx.borrow()
    }

    pub fn status_changes(&self) -> watch::Receiver<AutoSendStatus> {
        self.status_rx.clone()
    }
}

impl Drop for AutoSender {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Coordinator {
    state: AutoSendState,
    transcript: SharedTranscript,
    dispatcher: Arc<dyn Dispatcher>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<AutoSendStatus>,
    inflight: Option<JoinHandle<anyhow::Result<()>>>,
}

impl Coordinator {
    async fn run(mut self) {
        loop {
            self.publish();
            let deadline = self.state.deadline();
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Word) => {
                        if !self.state.on_word(Instant::now()) {
                            tracing::trace!("dispatch in flight, word dropped");
                        }
                    }
                    Some(Command::Reset) => self.reset(),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_silence();
                }
                joined = wait_for(&mut self.inflight), if self.inflight.is_some() => {
                    self.inflight = None;
                    self.on_dispatched(joined);
                }
            }
        }
        tracing::debug!("auto-send coordinator stopped");
    }

    fn on_silence(&mut self) {
        let batch = self.transcript.unsent();
        if !self.state.on_deadline(!batch.is_empty()) {
            return;
        }

        tracing::info!(chars = batch.text.len(), "silence detected, dispatching transcript");
        let dispatcher = self.dispatcher.clone();
        let transcript = self.transcript.clone();
        self.inflight = Some(tokio::spawn(async move {
            dispatch_batch(dispatcher.as_ref(), &transcript, batch).await
        }));
    }

    fn on_dispatched(&mut self, joined: Result<anyhow::Result<()>, tokio::task::JoinError>) {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("auto-send dispatch failed: {:#}", e),
            Err(e) => tracing::error!("auto-send dispatch task failed: {}", e),
        }
        self.state.finish();
    }

    fn reset(&mut self) {
        // detach, so a request that already left still marks its batch sent
        if self.inflight.take().is_some() {
            tracing::debug!("reset during dispatch, letting it finish");
        }
        self.state.reset();
    }

    fn publish(&self) {
        let status = self.state.status();
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Sends one batch and marks it sent on success.
async fn dispatch_batch(
    dispatcher: &dyn Dispatcher,
    transcript: &SharedTranscript,
    batch: UnsentText,
) -> anyhow::Result<()> {
    dispatcher.dispatch(batch.text.clone()).await?;
    transcript.mark_sent(&batch);
    tracing::debug!("transcript batch marked sent");
    Ok(())
}

async fn wait_for(
    inflight: &mut Option<JoinHandle<anyhow::Result<()>>>,
) -> Result<anyhow::Result<()>, tokio::task::JoinError> {
    match inflight {
        Some(task) => task.await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Notify;
    use tokio::time::sleep;

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<String>>,
        fail: bool,
        gate: Option<Arc<Notify>>,
    }

    impl RecordingDispatcher {
        fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn dispatch(&self, text: String) -> anyhow::Result<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.sent.lock().unwrap().push(text);
            if self.fail {
                anyhow::bail!("orchestrator unavailable");
            }
            Ok(())
        }
    }

    fn speak(transcript: &SharedTranscript, sender: &AutoSender, text: &str) {
        for token in text.split(' ') {
            for event in transcript.ingest(token) {
                if let crate::transcript::TranscriptEvent::Word(_) = event {
                    sender.on_word();
                }
            }
        }
    }

    fn setup(dispatcher: RecordingDispatcher) -> (SharedTranscript, AutoSender, Arc<RecordingDispatcher>) {
        let transcript = SharedTranscript::new();
        let dispatcher = Arc::new(dispatcher);
        let sender = AutoSender::spawn(
            AutoSendConfig::default(),
            transcript.clone(),
            dispatcher.clone(),
        );
        (transcript, sender, dispatcher)
    }

    #[test]
    fn test_state_counts_and_arms() {
        let mut state = AutoSendState::new(AutoSendConfig::default());
        let now = Instant::now();
        assert!(state.on_word(now));
        assert!(state.on_word(now));
        assert_eq!(state.deadline(), Some(now + DEFAULT_SILENCE_THRESHOLD));
        assert!(!state.on_deadline(true));
        assert_eq!(state.status().word_count, 2);
        assert!(!state.status().armed);
    }

    #[test]
    fn test_state_lock_drops_words() {
        let mut state = AutoSendState::new(AutoSendConfig::default());
        let now = Instant::now();
        for _ in 0..3 {
            state.on_word(now);
        }
        assert!(!state.on_deadline(false), "no unsent text, no dispatch");
        assert!(state.on_deadline(true));
        assert!(state.status().sending);

        assert!(!state.on_word(now));
        assert_eq!(state.status().word_count, 3);
        assert_eq!(state.deadline(), None);

        state.finish();
        assert_eq!(state.status(), AutoSendStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_words_never_dispatch() {
        let (transcript, sender, dispatcher) = setup(RecordingDispatcher::default());
        speak(&transcript, &sender, "stop.");
        speak(&transcript, &sender, "now.");

        sleep(Duration::from_millis(5000)).await;
        assert!(dispatcher.sent().is_empty());
        assert_eq!(sender.status().word_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_word_restarts_window_and_dispatches() {
        let (transcript, sender, dispatcher) = setup(RecordingDispatcher::default());
        speak(&transcript, &sender, "show the");
        sleep(Duration::from_millis(1600)).await;
        assert!(dispatcher.sent().is_empty());

        speak(&transcript, &sender, "logs.");
        sleep(Duration::from_millis(1400)).await;
        assert!(dispatcher.sent().is_empty());

        sleep(Duration::from_millis(200)).await;
        assert_eq!(dispatcher.sent(), vec!["show the logs.".to_string()]);
        assert!(transcript.unsent().is_empty());
        assert_eq!(sender.status(), AutoSendStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_words_during_dispatch_are_dropped() {
        let gate = Arc::new(Notify::new());
        let (transcript, sender, dispatcher) = setup(RecordingDispatcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });

        speak(&transcript, &sender, "deploy to staging.");
        sleep(Duration::from_millis(1600)).await;
        assert!(sender.status().sending);

        speak(&transcript, &sender, "and run migrations.");
        sleep(Duration::from_millis(10)).await;
        let status = sender.status();
        assert_eq!(status.word_count, 3);
        assert!(!status.armed);

        gate.notify_one();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(sender.status(), AutoSendStatus::default());
        assert_eq!(dispatcher.sent(), vec!["deploy to staging.".to_string()]);
        // finished during the dispatch, so it was not part of the batch
        assert_eq!(transcript.unsent().text, "and run migrations.");

        // nothing re-arms until a new word arrives
        sleep(Duration::from_millis(5000)).await;
        assert_eq!(dispatcher.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dispatch_releases_lock_and_keeps_text() {
        let (transcript, sender, dispatcher) = setup(RecordingDispatcher {
            fail: true,
            ..Default::default()
        });

        speak(&transcript, &sender, "restart the worker.");
        sleep(Duration::from_millis(1600)).await;
        assert_eq!(dispatcher.sent().len(), 1);
        assert_eq!(sender.status(), AutoSendStatus::default());
        assert_eq!(transcript.unsent().text, "restart the worker.");

        speak(&transcript, &sender, "please");
        sleep(Duration::from_millis(1600)).await;
        assert_eq!(dispatcher.sent().len(), 1, "one word is below the minimum");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_cancels_pending_window() {
        let (transcript, sender, dispatcher) = setup(RecordingDispatcher::default());
        speak(&transcript, &sender, "tail the logs.");
        sleep(Duration::from_millis(500)).await;
        sender.reset();

        sleep(Duration::from_millis(5000)).await;
        assert!(dispatcher.sent().is_empty());
        assert_eq!(sender.status(), AutoSendStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_releases_lock_mid_dispatch() {
        let gate = Arc::new(Notify::new());
        let (transcript, sender, dispatcher) = setup(RecordingDispatcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });

        speak(&transcript, &sender, "scale it up.");
        sleep(Duration::from_millis(1600)).await;
        assert!(sender.status().sending);

        sender.reset();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(sender.status(), AutoSendStatus::default());

        // the request already left, so it still completes and marks the text
        gate.notify_one();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(dispatcher.sent(), vec!["scale it up.".to_string()]);
        assert!(transcript.unsent().is_empty());
        assert_eq!(sender.status(), AutoSendStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_mid_dispatch_does_not_resend_batch() {
        let gate = Arc::new(Notify::new());
        let (transcript, sender, dispatcher) = setup(RecordingDispatcher {
            gate: Some(gate.clone()),
            ..Default::default()
        });

        speak(&transcript, &sender, "restart the db.");
        sleep(Duration::from_millis(1600)).await;
        sender.reset();
        sleep(Duration::from_millis(10)).await;
        gate.notify_one();
        sleep(Duration::from_millis(10)).await;

        speak(&transcript, &sender, "and clear cache.");
        sleep(Duration::from_millis(1600)).await;
        gate.notify_one();
        sleep(Duration::from_millis(10)).await;

        assert_eq!(
            dispatcher.sent(),
            vec!["restart the db.".to_string(), "and clear cache.".to_string()]
        );
        assert!(transcript.unsent().is_empty());
    }
}
