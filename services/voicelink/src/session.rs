use tokio::sync::broadcast::error::RecvError;
use voicelink::{EventRx, Inbound};
use voicelink_core::{SharedTranscript, TranscriptEvent};

/// Feeds inbound transcript tokens into the store and reports each word to
/// `on_word`. Runs until the connection manager goes away.
pub async fn route_inbound(
    mut events: EventRx,
    transcript: SharedTranscript,
    on_word: impl Fn() + Send,
) {
    loop {
        let inbound = match events.recv().await {
            Ok(inbound) => inbound,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "inbound router fell behind, messages dropped");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match inbound {
            Inbound::Text(token) => {
                for event in transcript.ingest(&token) {
                    match event {
                        TranscriptEvent::Word(word) => {
                            tracing::trace!(%word, "word");
                            on_word();
                        }
                        TranscriptEvent::SentenceEnded(sentence) => {
                            tracing::info!("transcript: {}", sentence);
                        }
                    }
                }
            }
            Inbound::Audio(bytes) => {
                tracing::trace!(len = bytes.len(), "audio received, no playback sink");
            }
            Inbound::ServerError(error) => {
                tracing::error!("speech server reported an error: {}", error);
            }
            Inbound::Observed(message) => {
                tracing::debug!(kind = %message.kind(), "observed message");
            }
        }
    }
    tracing::debug!("inbound router stopped");
}
