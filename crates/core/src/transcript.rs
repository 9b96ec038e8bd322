use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    Word(String),
    SentenceEnded(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSentence {
    pub text: String,
    /// When the terminating word arrived.
    pub timestamp: DateTime<Utc>,
    pub sent: bool,
}

/// A batch of unsent text taken from the store.
///
/// `through` is the number of sentences the store held when the batch was
/// taken; marking the batch sent touches nothing at or past it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsentText {
    pub text: String,
    through: usize,
}

impl UnsentText {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Accumulates streamed text tokens into sentences and tracks which
/// sentences were already dispatched.
#[derive(Debug, Default)]
pub struct TranscriptStore {
    sentences: Vec<TranscriptSentence>,
    current: Vec<String>,
    words_received: usize,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, token: &str) -> Vec<TranscriptEvent> {
        let word = token.trim();
        if word.is_empty() {
            return vec![];
        }

        self.words_received += 1;
        self.current.push(word.to_string());
        let mut events = vec![TranscriptEvent::Word(word.to_string())];

        if word.ends_with(SENTENCE_TERMINATORS) {
            let text = self.current.join(" ");
            self.current.clear();
            self.sentences.push(TranscriptSentence {
                text: text.clone(),
                timestamp: Utc::now(),
                sent: false,
            });
            events.push(TranscriptEvent::SentenceEnded(text));
        }
        events
    }

    pub fn unsent(&self) -> UnsentText {
        let text = self
            .sentences
            .iter()
            .filter(|s| !s.sent)
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        UnsentText {
            text,
            through: self.sentences.len(),
        }
    }

    pub fn mark_sent(&mut self, batch: &UnsentText) {
        let through = batch.through.min(self.sentences.len());
        for sentence in &mut self.sentences[..through] {
            sentence.sent = true;
        }
    }

    pub fn sentences(&self) -> &[TranscriptSentence] {
        &self.sentences
    }

    /// Words of the sentence still in progress.
    pub fn current_words(&self) -> &[String] {
        &self.current
    }

    pub fn words_received(&self) -> usize {
        self.words_received
    }

    pub fn reset(&mut self) {
        self.sentences.clear();
        self.current.clear();
        self.words_received = 0;
    }
}

/// Cloneable handle to a store shared between the inbound router and the
/// auto-send coordinator.
#[derive(Debug, Clone, Default)]
pub struct SharedTranscript(Arc<Mutex<TranscriptStore>>);

impl SharedTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&self, token: &str) -> Vec<TranscriptEvent> {
        self.lock().ingest(token)
    }

    pub fn unsent(&self) -> UnsentText {
        self.lock().unsent()
    }

    pub fn mark_sent(&self, batch: &UnsentText) {
        self.lock().mark_sent(batch)
    }

    pub fn sentences(&self) -> Vec<TranscriptSentence> {
        self.lock().sentences().to_vec()
    }

    pub fn current_words(&self) -> Vec<String> {
        self.lock().current_words().to_vec()
    }

    pub fn words_received(&self) -> usize {
        self.lock().words_received()
    }

    pub fn reset(&self) {
        self.lock().reset()
    }

    fn lock(&self) -> MutexGuard<'_, TranscriptStore> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
