use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::auto_send::Dispatcher;
use crate::execution::{ResumeResponse, SessionHandle};
use crate::orchestrator::{ApiError, OrchestratorApi};
use crate::poller::ExecutionSnapshot;

/// Starts a background execution for each dispatched transcript and
/// publishes the returned handle so the poller can follow it.
pub struct ExecutionDispatcher {
    api: Arc<dyn OrchestratorApi>,
    sessions: mpsc::UnboundedSender<SessionHandle>,
}

impl ExecutionDispatcher {
    pub fn new(api: Arc<dyn OrchestratorApi>) -> (Self, mpsc::UnboundedReceiver<SessionHandle>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        (Self { api, sessions }, rx)
    }
}

#[async_trait]
impl Dispatcher for ExecutionDispatcher {
    async fn dispatch(&self, text: String) -> anyhow::Result<()> {
        let started = self
            .api
            .execute_background(&text)
            .await
            .context("failed to start background execution")?;
        tracing::info!(session = %started.session_id, state = %started.state, "execution started");

        if self.sessions.send(started.session_id).is_err() {
            tracing::warn!("no listener for new execution sessions");
        }
        Ok(())
    }
}

/// Submits `answer` to the execution in `snapshot` if it is waiting on a
/// question. Returns `Ok(None)` when there is nothing to answer.
pub async fn answer_pending_question(
    api: &dyn OrchestratorApi,
    snapshot: &ExecutionSnapshot,
    answer: &str,
) -> Result<Option<ResumeResponse>, ApiError> {
    let Some(context) = snapshot.context.as_ref() else {
        return Ok(None);
    };
    let Some(question) = context.pending_question() else {
        return Ok(None);
    };

    tracing::info!(session = %context.session_id, question, "submitting answer");
    let resumed = api.resume(&context.session_id, answer).await?;
    Ok(Some(resumed))
}
