//! Transcript accumulation, silence-triggered dispatch and execution
//! tracking for the voicelink client.

pub mod auto_send;
pub mod dispatch;
pub mod execution;
pub mod orchestrator;
pub mod poller;
pub mod transcript;

pub use auto_send::{AutoSendConfig, AutoSendState, AutoSendStatus, AutoSender, Dispatcher};
pub use dispatch::{answer_pending_question, ExecutionDispatcher};
pub use execution::{
    Answer, BackgroundExecuteResponse, CommandResult, ExecutionContext, ExecutionState,
    ResumeResponse, SessionHandle,
};
pub use orchestrator::{ApiError, OrchestratorApi, OrchestratorClient};
pub use poller::{ExecutionPoller, ExecutionSnapshot, PollConfig, PollError, PollPhase, PollSession};
pub use transcript::{SharedTranscript, TranscriptEvent, TranscriptSentence, TranscriptStore, UnsentText};
