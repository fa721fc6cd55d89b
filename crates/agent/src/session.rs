//! The generation session: one streamed answer from prompt to history.
//!
//! ```text
//! Idle ──▶ Streaming ──▶ Completed
//!                  ├───▶ Cancelled
//!                  └───▶ Failed
//! ```
//!
//! The session writes [`OutputUnit`]s to a bounded channel that backs the
//! HTTP response body. Cancellation is cooperative: the signals are polled
//! once per received chunk and every [`STOP_POLL_INTERVAL`] while waiting on
//! the backend. An idle deadline covers opening the stream and each chunk.

use crate::composer::ComposedPrompt;
use crate::stream_event::OutputUnit;
use chatrelay_config::GenerationConfig;
use chatrelay_core::cancel::CancellationSignal;
use chatrelay_core::error::ProviderError;
use chatrelay_core::provider::{Provider, ProviderRequest};
use chatrelay_core::record::{ConversationTurn, THINK_END_MARKER, THINK_START_MARKER};
use chatrelay_memory::HistoryStore;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Capacity of the channel between a session and the response body.
pub const OUTPUT_BUFFER: usize = 64;

/// How often pending stops are checked while the backend is silent.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionOutcome {
    pub state: SessionState,
    /// Bytes of rendered output accepted by the client channel.
    pub bytes_forwarded: usize,
    pub history_committed: bool,
}

/// Replaces the first `<think>` and the first `</think>` of a stream with the
/// reasoning markers used in the history log.
#[derive(Debug, Default)]
pub struct ThinkTagRewriter {
    start_seen: bool,
    end_seen: bool,
}

impl ThinkTagRewriter {
    pub fn rewrite(&mut self, chunk: &str) -> String {
        let mut out = chunk.to_string();
        if !self.start_seen && out.contains("<think>") {
            out = out.replacen("<think>", &format!("\n{THINK_START_MARKER}\n"), 1);
            self.start_seen = true;
        }
        if !self.end_seen && out.contains("</think>") {
            out = out.replacen("</think>", &format!("\n{THINK_END_MARKER}\n"), 1);
            self.end_seen = true;
        }
        out
    }
}

/// Why the read loop stopped.
enum Exit {
    Cancelled(&'static str),
    Failed(ProviderError),
}

pub struct GenerationSession {
    id: String,
    provider: Arc<dyn Provider>,
    history: Arc<HistoryStore>,
    signal: Arc<CancellationSignal>,
    broadcast: Option<Arc<CancellationSignal>>,
    chunk_timeout: Duration,
    state: SessionState,
    bytes_forwarded: usize,
}

impl GenerationSession {
    pub fn new(
        id: impl Into<String>,
        provider: Arc<dyn Provider>,
        history: Arc<HistoryStore>,
        signal: Arc<CancellationSignal>,
    ) -> Self {
        Self {
            id: id.into(),
            provider,
            history,
            signal,
            broadcast: None,
            chunk_timeout: Duration::from_secs(300),
            state: SessionState::Idle,
            bytes_forwarded: 0,
        }
    }

    /// Also observe a stop signal shared with other sessions.
    pub fn with_broadcast(mut self, broadcast: Arc<CancellationSignal>) -> Self {
        self.broadcast = Some(broadcast);
        self
    }

    /// Fail the session if the backend sends nothing for this long.
    pub fn with_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_timeout = timeout;
        self
    }

    /// Run the session on a background task.
    ///
    /// Returns the output channel and a handle resolving to the outcome.
    pub fn spawn(
        self,
        user_message: String,
        prompt: ComposedPrompt,
        config: GenerationConfig,
    ) -> (mpsc::Receiver<OutputUnit>, JoinHandle<SessionOutcome>) {
        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        let handle = tokio::spawn(async move { self.run(&user_message, prompt, &config, tx).await });
        (rx, handle)
    }

    /// Drive the session to a terminal state.
    pub async fn run(
        mut self,
        user_message: &str,
        prompt: ComposedPrompt,
        config: &GenerationConfig,
        tx: mpsc::Sender<OutputUnit>,
    ) -> SessionOutcome {
        info!(
            session = %self.id,
            model = %config.model_name,
            sections = prompt.sections.len(),
            "Generation started"
        );

        let exit = self.stream(prompt, config, &tx).await;

        let mut history_committed = false;
        match exit {
            Ok(full_response) => {
                self.state = SessionState::Completed;
                let turn = ConversationTurn::now(user_message, full_response.trim());
                match self.history.append(&turn).await {
                    Ok(()) => history_committed = true,
                    Err(e) => error!(session = %self.id, error = %e, "Failed to save conversation"),
                }
                info!(session = %self.id, bytes = self.bytes_forwarded, "Generation completed");
            }
            Err(Exit::Cancelled(reason)) => {
                self.state = SessionState::Cancelled;
                warn!(session = %self.id, reason, "Generation stopped");
            }
            Err(Exit::Failed(e)) => {
                self.state = SessionState::Failed;
                error!(session = %self.id, error = %e, "Generation failed");
                self.forward(&tx, OutputUnit::Error(e.to_string())).await;
            }
        }

        SessionOutcome {
            state: self.state,
            bytes_forwarded: self.bytes_forwarded,
            history_committed,
        }
    }

    /// Emit the banner, then stream model tokens. Returns the accumulated
    /// response on completion.
    async fn stream(
        &mut self,
        prompt: ComposedPrompt,
        config: &GenerationConfig,
        tx: &mpsc::Sender<OutputUnit>,
    ) -> Result<String, Exit> {
        let mut header = vec![OutputUnit::Banner];
        header.extend(prompt.sections.into_iter().map(OutputUnit::Section));
        header.push(OutputUnit::ThinkingHeader);
        for unit in header {
            if !self.forward(tx, unit).await {
                return Err(Exit::Cancelled("client disconnected"));
            }
        }

        let request = ProviderRequest::single_user(&config.model_name, prompt.prompt);
        let mut upstream = self
            .wait_backend(self.provider.stream(request))
            .await?
            .map_err(Exit::Failed)?;
        self.state = SessionState::Streaming;

        let mut rewriter = ThinkTagRewriter::default();
        let mut full_response = String::new();

        loop {
            let chunk = match self.wait_backend(upstream.recv()).await? {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(Exit::Failed(e)),
                None => break,
            };

            if self.stop_requested() {
                return Err(Exit::Cancelled("stop requested"));
            }

            if let Some(content) = chunk.content.as_deref() {
                let text = rewriter.rewrite(content);
                full_response.push_str(&text);
                if !self.forward(tx, OutputUnit::Token(text)).await {
                    return Err(Exit::Cancelled("client disconnected"));
                }
            }

            if chunk.done {
                break;
            }
        }

        Ok(full_response)
    }

    /// Await the backend, checking for stops while it is silent.
    ///
    /// Fails with a timeout when nothing arrives within `chunk_timeout`.
    async fn wait_backend<T>(&self, fut: impl Future<Output = T>) -> Result<T, Exit> {
        tokio::pin!(fut);
        let deadline = tokio::time::sleep(self.chunk_timeout);
        tokio::pin!(deadline);
        let mut poll = tokio::time::interval_at(Instant::now() + STOP_POLL_INTERVAL, STOP_POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                out = &mut fut => return Ok(out),
                _ = &mut deadline => {
                    return Err(Exit::Failed(ProviderError::Timeout(format!(
                        "no data from backend for {}s",
                        self.chunk_timeout.as_secs()
                    ))));
                }
                _ = poll.tick() => {
                    if self.stop_requested() {
                        return Err(Exit::Cancelled("stop requested while waiting on backend"));
                    }
                }
            }
        }
    }

    /// Consume a pending stop on this session's signal, then the shared one.
    fn stop_requested(&self) -> bool {
        self.signal.check_and_clear()
            || self
                .broadcast
                .as_ref()
                .is_some_and(|shared| shared.check_and_clear())
    }

    /// Send one unit; `false` when the receiver is gone.
    async fn forward(&mut self, tx: &mpsc::Sender<OutputUnit>, unit: OutputUnit) -> bool {
        let len = unit.render().len();
        debug!(session = %self.id, kind = unit.kind(), len, "Forwarding unit");
        match tx.send(unit).await {
            Ok(()) => {
                self.bytes_forwarded += len;
                true
            }
            Err(_) => false,
        }
    }
}
