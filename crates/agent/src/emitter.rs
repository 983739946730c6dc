//! Producer and consumer ends of a turn's event stream.
//!
//! The loop owns a [`StreamEmitter`] and pushes events into a bounded
//! channel. The consumer either reads every [`AgentStreamEvent`] (CLI,
//! logging) or opens a [`TextStream`] that yields only answer text.
//!
//! A failed send means the consumer was dropped. The emitter remembers this
//! so the loop can stop early; nothing already committed is undone.

use crate::stream_event::AgentStreamEvent;
use futures::{Stream, StreamExt};
use tides_core::error::ProviderError;
use tides_core::locale::Locale;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Capacity of the per-turn event channel.
pub const CHANNEL_CAPACITY: usize = 128;

pub struct StreamEmitter {
    tx: mpsc::Sender<AgentStreamEvent>,
    locale: Locale,
    streamed: String,
    caller_gone: bool,
    separate_next: bool,
}

impl StreamEmitter {
    /// Create an emitter and the receiver its events arrive on.
    pub fn channel(locale: Locale) -> (Self, mpsc::Receiver<AgentStreamEvent>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let emitter = Self {
            tx,
            locale,
            streamed: String::new(),
            caller_gone: false,
            separate_next: false,
        };
        (emitter, rx)
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Mark a step boundary. Text of the next step is separated from what
    /// was already streamed by a single space.
    pub fn begin_step(&mut self) {
        if !self.streamed.is_empty() {
            self.separate_next = true;
        }
    }

    /// Stream a text delta. Returns `false` once the caller is gone.
    pub async fn text(&mut self, delta: &str) -> bool {
        if self.caller_gone {
            return false;
        }
        if delta.is_empty() {
            return true;
        }

        let mut content = String::with_capacity(delta.len() + 1);
        if std::mem::take(&mut self.separate_next)
            && !self.streamed.ends_with(char::is_whitespace)
            && !delta.starts_with(char::is_whitespace)
        {
            content.push(' ');
        }
        content.push_str(delta);

        let sent = self
            .send(AgentStreamEvent::Chunk {
                content: content.clone(),
            })
            .await;
        if sent {
            self.streamed.push_str(&content);
        }
        sent
    }

    /// Send a non-text event. Returns `false` once the caller is gone.
    pub async fn event(&mut self, event: AgentStreamEvent) -> bool {
        self.send(event).await
    }

    /// Report a model failure and end the stream.
    ///
    /// When the caller already heard part of an answer, a localized apology
    /// is streamed first so the spoken reply does not stop mid-sentence.
    pub async fn fail(&mut self, error: &ProviderError) {
        if self.text_sent() {
            self.begin_step();
            let apology = self.locale.interruption_apology();
            self.text(apology).await;
        }
        self.send(AgentStreamEvent::Error {
            message: error.to_string(),
        })
        .await;
    }

    /// Whether any answer text reached the caller.
    pub fn text_sent(&self) -> bool {
        !self.streamed.is_empty()
    }

    /// Everything streamed so far, separators included.
    pub fn streamed_text(&self) -> &str {
        &self.streamed
    }

    pub fn caller_gone(&self) -> bool {
        self.caller_gone
    }

    async fn send(&mut self, event: AgentStreamEvent) -> bool {
        if self.caller_gone {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            debug!("Caller disconnected, dropping further output");
            self.caller_gone = true;
            return false;
        }
        true
    }
}

/// Answer text of a turn whose model call already produced output.
pub struct TextStream {
    first: Option<String>,
    rx: mpsc::Receiver<AgentStreamEvent>,
}

impl std::fmt::Debug for TextStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextStream")
            .field("first", &self.first)
            .finish_non_exhaustive()
    }
}

impl TextStream {
    /// Answer text chunks, in order, until the turn ends.
    ///
    /// Events after an interruption apology (the trailing `Error`) are
    /// dropped; the stream simply closes.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        let rest = ReceiverStream::new(self.rx).filter_map(|event| async move {
            match event {
                AgentStreamEvent::Chunk { content } => Some(content),
                _ => None,
            }
        });
        futures::stream::iter(self.first).chain(rest)
    }
}

/// Wait for the first answer text or failure of a turn.
///
/// Returns `Err` with the failure message when the model failed before any
/// text was produced, so the caller can still answer with an error status.
pub async fn open_text_stream(
    mut rx: mpsc::Receiver<AgentStreamEvent>,
) -> Result<TextStream, String> {
    loop {
        match rx.recv().await {
            Some(AgentStreamEvent::Chunk { content }) => {
                return Ok(TextStream {
                    first: Some(content),
                    rx,
                });
            }
            Some(AgentStreamEvent::Error { message }) => return Err(message),
            Some(_) => continue,
            None => return Ok(TextStream { first: None, rx }),
        }
    }
}
