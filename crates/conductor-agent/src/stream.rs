use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::process::AgentProcess;
use crate::types::{AgentOptions, Message};
use crate::{AgentError, Result};

// ─── MessageStream ────────────────────────────────────────────────────────

/// An async stream of [`Message`]s from an agent subprocess.
///
/// A background task owns the [`AgentProcess`] and forwards messages until
/// the terminal result message or process exit. Dropping the stream closes
/// the receiver; the background task notices on its next send, breaks out,
/// and kills the subprocess — which is how provider-level timeouts tear
/// down an overrunning invocation.
pub struct MessageStream {
    rx: mpsc::Receiver<Result<Message>>,
}

impl MessageStream {
    pub fn spawn(prompt: String, opts: AgentOptions) -> Self {
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut process = match AgentProcess::spawn(&prompt, &opts).await {
                Ok(p) => p,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let mut got_result = false;
            loop {
                match process.next_message().await {
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    Ok(None) => break, // EOF
                    Ok(Some(message)) => {
                        let terminal = matches!(message, Message::Result(_));
                        if terminal {
                            got_result = true;
                        }
                        if tx.send(Ok(message)).await.is_err() {
                            break; // receiver dropped (timeout or caller gone)
                        }
                        if terminal {
                            break;
                        }
                    }
                }
            }

            if !got_result {
                if let Some(exit_err) = process.wait_exit_error().await {
                    let _ = tx.send(Err(exit_err)).await;
                }
            }
            process.kill().await;
        });

        Self { rx }
    }

    #[cfg(test)]
    pub(crate) fn from_channel(rx: mpsc::Receiver<Result<Message>>) -> Self {
        Self { rx }
    }
}

impl Stream for MessageStream {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Consume a stream to its terminal result message.
pub async fn collect_result(mut stream: MessageStream) -> Result<crate::types::ResultMessage> {
    use futures::StreamExt;

    while let Some(message) = stream.next().await {
        match message? {
            Message::Result(result) => return Ok(result),
            Message::Assistant(turn) => {
                tracing::debug!(session = ?turn.session_id, "assistant turn");
            }
            Message::System(init) => {
                tracing::debug!(model = ?init.model, session = ?init.session_id, "agent session started");
            }
        }
    }
    Err(AgentError::MissingResult)
}

// ─── Tests ────────────────────────────────────────────────────────────────
