//! Streaming response handling for generation.
//!
//! A `TokenStream` is the consumer half of a capacity-1 channel. The producer
//! blocks on `send` until the previous fragment is taken, so it never runs
//! more than one fragment ahead. Dropping the `TokenStream` fails the
//! producer's next send; that is the cancellation signal.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

/// One fragment from a streaming provider. A stream ends with exactly one
/// `Done` or `Error`; no `Delta` follows either.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFragment {
    Delta { text: String },
    Done,
    Error { message: String },
}

pub struct TokenStream {
    receiver: mpsc::Receiver<StreamFragment>,
}

impl TokenStream {
    /// Build the producer/consumer pair. Capacity is fixed at 1 to enforce
    /// single-item lookahead.
    pub fn channel() -> (mpsc::Sender<StreamFragment>, TokenStream) {
        let (tx, rx) = mpsc::channel(1);
        (tx, TokenStream { receiver: rx })
    }

    pub async fn next(&mut self) -> Option<StreamFragment> {
        self.receiver.recv().await
    }

    /// Drain the stream, concatenating deltas verbatim. Returns the
    /// accumulated text and the error message if the stream ended with one.
    pub async fn collect(mut self) -> (String, Option<String>) {
        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            match fragment {
                StreamFragment::Delta { text: t } => text.push_str(&t),
                StreamFragment::Done => break,
                StreamFragment::Error { message } => return (text, Some(message)),
            }
        }
        (text, None)
    }
}

impl Stream for TokenStream {
    type Item = StreamFragment;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_concatenates_deltas_verbatim() {
        let (tx, stream) = TokenStream::channel();
        tokio::spawn(async move {
            for text in ["Ciao", " mondo", "!"] {
                tx.send(StreamFragment::Delta { text: text.into() })
                    .await
                    .unwrap();
            }
            tx.send(StreamFragment::Done).await.unwrap();
        });

        let (text, error) = stream.collect().await;
        assert_eq!(text, "Ciao mondo!");
        assert!(error.is_none());
    }

    #[tokio::test]
    async fn error_fragment_carries_partial_text() {
        let (tx, stream) = TokenStream::channel();
        tokio::spawn(async move {
            tx.send(StreamFragment::Delta { text: "metà".into() })
                .await
                .unwrap();
            tx.send(StreamFragment::Error {
                message: "connection reset".into(),
            })
            .await
            .unwrap();
        });

        let (text, error) = stream.collect().await;
        assert_eq!(text, "metà");
        assert_eq!(error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn dropped_receiver_fails_producer_send() {
        let (tx, stream) = TokenStream::channel();
        drop(stream);
        let result = tx.send(StreamFragment::Done).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn producer_blocks_until_fragment_is_consumed() {
        let (tx, mut stream) = TokenStream::channel();
        tx.send(StreamFragment::Delta { text: "a".into() })
            .await
            .unwrap();
        // Channel is full; a second send must not complete yet.
        let pending = tx.try_send(StreamFragment::Delta { text: "b".into() });
        assert!(pending.is_err());

        assert!(matches!(
            stream.next().await,
            Some(StreamFragment::Delta { .. })
        ));
        tx.try_send(StreamFragment::Delta { text: "b".into() })
            .unwrap();
    }
}
