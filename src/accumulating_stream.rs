//! Accumulates streaming chunks into the final answer while passing chunks through.

use std::pin::Pin;

use futures::Stream;

use crate::types::ChatCompletionChunk;
use crate::Error;

/// What a fully drained stream produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamSummary {
    /// Concatenation of every non-empty delta, in arrival order.
    pub text: String,
    /// The last non-empty `model` any chunk declared.
    pub model: Option<String>,
}

/// A stream wrapper that accumulates `ChatCompletionChunk`s into a `StreamSummary`.
///
/// This allows printing tokens to the user while simultaneously building the
/// final answer.  When the stream is fully drained, the summary is sent via the
/// oneshot channel returned by `new()`.
pub struct AccumulatingStream {
    inner: Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, Error>> + Send>>,
    summary_tx: Option<tokio::sync::oneshot::Sender<StreamSummary>>,
    summary: StreamSummary,
}

impl AccumulatingStream {
    /// Wraps a chunk stream.
    ///
    /// Returns the stream and a receiver that will contain the summary once the
    /// stream is fully drained.
    pub fn new<S>(stream: S) -> (Self, tokio::sync::oneshot::Receiver<StreamSummary>)
    where
        S: Stream<Item = Result<ChatCompletionChunk, Error>> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let this = Self {
            inner: Box::pin(stream),
            summary_tx: Some(tx),
            summary: StreamSummary::default(),
        };
        (this, rx)
    }

    fn accumulate_chunk(&mut self, chunk: &ChatCompletionChunk) {
        if let Some(model) = chunk.served_model() {
            self.summary.model = Some(model.to_string());
        }
        if let Some(text) = chunk.delta_text() {
            self.summary.text.push_str(text);
        }
    }
}

impl Stream for AccumulatingStream {
    type Item = Result<ChatCompletionChunk, Error>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        match self.inner.as_mut().poll_next(cx) {
            std::task::Poll::Ready(Some(Ok(chunk))) => {
                self.accumulate_chunk(&chunk);
                std::task::Poll::Ready(Some(Ok(chunk)))
            }
            std::task::Poll::Ready(Some(Err(e))) => std::task::Poll::Ready(Some(Err(e))),
            std::task::Poll::Ready(None) => {
                if let Some(tx) = self.summary_tx.take() {
                    let _ = tx.send(std::mem::take(&mut self.summary));
                }
                std::task::Poll::Ready(None)
            }
            std::task::Poll::Pending => std::task::Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, stream};

    fn chunk(model: Option<&str>, text: Option<&str>) -> ChatCompletionChunk {
        let mut value = serde_json::json!({"choices": [{"delta": {}}]});
        if let Some(model) = model {
            value["model"] = model.into();
        }
        if let Some(text) = text {
            value["choices"][0]["delta"]["content"] = text.into();
        }
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn accumulates_text_and_last_model() {
        let chunks = vec![
            Ok(chunk(Some("gpt-4"), Some("Hel"))),
            Ok(chunk(None, None)),
            Ok(chunk(Some("gpt-4-0613"), Some("lo"))),
            Ok(chunk(Some(""), Some("!"))),
        ];
        let (mut stream, rx) = AccumulatingStream::new(stream::iter(chunks));
        let mut seen = 0;
        while let Some(item) = stream.next().await {
            item.unwrap();
            seen += 1;
        }
        assert_eq!(seen, 4);
        let summary = rx.await.unwrap();
        assert_eq!(summary.text, "Hello!");
        assert_eq!(summary.model.as_deref(), Some("gpt-4-0613"));
    }

    #[tokio::test]
    async fn summary_waits_for_drain() {
        let chunks = vec![Ok(chunk(None, Some("a"))), Ok(chunk(None, Some("b")))];
        let (mut stream, mut rx) = AccumulatingStream::new(stream::iter(chunks));
        stream.next().await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
        while stream.next().await.is_some() {}
        assert_eq!(rx.await.unwrap().text, "ab");
    }
}
