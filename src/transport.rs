//! HTTP transport seam.
//!
//! Everything the client sends goes through [`Transport`] so probes, chat turns
//! and sync posts can be exercised against canned replies in tests.

use std::pin::Pin;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::{self, HeaderValue};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use serde_json::Value;

use crate::error::{Error, Result};

/// A response body delivered incrementally.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A fully buffered reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpReply {
    /// HTTP status code.
    pub status: u16,
    /// Body decoded as text.
    pub body: String,
    /// `Retry-After` in seconds, when the server sent one.
    pub retry_after: Option<u64>,
    /// Time until the body was fully read.
    pub elapsed: Duration,
}

/// A reply whose body is still being received.
pub struct StreamReply {
    /// HTTP status code.
    pub status: u16,
    /// `Retry-After` in seconds, when the server sent one.
    pub retry_after: Option<u64>,
    /// The body.
    pub body: ByteStream,
}

impl StreamReply {
    /// Reads the rest of the body as text, for error reporting.
    pub async fn into_text(mut self) -> Result<String> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// The HTTP operations the gateway client needs.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// `GET url` with an overall timeout.
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpReply>;

    /// `POST url` with a JSON body and optional bearer credential.
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply>;

    /// `POST url` and hand back the body as it arrives.  `timeout` bounds the
    /// wait for the response headers only.
    async fn post_stream(
        &self,
        url: &str,
        bearer: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<StreamReply>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    /// Create a new transport with a fresh connection pool.
    pub fn new() -> Result<Self> {
        let client = ReqwestClient::builder().build().map_err(|e| {
            Error::http_client(
                format!("Failed to build HTTP client: {e}"),
                Some(Box::new(e)),
            )
        })?;
        Ok(Self { client })
    }

    fn json_request(&self, url: &str, bearer: Option<&str>, body: &Value) -> Result<RequestBuilder> {
        let mut request = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(body);
        if let Some(bearer) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {bearer}"))
                .map_err(|_| Error::validation("credential contains invalid characters", None))?;
            request = request.header(header::AUTHORIZATION, value);
        }
        Ok(request)
    }

    async fn buffered(response: Response, started: Instant) -> Result<HttpReply> {
        let status = response.status().as_u16();
        let retry_after = retry_after(&response);
        let body = response.text().await.map_err(|e| {
            Error::http_client(format!("Failed to read response: {e}"), Some(Box::new(e)))
        })?;
        Ok(HttpReply {
            status,
            body,
            retry_after,
            elapsed: started.elapsed(),
        })
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<HttpReply> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| send_error(e, timeout))?;
        Self::buffered(response, started).await
    }

    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply> {
        let started = Instant::now();
        let response = self
            .json_request(url, bearer, body)?
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| send_error(e, timeout))?;
        Self::buffered(response, started).await
    }

    async fn post_stream(
        &self,
        url: &str,
        bearer: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<StreamReply> {
        let request = self
            .json_request(url, Some(bearer), body)?
            .header(header::ACCEPT, HeaderValue::from_static("text/event-stream"));
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| {
                Error::timeout("no response from gateway", Some(timeout.as_secs_f64()))
            })?
            .map_err(|e| send_error(e, timeout))?;
        let status = response.status().as_u16();
        let retry_after = retry_after(&response);
        let body = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(StreamReply {
            status,
            retry_after,
            body: Box::pin(body),
        })
    }
}

fn retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.parse::<u64>().ok())
}

fn send_error(e: reqwest::Error, timeout: Duration) -> Error {
    if e.is_timeout() {
        Error::timeout(
            format!("Request timed out: {e}"),
            Some(timeout.as_secs_f64()),
        )
    } else if e.is_connect() {
        Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
    } else {
        Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
    }
}

#[cfg(test)]
pub mod testing {
    //! Canned-reply transport for unit tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    /// A canned reply.
    #[derive(Clone, Debug)]
    pub enum FakeReply {
        /// A buffered reply with this status and body.
        Status(u16, String),
        /// A streamed reply; each element is one network frame.
        Stream(u16, Vec<String>),
        /// The request times out.
        Timeout,
        /// The connection is refused.
        Refused,
    }

    /// One recorded request.
    #[derive(Clone, Debug)]
    pub struct FakeCall {
        /// `GET` or `POST`.
        pub method: &'static str,
        /// Full URL.
        pub url: String,
        /// Bearer credential, if any.
        pub bearer: Option<String>,
        /// JSON body, for POSTs.
        pub body: Option<Value>,
    }

    /// Replays replies queued per `(method, url)` and records every call.
    #[derive(Default)]
    pub struct FakeTransport {
        replies: Mutex<HashMap<(String, String), VecDeque<FakeReply>>>,
        calls: Mutex<Vec<FakeCall>>,
    }

    impl FakeTransport {
        /// Queues a reply for the next `method url` request.
        pub fn push(&self, method: &str, url: &str, reply: FakeReply) {
            self.replies
                .lock()
                .unwrap()
                .entry((method.to_string(), url.to_string()))
                .or_default()
                .push_back(reply);
        }

        /// Every call made so far.
        pub fn calls(&self) -> Vec<FakeCall> {
            self.calls.lock().unwrap().clone()
        }

        /// Number of calls made so far.
        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn next(&self, call: FakeCall) -> Result<FakeReply> {
            let key = (call.method.to_string(), call.url.clone());
            self.calls.lock().unwrap().push(call);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(|q| q.pop_front());
            match reply {
                Some(FakeReply::Timeout) => Err(Error::timeout("fake timeout", Some(1.0))),
                Some(FakeReply::Refused) | None => {
                    Err(Error::connection("fake connection refused", None))
                }
                Some(reply) => Ok(reply),
            }
        }
    }

    fn buffered(reply: FakeReply) -> HttpReply {
        let (status, body) = match reply {
            FakeReply::Status(status, body) => (status, body),
            FakeReply::Stream(status, frames) => (status, frames.concat()),
            FakeReply::Timeout | FakeReply::Refused => unreachable!(),
        };
        HttpReply {
            status,
            body,
            retry_after: None,
            elapsed: Duration::from_millis(1),
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn get(&self, url: &str, _: Duration) -> Result<HttpReply> {
            let reply = self.next(FakeCall {
                method: "GET",
                url: url.to_string(),
                bearer: None,
                body: None,
            })?;
            Ok(buffered(reply))
        }

        async fn post_json(
            &self,
            url: &str,
            bearer: Option<&str>,
            body: &Value,
            _: Duration,
        ) -> Result<HttpReply> {
            let reply = self.next(FakeCall {
                method: "POST",
                url: url.to_string(),
                bearer: bearer.map(String::from),
                body: Some(body.clone()),
            })?;
            Ok(buffered(reply))
        }

        async fn post_stream(
            &self,
            url: &str,
            bearer: &str,
            body: &Value,
            _: Duration,
        ) -> Result<StreamReply> {
            let reply = self.next(FakeCall {
                method: "POST",
                url: url.to_string(),
                bearer: Some(bearer.to_string()),
                body: Some(body.clone()),
            })?;
            let (status, frames) = match reply {
                FakeReply::Stream(status, frames) => (status, frames),
                FakeReply::Status(status, body) => (status, vec![body]),
                FakeReply::Timeout | FakeReply::Refused => unreachable!(),
            };
            let body = futures::stream::iter(frames.into_iter().map(|f| Ok(Bytes::from(f))));
            Ok(StreamReply {
                status,
                retry_after: None,
                body: Box::pin(body),
            })
        }
    }
}
