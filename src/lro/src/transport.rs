// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The HTTP transport consumed by the polling engine.
//!
//! The engine does not send requests itself. It consumes a [Transport],
//! which receives a [Request] and returns a [Response]. The caller sends the
//! initiating request (typically a `PUT`, `PATCH`, `POST`, or `DELETE`) with
//! the same transport, and hands the request and response to the
//! [LroDriver][crate::driver::LroDriver].
//!
//! Credentials, retries of the initiating request, and connection management
//! are the responsibility of the transport implementation.

use crate::Result;
use crate::error::Error;
use http::header::{HeaderValue, IntoHeaderName};
use http::{HeaderMap, Method, StatusCode};

/// An HTTP request, as sent by the engine or by its caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// The HTTP method.
    pub method: Method,
    /// The absolute URL, including any query parameters.
    pub url: String,
    /// The request headers.
    pub headers: HeaderMap,
    /// The request body, if any.
    pub body: Option<bytes::Bytes>,
}

impl Request {
    /// Creates a request without headers or body.
    pub fn new<U: Into<String>>(method: Method, url: U) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Creates a `GET` request, as used for all status checks.
    pub fn get<U: Into<String>>(url: U) -> Self {
        Self::new(Method::GET, url)
    }

    /// Adds a header to the request.
    pub fn with_header<K: IntoHeaderName>(mut self, key: K, value: HeaderValue) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Sets the request body.
    pub fn with_body<B: Into<bytes::Bytes>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// An HTTP response, as received by the transport.
///
/// The body is kept as raw bytes. The engine parses it as JSON only when the
/// polling protocol requires it.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers. Lookups are case-insensitive.
    pub headers: HeaderMap,
    /// The raw response body, empty if the service sent none.
    pub body: bytes::Bytes,
}

impl Response {
    /// Creates a response with the given status, no headers, and no body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: bytes::Bytes::new(),
        }
    }

    /// Adds a header to the response.
    pub fn with_header<K: IntoHeaderName>(mut self, key: K, value: HeaderValue) -> Self {
        self.headers.insert(key, value);
        self
    }

    /// Sets the response body.
    pub fn with_body<B: Into<bytes::Bytes>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the response body to the JSON encoding of `value`.
    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_body(value.to_string())
    }

    /// Returns the value of a header, if present and valid UTF-8.
    ///
    /// Header names are case-insensitive.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// The transport used to send status requests.
///
/// # Notes
///
/// Application developers can implement this trait to plug their own HTTP
/// stack, or to mock the service in tests. The crate provides
/// [ReqwestTransport] as a default implementation.
///
/// Implementations should return responses of every status code. The engine
/// classifies the status codes, and only expects `Err` when no response was
/// received.
pub trait Transport: std::fmt::Debug {
    /// Sends a request and receives the full response.
    fn send(&self, request: Request) -> impl Future<Output = Result<Response>> + Send;
}

pub mod dynamic {
    use super::{Request, Response};
    use crate::Result;

    /// A dyn-compatible, crate-private version of `Transport`.
    #[async_trait::async_trait]
    pub trait Transport: Send + Sync + std::fmt::Debug {
        /// Sends a request and receives the full response.
        async fn send(&self, request: Request) -> Result<Response>;
    }

    /// The public Transport implements the dyn-compatible Transport.
    #[async_trait::async_trait]
    impl<T> Transport for T
    where
        T: super::Transport + Send + Sync,
    {
        async fn send(&self, request: Request) -> Result<Response> {
            T::send(self, request).await
        }
    }
}

/// A [Transport] based on [reqwest].
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    inner: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport using a default `reqwest::Client`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport using a preconfigured `reqwest::Client`.
    ///
    /// Use this to configure timeouts, proxies, or default headers.
    pub fn from_client(inner: reqwest::Client) -> Self {
        Self { inner }
    }

    fn map_send_error(err: reqwest::Error) -> Error {
        match err {
            e if e.is_timeout() => Error::timeout(e),
            e => Error::io(e),
        }
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let mut builder = self
            .inner
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let response = builder.send().await.map_err(Self::map_send_error)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(Error::io)?;
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
