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

//! Drives long-running operations to completion.
//!
//! The [LroDriver] receives the initiating request and its response, and
//! returns the final result of the operation. Applications that want to
//! observe the progress of the operation, or control when each status request
//! is sent, can use an [LroPoller] instead.
//!
//! # Example
//! ```no_run
//! # use azure_rest_lro::driver::LroDriver;
//! # use azure_rest_lro::transport::{Request, ReqwestTransport, Transport};
//! # async fn sample() -> anyhow::Result<()> {
//! let transport = ReqwestTransport::new();
//! let request = Request::new(
//!     http::Method::PUT,
//!     "https://management.azure.com/subscriptions/s/resourceGroups/rg?api-version=2021-04-01",
//! )
//! .with_body(r#"{"location": "westus"}"#);
//! let response = transport.send(request.clone()).await?;
//! let result = LroDriver::new(transport).begin(request, response).await?;
//! println!("the resource is {:?}", result.body());
//! # Ok(()) }
//! ```

use crate::error::Error;
use crate::options::PollingOptions;
use crate::polling_state::{OperationResult, OperationStatus, PollingState, Semantics};
use crate::strategy::PollingStrategy;
use crate::transport::{Request, Response, Transport, dynamic};
use crate::{Poller, PollingResult, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Runs the polling loop for long-running operations.
///
/// A driver can be shared by many operations. Each operation owns its own
/// [PollingState], and operations proceed independently.
#[derive(Clone, Debug)]
pub struct LroDriver {
    transport: Arc<dyn dynamic::Transport>,
    options: PollingOptions,
}

impl LroDriver {
    /// Creates a driver sending status requests with `transport`.
    pub fn new<T>(transport: T) -> Self
    where
        T: Transport + Send + Sync + 'static,
    {
        Self::from_dynamic(Arc::new(transport))
    }

    /// Creates a driver from a type-erased transport.
    pub fn from_dynamic(transport: Arc<dyn dynamic::Transport>) -> Self {
        Self {
            transport,
            options: PollingOptions::default(),
        }
    }

    /// Replaces the polling options.
    ///
    /// # Example
    /// ```
    /// # use azure_rest_lro::driver::LroDriver;
    /// # use azure_rest_lro::options::PollingOptions;
    /// # use azure_rest_lro::transport::ReqwestTransport;
    /// let driver = LroDriver::new(ReqwestTransport::new())
    ///     .with_options(PollingOptions::default().with_polling_interval_secs(5));
    /// ```
    pub fn with_options(mut self, options: PollingOptions) -> Self {
        self.options = options;
        self
    }

    /// The polling options used for new operations.
    pub fn options(&self) -> &PollingOptions {
        &self.options
    }

    /// Polls a `PUT` or `PATCH` operation until it completes.
    pub async fn put_or_patch(
        &self,
        request: Request,
        response: Response,
    ) -> Result<OperationResult> {
        self.poller_put_or_patch(request, response)?
            .until_done()
            .await
    }

    /// Polls a `POST` or `DELETE` operation until it completes.
    pub async fn post_or_delete(
        &self,
        request: Request,
        response: Response,
    ) -> Result<OperationResult> {
        self.poller_post_or_delete(request, response)?
            .until_done()
            .await
    }

    /// Polls an operation until it completes, using the semantics for the
    /// method of `request`.
    ///
    /// Fails with a [protocol error][Error::is_protocol] if the method is not
    /// one of `PUT`, `PATCH`, `POST`, or `DELETE`.
    pub async fn begin(&self, request: Request, response: Response) -> Result<OperationResult> {
        self.poller(request, response)?.until_done().await
    }

    /// Creates a poller for a `PUT` or `PATCH` operation.
    pub fn poller_put_or_patch(&self, request: Request, response: Response) -> Result<LroPoller> {
        self.start(Semantics::PutOrPatch, request, response)
    }

    /// Creates a poller for a `POST` or `DELETE` operation.
    pub fn poller_post_or_delete(
        &self,
        request: Request,
        response: Response,
    ) -> Result<LroPoller> {
        self.start(Semantics::PostOrDelete, request, response)
    }

    /// Creates a poller, using the semantics for the method of `request`.
    pub fn poller(&self, request: Request, response: Response) -> Result<LroPoller> {
        let semantics = Semantics::from_method(&request.method)?;
        self.start(semantics, request, response)
    }

    fn start(
        &self,
        semantics: Semantics,
        request: Request,
        response: Response,
    ) -> Result<LroPoller> {
        let span = tracing::info_span!("lro", %semantics, url = %request.url);
        let state = span.in_scope(|| -> Result<PollingState> {
            let state = PollingState::new(semantics, request, response, &self.options)?;
            tracing::debug!(status = %state.status(), "initial response accepted");
            // POST and DELETE operations without links cannot be polled.
            if !state.status().is_terminal() {
                PollingStrategy::select(&state, semantics)?;
            }
            Ok(state)
        })?;
        Ok(LroPoller {
            transport: self.transport.clone(),
            semantics,
            state: Some(state),
            cancellation: self.options.cancellation_token().clone(),
            span,
        })
    }
}

/// Polls one long-running operation.
///
/// Create instances with [LroDriver::poller], or any of the
/// semantic-specific variants. Use the [Poller] trait to drive it.
#[derive(Debug)]
pub struct LroPoller {
    transport: Arc<dyn dynamic::Transport>,
    semantics: Semantics,
    state: Option<PollingState>,
    cancellation: CancellationToken,
    span: tracing::Span,
}

impl LroPoller {
    /// The current state of the operation.
    ///
    /// Returns `None` once the poller has produced its final result.
    pub fn state(&self) -> Option<&PollingState> {
        self.state.as_ref()
    }

    async fn poll_once(&mut self) -> Option<PollingResult> {
        let mut state = self.state.take()?;
        if !state.status().is_terminal() {
            if let Err(e) = self.step(&mut state).await {
                return Some(PollingResult::Completed(Err(e)));
            }
        }
        if state.status().is_terminal() {
            return Some(PollingResult::Completed(self.finish(state).await));
        }
        let resource = state.resource().cloned();
        self.state = Some(state);
        Some(PollingResult::InProgress(resource))
    }

    /// Sends one status request and updates the state with its response.
    async fn step(&self, state: &mut PollingState) -> Result<()> {
        let strategy = PollingStrategy::select(state, self.semantics)?;
        tracing::debug!(
            strategy = strategy.name(),
            url = strategy.url(),
            "sending status request"
        );
        let request = strategy.request();
        let response = self.send(state, request.clone()).await?;
        let observation = strategy.classify(self.semantics, &response)?;
        state.update_from_response(request, response);
        state.apply(observation);
        tracing::debug!(status = %state.status(), "status observed");
        Ok(())
    }

    /// Produces the final result, fetching the resource if needed.
    async fn finish(&self, mut state: PollingState) -> Result<OperationResult> {
        if state.status() == OperationStatus::Succeeded
            && self.semantics == Semantics::PutOrPatch
            && state.needs_resource()
        {
            let strategy = PollingStrategy::ResourceGet(state.resource_url().to_string());
            tracing::debug!(url = strategy.url(), "fetching the final resource");
            let request = strategy.request();
            let response = self.send(&state, request.clone()).await?;
            let observation = strategy.classify(self.semantics, &response)?;
            state.update_from_response(request, response);
            state.apply(observation);
        }
        tracing::debug!(status = %state.status(), "operation completed");
        state.into_result()
    }

    async fn send(&self, state: &PollingState, request: Request) -> Result<Response> {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(self.cancelled(state)),
            response = self.transport.send(request) => response,
        }
    }

    async fn wait(&self, state: &PollingState) -> Result<()> {
        let delay = state.timeout();
        tracing::debug!(delay_ms = state.timeout_millis(), "waiting");
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(self.cancelled(state)),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn cancelled(&self, state: &PollingState) -> Error {
        tracing::warn!(status = %state.status(), "polling cancelled");
        state.to_error(Some(Error::cancelled()))
    }
}

impl crate::sealed::Poller for LroPoller {}

impl Poller for LroPoller {
    async fn poll(&mut self) -> Option<PollingResult> {
        let span = self.span.clone();
        self.poll_once().instrument(span).await
    }

    async fn until_done(mut self) -> Result<OperationResult> {
        let span = self.span.clone();
        async move {
            loop {
                if let Some(state) = self.state.as_ref().filter(|s| !s.status().is_terminal()) {
                    self.wait(state).await?;
                }
                match self.poll_once().await {
                    Some(PollingResult::Completed(r)) => return r,
                    Some(PollingResult::InProgress(_)) => (),
                    // `poll_once()` only returns `None` after it returned
                    // `Completed`, and this loop exits on `Completed`.
                    None => unreachable!("until_done() called on a completed poller"),
                }
            }
        }
        .instrument(span)
        .await
    }

    #[cfg(feature = "unstable-stream")]
    fn into_stream(self) -> impl futures::Stream<Item = PollingResult> + Unpin {
        use futures::stream::unfold;
        Box::pin(unfold(Some(self), move |state| async move {
            if let Some(mut poller) = state {
                if let Some(pr) = poller.poll().await {
                    return Some((pr, Some(poller)));
                }
            };
            None
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;
    use crate::polling_state::{AZURE_ASYNC_OPERATION, LOCATION, RETRY_AFTER};
    use http::{HeaderValue, Method, StatusCode};
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    const RESOURCE_URL: &str = "https://management.azure.com/subscriptions/s/resources/r1";
    const ASYNC_URL: &str = "https://management.azure.com/operations/op-1";
    const LOCATION_URL: &str = "https://management.azure.com/operationResults/op-1";

    mockall::mock! {
        #[derive(Debug)]
        Transport {}
        impl crate::transport::Transport for Transport {
            async fn send(&self, request: Request) -> Result<Response>;
        }
    }

    /// Returns scripted responses and records the requests.
    #[derive(Clone, Debug, Default)]
    struct FakeTransport {
        responses: Arc<Mutex<VecDeque<Result<Response>>>>,
        requests: Arc<Mutex<Vec<Request>>>,
    }

    impl FakeTransport {
        fn new<I>(responses: I) -> Self
        where
            I: IntoIterator<Item = Response>,
        {
            Self::with_results(responses.into_iter().map(Ok))
        }

        fn with_results<I>(results: I) -> Self
        where
            I: IntoIterator<Item = Result<Response>>,
        {
            Self {
                responses: Arc::new(Mutex::new(results.into_iter().collect())),
                requests: Arc::default(),
            }
        }

        fn urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .expect("poisoned mutex")
                .iter()
                .map(|r| r.url.clone())
                .collect()
        }
    }

    impl Transport for FakeTransport {
        async fn send(&self, request: Request) -> Result<Response> {
            assert_eq!(request.method, Method::GET);
            self.requests.lock().expect("poisoned mutex").push(request);
            self.responses
                .lock()
                .expect("poisoned mutex")
                .pop_front()
                .unwrap_or_else(|| Err(Error::io("no more scripted responses")))
        }
    }

    /// Never completes a request.
    #[derive(Debug)]
    struct HangingTransport;

    impl Transport for HangingTransport {
        async fn send(&self, _request: Request) -> Result<Response> {
            std::future::pending().await
        }
    }

    fn put() -> Request {
        Request::new(Method::PUT, RESOURCE_URL)
    }

    fn post() -> Request {
        Request::new(Method::POST, RESOURCE_URL)
    }

    fn accepted() -> Response {
        Response::new(StatusCode::ACCEPTED)
    }

    fn ok(body: Value) -> Response {
        Response::new(StatusCode::OK).with_json(&body)
    }

    fn async_header() -> HeaderValue {
        HeaderValue::from_static(ASYNC_URL)
    }

    fn location_header() -> HeaderValue {
        HeaderValue::from_static(LOCATION_URL)
    }

    #[track_caller]
    fn assert_elapsed(start: Instant, want: Duration) {
        let got = start.elapsed();
        assert!(
            got >= want && got < want + Duration::from_millis(10),
            "got={got:?}, want={want:?}"
        );
    }

    fn fast() -> PollingOptions {
        PollingOptions::default().with_polling_interval(Duration::ZERO)
    }

    #[tokio::test]
    async fn scenario_a_resource_get() -> anyhow::Result<()> {
        let body = json!({"id": "r1", "properties": {"provisioningState": "Succeeded"}});
        let transport = FakeTransport::new([ok(body.clone())]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let result = driver.put_or_patch(put(), accepted()).await?;
        assert_eq!(result.body(), Some(&body));
        assert_eq!(result.request(), &Request::get(RESOURCE_URL));
        assert_eq!(transport.urls(), vec![RESOURCE_URL]);
        Ok(())
    }

    #[tokio::test]
    async fn scenario_b_location() -> anyhow::Result<()> {
        let transport = FakeTransport::new([accepted(), ok(json!({"id": "x"}))]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let initial = accepted().with_header(LOCATION, location_header());
        let result = driver.post_or_delete(post(), initial).await?;
        assert_eq!(result.body(), Some(&json!({"id": "x"})));
        assert_eq!(transport.urls(), vec![LOCATION_URL, LOCATION_URL]);
        Ok(())
    }

    #[tokio::test]
    async fn location_completion_without_body_clears_resource() -> anyhow::Result<()> {
        let transport = FakeTransport::new([Response::new(StatusCode::NO_CONTENT)]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let initial = accepted()
            .with_json(&json!({"note": "accepted"}))
            .with_header(LOCATION, location_header());
        let result = driver.post_or_delete(post(), initial).await?;
        assert_eq!(result.body(), None);
        assert_eq!(result.response().status, StatusCode::NO_CONTENT);
        assert_eq!(transport.urls(), vec![LOCATION_URL]);
        Ok(())
    }

    #[tokio::test]
    async fn scenario_c_async_operation_failed() -> anyhow::Result<()> {
        let transport = FakeTransport::new([ok(json!({
            "status": "Failed",
            "error": {"code": "Conflict", "message": "the resource is in use"}
        }))]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let initial = accepted().with_header(AZURE_ASYNC_OPERATION, async_header());
        let err = driver.put_or_patch(put(), initial).await.unwrap_err();
        assert!(err.is_operation_failed(), "{err:?}");
        assert_eq!(err.operation_status(), Some(OperationStatus::Failed));
        let cloud = err.cloud_error().expect("failed operations have a cloud error");
        assert_eq!(cloud.code, "Conflict");
        assert_eq!(cloud.message, "the resource is in use");
        assert_eq!(err.request(), Some(&Request::get(ASYNC_URL)));
        assert_eq!(transport.urls(), vec![ASYNC_URL]);
        Ok(())
    }

    #[tokio::test]
    async fn scenario_d_bad_initial_status() {
        let mut mock = MockTransport::new();
        mock.expect_send().never();
        let driver = LroDriver::new(mock);
        let err = driver
            .put_or_patch(put(), Response::new(StatusCode::CONFLICT))
            .await
            .unwrap_err();
        assert_eq!(
            err.protocol_error(),
            Some(&ProtocolError::UnexpectedStatusCode(409))
        );
        assert!(err.to_string().contains("409"), "{err}");
    }

    #[tokio::test]
    async fn scenario_e_missing_location() {
        let mut mock = MockTransport::new();
        mock.expect_send().never();
        let driver = LroDriver::new(mock);
        let err = driver.post_or_delete(post(), accepted()).await.unwrap_err();
        assert_eq!(err.protocol_error(), Some(&ProtocolError::MissingLocation));
        assert!(
            err.to_string().contains("Location header is missing"),
            "{err}"
        );
    }

    #[tokio::test]
    async fn async_operation_takes_priority() -> anyhow::Result<()> {
        let transport = FakeTransport::new([
            ok(json!({"status": "Succeeded"})),
            ok(json!({"id": "r1"})),
        ]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let initial = accepted()
            .with_header(AZURE_ASYNC_OPERATION, async_header())
            .with_header(LOCATION, location_header());
        let result = driver.put_or_patch(put(), initial).await?;
        // The async-operation body is not the resource, fetch it.
        assert_eq!(result.body(), Some(&json!({"id": "r1"})));
        assert_eq!(transport.urls(), vec![ASYNC_URL, RESOURCE_URL]);
        Ok(())
    }

    #[tokio::test]
    async fn async_operation_put_with_initial_resource() -> anyhow::Result<()> {
        let body = json!({"id": "r1", "properties": {"provisioningState": "Succeeded"}});
        let transport = FakeTransport::new([
            ok(json!({"status": "InProgress"})),
            ok(json!({"status": "Succeeded"})),
            ok(body.clone()),
        ]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let initial = Response::new(StatusCode::CREATED)
            .with_header(AZURE_ASYNC_OPERATION, async_header())
            .with_json(&json!({"id": "r1", "properties": {"provisioningState": "Creating"}}));
        let result = driver.put_or_patch(put(), initial).await?;
        // The captured resource reports `Creating`, the final GET replaces it.
        assert_eq!(result.body(), Some(&body));
        assert_eq!(transport.urls(), vec![ASYNC_URL, ASYNC_URL, RESOURCE_URL]);
        Ok(())
    }

    #[tokio::test]
    async fn async_operation_post_uses_status_body() -> anyhow::Result<()> {
        let body = json!({"status": "Succeeded", "properties": {"output": 42}});
        let transport = FakeTransport::new([ok(body.clone())]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let initial = accepted().with_header(AZURE_ASYNC_OPERATION, async_header());
        let result = driver.post_or_delete(post(), initial).await?;
        assert_eq!(result.body(), Some(&body));
        assert_eq!(transport.urls(), vec![ASYNC_URL]);
        Ok(())
    }

    #[tokio::test]
    async fn location_link_discovered_later() -> anyhow::Result<()> {
        let transport = FakeTransport::new([
            ok(json!({"properties": {"provisioningState": "Updating"}}))
                .with_header(LOCATION, location_header()),
            Response::new(StatusCode::OK).with_json(&json!({"id": "r1"})),
        ]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let result = driver.put_or_patch(put(), accepted()).await?;
        assert_eq!(result.body(), Some(&json!({"id": "r1"})));
        assert_eq!(transport.urls(), vec![RESOURCE_URL, LOCATION_URL]);
        Ok(())
    }

    #[tokio::test]
    async fn custom_provisioning_state_keeps_polling() -> anyhow::Result<()> {
        let transport = FakeTransport::new([
            ok(json!({"properties": {"provisioningState": "Creating"}})),
            ok(json!({"properties": {"provisioningState": "Configuring"}})),
            ok(json!({"properties": {"provisioningState": "Succeeded"}})),
        ]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let result = driver.put_or_patch(put(), accepted()).await?;
        assert_eq!(
            result.body(),
            Some(&json!({"properties": {"provisioningState": "Succeeded"}}))
        );
        assert_eq!(transport.urls().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn terminal_initial_response_sends_nothing() -> anyhow::Result<()> {
        let mut mock = MockTransport::new();
        mock.expect_send().never();
        let driver = LroDriver::new(mock);

        let body = json!({"id": "r1", "properties": {"provisioningState": "Succeeded"}});
        let result = driver
            .put_or_patch(put(), Response::new(StatusCode::CREATED).with_json(&body))
            .await?;
        assert_eq!(result.body(), Some(&body));

        let result = driver
            .post_or_delete(
                Request::new(Method::DELETE, RESOURCE_URL),
                Response::new(StatusCode::NO_CONTENT),
            )
            .await?;
        assert_eq!(result.body(), None);
        Ok(())
    }

    #[tokio::test]
    async fn terminal_initial_failure() {
        let mut mock = MockTransport::new();
        mock.expect_send().never();
        let driver = LroDriver::new(mock);
        let body = json!({"properties": {"provisioningState": "Canceled"}});
        let err = driver
            .put_or_patch(put(), ok(body.clone()))
            .await
            .unwrap_err();
        assert!(err.is_operation_failed(), "{err:?}");
        assert_eq!(err.operation_status(), Some(OperationStatus::Canceled));
        assert_eq!(
            err.cloud_error().map(|e| e.message.as_str()),
            Some("Long running operation failed with status: 'Canceled'.")
        );
        assert_eq!(err.response_body(), Some(&body));
    }

    #[tokio::test]
    async fn transport_error_aborts() {
        let transport = FakeTransport::with_results([
            Ok(accepted()),
            Err(Error::io("connection reset")),
            Ok(ok(json!({"id": "never"}))),
        ]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let initial = accepted().with_header(LOCATION, location_header());
        let err = driver.post_or_delete(post(), initial).await.unwrap_err();
        assert!(err.is_io(), "{err:?}");
        assert!(err.to_string().contains("connection reset"), "{err}");
        assert_eq!(transport.urls(), vec![LOCATION_URL, LOCATION_URL]);
    }

    #[tokio::test]
    async fn unexpected_poll_status_aborts() {
        let transport = FakeTransport::new([Response::new(StatusCode::NOT_FOUND).with_body("gone")]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let initial = accepted().with_header(LOCATION, location_header());
        let err = driver.post_or_delete(post(), initial).await.unwrap_err();
        assert!(err.is_transport(), "{err:?}");
        assert_eq!(err.http_status_code(), Some(404));
    }

    #[tokio::test]
    async fn missing_body_aborts() {
        let transport = FakeTransport::new([Response::new(StatusCode::OK)]);
        let driver = LroDriver::new(transport).with_options(fast());
        let err = driver.put_or_patch(put(), accepted()).await.unwrap_err();
        assert_eq!(err.protocol_error(), Some(&ProtocolError::MissingBody));
    }

    #[tokio::test]
    async fn begin_dispatches_by_method() -> anyhow::Result<()> {
        let transport = FakeTransport::new([ok(json!({"status": "Succeeded", "id": "d"}))]);
        let driver = LroDriver::new(transport.clone()).with_options(fast());
        let initial = accepted().with_header(AZURE_ASYNC_OPERATION, async_header());
        let result = driver
            .begin(Request::new(Method::DELETE, RESOURCE_URL), initial)
            .await?;
        // DELETE uses the POST/DELETE semantics, no final GET.
        assert_eq!(result.body(), Some(&json!({"status": "Succeeded", "id": "d"})));
        assert_eq!(transport.urls(), vec![ASYNC_URL]);
        Ok(())
    }

    #[tokio::test]
    async fn begin_rejects_other_methods() {
        let mut mock = MockTransport::new();
        mock.expect_send().never();
        let driver = LroDriver::new(mock);
        let err = driver
            .begin(Request::get(RESOURCE_URL), accepted())
            .await
            .unwrap_err();
        assert_eq!(
            err.protocol_error(),
            Some(&ProtocolError::UnexpectedMethod(Method::GET))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn default_interval() -> anyhow::Result<()> {
        let transport = FakeTransport::new([accepted(), ok(json!({"id": "x"}))]);
        let driver = LroDriver::new(transport);
        let initial = accepted().with_header(LOCATION, location_header());
        let start = Instant::now();
        driver.post_or_delete(post(), initial).await?;
        assert_elapsed(start, Duration::from_secs(60));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_interval() -> anyhow::Result<()> {
        let transport = FakeTransport::new([
            accepted().with_header(RETRY_AFTER, HeaderValue::from_static("2")),
            ok(json!({"id": "x"})),
        ]);
        let driver = LroDriver::new(transport);
        let initial = accepted()
            .with_header(LOCATION, location_header())
            .with_header(RETRY_AFTER, HeaderValue::from_static("5"));
        let start = Instant::now();
        driver.post_or_delete(post(), initial).await?;
        assert_elapsed(start, Duration::from_secs(7));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_interval_overrides_retry_after() -> anyhow::Result<()> {
        let transport = FakeTransport::new([
            accepted().with_header(RETRY_AFTER, HeaderValue::from_static("100")),
            ok(json!({"id": "x"})),
        ]);
        let driver = LroDriver::new(transport)
            .with_options(PollingOptions::default().with_polling_interval_secs(1));
        let initial = accepted()
            .with_header(LOCATION, location_header())
            .with_header(RETRY_AFTER, HeaderValue::from_static("100"));
        let start = Instant::now();
        driver.post_or_delete(post(), initial).await?;
        assert_elapsed(start, Duration::from_secs(2));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_before_start() {
        let mut mock = MockTransport::new();
        mock.expect_send().never();
        let token = CancellationToken::new();
        token.cancel();
        let driver = LroDriver::new(mock)
            .with_options(PollingOptions::default().with_cancellation_token(token));
        let initial = accepted().with_header(LOCATION, location_header());
        let err = driver.post_or_delete(post(), initial).await.unwrap_err();
        assert!(err.is_cancelled(), "{err:?}");
        assert!(err.is_aborted(), "{err:?}");
        assert_eq!(err.operation_status(), Some(OperationStatus::InProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_wait() {
        let mut mock = MockTransport::new();
        mock.expect_send().never();
        let token = CancellationToken::new();
        let driver = LroDriver::new(mock)
            .with_options(PollingOptions::default().with_cancellation_token(token.clone()));
        let initial = accepted().with_header(LOCATION, location_header());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            token.cancel();
        });
        let start = Instant::now();
        let err = driver.post_or_delete(post(), initial).await.unwrap_err();
        assert!(err.is_cancelled(), "{err:?}");
        assert_elapsed(start, Duration::from_secs(10));
        canceller.await.expect("canceller task completes");
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_in_flight_request() {
        let token = CancellationToken::new();
        let driver = LroDriver::new(HangingTransport).with_options(
            fast().with_cancellation_token(token.clone()),
        );
        let initial = accepted().with_header(AZURE_ASYNC_OPERATION, async_header());
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            token.cancel();
        });
        let err = driver.put_or_patch(put(), initial).await.unwrap_err();
        assert!(err.is_cancelled(), "{err:?}");
        assert!(err.to_string().contains("cancelled"), "{err}");
        canceller.await.expect("canceller task completes");
    }

    #[tokio::test]
    async fn poller_steps() -> anyhow::Result<()> {
        let transport = FakeTransport::new([
            Response::new(StatusCode::ACCEPTED),
            ok(json!({"id": "x"})),
        ]);
        let driver = LroDriver::new(transport.clone());
        let initial = accepted().with_header(LOCATION, location_header());
        let mut poller = driver.poller(post(), initial)?;
        assert_eq!(
            poller.state().map(|s| s.status()),
            Some(OperationStatus::InProgress)
        );

        let p = poller.poll().await;
        assert!(matches!(p, Some(PollingResult::InProgress(None))), "{p:?}");
        assert_eq!(transport.urls().len(), 1);

        let p = poller.poll().await;
        match p {
            Some(PollingResult::Completed(Ok(r))) => {
                assert_eq!(r.body(), Some(&json!({"id": "x"})));
            }
            r => panic!("unexpected polling result {r:?}"),
        }
        assert!(poller.state().is_none(), "{poller:?}");
        assert!(poller.poll().await.is_none());
        assert_eq!(transport.urls().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn poller_reports_resource_in_progress() -> anyhow::Result<()> {
        let creating = json!({"properties": {"provisioningState": "Creating"}});
        let transport = FakeTransport::new([ok(creating.clone())]);
        let driver = LroDriver::new(transport);
        let mut poller = driver.poller_put_or_patch(put(), accepted())?;
        let p = poller.poll().await;
        match p {
            Some(PollingResult::InProgress(r)) => assert_eq!(r, Some(creating)),
            r => panic!("unexpected polling result {r:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn poller_error_is_final() -> anyhow::Result<()> {
        let transport = FakeTransport::with_results([Err(Error::io("boom"))]);
        let driver = LroDriver::new(transport);
        let initial = accepted().with_header(LOCATION, location_header());
        let mut poller = driver.poller_post_or_delete(post(), initial)?;
        let p = poller.poll().await;
        match p {
            Some(PollingResult::Completed(Err(e))) => assert!(e.is_io(), "{e:?}"),
            r => panic!("unexpected polling result {r:?}"),
        }
        assert!(poller.poll().await.is_none());
        Ok(())
    }

    #[cfg(feature = "unstable-stream")]
    #[tokio::test]
    async fn poller_stream() -> anyhow::Result<()> {
        use futures::StreamExt;
        let transport = FakeTransport::new([
            accepted(),
            accepted(),
            ok(json!({"id": "x"})),
        ]);
        let driver = LroDriver::new(transport);
        let initial = accepted().with_header(LOCATION, location_header());
        let poller = driver.poller_post_or_delete(post(), initial)?;
        let results: Vec<PollingResult> = poller.into_stream().collect().await;
        assert_eq!(results.len(), 3, "{results:?}");
        assert!(matches!(results[0], PollingResult::InProgress(_)));
        assert!(matches!(results[1], PollingResult::InProgress(_)));
        assert!(
            matches!(results[2], PollingResult::Completed(Ok(_))),
            "{results:?}"
        );
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_operations() -> anyhow::Result<()> {
        let driver = LroDriver::new(FakeTransport::default()).with_options(fast());
        let put_body = json!({"id": "a", "properties": {"provisioningState": "Succeeded"}});
        let a = driver.put_or_patch(put(), ok(put_body.clone()));
        let b = driver.post_or_delete(post(), Response::new(StatusCode::NO_CONTENT));
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a?.body(), Some(&put_body));
        assert_eq!(b?.body(), None);
        Ok(())
    }
}
