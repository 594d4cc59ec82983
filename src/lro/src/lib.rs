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

//! Types and functions to poll Azure long-running operations.
//!
//! Azure resource-management APIs often respond to mutating requests with an
//! `Accepted` status and a link to poll for completion, instead of the final
//! result. These requests are called long-running operations. Services use
//! one of three polling conventions:
//!
//! - The `Azure-AsyncOperation` header links to a status monitor. The status
//!   monitor body contains a `status` field.
//! - The `Location` header links to a URL returning `202 Accepted` while the
//!   operation is running.
//! - With no headers at all, `PUT` and `PATCH` operations report progress in
//!   the `properties.provisioningState` field of the resource itself.
//!
//! This crate normalizes these conventions. Applications send the initiating
//! request with a [Transport][transport::Transport], and then use the
//! [LroDriver][driver::LroDriver] to wait for the operation to complete:
//!
//! ```no_run
//! # use azure_rest_lro::driver::LroDriver;
//! # use azure_rest_lro::transport::{Request, ReqwestTransport, Transport};
//! # async fn sample(request: Request) -> anyhow::Result<()> {
//! let transport = ReqwestTransport::new();
//! let response = transport.send(request.clone()).await?;
//! let result = LroDriver::new(transport)
//!     .put_or_patch(request, response)
//!     .await?;
//! println!("resource = {:?}", result.body());
//! # Ok(()) }
//! ```
//!
//! Applications that want to observe the progress of the operation can use
//! the [Poller] interface:
//!
//! ```no_run
//! # use azure_rest_lro::{Poller, PollingResult};
//! # use azure_rest_lro::driver::LroDriver;
//! # use azure_rest_lro::transport::{Request, Response};
//! # async fn sample(driver: LroDriver, request: Request, response: Response) -> anyhow::Result<()> {
//! let mut poller = driver.poller(request, response)?;
//! while let Some(p) = poller.poll().await {
//!     match p {
//!         PollingResult::InProgress(r) => println!("in progress, resource = {r:?}"),
//!         PollingResult::Completed(r) => println!("completed, result = {r:?}"),
//!     }
//! }
//! # Ok(()) }
//! ```
//!
//! Note that `poll()` sends a status request on each call. Applications
//! should wait between calls, see
//! [PollingState::timeout][polling_state::PollingState::timeout].

pub mod driver;
pub mod error;
pub mod options;
pub mod polling_state;
pub mod strategy;
pub mod transport;

pub use driver::{LroDriver, LroPoller};
pub use error::Error;
pub use options::PollingOptions;
pub use polling_state::{OperationResult, OperationStatus, PollingState, Semantics};

/// The result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The result of polling a long-running operation.
#[derive(Debug)]
pub enum PollingResult {
    /// The operation is still in progress.
    ///
    /// Contains the last known representation of the resource, if the
    /// service returned one.
    InProgress(Option<serde_json::Value>),
    /// The operation completed, or polling failed and cannot continue.
    ///
    /// The engine does not retry failed status requests. Errors from the
    /// transport, and responses violating the polling protocol, complete the
    /// operation with an error.
    Completed(Result<OperationResult>),
}

/// The trait implemented by long-running operation pollers.
///
/// A poller returns `Some(_)` until the operation completes, then `None`.
pub trait Poller: Send + sealed::Poller {
    /// Sends one status request and returns the progress of the operation.
    ///
    /// Returns `None` once the poller has returned
    /// [Completed][PollingResult::Completed].
    fn poll(&mut self) -> impl Future<Output = Option<PollingResult>> + Send;

    /// Polls the operation until it completes.
    ///
    /// Waits between status requests as requested by the service, or as
    /// configured in [PollingOptions].
    ///
    /// # Panics
    ///
    /// If the poller already returned
    /// [Completed][PollingResult::Completed] from [poll][Poller::poll].
    fn until_done(self) -> impl Future<Output = Result<OperationResult>> + Send;

    /// Converts a poller to a [futures::Stream].
    ///
    /// The stream yields one item per status request, without waiting between
    /// them.
    #[cfg(feature = "unstable-stream")]
    fn into_stream(self) -> impl futures::Stream<Item = PollingResult> + Unpin;
}

mod sealed {
    pub trait Poller {}
}
