//! Transport-agnostic RPC contracts.
//!
//! A session talks to its peer through an [`RpcChannel`] and serves the
//! peer's calls through a [`CallHandler`]. Both sides of a connection hold a
//! channel and a handler, so either may act as client or server.

use crate::controller::RpcController;
use crate::error::{CallError, ReleaseError};
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;

/// Outbound half of a peer connection.
#[async_trait]
pub trait RpcChannel: Send + Sync + 'static {
    /// Send `request` to the peer's `method` and wait for the response.
    ///
    /// The call is tracked by `controller`: it must resolve promptly with
    /// the controller's interruption cause once the controller is cancelled
    /// or closed, and with [`CallError::ConnectionClosed`] if the channel is
    /// closed before or during the call.
    async fn call(
        &self,
        method: &str,
        request: Bytes,
        controller: &dyn RpcController,
    ) -> Result<Bytes, CallError>;

    /// Release the underlying transport.
    fn close(&self) -> Result<(), ReleaseError>;

    fn is_closed(&self) -> bool;
}

/// Serves calls initiated by the remote peer.
#[async_trait]
pub trait CallHandler: Send + Sync + 'static {
    async fn handle(&self, method: &str, request: Bytes) -> Result<Bytes, CallError>;
}

/// Run `response` as the call tracked by `controller`.
///
/// Marks the controller in flight, races the response against the
/// controller's interruption, and records the outcome. Channel
/// implementations wrap their transport future in this.
pub async fn drive_call<F>(controller: &dyn RpcController, response: F) -> Result<Bytes, CallError>
where
    F: Future<Output = Result<Bytes, CallError>> + Send,
{
    controller.begin()?;

    let outcome = tokio::select! {
        biased;
        cause = controller.interrupted() => Err(cause),
        result = response => result,
    };

    match &outcome {
        Ok(_) => controller.complete(),
        // no-op if the controller was interrupted
        Err(err) => controller.set_failed(err.to_string()),
    }
    outcome
}
