//! In-process duplex RPC channel.
//!
//! # Architecture
//!
//! ```text
//!   left DuplexChannel                         right DuplexChannel
//!   ┌───────────────────┐   Request/Response   ┌───────────────────┐
//!   │ outbound ─────────┼─────────────────────▶│ reader task       │
//!   │ pending  ◀────────┼── routes Response    │  ├ Request → handler
//!   │ reader task       │◀─────────────────────┼─ outbound         │
//!   └─────────┬─────────┘                      └─────────┬─────────┘
//!             └──────────── shared link flag ────────────┘
//! ```
//!
//! Each end owns the sending half of one bounded queue and a reader task for
//! the other. The reader routes responses to the waiter registered under the
//! call id and runs each incoming request on its own task, so both ends serve
//! and issue calls concurrently.
//!
//! Closing either end raises the shared link flag: both readers stop, every
//! pending waiter on both ends is dropped (its call resolves with
//! `ConnectionClosed`), and handler tasks still running are abandoned.

use crate::config::{ConfigError, TransportConfig};
use crate::protocol::{CallId, Envelope};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use session::{drive_call, CallError, CallHandler, Peer, ReleaseError, RpcChannel, RpcController};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

type Waiter = oneshot::Sender<Result<Bytes, CallError>>;

/// One side of a connection: the local peer and the handler serving calls
/// that arrive from the remote side.
#[derive(Clone)]
pub struct Endpoint {
    pub peer: Peer,
    pub handler: Option<Arc<dyn CallHandler>>,
}

impl Endpoint {
    /// An endpoint that only issues calls. Incoming requests are answered
    /// with `Unimplemented`.
    pub fn new(peer: Peer) -> Self {
        Self {
            peer,
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: impl CallHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

/// State shared between a channel handle and its reader task.
struct Inner {
    local: Peer,
    remote: Peer,
    outbound: mpsc::Sender<Envelope>,
    pending: DashMap<CallId, Waiter>,
    next_id: AtomicU64,
    closed: AtomicBool,
    /// Reserved call slots, bounded by `max_pending`.
    in_flight: AtomicUsize,
    max_pending: usize,
}

/// Holds a reserved call slot and, once registered, the call's waiter.
/// Both are released when the call future completes or is dropped.
struct PendingGuard<'a> {
    inner: &'a Inner,
    id: Option<CallId>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.inner.pending.remove(&id);
        }
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Inner {
    fn new(local: Peer, remote: Peer, outbound: mpsc::Sender<Envelope>, max_pending: usize) -> Self {
        Self {
            local,
            remote,
            outbound,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_pending,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close this end locally. Returns false if it was already closed.
    fn mark_closed(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        // dropping the waiters resolves their calls with ConnectionClosed
        self.pending.clear();
        first
    }

    /// Reserve one of the `max_pending` call slots.
    fn reserve_slot(&self) -> Result<PendingGuard<'_>, CallError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) >= self.max_pending {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(CallError::TooManyPending {
                limit: self.max_pending,
            });
        }
        Ok(PendingGuard {
            inner: self,
            id: None,
        })
    }

    async fn round_trip(&self, method: &str, payload: Bytes) -> Result<Bytes, CallError> {
        if self.is_closed() {
            return Err(CallError::ConnectionClosed);
        }
        let mut guard = self.reserve_slot()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        guard.id = Some(id);
        // a close that raced the insert may have missed this waiter
        if self.is_closed() {
            return Err(CallError::ConnectionClosed);
        }

        trace!(local = %self.local.name, call_id = id, method, "sending request");
        self.outbound
            .send(Envelope::Request {
                id,
                method: method.to_string(),
                payload,
            })
            .await
            .map_err(|_| CallError::ConnectionClosed)?;

        rx.await.unwrap_or(Err(CallError::ConnectionClosed))
    }

    fn resolve(&self, id: CallId, result: Result<Bytes, CallError>) {
        match self.pending.remove(&id) {
            Some((_, waiter)) => {
                // the caller may have gone away in the meantime
                let _ = waiter.send(result);
            }
            None => debug!(local = %self.local.name, call_id = id, "response for abandoned call"),
        }
    }

    fn dispatch(
        &self,
        id: CallId,
        method: String,
        payload: Bytes,
        handler: Option<Arc<dyn CallHandler>>,
        mut link: watch::Receiver<bool>,
    ) {
        let outbound = self.outbound.clone();
        let local = self.local.name.clone();
        tokio::spawn(async move {
            trace!(local = %local, call_id = id, method = %method, "serving request");
            // the handler runs on its own task so a panic surfaces as a JoinError
            let mut serving = {
                let method = method.clone();
                tokio::spawn(async move {
                    match handler {
                        Some(handler) => handler.handle(&method, payload).await,
                        None => Err(CallError::Unimplemented(method)),
                    }
                })
            };
            let result = tokio::select! {
                joined = &mut serving => match joined {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(local = %local, call_id = id, method = %method, error = %err, "call handler failed");
                        Err(CallError::Remote(format!("handler for {} panicked", method)))
                    }
                },
                _ = link.wait_for(|closed| *closed) => {
                    serving.abort();
                    return;
                }
            };
            if outbound
                .send(Envelope::Response { id, result })
                .await
                .is_err()
            {
                debug!(local = %local, call_id = id, "peer gone before response was sent");
            }
        });
    }
}

/// One end of an in-process duplex RPC connection.
///
/// Created in connected pairs by [`DuplexChannel::pair`]. Must be created
/// from within a tokio runtime: each end spawns a reader task.
pub struct DuplexChannel {
    inner: Arc<Inner>,
    link: Arc<watch::Sender<bool>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl DuplexChannel {
    /// Connect two endpoints. The first channel returned belongs to `left`
    /// and calls `right`; the second belongs to `right` and calls `left`.
    pub fn pair(
        config: &TransportConfig,
        left: Endpoint,
        right: Endpoint,
    ) -> Result<(DuplexChannel, DuplexChannel), ConfigError> {
        config.validate()?;

        let (left_tx, right_rx) = mpsc::channel(config.queue_capacity);
        let (right_tx, left_rx) = mpsc::channel(config.queue_capacity);
        let (link, _) = watch::channel(false);
        let link = Arc::new(link);

        debug!(left = %left.peer, right = %right.peer, "duplex link established");

        let left_channel = Self::open(
            config,
            left.peer.clone(),
            right.peer.clone(),
            left_tx,
            left_rx,
            left.handler,
            Arc::clone(&link),
        );
        let right_channel = Self::open(
            config,
            right.peer,
            left.peer,
            right_tx,
            right_rx,
            right.handler,
            link,
        );
        Ok((left_channel, right_channel))
    }

    fn open(
        config: &TransportConfig,
        local: Peer,
        remote: Peer,
        outbound: mpsc::Sender<Envelope>,
        inbound: mpsc::Receiver<Envelope>,
        handler: Option<Arc<dyn CallHandler>>,
        link: Arc<watch::Sender<bool>>,
    ) -> Self {
        let inner = Arc::new(Inner::new(
            local,
            remote,
            outbound,
            config.max_pending_calls,
        ));
        let reader = tokio::spawn(read_loop(
            Arc::clone(&inner),
            inbound,
            link.subscribe(),
            handler,
        ));
        Self {
            inner,
            link,
            reader: Mutex::new(Some(reader)),
        }
    }

    /// The peer this channel calls.
    pub fn remote(&self) -> &Peer {
        &self.inner.remote
    }

    /// Number of calls currently waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }
}

#[async_trait]
impl RpcChannel for DuplexChannel {
    async fn call(
        &self,
        method: &str,
        request: Bytes,
        controller: &dyn RpcController,
    ) -> Result<Bytes, CallError> {
        drive_call(controller, self.inner.round_trip(method, request)).await
    }

    fn close(&self) -> Result<(), ReleaseError> {
        let first = self.inner.mark_closed();
        self.link.send_replace(true);
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
        if first {
            debug!(local = %self.inner.local.name, remote = %self.inner.remote.name, "duplex channel closed");
            Ok(())
        } else {
            Err(ReleaseError::AlreadyClosed)
        }
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        if !self.inner.is_closed() {
            let _ = self.close();
        }
    }
}

async fn read_loop(
    inner: Arc<Inner>,
    mut inbound: mpsc::Receiver<Envelope>,
    mut link: watch::Receiver<bool>,
    handler: Option<Arc<dyn CallHandler>>,
) {
    // handed to request tasks; `link` stays borrowed by the select below
    let task_link = link.clone();
    loop {
        tokio::select! {
            _ = link.wait_for(|closed| *closed) => break,
            envelope = inbound.recv() => match envelope {
                Some(Envelope::Request { id, method, payload }) => {
                    inner.dispatch(id, method, payload, handler.clone(), task_link.clone());
                }
                Some(Envelope::Response { id, result }) => inner.resolve(id, result),
                None => break,
            },
        }
    }
    if inner.mark_closed() {
        debug!(local = %inner.local.name, remote = %inner.remote.name, "remote end closed the link");
    }
}
