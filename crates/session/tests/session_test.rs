//! Lifecycle tests for `PeerSession` against test-double collaborators.
//!
//! # Test Strategy
//!
//! 1. **Basic functionality**: access while active, fail-fast after shutdown
//! 2. **Idempotence**: repeated and concurrent shutdown release exactly once
//! 3. **In-flight calls**: shutdown interrupts outstanding calls
//! 4. **Release failures**: collaborator errors and panics are absorbed by
//!    shutdown

use async_trait::async_trait;
use bytes::Bytes;
use proptest::prelude::*;
use session::{
    drive_call, CallController, CallError, CallStatus, Peer, PeerSession, ReleaseError,
    RpcChannel, RpcController, SessionError, SessionState,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Channel double that counts releases and can be told to hang every call,
/// or to fail or panic on close.
#[derive(Default)]
struct RecordingChannel {
    closed: AtomicBool,
    releases: Arc<AtomicUsize>,
    hang: bool,
    fail_close: bool,
    panic_close: bool,
}

impl RecordingChannel {
    fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::default()
        }
    }

    fn panicking_close() -> Self {
        Self {
            panic_close: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl RpcChannel for RecordingChannel {
    async fn call(
        &self,
        method: &str,
        request: Bytes,
        controller: &dyn RpcController,
    ) -> Result<Bytes, CallError> {
        if self.is_closed() {
            return Err(CallError::ConnectionClosed);
        }
        let hang = self.hang;
        let reply = Bytes::from(format!("{}:{}", method, request.len()));
        drive_call(controller, async move {
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(reply)
        })
        .await
    }

    fn close(&self) -> Result<(), ReleaseError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        if self.panic_close {
            panic!("transport torn down twice");
        }
        if self.fail_close {
            Err(ReleaseError::Transport("socket already reset".into()))
        } else {
            Ok(())
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn new_session(channel: RecordingChannel) -> (Arc<PeerSession<RecordingChannel>>, Arc<AtomicUsize>) {
    let releases = Arc::clone(&channel.releases);
    let session = PeerSession::new(Peer::new("buyer-7"), channel, CallController::new());
    (Arc::new(session), releases)
}

// ============================================================================
// Basic Functionality Tests
// ============================================================================

#[tokio::test]
async fn test_channel_usable_while_active() {
    // Channel and controller are available and working before shutdown
    let (session, _) = new_session(RecordingChannel::default());

    let channel = session.channel().expect("channel while active");
    let controller = session.controller().expect("controller while active");

    let reply = channel
        .call("Market.Quote", Bytes::from_static(b"BTC"), controller.as_ref())
        .await;
    assert_eq!(reply, Ok(Bytes::from_static(b"Market.Quote:3")));
    assert_eq!(controller.status(), CallStatus::Completed);
}

#[test]
fn test_get_channel_after_shutdown_fails() {
    // Scenario: get channel -> shutdown -> get channel again fails
    let (session, _) = new_session(RecordingChannel::default());

    assert!(session.channel().is_ok(), "Channel should be available while active");
    session.shutdown();

    let peer = session.peer().id;
    assert_eq!(
        session.channel().err(),
        Some(SessionError::UseAfterShutdown { peer }),
        "Channel access after shutdown must fail with UseAfterShutdown"
    );
    assert_eq!(
        session.controller().err(),
        Some(SessionError::UseAfterShutdown { peer }),
        "Controller access after shutdown must fail with UseAfterShutdown"
    );
}

#[test]
fn test_use_after_shutdown_is_deterministic() {
    // Every access after shutdown fails, not just the first
    let (session, _) = new_session(RecordingChannel::default());
    session.shutdown();

    for _ in 0..100 {
        assert!(session.channel().is_err());
        assert!(session.controller().is_err());
    }
    assert_eq!(session.state(), SessionState::ShutDown);
}

// ============================================================================
// Idempotence Tests
// ============================================================================

#[test]
fn test_repeated_shutdown_releases_once() {
    let (session, releases) = new_session(RecordingChannel::default());

    for _ in 0..5 {
        session.shutdown();
    }
    assert_eq!(releases.load(Ordering::SeqCst), 1, "Release must run exactly once");
}

#[test]
fn test_two_threads_shutdown_concurrently() {
    // Scenario: two threads shut down the same session at once
    let (session, releases) = new_session(RecordingChannel::default());

    crossbeam::thread::scope(|s| {
        for _ in 0..2 {
            let session = &session;
            s.spawn(move |_| {
                session.shutdown();
                assert!(session.is_shut_down(), "Caller must observe terminal state");
            });
        }
    })
    .unwrap();

    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[test]
fn test_no_access_once_shutdown_observed() {
    // Readers racing a shutdown: once a reader sees the session shut down,
    // none of its later accesses may succeed
    for _ in 0..20 {
        let (session, releases) = new_session(RecordingChannel::default());

        crossbeam::thread::scope(|s| {
            for _ in 0..4 {
                let session = &session;
                s.spawn(move |_| {
                    let mut observed = false;
                    for _ in 0..2_000 {
                        let channel = session.channel();
                        let controller = session.controller();
                        if observed {
                            assert!(channel.is_err(), "Channel handed out after shutdown was observed");
                            assert!(controller.is_err(), "Controller handed out after shutdown was observed");
                        }
                        observed = observed || session.is_shut_down();
                    }
                    // the shutdown thread always finishes before the scope ends
                    while !session.is_shut_down() {
                        std::thread::yield_now();
                    }
                    assert!(session.channel().is_err());
                    assert!(session.controller().is_err());
                });
            }
            let session = &session;
            s.spawn(move |_| {
                std::thread::yield_now();
                session.shutdown();
            });
        })
        .unwrap();

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}

proptest! {
    #[test]
    fn prop_concurrent_shutdown_releases_exactly_once(callers in 1usize..16, repeats in 1usize..4) {
        let (session, releases) = new_session(RecordingChannel::default());

        crossbeam::thread::scope(|s| {
            for _ in 0..callers {
                let session = &session;
                s.spawn(move |_| {
                    for _ in 0..repeats {
                        session.shutdown();
                        assert!(session.is_shut_down());
                        assert!(session.channel().is_err());
                    }
                });
            }
        })
        .unwrap();

        prop_assert_eq!(releases.load(Ordering::SeqCst), 1);
        prop_assert_eq!(session.state(), SessionState::ShutDown);
    }
}

// ============================================================================
// In-flight Call Tests
// ============================================================================

#[tokio::test]
async fn test_shutdown_interrupts_in_flight_call() {
    // Scenario: begin a call -> shutdown mid-call -> waiter sees closed
    let (session, _) = new_session(RecordingChannel::hanging());
    let controller = session.controller().unwrap();

    let call = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.call("Orders.Match", Bytes::new()).await })
    };

    while controller.status() != CallStatus::InFlight {
        tokio::task::yield_now().await;
    }
    session.shutdown();

    let outcome = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("call must not hang after shutdown")
        .unwrap();
    assert_eq!(outcome, Err(SessionError::Call(CallError::ConnectionClosed)));
    assert_eq!(controller.status(), CallStatus::Closed);
}

#[tokio::test]
async fn test_cancel_in_flight_call() {
    // Cancelling through the controller does not shut the session down
    let (session, _) = new_session(RecordingChannel::hanging());
    let controller = session.controller().unwrap();

    let call = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.call("Orders.Match", Bytes::new()).await })
    };

    while controller.status() != CallStatus::InFlight {
        tokio::task::yield_now().await;
    }
    controller.start_cancel();

    let outcome = call.await.unwrap();
    assert_eq!(outcome, Err(SessionError::Call(CallError::Cancelled)));
    assert!(session.is_active(), "Cancelling a call keeps the session alive");
    session.shutdown();
}

#[tokio::test]
async fn test_cancel_requested_before_call() {
    // A cancel issued with no call in flight cancels the next call only
    let (session, _) = new_session(RecordingChannel::default());
    let controller = session.controller().unwrap();

    controller.start_cancel();
    assert!(controller.is_canceled());
    assert_eq!(
        session.call("Orders.Place", Bytes::new()).await,
        Err(SessionError::Call(CallError::Cancelled))
    );
    assert_eq!(controller.status(), CallStatus::Cancelled);

    let reply = session.call("Orders.Place", Bytes::from_static(b"42")).await;
    assert_eq!(reply, Ok(Bytes::from_static(b"Orders.Place:2")));
    assert_eq!(controller.status(), CallStatus::Completed);
}

#[tokio::test]
async fn test_stale_channel_reports_connection_closed() {
    // A channel obtained before shutdown refuses calls afterwards
    let (session, _) = new_session(RecordingChannel::default());
    let channel = session.channel().unwrap();
    session.shutdown();

    let ctl = CallController::new();
    assert_eq!(
        channel.call("Market.Quote", Bytes::new(), &ctl).await,
        Err(CallError::ConnectionClosed)
    );
}

// ============================================================================
// Release Failure Tests
// ============================================================================

#[test]
fn test_release_failure_is_absorbed() {
    let (session, releases) = new_session(RecordingChannel::failing_close());

    session.shutdown();
    assert!(session.is_shut_down(), "Shutdown succeeds even if release fails");
    assert_eq!(releases.load(Ordering::SeqCst), 1);

    session.shutdown();
    assert_eq!(releases.load(Ordering::SeqCst), 1, "Failed release is not retried");
}

#[test]
fn test_panicking_release_still_shuts_down() {
    let (session, releases) = new_session(RecordingChannel::panicking_close());
    let controller = session.controller().unwrap();

    session.shutdown();
    assert_eq!(session.state(), SessionState::ShutDown, "Panic in close must not strand the session");
    assert_eq!(controller.status(), CallStatus::Closed);
    assert!(session.channel().is_err());

    // later calls, including the one from drop, return normally
    session.shutdown();
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    drop(session);
}
