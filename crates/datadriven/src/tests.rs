//! Unit tests for dispatch lanes and the invocation state machine.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use ddbus::BusError;
use ddbus::LocalBus;
use ddbus::ObjectId;
use ddbus::SessionId;
use ddbus::TIMEOUT_ERROR_NAME;
use ddbus::Value;

use futures::FutureExt;

use crate::config::ManagerConfig;
use crate::dispatch::Dispatcher;
use crate::invocation::FromReply;
use crate::invocation::InvocationState;
use crate::invocation::MethodInvocation;
use crate::invocation::MethodReply;
use crate::invocation::ReplyStatus;
use crate::manager::ObserverManager;

fn object(path: &str) -> ObjectId {
    ObjectId::new(":1.9", path, SessionId(1))
}

fn manager() -> Arc<ObserverManager> {
    ObserverManager::with_config(LocalBus::new(), ManagerConfig::default().with_dispatch_lanes(3))
        .expect("test runs inside a runtime")
}

// --- Dispatch lanes ---

#[tokio::test(flavor = "multi_thread")]
async fn test_lane_runs_tasks_in_order() {
    let dispatcher = Dispatcher::start(&Handle::current(), 4);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, done_rx) = oneshot::channel();

    let id = object("/ordered");
    for i in 0..50u32 {
        let seen = seen.clone();
        dispatcher.enqueue(
            &id,
            async move {
                // later tasks are quicker; only the lane keeps them in order
                tokio::time::sleep(Duration::from_micros(u64::from(50 - i))).await;
                seen.lock().push(i);
            }
            .boxed(),
        );
    }
    dispatcher.enqueue(&id, async move { let _ = done_tx.send(()); }.boxed());

    done_rx.await.unwrap();
    assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_lane_survives_panicking_task() {
    let dispatcher = Dispatcher::start(&Handle::current(), 1);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = object("/panicky");

    dispatcher.enqueue(&id, async { panic!("listener blew up"); }.boxed());
    dispatcher.enqueue(&id, async move { let _ = tx.send("after"); }.boxed());

    assert_eq!(rx.recv().await, Some("after"));
}

#[tokio::test]
async fn test_lane_choice_is_stable() {
    let dispatcher = Dispatcher::start(&Handle::current(), 8);
    let a = object("/a");
    let lane = dispatcher.lane_for(&a);
    for _ in 0..10 {
        assert_eq!(dispatcher.lane_for(&a.clone()), lane);
    }
    assert!(lane < dispatcher.lane_count());
}

// --- Reply taxonomy ---

#[test]
fn test_bus_errors_map_to_statuses() {
    let status = |e: BusError| MethodReply::<()>::from_error(e).status();

    assert_eq!(status(BusError::Timeout), ReplyStatus::Timeout);
    assert_eq!(status(BusError::error_reply(TIMEOUT_ERROR_NAME, "late")), ReplyStatus::Timeout);
    assert_eq!(status(BusError::error_reply("org.example.Error.Jammed", "stuck")), ReplyStatus::ErrorReply);
    assert_eq!(status(BusError::Malformed("short".into())), ReplyStatus::TransportFailure);
    assert_eq!(status(BusError::ConnectionLost("gone".into())), ReplyStatus::TransportFailure);
    assert_eq!(status(BusError::NoSuchObject(object("/x"))), ReplyStatus::DispatchFailed);

    let reply = MethodReply::<()>::from_error(BusError::error_reply("org.example.Error.Jammed", "stuck"));
    assert_eq!(reply.error_name(), Some("org.example.Error.Jammed"));
    assert_eq!(reply.error_description(), Some("stuck"));
    assert!(reply.value().is_none());
}

#[test]
fn test_reply_decoding() {
    assert_eq!(<()>::from_reply(vec![]), Ok(()));
    assert!(<()>::from_reply(vec![Value::Bool(true)]).is_err());
    assert_eq!(bool::from_reply(vec![Value::Bool(true)]), Ok(true));
    assert_eq!(
        <(u32, String)>::from_reply(vec![Value::U32(3), Value::from("three")]),
        Ok((3, "three".to_string()))
    );
    assert!(<(u32, String)>::from_reply(vec![Value::U32(3)]).is_err());
    assert_eq!(Vec::<Value>::from_reply(vec![Value::Byte(1)]), Ok(vec![Value::Byte(1)]));
}

// --- Invocation state machine ---

#[tokio::test(flavor = "multi_thread")]
async fn test_keep_alive_released_on_completion() {
    let manager = manager();
    let (tx, rx) = oneshot::channel::<u32>();
    let inv = MethodInvocation::spawn(manager, object("/k"), Duration::from_secs(5), async move {
        rx.await.map_err(|_| BusError::ConnectionLost("sender dropped".into()))
    });

    assert_eq!(inv.state(), InvocationState::Waiting);
    assert!(inv.holds_self());

    tx.send(7).unwrap();
    let reply = inv.reply_async().await;
    assert_eq!(reply.value(), Some(&7));
    assert_eq!(inv.state(), InvocationState::Ready);
    assert!(!inv.holds_self());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_listener_runs_after_caller_drops_handle() {
    let manager = manager();
    let (tx, rx) = oneshot::channel::<u32>();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let inv = MethodInvocation::spawn(manager, object("/k"), Duration::from_secs(5), async move {
        rx.await.map_err(|_| BusError::ConnectionLost("sender dropped".into()))
    });
    inv.set_listener(move |reply: Arc<MethodReply<u32>>| {
        let _ = seen_tx.send(reply.value().copied());
    });
    drop(inv);

    tx.send(11).unwrap();
    assert_eq!(seen_rx.recv().await, Some(Some(11)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_last_listener_wins() {
    let manager = manager();
    let (tx, rx) = oneshot::channel::<u32>();
    let (first_tx, mut first_rx) = mpsc::unbounded_channel::<u32>();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel::<u32>();

    let inv = MethodInvocation::spawn(manager, object("/k"), Duration::from_secs(5), async move {
        rx.await.map_err(|_| BusError::ConnectionLost("sender dropped".into()))
    });
    inv.set_listener(move |reply: Arc<MethodReply<u32>>| {
        let _ = first_tx.send(reply.value().copied().unwrap_or_default());
    });
    inv.set_listener(move |reply: Arc<MethodReply<u32>>| {
        let _ = second_tx.send(reply.value().copied().unwrap_or_default());
    });

    // the replaced listener was dropped unfired
    assert_eq!(first_rx.recv().await, None);

    tx.send(5).unwrap();
    assert_eq!(second_rx.recv().await, Some(5));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_releases_and_absorbs_late_reply() {
    let manager = manager();
    let (tx, rx) = oneshot::channel::<u32>();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<()>();

    let inv = MethodInvocation::spawn(manager, object("/k"), Duration::from_secs(5), async move {
        rx.await.map_err(|_| BusError::ConnectionLost("sender dropped".into()))
    });
    inv.set_listener(move |_: Arc<MethodReply<u32>>| {
        let _ = seen_tx.send(());
    });

    inv.cancel();
    assert_eq!(inv.state(), InvocationState::Cancelled);
    assert!(!inv.holds_self());
    assert_eq!(inv.reply().status(), ReplyStatus::Cancelled);

    tx.send(1).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(inv.state(), InvocationState::Cancelled);
    // the listener was dropped with the cancel, closing the channel unfired
    assert_eq!(seen_rx.recv().await, None);

    // cancel after resolution changes nothing
    inv.cancel();
    assert_eq!(inv.reply().status(), ReplyStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resolved_invocation_is_ready_at_once() {
    let inv: MethodInvocation<u32> = MethodInvocation::resolved(
        manager(),
        object("/r"),
        MethodReply::failed(ReplyStatus::DispatchFailed, "object gone"),
    );
    assert_eq!(inv.state(), InvocationState::Ready);
    assert!(!inv.holds_self());
    assert_eq!(inv.reply_timeout(Duration::ZERO).map(|r| r.status()), Some(ReplyStatus::DispatchFailed));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reply_timeout_gives_up() {
    let (_tx, rx) = oneshot::channel::<u32>();
    let inv = MethodInvocation::spawn(manager(), object("/slow"), Duration::from_secs(5), async move {
        rx.await.map_err(|_| BusError::ConnectionLost("sender dropped".into()))
    });
    assert!(inv.reply_timeout(Duration::from_millis(20)).is_none());
    assert_eq!(inv.state(), InvocationState::Waiting);
}
