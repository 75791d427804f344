// Chunk: docs/chunks/loop_bridge - Host message loop / secondary loop integration
//!
//! End-to-end scenarios: a real `MessageLoop` on the test thread acts as the
//! host UI loop, with the bridge's poll thread running in the background.

use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loop_bridge::{BridgeConfig, BridgeState, LoopBridge, MessageLoop, Task};
use loop_bridge_reactor::Interest;
use parking_lot::Mutex;

/// Slack allowed for OS scheduling on loaded CI machines.
const EPSILON: Duration = Duration::from_millis(200);

fn integrated_bridge(message_loop: &MessageLoop) -> LoopBridge {
    let bridge = LoopBridge::create(message_loop.proxy(), BridgeConfig::default()).unwrap();
    bridge.prepare_integration().unwrap();
    bridge
}

#[test]
fn test_timer_fires_once_on_ui_thread() {
    let mut message_loop = MessageLoop::new();
    let bridge = integrated_bridge(&message_loop);

    let ui_thread = thread::current().id();
    let fired = Arc::new(Mutex::new(Vec::new()));
    let fired_clone = fired.clone();
    let start = Instant::now();
    bridge
        .event_loop()
        .set_timeout(Duration::from_millis(50), move |_| {
            fired_clone
                .lock()
                .push((thread::current().id(), start.elapsed()));
        });

    assert!(message_loop.run_until(Duration::from_secs(2), || !fired.lock().is_empty()));
    // Give a duplicate fire a chance to show up.
    message_loop.run_for(Duration::from_millis(100));

    let fired = fired.lock();
    assert_eq!(fired.len(), 1, "timer must fire exactly once");
    let (thread_id, elapsed) = fired[0];
    assert_eq!(thread_id, ui_thread);
    assert!(elapsed >= Duration::from_millis(50), "fired early: {elapsed:?}");
    assert!(
        elapsed <= Duration::from_millis(50) + EPSILON,
        "fired late: {elapsed:?}"
    );

    bridge.shutdown();
}

#[test]
fn test_cross_thread_work_does_not_wait_for_unrelated_timer() {
    let mut message_loop = MessageLoop::new();
    let bridge = integrated_bridge(&message_loop);

    // Keeps the poll thread blocked with a long timeout.
    bridge
        .event_loop()
        .set_timeout(Duration::from_secs(30), |_| panic!("unrelated timer fired"));

    let ran_at = Arc::new(Mutex::new(None));
    let ran_clone = ran_at.clone();
    let remote_loop = bridge.event_loop().clone();
    let signal = bridge.wakeup_signal();
    let posted_at = Arc::new(Mutex::new(None));
    let posted_clone = posted_at.clone();

    let poster = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        *posted_clone.lock() = Some(Instant::now());
        remote_loop.post(move |_| {
            *ran_clone.lock() = Some((Instant::now(), thread::current().id()));
        });
        signal.trigger();
    });

    assert!(message_loop.run_until(Duration::from_secs(5), || ran_at.lock().is_some()));
    poster.join().expect("poster panicked");

    let posted_at = posted_at.lock().unwrap();
    let (ran_at, ran_on) = ran_at.lock().unwrap();
    assert_eq!(ran_on, thread::current().id());
    assert!(ran_at.duration_since(posted_at) < Duration::from_secs(1));

    bridge.shutdown();
}

#[test]
fn test_io_storm_keeps_one_drain_outstanding() {
    const CHUNKS: usize = 200;
    const CHUNK: &[u8] = b"0123456789abcdef";

    let mut message_loop = MessageLoop::new();
    let proxy = message_loop.proxy();

    // Counts drain tasks between posting and running.
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let scheduler = {
        let in_flight = in_flight.clone();
        let max_in_flight = max_in_flight.clone();
        move |task: Task| {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            let in_flight = in_flight.clone();
            proxy.post(move || {
                in_flight.fetch_sub(1, Ordering::SeqCst);
                task();
            });
        }
    };

    let bridge = Rc::new(LoopBridge::create(scheduler, BridgeConfig::default()).unwrap());
    bridge.prepare_integration().unwrap();

    // Opportunistic drains interleave with poll-initiated ones.
    let idle_bridge = Rc::clone(&bridge);
    message_loop.set_idle_handler(move || {
        idle_bridge.run_secondary_loop_once();
    });

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    server.set_nonblocking(true).unwrap();
    let server = mio::net::TcpStream::from_std(server);

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();
    bridge
        .event_loop()
        .register(server, Interest::READABLE, move |_, event| {
            let mut buf = [0u8; 256];
            loop {
                match event.source.read(&mut buf) {
                    Ok(0) => return,
                    Ok(n) => {
                        received_clone.fetch_add(n, Ordering::SeqCst);
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                    Err(err) => panic!("read failed: {err}"),
                }
            }
        })
        .unwrap();

    let writer = thread::spawn(move || {
        for i in 0..CHUNKS {
            client.write_all(CHUNK).unwrap();
            if i % 10 == 0 {
                thread::sleep(Duration::from_millis(1));
            }
        }
        client
    });

    let total = CHUNKS * CHUNK.len();
    assert!(message_loop.run_until(Duration::from_secs(10), || {
        received.load(Ordering::SeqCst) == total
    }));
    let _client = writer.join().expect("writer panicked");

    assert!(max_in_flight.load(Ordering::SeqCst) <= 1);
    let stats = bridge.stats();
    assert!(stats.max_outstanding <= 1);
    assert!(stats.drain_requests >= 1);
    assert!(stats.callbacks_run >= 1);

    bridge.shutdown();
    assert_eq!(bridge.state(), BridgeState::Closed);
}

#[test]
fn test_bridge_keeps_draining_after_callback_panic() {
    let mut message_loop = MessageLoop::new();
    let bridge = integrated_bridge(&message_loop);

    bridge.event_loop().post(|_| panic!("callback failed"));
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        message_loop.run_until(Duration::from_secs(2), || false)
    }));
    assert!(result.is_err(), "the callback panic reaches the host loop");

    let fired = Arc::new(AtomicBool::new(false));
    let fired_clone = fired.clone();
    bridge
        .event_loop()
        .set_timeout(Duration::from_millis(10), move |_| {
            fired_clone.store(true, Ordering::SeqCst);
        });

    assert!(message_loop.run_until(Duration::from_secs(2), || fired.load(Ordering::SeqCst)));
    assert!(bridge.stats().drain_requests >= 2);

    bridge.shutdown();
}

#[test]
fn test_shutdown_is_bounded_and_queued_drain_is_noop() {
    // Holds drain tasks instead of running them, like a busy UI thread.
    let queued: Arc<Mutex<Vec<Task>>> = Arc::new(Mutex::new(Vec::new()));
    let queue = queued.clone();
    let bridge = LoopBridge::create(
        move |task: Task| queue.lock().push(task),
        BridgeConfig::default(),
    )
    .unwrap();
    bridge.prepare_integration().unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = ran.clone();
    bridge.event_loop().post(move |_| {
        ran_clone.store(true, Ordering::SeqCst);
    });

    let deadline = Instant::now() + Duration::from_secs(2);
    while queued.lock().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(queued.lock().len(), 1);

    // The poll thread is parked on the handshake; shutdown must still finish.
    let start = Instant::now();
    bridge.shutdown();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(bridge.state(), BridgeState::Closed);

    // The late drain task runs after shutdown and does nothing.
    for task in queued.lock().drain(..) {
        task();
    }
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(bridge.stats().poll_drains, 0);
}

#[test]
fn test_shutdown_while_poll_thread_blocks_is_bounded() {
    let message_loop = MessageLoop::new();
    let bridge = integrated_bridge(&message_loop);

    // Nothing armed: the poll thread blocks with no timeout.
    thread::sleep(Duration::from_millis(20));

    let start = Instant::now();
    bridge.shutdown();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(bridge.state(), BridgeState::Closed);
}

#[test]
fn test_run_once_does_not_block_on_pending_timer() {
    let message_loop = MessageLoop::new();
    let bridge = integrated_bridge(&message_loop);

    let fired = Arc::new(AtomicBool::new(false));
    let fired_clone = fired.clone();
    bridge
        .event_loop()
        .set_timeout(Duration::from_secs(30), move |_| {
            fired_clone.store(true, Ordering::SeqCst);
        });

    let start = Instant::now();
    let executed = bridge.run_secondary_loop_once();
    assert!(start.elapsed() < Duration::from_millis(50));
    assert_eq!(executed, 0);
    assert!(!fired.load(Ordering::SeqCst));

    bridge.shutdown();
}

#[test]
fn test_shutdown_twice_matches_once() {
    let message_loop = MessageLoop::new();
    let bridge = integrated_bridge(&message_loop);

    bridge.shutdown();
    let after_once = (bridge.state(), bridge.stats());
    bridge.shutdown();
    assert_eq!((bridge.state(), bridge.stats()), after_once);
    assert_eq!(bridge.state(), BridgeState::Closed);

    // Draining a closed bridge is a no-op as well.
    bridge.event_loop().post(|_| panic!("ran after shutdown"));
    assert_eq!(bridge.run_secondary_loop_once(), 0);
}

#[test]
fn test_drop_shuts_down() {
    let message_loop = MessageLoop::new();
    let bridge = integrated_bridge(&message_loop);
    let signal = bridge.wakeup_signal();

    let start = Instant::now();
    drop(bridge);
    assert!(start.elapsed() < Duration::from_secs(1));

    // The poll thread is gone, so nobody consumes the signal any more.
    signal.trigger();
    assert!(signal.is_pending());
}

#[test]
fn test_run_forever_stops_on_shutdown_from_other_thread() {
    let bridge = Arc::new(
        LoopBridge::create(|_task: Task| {}, BridgeConfig::default()).unwrap(),
    );

    // An interval keeps the loop alive until it is stopped.
    let ticks = Arc::new(AtomicUsize::new(0));
    let ticks_clone = ticks.clone();
    bridge
        .event_loop()
        .set_interval(Duration::from_millis(5), move |_| {
            ticks_clone.fetch_add(1, Ordering::SeqCst);
        });

    let runner = {
        let bridge = bridge.clone();
        thread::spawn(move || bridge.run_forever())
    };

    thread::sleep(Duration::from_millis(50));
    let start = Instant::now();
    bridge.shutdown();
    runner.join().expect("runner panicked").unwrap();

    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(ticks.load(Ordering::SeqCst) >= 1);
    assert_eq!(bridge.state(), BridgeState::Unprepared);
}
