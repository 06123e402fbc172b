mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use parking_lot::Mutex;

use common::{fast_config, feed, wait_until, Loopback, NoDeviceBackend};
use snapforge_core::audio::{NullBackend, OutputBackend};
use snapforge_core::{ClientError, ClientHandle, ConnectionState, LogLevel};

const WAIT: Duration = Duration::from_secs(5);

fn client_with(backend: Arc<dyn OutputBackend>) -> (ClientHandle, Arc<Loopback>, snapforge_core::PcmProducer) {
    let (loopback, producer) = Loopback::new();
    let client = ClientHandle::new(fast_config(), loopback.clone(), backend);
    (client, loopback, producer)
}

fn client() -> (ClientHandle, Arc<Loopback>, snapforge_core::PcmProducer) {
    client_with(Arc::new(NullBackend::new()))
}

fn record_states(client: &ClientHandle) -> Arc<Mutex<Vec<ConnectionState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    client.register_state_callback(move |state| sink.lock().push(state));
    states
}

#[test]
fn volume_is_clamped() {
    let (client, _, _) = client();
    assert_eq!(client.set_volume(150), 100);
    assert_eq!(client.volume(), 100);
    assert_eq!(client.set_volume(-5), 0);
    assert_eq!(client.volume(), 0);
}

#[test]
fn second_start_fails_without_state_change() {
    let (client, loopback, _) = client();
    client.start("localhost", 1704).unwrap();
    let state = client.state();
    assert!(state.is_connected());

    assert_eq!(
        client.start("localhost", 1704),
        Err(ClientError::NotDisconnected(state))
    );
    assert_eq!(client.state(), state);
    assert_eq!(loopback.connects.load(Ordering::SeqCst), 1);
}

#[test]
fn lifecycle_reports_every_state() {
    let (client, loopback, mut producer) = client();
    let states = record_states(&client);

    client.set_name("kitchen");
    client.set_instance(2);
    client.set_latency(25);
    client.start("localhost", 1704).unwrap();
    let request = loopback.last_request.lock().clone().unwrap();
    assert_eq!(request.identity.name, "kitchen");
    assert_eq!(request.identity.instance, 2);
    assert_eq!(request.latency_ms, 25);

    feed(&mut producer);
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Playing));
    assert!(client.stats().is_some());

    client.stop();
    assert_eq!(
        *states.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Playing,
            ConnectionState::Disconnected,
        ]
    );
    assert!(client.stats().is_none());
    assert_eq!(loopback.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_when_disconnected_is_silent() {
    let (client, _, _) = client();
    let states = record_states(&client);
    client.stop();
    client.stop();
    assert!(states.lock().is_empty());

    client.start("localhost", 1704).unwrap();
    client.stop();
    client.stop();
    assert_eq!(states.lock().last(), Some(&ConnectionState::Disconnected));
    assert_eq!(
        states
            .lock()
            .iter()
            .filter(|s| **s == ConnectionState::Disconnected)
            .count(),
        1
    );
}

#[test]
fn disconnected_callback_can_restart_the_client() {
    let (client, loopback, _) = client();
    let client = Arc::new(client);
    let restarted = Arc::new(AtomicBool::new(false));
    let restart = Arc::new(Mutex::new(None));
    {
        let weak = Arc::downgrade(&client);
        let restarted = restarted.clone();
        let restart = restart.clone();
        client.register_state_callback(move |state| {
            if state == ConnectionState::Disconnected && !restarted.swap(true, Ordering::SeqCst) {
                if let Some(client) = weak.upgrade() {
                    *restart.lock() = Some(client.start("localhost", 1704));
                }
            }
        });
    }
    client.start("localhost", 1704).unwrap();

    let (done_tx, done_rx) = bounded(1);
    let stopper = {
        let client = client.clone();
        thread::spawn(move || {
            client.stop();
            let _ = done_tx.send(());
        })
    };
    done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("restart from the state callback deadlocked");
    stopper.join().unwrap();

    assert_eq!(*restart.lock(), Some(Ok(())));
    assert!(client.is_connected());
    assert_eq!(loopback.connects.load(Ordering::SeqCst), 2);

    client.stop();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn connect_failure_returns_to_disconnected() {
    let (client, loopback, _) = client();
    let states = record_states(&client);
    loopback.fail.store(true, Ordering::SeqCst);

    assert!(matches!(
        client.start("localhost", 1704),
        Err(ClientError::Connect(_))
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(
        *states.lock(),
        vec![ConnectionState::Connecting, ConnectionState::Disconnected]
    );
}

#[test]
fn latency_only_changes_while_disconnected() {
    let (client, _, _) = client();
    assert!(client.set_latency(30));
    client.start("localhost", 1704).unwrap();
    assert!(!client.set_latency(80));
    assert_eq!(client.latency(), 30);
    client.stop();
    assert!(client.set_latency(80));
    assert_eq!(client.latency(), 80);
}

#[test]
fn server_settings_reach_the_host() {
    let (client, loopback, _) = client();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    client.register_settings_callback(move |volume, muted, latency| {
        sink.lock().push((volume, muted, latency))
    });
    client.start("localhost", 1704).unwrap();

    loopback.events().settings(150, true, 30);
    assert_eq!(*seen.lock(), vec![(100, true, 30)]);
    let settings = client.settings();
    assert_eq!(settings.volume, 100);
    assert!(settings.muted);
    assert_eq!(settings.latency_ms, 30);
}

#[test]
fn events_from_an_old_connection_are_ignored() {
    let (client, loopback, _) = client();
    client.start("localhost", 1704).unwrap();
    let old = loopback.events();
    client.stop();
    client.start("localhost", 1704).unwrap();

    old.disconnected("late");
    old.settings(5, false, 0);
    assert!(client.is_connected());
    assert_ne!(client.volume(), 5);
}

#[test]
fn network_loss_is_reported_and_recoverable() {
    let (client, loopback, _) = client();
    let logs = Arc::new(Mutex::new(Vec::new()));
    let sink = logs.clone();
    client.register_log_callback(move |level, message| sink.lock().push((level, message.to_string())));
    client.start("localhost", 1704).unwrap();

    loopback.events().disconnected("reset by peer");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(logs
        .lock()
        .iter()
        .any(|(level, msg)| *level == LogLevel::Warning && msg.contains("reset by peer")));

    client.start("localhost", 1704).unwrap();
    assert!(client.is_connected());
    assert_eq!(loopback.stops.load(Ordering::SeqCst), 1);
}

#[test]
fn missing_output_device_disconnects() {
    let (client, _, mut producer) = client_with(Arc::new(NoDeviceBackend));
    client.start("localhost", 1704).unwrap();
    feed(&mut producer);
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Disconnected));
}

#[test]
fn nothing_fires_after_begin_destroy() {
    let (client, loopback, _) = client();
    let calls = Arc::new(AtomicUsize::new(0));
    let (c1, c2, c3) = (calls.clone(), calls.clone(), calls.clone());
    client.register_state_callback(move |_| {
        c1.fetch_add(1, Ordering::SeqCst);
    });
    client.register_settings_callback(move |_, _, _| {
        c2.fetch_add(1, Ordering::SeqCst);
    });
    client.register_log_callback(move |_, _| {
        c3.fetch_add(1, Ordering::SeqCst);
    });
    client.start("localhost", 1704).unwrap();
    let before = calls.load(Ordering::SeqCst);

    client.begin_destroy();
    let events = loopback.events();
    events.settings(10, false, 0);
    events.log(LogLevel::Error, "boom");
    events.disconnected("gone");
    client.stop();
    assert_eq!(calls.load(Ordering::SeqCst), before);
    assert_eq!(client.start("localhost", 1704), Err(ClientError::Destroyed));
}

#[test]
fn destroy_waits_for_running_callbacks() {
    for i in 0..100 {
        let (client, loopback, _) = client();
        let running = Arc::new(AtomicBool::new(false));
        let flag = running.clone();
        client.register_state_callback(move |state| {
            if state == ConnectionState::Disconnected {
                flag.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
                flag.store(false, Ordering::SeqCst);
            }
        });
        client.start("localhost", 1704).unwrap();

        let events = loopback.events();
        let (entered_tx, entered_rx) = bounded(1);
        let network = thread::spawn(move || {
            let _ = entered_tx.send(());
            events.disconnected("dirty");
        });
        entered_rx.recv().unwrap();
        if i % 2 == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        drop(client);
        assert!(!running.load(Ordering::SeqCst), "callback outlived destroy");
        network.join().unwrap();
        assert!(!running.load(Ordering::SeqCst));
    }
}

#[test]
fn create_configure_destroy_cycles() {
    const CYCLES: usize = 100;
    let backend = Arc::new(NullBackend::accelerated(4));
    let created = AtomicUsize::new(0);
    let destroyed = AtomicUsize::new(0);

    for i in 0..CYCLES {
        let (loopback, mut producer) = Loopback::new();
        let client = ClientHandle::new(fast_config(), loopback.clone(), backend.clone());
        created.fetch_add(1, Ordering::SeqCst);

        client.set_volume(i as i32);
        client.set_muted(i % 3 == 0);
        client.set_name("cycle");
        client.register_state_callback(|_| {});
        client.register_log_callback(|_, _| {});
        feed(&mut producer);
        client.start("localhost", 1704).unwrap();
        if i % 4 == 0 {
            wait_until(WAIT, || client.state() == ConnectionState::Playing);
        }
        client.destroy();
        drop(client);
        destroyed.fetch_add(1, Ordering::SeqCst);

        assert_eq!(loopback.connects.load(Ordering::SeqCst), 1);
        assert_eq!(loopback.stops.load(Ordering::SeqCst), 1);
    }

    assert_eq!(created.load(Ordering::SeqCst), CYCLES);
    assert_eq!(destroyed.load(Ordering::SeqCst), CYCLES);
    assert_eq!(backend.opened_count(), backend.closed_count());
    assert!(backend.opened_count() >= CYCLES / 4);
}

#[test]
fn concurrent_pause_resume_does_not_deadlock() {
    const THREADS: usize = 10;
    const OPS: usize = 1000;

    let (client, _, mut producer) = client();
    feed(&mut producer);
    client.start("localhost", 1704).unwrap();
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Playing));

    let client = Arc::new(client);
    let ops = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));
    let (done_tx, done_rx) = bounded(THREADS);

    for t in 0..THREADS {
        let client = client.clone();
        let ops = ops.clone();
        let barrier = barrier.clone();
        let done_tx = done_tx.clone();
        thread::spawn(move || {
            barrier.wait();
            for n in 0..OPS {
                if (n + t) % 2 == 0 {
                    client.pause();
                } else {
                    client.resume();
                }
                let _ = client.is_paused();
                ops.fetch_add(1, Ordering::SeqCst);
            }
            let _ = done_tx.send(());
        });
    }

    for _ in 0..THREADS {
        done_rx
            .recv_timeout(Duration::from_secs(30))
            .expect("pause/resume deadlocked");
    }
    assert_eq!(ops.load(Ordering::SeqCst), THREADS * OPS);

    client.resume();
    assert!(!client.is_paused());
    client.stop();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[test]
fn callback_registration_races_with_delivery() {
    for _ in 0..5 {
        let (client, loopback, _) = client();
        client.start("localhost", 1704).unwrap();
        let events = loopback.events();
        let client = Arc::new(client);

        let firing = thread::spawn(move || {
            for i in 0..500 {
                events.settings(i % 100, i % 2 == 0, 0);
            }
        });
        let registering = {
            let client = client.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    if i % 2 == 0 {
                        client.register_settings_callback(|_, _, _| {});
                    } else {
                        client.clear_settings_callback();
                    }
                }
            })
        };
        firing.join().unwrap();
        registering.join().unwrap();
        client.stop();
    }
}
