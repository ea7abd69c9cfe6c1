// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cross-module end-to-end scenarios, one per row of the testable-properties
//! table: a channel rendezvous, a losing branch racing a timeout, a nack
//! firing on cleanup, many parallel IVar readers, a repeating barrier round,
//! an ordered mailbox drain, and a multicast port copied mid-stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use concuer::channel::Channel;
use concuer::combinators::{choose, timeout, with_nack};
use concuer::event::{never, sync};
use concuer::multicast::MChannel;
use concuer::sync_vars::barrier::Barrier;
use concuer::sync_vars::ivar::IVar;
use concuer::sync_vars::mailbox::Mailbox;

/// Installs a `tracing` subscriber so the `trace` feature's call sites (when
/// built with `--features trace`) actually reach a sink instead of only
/// exercising the macro's no-op arm.
fn init_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    });
}

#[test]
fn s1_channel_rendezvous_delivers_exactly_once() {
    init_tracing();
    let ch: Channel<i32> = Channel::new();
    let sender = ch.clone();
    let h = std::thread::spawn(move || sender.send(42));
    assert_eq!(ch.recv(), 42);
    h.join().unwrap();
}

#[test]
fn s2_timeout_wins_when_no_sender_arrives() {
    let ch: Channel<i32> = Channel::new();
    let start = Instant::now();
    let evt = choose(vec![ch.recv_evt(), concuer::combinators::wrap(timeout(Duration::from_millis(100)), |_| -1)]);
    assert_eq!(sync(&evt), -1);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(90));
    assert!(elapsed <= Duration::from_millis(250));
    // The cancelled recv branch must not leave a stale receiver registered.
    assert_eq!(ch.send_poll(7), Err(7));
}

#[test]
fn s3_nack_fires_when_timeout_wins_the_choice() {
    let ch: Channel<i32> = Channel::new();
    let unblocked = Arc::new(AtomicBool::new(false));
    let unblocked2 = unblocked.clone();
    let loser: concuer::event::Event<i32> = with_nack(move |nack_wait| {
        let unblocked = unblocked2.clone();
        std::thread::spawn(move || {
            sync(&nack_wait);
            unblocked.store(true, Ordering::SeqCst);
        });
        ch.recv_evt()
    });
    let commit_at = Instant::now();
    let evt = choose(vec![
        loser,
        concuer::combinators::wrap(timeout(Duration::from_millis(10)), |_| -1),
    ]);
    sync(&evt);
    let commit_at = commit_at.elapsed();
    assert!(commit_at >= Duration::from_millis(8));
    std::thread::sleep(Duration::from_millis(50));
    assert!(unblocked.load(Ordering::SeqCst));
}

#[test]
fn s4_many_readers_all_observe_the_put_value() {
    let cell: IVar<String> = IVar::new();
    let handles: Vec<_> = (0..5)
        .map(|_| {
            let cell = cell.clone();
            std::thread::spawn(move || cell.read())
        })
        .collect();
    std::thread::sleep(Duration::from_millis(20));
    cell.put("ok".to_string()).unwrap();
    for h in handles {
        assert_eq!(h.join().unwrap(), "ok");
    }
    assert_eq!(cell.read(), "ok");
}

#[test]
fn s5_barrier_releases_each_round_and_tolerates_early_resign() {
    let barrier: Barrier<i32> = Barrier::new(0, |s| s + 1);
    let e1 = barrier.enroll();
    let e2 = barrier.enroll();
    let e3 = barrier.enroll();

    let h1 = std::thread::spawn(move || e1.wait());
    let h2 = std::thread::spawn(move || e2.wait());
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(e3.wait().unwrap(), 1);
    assert_eq!(h1.join().unwrap().unwrap(), 1);
    assert_eq!(h2.join().unwrap().unwrap(), 1);

    // A second barrier, isolated from the first: one party resigns before
    // waiting, and the remaining two still complete the round on their own.
    let barrier2: Barrier<i32> = Barrier::new(0, |s| s + 1);
    let e4 = barrier2.enroll();
    let e5 = barrier2.enroll();
    let e6 = barrier2.enroll();
    e6.resign().unwrap();
    let h4 = std::thread::spawn(move || e4.wait());
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(e5.wait().unwrap(), 1);
    assert_eq!(h4.join().unwrap().unwrap(), 1);
}

#[test]
fn s6_mailbox_delivers_everything_in_order() {
    let mbox: Mailbox<i32> = Mailbox::new();
    let sender = mbox.clone();
    let h = std::thread::spawn(move || {
        for i in 0..1000 {
            sender.send(i);
        }
    });
    h.join().unwrap();
    for expected in 0..1000 {
        assert_eq!(mbox.recv(), Ok(expected));
    }
}

#[test]
fn s7_multicast_port_copy_only_sees_values_from_its_copy_point() {
    let ch: MChannel<i32> = MChannel::new();
    let p1 = ch.port();
    let p2 = ch.port();
    ch.multicast(1);
    ch.multicast(2);
    assert_eq!(p1.recv(), 1);
    assert_eq!(p1.recv(), 2);

    let copy = p1.copy();
    ch.multicast(3);
    assert_eq!(copy.recv(), 3);
    assert_eq!(p2.recv(), 1);
    assert_eq!(p2.recv(), 2);
    assert_eq!(p2.recv(), 3);
}

#[test]
fn choose_with_two_ready_branches_still_picks_exactly_one() {
    let evt = choose(vec![never::<i32>(), concuer::event::always(9)]);
    assert_eq!(sync(&evt), 9);
}
