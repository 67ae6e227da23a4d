//! Lcore API Tests
//!
//! Tests for worker placement. Pinning may be refused in restricted
//! environments; launch still runs the closure then.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use l2fwd::api::lcore::Lcore;
use l2fwd::fwd::{Forwarder, IdlePolicy, TransformMode};
use l2fwd_test::frames::UdpFrame;
use l2fwd_test::harness::TestConfig;
use tokio_util::sync::CancellationToken;

/// Test: every lcore runs its closure on a thread named after it
#[test]
#[serial_test::serial]
fn test_launch_on_all_lcores() {
    let counter = Arc::new(AtomicU32::new(0));
    let handles: Vec<_> = Lcore::all()
        .map(|lcore| {
            let counter = counter.clone();
            let handle = lcore
                .launch(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    thread::current().name().map(str::to_string)
                })
                .unwrap();
            (lcore, handle)
        })
        .collect();

    for (lcore, handle) in handles {
        let name = handle.join().unwrap();
        assert_eq!(name, Some(format!("lcore-{}", lcore.id())));
    }
    assert_eq!(counter.load(Ordering::SeqCst) as usize, Lcore::count());
}

/// Test: a panicking worker surfaces as an error from run
#[test]
#[serial_test::serial]
fn test_run_reports_panic() {
    let lcore = Lcore::from_id(0).unwrap();
    let result = lcore.run(|| -> u32 { panic!("worker failure") });
    assert!(result.is_err());
}

/// Test: the forwarding loop runs on an lcore and returns its counters
#[test]
#[serial_test::serial]
fn test_forwarder_on_lcore() {
    let ctx = TestConfig::new().build().unwrap();
    let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::Transparent).unwrap())
        .idle_policy(IdlePolicy::Sleep(Duration::from_micros(50)));
    let tmpl = UdpFrame::new();
    for seq in 0..8 {
        assert!(ctx.inject(0, &tmpl.build(seq)));
    }

    let token = CancellationToken::new();
    let worker_token = token.clone();
    let lcore = Lcore::all().last().unwrap();
    let handle = lcore.launch(move || fwd.run(&worker_token)).unwrap();

    thread::sleep(Duration::from_millis(100));
    token.cancel();
    let summary = handle.join().unwrap();
    assert_eq!(summary.tx_packets, 8);
    assert_eq!(ctx.transmitted(1).len(), 8);
}
