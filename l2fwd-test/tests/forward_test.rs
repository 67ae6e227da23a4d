//! Forwarding loop tests on the ring device.

use std::thread;
use std::time::{Duration, Instant};

use l2fwd::fwd::{Forwarder, IdlePolicy, LoopState, TransformMode};
use l2fwd_test::frames::{
    GEN_DST_MAC, GEN_SRC_IP, GEN_SRC_MAC, UdpFrame, arp_request, frame_seq, macs, raw_frame,
};
use l2fwd_test::harness::{TestConfig, TestContext};
use l2fwd_test::traffic::{GenConfig, spawn_generator, spawn_sink};
use l2fwd_test::util::init_tracing;
use proptest::prelude::*;
use smoltcp::wire::{EthernetAddress, Ipv4Address};
use tokio_util::sync::CancellationToken;

fn context(config: TestConfig) -> TestContext {
    init_tracing();
    config.build().expect("Failed to create test context")
}

/// Pool capacity 8, no cache, so every buffer is visible in `avail_count`.
fn small_context(tx_desc: u16) -> TestContext {
    context(TestConfig::new().num_mbufs(8).cache_size(0).nb_desc(8).tx_desc(tx_desc))
}

#[test]
fn test_full_accept_returns_pool_after_completion() {
    let ctx = small_context(8);
    let pool = ctx.mempool().clone();
    let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::Transparent).unwrap()).burst_size(4);

    let tmpl = UdpFrame::new();
    for seq in 0..4 {
        assert!(ctx.inject(0, &tmpl.build(seq)));
    }
    assert_eq!(pool.avail_count(), 8);

    assert_eq!(fwd.poll_once(), 4);
    // All four sit in the egress ring until completion.
    assert_eq!(pool.avail_count(), 4);
    assert_eq!(ctx.ring().tx_inflight(1, 0), 4);

    assert_eq!(ctx.complete_tx(1), 4);
    assert_eq!(pool.avail_count(), 8);
    assert_eq!(fwd.summary().tx_packets, 4);
    assert_eq!(fwd.summary().dropped, 0);
}

#[test]
fn test_partial_accept_releases_tail_immediately() {
    let ctx = small_context(2);
    let pool = ctx.mempool().clone();
    let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::Transparent).unwrap()).burst_size(4);

    let tmpl = UdpFrame::new();
    for seq in 0..4 {
        assert!(ctx.inject(0, &tmpl.build(seq)));
    }

    assert_eq!(fwd.poll_once(), 4);
    // Two accepted and held, two released straight back.
    assert_eq!(pool.avail_count(), 6);
    let summary = fwd.summary();
    assert_eq!(summary.rx_packets, 4);
    assert_eq!(summary.tx_packets, 2);
    assert_eq!(summary.dropped, 2);

    let sent: Vec<_> = ctx.transmitted(1).iter().filter_map(|f| frame_seq(f)).collect();
    assert_eq!(sent, vec![0, 1]);
    ctx.complete_tx(1);
    assert!(pool.is_full());
}

#[test]
fn test_rewrite_source_sets_egress_mac() {
    let ctx = context(TestConfig::new());
    let egress_mac = EthernetAddress([0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    let src = EthernetAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    ctx.eth_dev(1).set_mac_addr(egress_mac).unwrap();

    let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::RewriteSource).unwrap());
    assert!(ctx.inject(0, &UdpFrame::new().macs(src, GEN_DST_MAC).build(7)));
    assert_eq!(fwd.poll_once(), 1);

    let sent = ctx.transmitted(1);
    assert_eq!(sent.len(), 1);
    assert_eq!(macs(&sent[0]), Some((egress_mac, GEN_DST_MAC)));
    assert_eq!(frame_seq(&sent[0]), Some(7));
}

#[test]
fn test_swap_addresses_reflects() {
    let ctx = context(TestConfig::new());
    let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::SwapAddresses).unwrap());
    assert!(ctx.inject(0, &UdpFrame::new().build(1)));
    assert_eq!(fwd.poll_once(), 1);

    let sent = ctx.transmitted(1);
    assert_eq!(macs(&sent[0]), Some((GEN_DST_MAC, GEN_SRC_MAC)));
}

#[test]
fn test_transparent_forwards_broadcast_arp_unchanged() {
    let ctx = context(TestConfig::new());
    let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::Transparent).unwrap());
    let arp = arp_request(GEN_SRC_MAC, GEN_SRC_IP, Ipv4Address::new(192, 168, 29, 1));
    assert!(ctx.inject(0, &arp));
    assert_eq!(fwd.poll_once(), 1);
    assert_eq!(ctx.transmitted(1), vec![arp]);
}

#[test]
fn test_runt_forwarded_untouched() {
    let ctx = context(TestConfig::new());
    let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::RewriteSource).unwrap());
    let runt = raw_frame(GEN_DST_MAC, GEN_SRC_MAC, 10);
    let full = raw_frame(GEN_DST_MAC, GEN_SRC_MAC, 60);
    assert!(ctx.inject(0, &runt));
    assert!(ctx.inject(0, &full));
    assert_eq!(fwd.poll_once(), 2);

    let sent = ctx.transmitted(1);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], runt);
    let egress_mac = ctx.eth_dev(1).mac_addr().unwrap();
    assert_eq!(macs(&sent[1]), Some((egress_mac, GEN_DST_MAC)));

    let summary = fwd.summary();
    assert_eq!(summary.runts, 1);
    assert_eq!(summary.tx_packets, 2);
}

#[test]
fn test_bidirectional_sessions_share_a_cycle() {
    let ctx = context(TestConfig::new());
    let mut fwd = Forwarder::with_sessions(vec![
        ctx.session(0, 1, TransformMode::Transparent).unwrap(),
        ctx.session(1, 0, TransformMode::Transparent).unwrap(),
    ]);
    let tmpl = UdpFrame::new();
    assert!(ctx.inject(0, &tmpl.build(10)));
    assert!(ctx.inject(1, &tmpl.build(20)));
    assert!(ctx.inject(1, &tmpl.build(21)));

    assert_eq!(fwd.poll_once(), 3);
    let to_1: Vec<_> = ctx.transmitted(1).iter().filter_map(|f| frame_seq(f)).collect();
    let to_0: Vec<_> = ctx.transmitted(0).iter().filter_map(|f| frame_seq(f)).collect();
    assert_eq!(to_1, vec![10]);
    assert_eq!(to_0, vec![20, 21]);
    assert_eq!(fwd.stats()[0].snapshot().tx_packets, 1);
    assert_eq!(fwd.stats()[1].snapshot().tx_packets, 2);
}

#[test]
fn test_queue_owned_by_one_session() {
    let ctx = context(TestConfig::new());
    let first = ctx.session(0, 1, TransformMode::Transparent).unwrap();
    assert_eq!(
        ctx.session(0, 1, TransformMode::Transparent).err(),
        Some(l2fwd::api::Errno::EBUSY)
    );
    drop(first);
    assert!(ctx.session(0, 1, TransformMode::Transparent).is_ok());
}

#[test]
fn test_no_receive_after_stop() {
    let ctx = context(TestConfig::new());
    let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::Transparent).unwrap())
        .idle_policy(IdlePolicy::Yield);
    let stats = fwd.stats().remove(0);
    let token = CancellationToken::new();

    let worker = {
        let token = token.clone();
        thread::spawn(move || {
            let summary = fwd.run(&token);
            (fwd, summary)
        })
    };

    let tmpl = UdpFrame::new();
    for seq in 0..16 {
        assert!(ctx.inject(0, &tmpl.build(seq)));
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    while stats.snapshot().tx_packets < 16 {
        assert!(Instant::now() < deadline, "forwarding stalled");
        thread::sleep(Duration::from_millis(1));
    }

    token.cancel();
    let (mut fwd, summary) = worker.join().unwrap();
    assert_eq!(fwd.state(), LoopState::Stopped);
    assert_eq!(summary.tx_packets, 16);

    // Frames arriving after the stop stay on the wire.
    assert!(ctx.inject(0, &tmpl.build(99)));
    fwd.run(&token);
    assert_eq!(ctx.ring().rx_pending(0, 0), 1);
    assert_eq!(fwd.summary().rx_packets, 16);
}

#[test]
fn test_generator_to_sink_in_order() {
    let ctx = context(TestConfig::new().num_mbufs(512).tx_free_thresh(32));
    let fwd = Forwarder::new(ctx.session(0, 1, TransformMode::RewriteSource).unwrap())
        .idle_policy(IdlePolicy::Yield);
    let stats = fwd.stats().remove(0);
    let token = CancellationToken::new();

    let sink = spawn_sink(ctx.ring().clone(), 1, token.clone()).unwrap();
    let worker = {
        let token = token.clone();
        let mut fwd = fwd;
        thread::spawn(move || fwd.run(&token))
    };
    let total = 2000;
    let generator = spawn_generator(
        ctx.ring().clone(),
        GenConfig::new(0).count(Some(total)),
        token.child_token(),
    )
    .unwrap();

    assert_eq!(generator.join().unwrap().sent, total);
    let deadline = Instant::now() + Duration::from_secs(10);
    while stats.snapshot().tx_packets < total {
        assert!(Instant::now() < deadline, "forwarding stalled");
        thread::sleep(Duration::from_millis(1));
    }
    token.cancel();

    let summary = worker.join().unwrap();
    let report = sink.join().unwrap();
    assert_eq!(summary.tx_packets, total);
    assert_eq!(summary.dropped, 0);
    assert_eq!(report.frames, total);
    assert_eq!(report.out_of_order, 0);
    assert_eq!(report.untagged, 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every packet of a fully accepted burst leaves in arrival order.
    #[test]
    fn prop_order_preserved(n in 1u32..=64, burst in 1usize..=64) {
        let ctx = context(TestConfig::new().num_mbufs(128).cache_size(0).nb_desc(64));
        let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::Transparent).unwrap())
            .burst_size(burst);
        let tmpl = UdpFrame::new();
        for seq in 0..n {
            prop_assert!(ctx.inject(0, &tmpl.build(seq)));
        }
        while fwd.poll_once() > 0 {}

        let sent: Vec<u32> = ctx.transmitted(1).iter().filter_map(|f| frame_seq(f)).collect();
        prop_assert_eq!(sent, (0..n).collect::<Vec<_>>());
    }

    /// With k descriptors free, a burst of n > k packets transmits the first
    /// k once and releases the other n - k.
    #[test]
    fn prop_partial_transmit_cleanup(n in 2usize..=32, k_frac in 0.0f64..1.0) {
        let k = ((n as f64 * k_frac) as usize).clamp(1, n - 1);
        let ctx = context(
            TestConfig::new()
                .num_mbufs(64)
                .cache_size(0)
                .nb_desc(32)
                .tx_desc(k as u16),
        );
        let pool = ctx.mempool().clone();
        let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::Transparent).unwrap())
            .burst_size(n);
        let tmpl = UdpFrame::new();
        for seq in 0..n as u32 {
            prop_assert!(ctx.inject(0, &tmpl.build(seq)));
        }

        prop_assert_eq!(fwd.poll_once(), n);
        prop_assert_eq!(pool.in_use_count(), k);
        let summary = fwd.summary();
        prop_assert_eq!(summary.tx_packets as usize, k);
        prop_assert_eq!(summary.dropped as usize, n - k);

        let sent: Vec<u32> = ctx.transmitted(1).iter().filter_map(|f| frame_seq(f)).collect();
        prop_assert_eq!(sent, (0..k as u32).collect::<Vec<_>>());

        prop_assert_eq!(ctx.complete_tx(1), k);
        prop_assert!(pool.is_full());
    }
}
