//! Port lifecycle tests on the ring device.

use std::sync::Arc;

use l2fwd::api::Errno;
use l2fwd::api::dev::driver::EthDriver;
use l2fwd::api::dev::eth::{
    EthConf, EthDev, EthDevBuilder, PortState, RxQueueConf, TxQueueConf, format_mac_addr,
    iter_ports,
};
use l2fwd::api::dev::pktmbuf::{MemPool, MemPoolConfig};
use l2fwd::api::dev::ring::RingDriver;
use l2fwd::fwd::{Forwarder, TransformMode};
use l2fwd_test::frames::{GEN_SRC_MAC, UdpFrame, raw_frame};
use l2fwd_test::harness::TestConfig;
use smoltcp::wire::EthernetAddress;

#[test]
fn test_repeated_stop_and_close_keep_pool_intact() {
    let mut ctx = TestConfig::new()
        .num_mbufs(16)
        .cache_size(0)
        .nb_desc(16)
        .build()
        .unwrap();
    let pool = ctx.mempool().clone();
    let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::Transparent).unwrap());

    let tmpl = UdpFrame::new();
    for seq in 0..6 {
        assert!(ctx.inject(0, &tmpl.build(seq)));
    }
    assert_eq!(fwd.poll_once(), 6);
    assert_eq!(pool.in_use_count(), 6);

    // Stopping the egress port releases what its TX ring still holds.
    for _ in 0..3 {
        ctx.eth_dev_mut(1).stop().unwrap();
    }
    assert!(pool.is_full());
    assert_eq!(ctx.eth_dev(1).state(), PortState::Stopped);

    // A stopped port transmits nothing and keeps nothing.
    assert!(ctx.inject(0, &tmpl.build(6)));
    assert_eq!(fwd.poll_once(), 1);
    assert_eq!(fwd.summary().dropped, 1);
    assert!(pool.is_full());

    drop(fwd);
    for _ in 0..3 {
        ctx.eth_dev_mut(1).close().unwrap();
    }
    assert_eq!(ctx.eth_dev(1).state(), PortState::Closed);

    // The pool still hands out every buffer exactly once.
    let mut held = Vec::new();
    while let Some(m) = pool.try_alloc() {
        held.push(m);
    }
    assert_eq!(held.len(), 16);
    drop(held);
    assert!(pool.is_full());
}

#[test]
fn test_restart_after_stop() {
    let driver: Arc<dyn EthDriver> = Arc::new(RingDriver::new(2));
    let pool = MemPool::create("restart", &MemPoolConfig::new().num_mbufs(64).cache_size(0)).unwrap();
    let mut dev = EthDevBuilder::new(0).build(&driver, &pool).unwrap();
    let rxq = dev.rx_queue(0).unwrap();

    dev.stop().unwrap();
    drop(rxq);
    assert_eq!(dev.rx_queue(0).err(), Some(Errno::EINVAL));

    dev.configure(1, 1, &EthConf::new().mtu(9000)).unwrap();
    dev.rx_queue_setup(0, &pool, &RxQueueConf::new().nb_desc(64)).unwrap();
    dev.tx_queue_setup(0, &TxQueueConf::new().nb_desc(64)).unwrap();
    dev.start().unwrap();
    assert!(dev.rx_queue(0).is_ok());
    dev.stop().unwrap();
    dev.close().unwrap();
}

#[test]
fn test_info_and_descriptor_adjustment() {
    let driver: Arc<dyn EthDriver> = Arc::new(RingDriver::new(3));
    assert_eq!(EthDev::count_avail(driver.as_ref()), 3);
    assert_eq!(iter_ports(driver.as_ref()).count(), 3);

    let dev = EthDev::new(driver, 2).unwrap();
    let info = dev.info().unwrap();
    assert_eq!(info.driver_name, "net_ring");
    assert!(info.max_rx_queues >= 1);

    let (mut rx, mut tx) = (0, u16::MAX);
    dev.adjust_nb_rx_tx_desc(&mut rx, &mut tx).unwrap();
    assert_eq!(rx, info.rx_desc_lim.nb_min);
    assert_eq!(tx, info.tx_desc_lim.nb_max);

    assert_eq!(format_mac_addr(&dev.mac_addr().unwrap()), "02:00:00:00:00:02");
}

#[test]
fn test_mac_filter_without_promiscuous() {
    let ctx = TestConfig::new().promiscuous(false).build().unwrap();
    let own = ctx.eth_dev(0).mac_addr().unwrap();
    let other = EthernetAddress([0x02, 0x99, 0, 0, 0, 1]);

    assert!(!ctx.eth_dev(0).is_promiscuous().unwrap());
    assert!(ctx.inject(0, &raw_frame(own, GEN_SRC_MAC, 60)));
    assert!(ctx.inject(0, &raw_frame(EthernetAddress::BROADCAST, GEN_SRC_MAC, 60)));
    assert!(!ctx.inject(0, &raw_frame(other, GEN_SRC_MAC, 60)));

    ctx.eth_dev(0).promiscuous_enable().unwrap();
    assert!(ctx.inject(0, &raw_frame(other, GEN_SRC_MAC, 60)));
    assert_eq!(ctx.ring().rx_pending(0, 0), 3);
}

#[test]
fn test_device_stats_count_drops() {
    let ctx = TestConfig::new().nb_desc(4).build().unwrap();
    let tmpl = UdpFrame::new();
    for seq in 0..6 {
        ctx.inject(0, &tmpl.build(seq));
    }
    // Longer than MTU plus header.
    assert!(!ctx.inject(0, &vec![0xffu8; 1600]));

    let stats = ctx.eth_dev(0).stats().unwrap();
    assert_eq!(stats.imissed, 2);
    assert_eq!(stats.ierrors, 1);

    let mut fwd = Forwarder::new(ctx.session(0, 1, TransformMode::Transparent).unwrap());
    assert_eq!(fwd.poll_once(), 4);
    let rx = ctx.eth_dev(0).stats().unwrap();
    let tx = ctx.eth_dev(1).stats().unwrap();
    assert_eq!(rx.ipackets, 4);
    assert_eq!(rx.ibytes, 4 * tmpl.frame_len() as u64);
    assert_eq!(tx.opackets, 4);
    assert_eq!(tx.obytes, rx.ibytes);
}
