use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use qpman::fabric::{DeviceConfig, Fabric, FabricConfig};
use qpman::prelude::*;
use qpman::{QpState, RECV_ENTRIES};

const MSG_SIZE: u32 = 256;
const WAIT: Duration = Duration::from_secs(2);

/// The serving side: a daemon publishing one NIC, one registration and a
/// receive channel.
struct HostA {
    daemon: Daemon,
    manager: RecvManager,
    nic: Nic,
    mem: Mem,
    mr: Mr,
    recv_mr: Mr,
}

fn fabric() -> Arc<Fabric> {
    Fabric::new(FabricConfig {
        devices: vec![
            DeviceConfig::new("soft_0"),
            DeviceConfig::new("soft_1"),
            DeviceConfig::new("soft_2"),
        ],
    })
}

fn host_a(fabric: &Arc<Fabric>) -> Result<HostA> {
    let nic = Nic::open_on(fabric.clone(), DevIdx::new(0, 1), 0)?;
    let mem = Mem::new(4096);
    let mr = Mr::reg(&mem, &nic)?;
    let recv_mem = Mem::new(RECV_ENTRIES * MSG_SIZE as usize);
    let recv_mr = Mr::reg(&recv_mem, &nic)?;

    let daemon = Daemon::new(0, "127.0.0.1");
    let manager = RecvManager::new(&daemon);
    let cq = Cq::new(nic.context(), 4096)?;
    manager.reg_recv_cq("chan0", &cq, SimpleAllocator::new(&recv_mr))?;

    daemon.register_nic(1, nic.clone())?;
    daemon.register_mr(7, mr.clone())?;
    let qp = Qp::create(&nic, QpConfig::default(), Some(&cq))?;
    daemon.register_qp("qp0", qp)?;
    daemon.start()?;

    Ok(HostA {
        daemon,
        manager,
        nic,
        mem,
        mr,
        recv_mr,
    })
}

fn session(a: &HostA) -> Result<Connecter> {
    let addr = a.daemon.local_addr().expect("daemon is running");
    let mut conn = Connecter::new(addr.to_string());
    conn.wait_ready(2_000_000, 5)?;
    Ok(conn)
}

#[test]
fn send_with_imm_reaches_channel() -> Result<()> {
    let fabric = fabric();
    let a = host_a(&fabric)?;
    let mut conn = session(&a)?;

    let nic_b = Nic::open_on(fabric.clone(), DevIdx::new(1, 1), 0)?;
    let buf = Mem::new(4096);
    let buf_mr = Mr::reg(&buf, &nic_b)?;
    let q2 = Qp::create(&nic_b, QpConfig::default(), None)?;
    conn.create_and_connect("qp0", "chan0", MSG_SIZE, &q2, 1, &QpConfig::default())?;
    assert_eq!(q2.state(), QpState::Rts);

    buf.write(0, &[0xab; 64])?;
    q2.bind_local_mr(buf_mr.attr());
    q2.send_normal(
        ReqDesc::new(WrOpcode::SendWithImm, 64, 1),
        ReqPayload::new(buf_mr.addr(), 0, 42),
    )?;
    let (wr_id, _) = q2.wait_completion(WAIT)?;
    assert_eq!(wr_id, 1);

    let q1 = a.daemon.query_qp("qp0")?;
    assert_eq!(q1.state(), QpState::Rts);
    let entries = a.manager.query_entries("chan0")?;
    let mut iter = RecvIter::new(&q1, &entries);

    let start = quanta::Instant::now();
    while !iter.has_messages() {
        assert!(start.elapsed() < WAIT, "no message arrived");
        std::thread::yield_now();
    }
    let (imm, addr) = iter.current_message().expect("message present");
    assert_eq!(imm, 42);
    let base = a.recv_mr.addr();
    assert!(addr >= base && addr < base + a.recv_mr.len() as u64);

    let mut payload = [0u8; 64];
    a.recv_mr.mem().read((addr - base) as usize, &mut payload)?;
    assert_eq!(payload, [0xab; 64]);

    iter.next();
    assert!(!iter.has_messages());
    iter.clear();
    assert_eq!(entries.posted(), RECV_ENTRIES);

    a.daemon.stop();
    Ok(())
}

#[test]
fn fetched_registration_allows_one_sided_access() -> Result<()> {
    let fabric = fabric();
    let a = host_a(&fabric)?;
    let mut conn = session(&a)?;

    let remote = conn.fetch_remote_mr(7)?;
    assert_eq!(remote, a.mr.attr());
    assert_eq!(remote.addr, a.mem.addr());
    assert_eq!(remote.len, 4096);
    assert!(matches!(
        conn.fetch_remote_mr(8),
        Err(qpman::Error::NotFound(_))
    ));

    let nic_b = Nic::open_on(fabric.clone(), DevIdx::new(1, 1), 0)?;
    let buf = Mem::new(4096);
    let buf_mr = Mr::reg(&buf, &nic_b)?;
    let q2 = Qp::create(&nic_b, QpConfig::default(), None)?;
    conn.create_and_connect("qp0", "chan0", MSG_SIZE, &q2, 1, &QpConfig::default())?;

    buf.write_u64(0, 0x1234_5678)?;
    q2.bind_local_mr(buf_mr.attr());
    q2.bind_remote_mr(remote);
    q2.send_normal(
        ReqDesc::new(WrOpcode::RdmaWrite, 8, 2),
        ReqPayload::new(buf_mr.addr(), remote.at(128), 0),
    )?;
    q2.wait_completion(WAIT)?;
    assert_eq!(a.mem.read_u64(128)?, 0x1234_5678);

    let nic = conn.fetch_nic_attr(1)?;
    assert_eq!(nic.gid, a.nic.gid());
    assert!(nic.active);
    assert_eq!(conn.fetch_qp_attr("qp0")?.qpn, a.daemon.query_qp("qp0")?.qp_num());

    a.daemon.stop();
    Ok(())
}

#[test]
fn failed_check_releases_remote_channel() -> Result<()> {
    let fabric = fabric();
    let a = host_a(&fabric)?;
    let other = Nic::open_on(fabric.clone(), DevIdx::new(2, 1), 0)?;
    a.daemon.register_nic(2, other)?;
    let mut conn = session(&a)?;

    let nic_b = Nic::open_on(fabric.clone(), DevIdx::new(1, 1), 0)?;
    let q2 = Qp::create(&nic_b, QpConfig::default(), None)?;

    // "qp0" is adopted on NIC 1, so it does not live on NIC 2.
    let res = conn.create_and_connect("qp0", "chan0", MSG_SIZE, &q2, 2, &QpConfig::default());
    assert!(matches!(res, Err(qpman::Error::ConnectError(_))));
    assert_eq!(q2.state(), QpState::Created);

    // The application's queue pair stays advertised, but it is spent.
    let q0 = a.daemon.query_qp("qp0")?;
    assert_eq!(q0.state(), QpState::Error);
    let res = conn.create_and_connect("qp0", "chan0", MSG_SIZE, &q2, 1, &QpConfig::default());
    assert!(matches!(res, Err(qpman::Error::Duplicate(_))));
    assert_eq!(q2.state(), QpState::Created);

    // The channel is free again and a fresh queue pair serves it.
    conn.create_and_connect("qp1", "chan0", MSG_SIZE, &q2, 1, &QpConfig::default())?;
    assert_eq!(q2.state(), QpState::Rts);
    let entries = a.manager.query_entries("chan0")?;
    assert_eq!(entries.posted(), RECV_ENTRIES);
    assert_eq!(entries.unconsumed(), 0);

    a.daemon.stop();
    Ok(())
}

#[test]
fn remote_rejection_leaves_qp_created() -> Result<()> {
    let fabric = fabric();
    let a = host_a(&fabric)?;
    let mut conn = session(&a)?;

    let nic_b = Nic::open_on(fabric.clone(), DevIdx::new(1, 1), 0)?;
    let q2 = Qp::create(&nic_b, QpConfig::default(), None)?;

    let res = conn.create_and_connect("qp9", "nochan", MSG_SIZE, &q2, 1, &QpConfig::default());
    assert!(matches!(res, Err(qpman::Error::NotFound(_))));
    assert_eq!(q2.state(), QpState::Created);

    let res = conn.create_and_connect("qp9", "chan0", MSG_SIZE, &q2, 5, &QpConfig::default());
    assert!(matches!(res, Err(qpman::Error::NotFound(_))));
    assert_eq!(q2.state(), QpState::Created);

    a.daemon.stop();
    let res = conn.create_and_connect("qp0", "chan0", MSG_SIZE, &q2, 1, &QpConfig::default());
    assert!(res.is_err());
    assert_eq!(q2.state(), QpState::Created);
    Ok(())
}

#[test]
fn connected_channel_rejects_second_session() -> Result<()> {
    let fabric = fabric();
    let a = host_a(&fabric)?;
    let mut conn = session(&a)?;

    let nic_b = Nic::open_on(fabric.clone(), DevIdx::new(1, 1), 0)?;
    let q2 = Qp::create(&nic_b, QpConfig::default(), None)?;
    conn.create_and_connect("qp0", "chan0", MSG_SIZE, &q2, 1, &QpConfig::default())?;

    let q3 = Qp::create(&nic_b, QpConfig::default(), None)?;
    let res = conn.create_and_connect("qp1", "chan0", MSG_SIZE, &q3, 1, &QpConfig::default());
    assert!(matches!(res, Err(qpman::Error::NotReady(_))));
    assert_eq!(q3.state(), QpState::Created);

    assert!(matches!(
        conn.create_and_connect("qp0", "chan0", MSG_SIZE, &q2, 1, &QpConfig::default()),
        Err(qpman::Error::AlreadyConnected)
    ));

    a.daemon.stop();
    Ok(())
}
