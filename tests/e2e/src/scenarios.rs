//! End-to-end protocol scenarios over the simulated LAN.

use alloc::vec::Vec;
use core::time::Duration;

use leasewire_dhcp::client::{ClientConfig, ClientState, DhcpClient};
use leasewire_dhcp::header::{BootpOp, DhcpHeader, MessageType};
use leasewire_dhcp::server::{DhcpServer, ServerConfig};
use leasewire_dhcp::{
    HardwareAddress, Ipv4Addr, Ipv4Mask, SocketAddr, CLIENT_PORT, SERVER_PORT,
};

use crate::sim::Sim;

const POOL_NET: Ipv4Addr = Ipv4Addr([10, 0, 0, 0]);
const SERVER_ADDR: Ipv4Addr = Ipv4Addr([10, 0, 0, 12]);
const FIRST_ADDR: Ipv4Addr = Ipv4Addr([10, 0, 0, 10]);
const LAST_ADDR: Ipv4Addr = Ipv4Addr([10, 0, 0, 100]);

fn mask24() -> Ipv4Mask {
    Ipv4Mask::from_prefix(24)
}

fn mac(tail: u8) -> HardwareAddress {
    HardwareAddress::Mac48([0x00, 0x11, 0x22, 0x33, 0x44, tail])
}

fn server(min: Ipv4Addr, max: Ipv4Addr) -> DhcpServer {
    DhcpServer::new(ServerConfig::new(POOL_NET, mask24(), SERVER_ADDR, min, max)).unwrap()
}

fn client() -> DhcpClient {
    DhcpClient::new(ClientConfig::default())
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

/// One server, one client: the four-way handshake configures the client
/// with the first pool address within a second of its start.
#[test]
fn test_single_client_full_handshake() {
    let mut sim = Sim::new();
    let srv = sim.add_server(server(FIRST_ADDR, LAST_ADDR), SERVER_ADDR, mask24());
    let cli = sim.add_client(client(), mac(0x55));
    sim.start_at(srv, secs(0));
    sim.start_at(cli, secs(1));

    sim.run_until(secs(10));

    assert_eq!(
        sim.client(cli).bound_address(),
        Some((FIRST_ADDR, mask24()))
    );
    assert!(sim.addresses(cli).contains(&(FIRST_ADDR, mask24())));

    let kinds: Vec<Option<MessageType>> = sim.trace.iter().map(|entry| entry.msg_type).collect();
    assert_eq!(
        kinds,
        [
            Some(MessageType::Discover),
            Some(MessageType::Offer),
            Some(MessageType::Request),
            Some(MessageType::Ack),
        ]
    );

    let discover = &sim.trace[0];
    let offer = &sim.trace[1];
    let request = &sim.trace[2];
    let ack = &sim.trace[3];

    assert!(discover.at >= secs(1) && discover.at < secs(2));
    assert_eq!(discover.node, cli);

    assert_eq!(offer.node, srv);
    assert_eq!(offer.xid, discover.xid);
    assert_eq!(offer.yiaddr, FIRST_ADDR);
    assert_eq!(offer.server_id, Some(SERVER_ADDR));

    assert_eq!(request.node, cli);
    assert_eq!(request.xid, discover.xid);
    assert_eq!(request.requested, Some(FIRST_ADDR));
    assert_eq!(request.server_id, Some(SERVER_ADDR));

    assert_eq!(ack.node, srv);
    assert_eq!(ack.xid, discover.xid);
    assert_eq!(ack.yiaddr, FIRST_ADDR);
}

/// A one-address pool and two clients: the loser keeps retransmitting its
/// DISCOVER and never configures.
#[test]
fn test_pool_exhaustion_starves_second_client() {
    let mut sim = Sim::new();
    let srv = sim.add_server(server(FIRST_ADDR, FIRST_ADDR), SERVER_ADDR, mask24());
    let first = sim.add_client(client(), mac(1));
    let second = sim.add_client(client(), mac(2));
    sim.start_at(srv, secs(0));
    sim.start_at(first, secs(1));
    sim.start_at(second, secs(1));

    sim.run_until(secs(20));

    assert_eq!(
        sim.client(first).bound_address(),
        Some((FIRST_ADDR, mask24()))
    );
    assert_eq!(sim.client(second).bound_address(), None);
    assert!(sim.server(srv).lease(&mac(2)).is_none());

    // the starved client keeps soliciting at the retransmission cadence
    let discovers = sim.sent_at(second, MessageType::Discover);
    assert!(discovers.len() >= 8, "expected steady DISCOVERs");
    for window in discovers.windows(2) {
        assert!(window[1] - window[0] <= secs(2) + Duration::from_millis(10));
    }
}

/// The bound client renews at T1 and the server keeps acknowledging, so
/// the lease never lapses.
#[test]
fn test_renewal_keeps_client_bound() {
    let mut sim = Sim::new();
    let srv = sim.add_server(server(FIRST_ADDR, LAST_ADDR), SERVER_ADDR, mask24());
    let cli = sim.add_client(client(), mac(0x55));
    sim.start_at(srv, secs(0));
    sim.start_at(cli, secs(1));

    sim.run_until(secs(60));

    assert_eq!(
        sim.client(cli).bound_address(),
        Some((FIRST_ADDR, mask24()))
    );

    // renewal REQUESTs go straight to the server, not to the bus at large
    let renewals: Vec<_> = sim
        .trace
        .iter()
        .filter(|entry| {
            entry.node == cli
                && entry.msg_type == Some(MessageType::Request)
                && entry.dst == SocketAddr::new(SERVER_ADDR, SERVER_PORT)
        })
        .collect();
    assert!(renewals.len() >= 2, "expected at least two T1 renewals");

    let acks = sim.sent_at(srv, MessageType::Ack);
    assert!(acks.len() >= 3);
    // the client never had to fall back to a fresh DISCOVER cycle
    assert_eq!(sim.sent_at(cli, MessageType::Discover).len(), 1);
}

/// A NACK while bound sends the client back to square one: it gives the
/// binding up and opens a fresh DISCOVER cycle with a new xid.
#[test]
fn test_nack_while_bound_triggers_rediscovery() {
    let mut sim = Sim::new();
    let srv = sim.add_server(server(FIRST_ADDR, LAST_ADDR), SERVER_ADDR, mask24());
    let cli = sim.add_client(client(), mac(0x55));
    sim.start_at(srv, secs(0));
    sim.start_at(cli, secs(1));

    sim.run_until(secs(10));
    assert_eq!(sim.client(cli).state(), ClientState::Bound);
    let bound_xid = sim.client(cli).xid();

    let mut nack = DhcpHeader::new(BootpOp::Reply, mac(0x55));
    nack.xid = bound_xid;
    nack.msg_type = Some(MessageType::Nack);
    nack.server_id = Some(SERVER_ADDR);
    let mut buf = [0u8; DhcpHeader::MAX_LEN];
    let len = nack.serialize(&mut buf);
    sim.inject_frame_at(
        secs(11),
        &buf[..len],
        SocketAddr::new(SERVER_ADDR, SERVER_PORT),
        SocketAddr::broadcast(CLIENT_PORT),
    );

    sim.run_until(secs(14));

    let rediscovers: Vec<_> = sim
        .trace
        .iter()
        .filter(|entry| {
            entry.node == cli
                && entry.msg_type == Some(MessageType::Discover)
                && entry.at >= secs(11)
        })
        .collect();
    assert!(!rediscovers.is_empty());
    assert!(rediscovers[0].at <= secs(13), "reboot must happen promptly");
    assert_ne!(rediscovers[0].xid, bound_xid);

    // the server still remembers the binding, so the client recovers
    sim.run_until(secs(25));
    assert_eq!(
        sim.client(cli).bound_address(),
        Some((FIRST_ADDR, mask24()))
    );
}

/// A silent client's lease expires on the sweep and its address is handed
/// to the next station.
#[test]
fn test_expired_lease_is_reclaimed() {
    let mut sim = Sim::new();
    let srv = sim.add_server(server(FIRST_ADDR, FIRST_ADDR), SERVER_ADDR, mask24());
    let first = sim.add_client(client(), mac(1));
    let second = sim.add_client(client(), mac(2));
    sim.start_at(srv, secs(0));
    sim.start_at(first, secs(1));

    // the first client takes the only address, then drops off the LAN
    sim.run_until(secs(8));
    assert_eq!(
        sim.client(first).bound_address(),
        Some((FIRST_ADDR, mask24()))
    );
    sim.link_down_at(first, secs(9));

    // past the sweep its lease has lapsed and the newcomer inherits
    sim.start_at(second, secs(35));
    sim.run_until(secs(45));

    assert_eq!(
        sim.client(second).bound_address(),
        Some((FIRST_ADDR, mask24()))
    );
    // the previous holder's entry was reclaimed for the newcomer
    assert!(sim.server(srv).lease(&mac(1)).is_none());
    assert_eq!(sim.server(srv).lease(&mac(2)).unwrap().addr, FIRST_ADDR);
}

/// A frame with an unsupported option tag is dropped on the floor and the
/// server keeps working.
#[test]
fn test_malformed_frame_is_ignored() {
    let mut sim = Sim::new();
    let srv = sim.add_server(server(FIRST_ADDR, LAST_ADDR), SERVER_ADDR, mask24());
    let cli = sim.add_client(client(), mac(0x55));
    sim.start_at(srv, secs(0));

    // a DISCOVER whose first option tag is unknown
    let mut discover = DhcpHeader::new(BootpOp::Request, mac(0x99));
    discover.xid = 0x1234;
    discover.msg_type = Some(MessageType::Discover);
    let mut buf = [0u8; DhcpHeader::MAX_LEN];
    let len = discover.serialize(&mut buf);
    buf[240] = 99;
    sim.inject_frame_at(
        secs(1),
        &buf[..len],
        SocketAddr::new(Ipv4Addr::UNSPECIFIED, CLIENT_PORT),
        SocketAddr::broadcast(SERVER_PORT),
    );

    sim.run_until(secs(2));
    assert!(sim.trace.is_empty(), "no reply to a malformed frame");
    assert!(sim.server(srv).lease(&mac(0x99)).is_none());

    // and the server still serves well-formed traffic afterwards
    sim.start_at(cli, secs(2));
    sim.run_until(secs(10));
    assert_eq!(
        sim.client(cli).bound_address(),
        Some((FIRST_ADDR, mask24()))
    );
}

/// Several clients end up with pairwise distinct addresses from the pool.
#[test]
fn test_many_clients_get_distinct_addresses() {
    let mut sim = Sim::new();
    let srv = sim.add_server(server(FIRST_ADDR, LAST_ADDR), SERVER_ADDR, mask24());
    let clients: Vec<usize> = (1u8..=4)
        .map(|tail| sim.add_client(client(), mac(tail)))
        .collect();
    sim.start_at(srv, secs(0));
    for (i, &node) in clients.iter().enumerate() {
        sim.start_at(node, secs(1) + Duration::from_millis(100 * i as u64));
    }

    sim.run_until(secs(15));

    let mut bound = Vec::new();
    for (i, &node) in clients.iter().enumerate() {
        let (addr, mask) = sim.client(node).bound_address().expect("client must bind");
        assert_eq!(mask, mask24());
        assert!(addr >= FIRST_ADDR && addr <= LAST_ADDR);
        assert!(!bound.contains(&addr), "addresses must be distinct");
        // and the server-side ledger agrees
        let lease = sim.server(srv).lease(&mac(i as u8 + 1)).expect("lease entry");
        assert_eq!(lease.addr, addr);
        bound.push(addr);
    }
}

/// Link flap: the binding is dropped on link-down and reacquired after
/// link-up.
#[test]
fn test_link_flap_reconfigures() {
    let mut sim = Sim::new();
    let srv = sim.add_server(server(FIRST_ADDR, LAST_ADDR), SERVER_ADDR, mask24());
    let cli = sim.add_client(client(), mac(0x55));
    sim.start_at(srv, secs(0));
    sim.start_at(cli, secs(1));

    sim.run_until(secs(8));
    assert_eq!(sim.client(cli).state(), ClientState::Bound);

    sim.link_down_at(cli, secs(9));
    sim.run_until(secs(10));
    assert_eq!(sim.client(cli).state(), ClientState::Idle);
    assert!(!sim.addresses(cli).contains(&(FIRST_ADDR, mask24())));

    sim.link_up_at(cli, secs(11));
    sim.run_until(secs(25));
    assert_eq!(
        sim.client(cli).bound_address(),
        Some((FIRST_ADDR, mask24()))
    );
    assert_eq!(sim.server(srv).lease(&mac(0x55)).unwrap().addr, FIRST_ADDR);
}
