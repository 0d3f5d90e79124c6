//! Datagram send interface consumed by the client and server.
//!
//! The host owns the UDP endpoints (port 67 on the server, port 68 on the
//! client, both bound with broadcast and address reuse enabled). Outbound
//! frames go through [`DatagramSocket::send_to`]; inbound frames are pushed
//! into the endpoints by the host calling their `handle_datagram` methods.

use crate::SocketAddr;

/// Host UDP socket, send side only.
pub trait DatagramSocket {
    /// Send one datagram to `dst`.
    fn send_to(&mut self, buf: &[u8], dst: SocketAddr);
}
