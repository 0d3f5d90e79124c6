//! L3 address-binding interface consumed by the client.
//!
//! The client never manipulates the host network stack directly. It reads
//! the hardware address of the interface it was started on and replaces the
//! interface's IPv4 binding as leases come and go. Link state changes are
//! pushed the other way: the host calls `DhcpClient::link_up` /
//! `DhcpClient::link_down`.

use crate::{HardwareAddress, Ipv4Addr, Ipv4Mask};

/// Host network interface management.
pub trait Interface {
    /// Hardware address of the bound interface.
    fn hw_addr(&self) -> HardwareAddress;

    /// Add an IPv4 address binding to the interface.
    fn add_address(&mut self, addr: Ipv4Addr, mask: Ipv4Mask);

    /// Remove an IPv4 address binding from the interface.
    fn remove_address(&mut self, addr: Ipv4Addr, mask: Ipv4Mask);
}
