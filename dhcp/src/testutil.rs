//! Recording host context for unit tests.

use alloc::vec::Vec;
use core::time::Duration;

use crate::header::DhcpHeader;
use crate::interface::Interface;
use crate::sched::{EventId, Scheduler, Timer};
use crate::socket::DatagramSocket;
use crate::{HardwareAddress, Ipv4Addr, Ipv4Mask, RandomSource, SocketAddr};

/// A host context that records every action for assertions.
pub struct TestCtx {
    pub now: Duration,
    pub hw: HardwareAddress,
    pub next_id: u64,
    pub next_xid: u32,
    pub scheduled: Vec<(EventId, Duration, Timer)>,
    pub cancelled: Vec<EventId>,
    pub sent: Vec<(Vec<u8>, SocketAddr)>,
    pub added: Vec<(Ipv4Addr, Ipv4Mask)>,
    pub removed: Vec<(Ipv4Addr, Ipv4Mask)>,
}

impl TestCtx {
    pub fn new() -> Self {
        TestCtx {
            now: Duration::ZERO,
            hw: HardwareAddress::Mac48([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
            next_id: 0,
            next_xid: 0xA0,
            scheduled: Vec::new(),
            cancelled: Vec::new(),
            sent: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    /// Parse the most recently sent frame.
    pub fn last_sent(&self) -> (DhcpHeader, SocketAddr) {
        let (data, dst) = self.sent.last().expect("nothing was sent");
        let (header, _) = DhcpHeader::deserialize(data).expect("sent frame must parse");
        (header, *dst)
    }
}

impl Scheduler for TestCtx {
    fn now(&self) -> Duration {
        self.now
    }

    fn schedule(&mut self, delay: Duration, timer: Timer) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        self.scheduled.push((id, delay, timer));
        id
    }

    fn cancel(&mut self, event: EventId) {
        self.cancelled.push(event);
    }
}

impl DatagramSocket for TestCtx {
    fn send_to(&mut self, buf: &[u8], dst: SocketAddr) {
        self.sent.push((buf.to_vec(), dst));
    }
}

impl Interface for TestCtx {
    fn hw_addr(&self) -> HardwareAddress {
        self.hw
    }

    fn add_address(&mut self, addr: Ipv4Addr, mask: Ipv4Mask) {
        self.added.push((addr, mask));
    }

    fn remove_address(&mut self, addr: Ipv4Addr, mask: Ipv4Mask) {
        self.removed.push((addr, mask));
    }
}

impl RandomSource for TestCtx {
    fn random_u32(&mut self) -> u32 {
        let xid = self.next_xid;
        self.next_xid += 1;
        xid
    }
}
