//! DHCP client state machine.
//!
//! The client walks the four-way handshake: it broadcasts DISCOVER,
//! collects OFFERs for a fixed window, REQUESTs the first collected offer
//! (falling back across the rest on retry exhaustion), and commits the
//! address on ACK. Once bound it renews at T1 by unicasting the issuing
//! server, rebinds at T2 by broadcasting, and tears the binding down at
//! hard lease expiry or on NACK, restarting the cycle from scratch.

use alloc::collections::VecDeque;
use core::time::Duration;

use crate::header::{BootpFlags, BootpOp, DhcpHeader, MessageType};
use crate::interface::Interface;
use crate::sched::{Scheduler, Timer, TimerSlot};
use crate::socket::DatagramSocket;
use crate::{DhcpError, Ipv4Addr, Ipv4Mask, RandomSource, SocketAddr, SERVER_PORT};

/// Everything the client consumes from its host.
pub trait ClientContext: Scheduler + DatagramSocket + Interface + RandomSource {}

impl<T: Scheduler + DatagramSocket + Interface + RandomSource + ?Sized> ClientContext for T {}

/// Client states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not configured and not trying; entered on stop and link-down.
    Idle,
    /// DISCOVER sent, collecting offers.
    WaitOffer,
    /// REQUEST sent, waiting for the server's verdict.
    WaitAck,
    /// Address committed; lease upkeep in progress.
    Bound,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Retransmission interval for DISCOVER and REQUEST.
    pub retransmit: Duration,
    /// How long to collect offers before picking one.
    pub collect_window: Duration,
    /// REQUEST retransmissions before falling back to the next offer.
    pub request_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            retransmit: Duration::from_secs(2),
            collect_window: Duration::from_secs(5),
            request_retries: 4,
        }
    }
}

/// The client's named timer slots.
#[derive(Debug, Default)]
struct ClientTimers {
    discover: TimerSlot,
    collect: TimerSlot,
    request: TimerSlot,
    renew: TimerSlot,
    rebind: TimerSlot,
    expire: TimerSlot,
}

impl ClientTimers {
    fn cancel_all<S: Scheduler + ?Sized>(&mut self, sched: &mut S) {
        self.discover.cancel(sched);
        self.collect.cancel(sched);
        self.request.cancel(sched);
        self.renew.cancel(sched);
        self.rebind.cancel(sched);
        self.expire.cancel(sched);
    }
}

/// DHCP client instance.
#[derive(Debug)]
pub struct DhcpClient {
    config: ClientConfig,
    state: ClientState,
    xid: u32,
    offers: VecDeque<DhcpHeader>,
    offered: bool,
    my_addr: Ipv4Addr,
    my_mask: Ipv4Mask,
    offered_addr: Ipv4Addr,
    offered_mask: Ipv4Mask,
    server_addr: Ipv4Addr,
    remote: SocketAddr,
    lease_secs: u32,
    renew_secs: u32,
    rebind_secs: u32,
    request_retry: u32,
    timers: ClientTimers,
}

impl DhcpClient {
    pub fn new(config: ClientConfig) -> Self {
        DhcpClient {
            config,
            state: ClientState::Idle,
            xid: 0,
            offers: VecDeque::new(),
            offered: false,
            my_addr: Ipv4Addr::UNSPECIFIED,
            my_mask: Ipv4Mask::ZERO,
            offered_addr: Ipv4Addr::UNSPECIFIED,
            offered_mask: Ipv4Mask::ZERO,
            server_addr: Ipv4Addr::UNSPECIFIED,
            remote: SocketAddr::broadcast(SERVER_PORT),
            lease_secs: 0,
            renew_secs: 0,
            rebind_secs: 0,
            request_retry: 0,
            timers: ClientTimers::default(),
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Transaction id of the current cycle.
    pub fn xid(&self) -> u32 {
        self.xid
    }

    /// The committed binding, if any.
    pub fn bound_address(&self) -> Option<(Ipv4Addr, Ipv4Mask)> {
        if self.state == ClientState::Bound {
            Some((self.my_addr, self.my_mask))
        } else {
            None
        }
    }

    /// Start the client. The host is expected to have bound port 68 with
    /// broadcast enabled on the interface behind `ctx`.
    pub fn start<C: ClientContext + ?Sized>(&mut self, ctx: &mut C) {
        log::info!("[DHCP Client] starting on {}", ctx.hw_addr());
        ctx.add_address(Ipv4Addr::UNSPECIFIED, Ipv4Mask::ZERO);
        self.boot(ctx);
    }

    /// Stop the client: cancels every timer and reverts the interface to
    /// the unnumbered binding. The host closes the socket.
    pub fn stop<C: ClientContext + ?Sized>(&mut self, ctx: &mut C) {
        self.timers.cancel_all(ctx);
        self.unconfigure(ctx);
        self.offers.clear();
        self.state = ClientState::Idle;
        log::info!("[DHCP Client] stopped");
    }

    /// The link went down: drop all protocol state until it returns.
    pub fn link_down<C: ClientContext + ?Sized>(&mut self, ctx: &mut C) {
        log::info!("[DHCP Client] link down");
        self.timers.cancel_all(ctx);
        self.unconfigure(ctx);
        self.offers.clear();
        self.state = ClientState::Idle;
    }

    /// The link came back: restart the configuration cycle.
    pub fn link_up<C: ClientContext + ?Sized>(&mut self, ctx: &mut C) {
        log::info!("[DHCP Client] link up");
        self.boot(ctx);
    }

    /// One inbound datagram from the host socket.
    pub fn handle_datagram<C: ClientContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        data: &[u8],
        from: SocketAddr,
    ) {
        let header = match DhcpHeader::deserialize(data) {
            Ok((header, _)) => header,
            Err(DhcpError::UnknownMessageType) => {
                log::debug!("[DHCP Client] unsupported message type from {}", from);
                return;
            }
            Err(err) => {
                log::warn!("[DHCP Client] dropping datagram from {}: {}", from, err);
                return;
            }
        };
        if header.xid != self.xid {
            log::debug!(
                "[DHCP Client] xid mismatch ({:#010x}, expected {:#010x})",
                header.xid,
                self.xid
            );
            return;
        }
        match (header.msg_type, self.state) {
            (Some(MessageType::Offer), ClientState::WaitOffer) => {
                log::debug!("[DHCP Client] collected offer of {}", header.yiaddr);
                self.offers.push_back(header);
                self.offered = true;
            }
            (Some(MessageType::Ack), ClientState::WaitAck)
            | (Some(MessageType::Ack), ClientState::Bound) => {
                self.accept_ack(ctx, &header, from);
            }
            (Some(MessageType::Nack), ClientState::WaitAck)
            | (Some(MessageType::Nack), ClientState::Bound) => {
                log::info!("[DHCP Client] lease refused, restarting");
                self.unconfigure(ctx);
                self.boot(ctx);
            }
            (msg_type, state) => {
                log::debug!("[DHCP Client] ignoring {:?} in {:?}", msg_type, state);
            }
        }
    }

    /// One elapsed timer from the host scheduler.
    pub fn handle_timer<C: ClientContext + ?Sized>(&mut self, ctx: &mut C, timer: Timer) {
        match timer {
            Timer::Discover => {
                self.timers.discover.clear();
                // retransmission stops as soon as any offer has arrived;
                // the collection window takes it from there
                if self.state == ClientState::WaitOffer && !self.offered {
                    self.send_discover(ctx);
                    self.timers
                        .discover
                        .arm(ctx, self.config.retransmit, Timer::Discover);
                }
            }
            Timer::Collect => {
                self.timers.collect.clear();
                if self.state == ClientState::WaitOffer {
                    self.select_offer(ctx);
                }
            }
            Timer::Request => {
                self.timers.request.clear();
                if self.state == ClientState::WaitAck {
                    if self.request_retry < self.config.request_retries {
                        self.request_retry += 1;
                        self.send_request(ctx);
                        self.timers
                            .request
                            .arm(ctx, self.config.retransmit, Timer::Request);
                    } else {
                        self.next_offer_or_boot(ctx);
                    }
                }
            }
            Timer::Renew => {
                self.timers.renew.clear();
                if self.state == ClientState::Bound {
                    log::debug!("[DHCP Client] renewing lease with {}", self.remote);
                    self.send_lease_request(ctx, self.remote, false);
                }
            }
            Timer::Rebind => {
                self.timers.rebind.clear();
                if self.state == ClientState::Bound {
                    log::debug!("[DHCP Client] rebinding with any server");
                    self.send_lease_request(ctx, SocketAddr::broadcast(SERVER_PORT), true);
                }
            }
            Timer::Expire => {
                self.timers.expire.clear();
                if self.state == ClientState::Bound {
                    log::info!("[DHCP Client] lease on {} expired", self.my_addr);
                    self.unconfigure(ctx);
                    self.boot(ctx);
                }
            }
            Timer::Sweep => log::debug!("[DHCP Client] spurious timer {:?}", timer),
        }
    }

    /// Start a fresh DISCOVER cycle.
    fn boot<C: ClientContext + ?Sized>(&mut self, ctx: &mut C) {
        self.offers.clear();
        self.offered = false;
        self.request_retry = 0;
        self.timers.cancel_all(ctx);
        self.xid = ctx.random_u32();
        self.state = ClientState::WaitOffer;
        self.send_discover(ctx);
        self.timers
            .discover
            .arm(ctx, self.config.retransmit, Timer::Discover);
        self.timers
            .collect
            .arm(ctx, self.config.collect_window, Timer::Collect);
    }

    fn send_discover<C: ClientContext + ?Sized>(&mut self, ctx: &mut C) {
        let mut msg = DhcpHeader::new(BootpOp::Request, ctx.hw_addr());
        msg.xid = self.xid;
        msg.secs = ctx.now().as_secs() as u16;
        msg.flags = BootpFlags::BROADCAST;
        msg.msg_type = Some(MessageType::Discover);
        log::debug!("[DHCP Client] discover (xid {:#010x})", self.xid);
        self.send(ctx, &msg, SocketAddr::broadcast(SERVER_PORT));
    }

    /// The collection window closed; move on with the first offer, or start
    /// over if none arrived.
    fn select_offer<C: ClientContext + ?Sized>(&mut self, ctx: &mut C) {
        match self.offers.pop_front() {
            Some(offer) => {
                self.timers.discover.cancel(ctx);
                self.request_retry = 0;
                self.take_offer(ctx, &offer);
            }
            None => {
                log::debug!("[DHCP Client] no offers received, rebooting");
                self.boot(ctx);
            }
        }
    }

    fn take_offer<C: ClientContext + ?Sized>(&mut self, ctx: &mut C, offer: &DhcpHeader) {
        self.offered_addr = offer.yiaddr;
        self.offered_mask = offer.mask.unwrap_or(Ipv4Mask::ZERO);
        self.server_addr = offer.server_id.unwrap_or(Ipv4Addr::UNSPECIFIED);
        self.record_times(offer);
        self.state = ClientState::WaitAck;
        log::info!(
            "[DHCP Client] requesting {} from {}",
            self.offered_addr,
            self.server_addr
        );
        self.send_request(ctx);
        self.timers
            .request
            .arm(ctx, self.config.retransmit, Timer::Request);
    }

    fn send_request<C: ClientContext + ?Sized>(&mut self, ctx: &mut C) {
        let mut msg = DhcpHeader::new(BootpOp::Request, ctx.hw_addr());
        msg.xid = self.xid;
        msg.secs = ctx.now().as_secs() as u16;
        msg.flags = BootpFlags::BROADCAST;
        msg.msg_type = Some(MessageType::Request);
        msg.requested = Some(self.offered_addr);
        msg.server_id = Some(self.server_addr);
        self.send(ctx, &msg, SocketAddr::broadcast(SERVER_PORT));
    }

    /// A lease-extension REQUEST: the held address travels in `ciaddr` and
    /// no requested-address option is present. At T1 it is unicast to the
    /// issuing server; at T2 it is broadcast without a server id to reach
    /// whichever server responds.
    fn send_lease_request<C: ClientContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        dst: SocketAddr,
        broadcast: bool,
    ) {
        let mut msg = DhcpHeader::new(BootpOp::Request, ctx.hw_addr());
        msg.xid = self.xid;
        msg.secs = ctx.now().as_secs() as u16;
        msg.ciaddr = self.my_addr;
        if broadcast {
            msg.flags = BootpFlags::BROADCAST;
        }
        msg.msg_type = Some(MessageType::Request);
        self.send(ctx, &msg, dst);
    }

    fn accept_ack<C: ClientContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        ack: &DhcpHeader,
        from: SocketAddr,
    ) {
        self.record_times(ack);
        if let Some(mask) = ack.mask {
            self.offered_mask = mask;
        }
        if let Some(server_id) = ack.server_id {
            self.server_addr = server_id;
        }

        if self.state == ClientState::WaitAck {
            self.timers.request.cancel(ctx);
            self.timers.collect.cancel(ctx);
            ctx.remove_address(Ipv4Addr::UNSPECIFIED, Ipv4Mask::ZERO);
            self.my_addr = self.offered_addr;
            self.my_mask = self.offered_mask;
            ctx.add_address(self.my_addr, self.my_mask);
            let remote_ip = if from.ip.is_unspecified() {
                self.server_addr
            } else {
                from.ip
            };
            self.remote = SocketAddr::new(remote_ip, SERVER_PORT);
            self.state = ClientState::Bound;
            log::info!(
                "[DHCP Client] bound to {}{} (server {})",
                self.my_addr,
                self.my_mask,
                self.remote
            );
        }

        self.timers
            .renew
            .arm(ctx, Duration::from_secs(self.renew_secs.into()), Timer::Renew);
        self.timers.rebind.arm(
            ctx,
            Duration::from_secs(self.rebind_secs.into()),
            Timer::Rebind,
        );
        self.timers.expire.arm(
            ctx,
            Duration::from_secs(self.lease_secs.into()),
            Timer::Expire,
        );
    }

    fn next_offer_or_boot<C: ClientContext + ?Sized>(&mut self, ctx: &mut C) {
        match self.offers.pop_front() {
            Some(offer) => {
                log::debug!("[DHCP Client] no ack, trying the next offer");
                self.request_retry = 0;
                self.take_offer(ctx, &offer);
            }
            None => {
                log::debug!("[DHCP Client] no ack and no offers left, rebooting");
                self.boot(ctx);
            }
        }
    }

    fn record_times(&mut self, header: &DhcpHeader) {
        if let Some(lease) = header.lease {
            self.lease_secs = lease;
        }
        if let Some(renew) = header.renew {
            self.renew_secs = renew;
        }
        if let Some(rebind) = header.rebind {
            self.rebind_secs = rebind;
        }
    }

    /// Revert the interface to the unnumbered binding and forget the lease.
    fn unconfigure<C: ClientContext + ?Sized>(&mut self, ctx: &mut C) {
        if !self.my_addr.is_unspecified() {
            ctx.remove_address(self.my_addr, self.my_mask);
            ctx.add_address(Ipv4Addr::UNSPECIFIED, Ipv4Mask::ZERO);
            self.my_addr = Ipv4Addr::UNSPECIFIED;
            self.my_mask = Ipv4Mask::ZERO;
        }
        self.offered_addr = Ipv4Addr::UNSPECIFIED;
        self.offered_mask = Ipv4Mask::ZERO;
        self.server_addr = Ipv4Addr::UNSPECIFIED;
        self.remote = SocketAddr::broadcast(SERVER_PORT);
        self.lease_secs = 0;
        self.renew_secs = 0;
        self.rebind_secs = 0;
    }

    fn send<C: ClientContext + ?Sized>(&self, ctx: &mut C, msg: &DhcpHeader, dst: SocketAddr) {
        let mut buf = [0u8; DhcpHeader::MAX_LEN];
        let len = msg.serialize(&mut buf);
        ctx.send_to(&buf[..len], dst);
    }
}
