//! DHCP server: answers DISCOVER with OFFER and REQUEST with ACK or NACK,
//! and ages the lease table on a periodic sweep.

use core::time::Duration;

use crate::header::{BootpOp, DhcpHeader, MessageType};
use crate::lease::{Lease, LeasePool};
use crate::sched::{Scheduler, Timer, TimerSlot};
use crate::socket::DatagramSocket;
use crate::{DhcpError, HardwareAddress, Ipv4Addr, Ipv4Mask, SocketAddr, CLIENT_PORT};

/// Everything the server consumes from its host.
pub trait ServerContext: Scheduler + DatagramSocket {}

impl<T: Scheduler + DatagramSocket + ?Sized> ServerContext for T {}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Network address of the served subnet.
    pub pool_network: Ipv4Addr,
    /// Mask of the served subnet.
    pub pool_mask: Ipv4Mask,
    /// The server's own address.
    pub server_addr: Ipv4Addr,
    /// First allocatable address.
    pub min_addr: Ipv4Addr,
    /// Last allocatable address.
    pub max_addr: Ipv4Addr,
    /// Granted lease lifetime in seconds.
    pub lease_time: u32,
    /// Renew time (T1) in seconds.
    pub renew_time: u32,
    /// Rebind time (T2) in seconds.
    pub rebind_time: u32,
}

impl ServerConfig {
    /// Configuration with the default lease timing (30 s lease, T1 15 s,
    /// T2 25 s).
    pub fn new(
        pool_network: Ipv4Addr,
        pool_mask: Ipv4Mask,
        server_addr: Ipv4Addr,
        min_addr: Ipv4Addr,
        max_addr: Ipv4Addr,
    ) -> Self {
        ServerConfig {
            pool_network,
            pool_mask,
            server_addr,
            min_addr,
            max_addr,
            lease_time: 30,
            renew_time: 15,
            rebind_time: 25,
        }
    }
}

/// DHCP server instance.
#[derive(Debug)]
pub struct DhcpServer {
    config: ServerConfig,
    pool: LeasePool,
    sweep: TimerSlot,
}

impl DhcpServer {
    /// Build a server over a validated address pool.
    pub fn new(config: ServerConfig) -> Result<Self, DhcpError> {
        let pool = LeasePool::new(
            config.pool_network,
            config.pool_mask,
            config.server_addr,
            config.min_addr,
            config.max_addr,
        )?;
        Ok(DhcpServer {
            config,
            pool,
            sweep: TimerSlot::new(),
        })
    }

    /// The server's own address.
    pub fn server_addr(&self) -> Ipv4Addr {
        self.config.server_addr
    }

    /// Look up the lease entry for a client. Mainly for tests and
    /// introspection.
    pub fn lease(&self, chaddr: &HardwareAddress) -> Option<&Lease> {
        self.pool.lease(chaddr)
    }

    /// Start serving: arms the periodic lease sweep. The host is expected
    /// to have bound port 67 with broadcast and address reuse enabled.
    pub fn start<C: ServerContext + ?Sized>(&mut self, ctx: &mut C) {
        log::info!(
            "[DHCP Server] serving {}{} from {} to {}",
            self.config.pool_network,
            self.config.pool_mask,
            self.config.min_addr,
            self.config.max_addr
        );
        self.sweep.arm(
            ctx,
            Duration::from_secs(self.config.lease_time.into()),
            Timer::Sweep,
        );
    }

    /// Stop serving: cancels the sweep. The host closes the socket.
    pub fn stop<C: ServerContext + ?Sized>(&mut self, ctx: &mut C) {
        self.sweep.cancel(ctx);
        log::info!("[DHCP Server] stopped");
    }

    /// One inbound datagram from the host socket.
    pub fn handle_datagram<C: ServerContext + ?Sized>(
        &mut self,
        ctx: &mut C,
        data: &[u8],
        from: SocketAddr,
    ) {
        let header = match DhcpHeader::deserialize(data) {
            Ok((header, _)) => header,
            Err(DhcpError::UnknownMessageType) => {
                log::debug!("[DHCP Server] unsupported message type from {}", from);
                return;
            }
            Err(err) => {
                log::warn!("[DHCP Server] dropping datagram from {}: {}", from, err);
                return;
            }
        };
        match header.msg_type {
            Some(MessageType::Discover) => self.send_offer(ctx, &header),
            Some(MessageType::Request) => self.send_ack(ctx, &header),
            _ => {
                log::debug!("[DHCP Server] ignoring {:?} from {}", header.msg_type, from);
            }
        }
    }

    /// One elapsed timer from the host scheduler.
    pub fn handle_timer<C: ServerContext + ?Sized>(&mut self, ctx: &mut C, timer: Timer) {
        match timer {
            Timer::Sweep => {
                self.sweep.clear();
                self.pool.sweep(self.config.lease_time);
                self.sweep.arm(
                    ctx,
                    Duration::from_secs(self.config.lease_time.into()),
                    Timer::Sweep,
                );
            }
            _ => log::debug!("[DHCP Server] spurious timer {:?}", timer),
        }
    }

    fn send_offer<C: ServerContext + ?Sized>(&mut self, ctx: &mut C, request: &DhcpHeader) {
        let chaddr = request.chaddr;
        let offered = match self.pool.offer(chaddr, self.config.lease_time) {
            Ok(addr) => addr,
            Err(err) => {
                // no reply; the client keeps retransmitting its DISCOVER
                log::warn!("[DHCP Server] no offer for {}: {}", chaddr, err);
                return;
            }
        };
        log::info!(
            "[DHCP Server] offering {} to {} (xid {:#010x})",
            offered,
            chaddr,
            request.xid
        );

        let mut reply = self.reply_to(request);
        reply.yiaddr = offered;
        reply.msg_type = Some(MessageType::Offer);
        reply.mask = Some(self.config.pool_mask);
        reply.lease = Some(self.config.lease_time);
        reply.renew = Some(self.config.renew_time);
        reply.rebind = Some(self.config.rebind_time);
        self.broadcast(ctx, &reply);
    }

    fn send_ack<C: ServerContext + ?Sized>(&mut self, ctx: &mut C, request: &DhcpHeader) {
        let chaddr = request.chaddr;
        // a renewal REQUEST carries no requested-address option, only ciaddr
        let requested = request.requested.unwrap_or(request.ciaddr);

        let mut reply = self.reply_to(request);
        if self.pool.commit(chaddr, requested, self.config.lease_time) {
            log::info!("[DHCP Server] leasing {} to {}", requested, chaddr);
            reply.yiaddr = requested;
            reply.msg_type = Some(MessageType::Ack);
            reply.mask = Some(self.config.pool_mask);
            reply.lease = Some(self.config.lease_time);
            reply.renew = Some(self.config.renew_time);
            reply.rebind = Some(self.config.rebind_time);
        } else {
            log::info!(
                "[DHCP Server] refusing {} for {} (not offered here)",
                requested,
                chaddr
            );
            reply.msg_type = Some(MessageType::Nack);
        }
        self.broadcast(ctx, &reply);
    }

    fn reply_to(&self, request: &DhcpHeader) -> DhcpHeader {
        let mut reply = DhcpHeader::new(BootpOp::Reply, request.chaddr);
        reply.xid = request.xid;
        reply.server_id = Some(self.config.server_addr);
        reply
    }

    fn broadcast<C: ServerContext + ?Sized>(&self, ctx: &mut C, reply: &DhcpHeader) {
        let mut buf = [0u8; DhcpHeader::MAX_LEN];
        let len = reply.serialize(&mut buf);
        ctx.send_to(&buf[..len], SocketAddr::broadcast(CLIENT_PORT));
    }
}
