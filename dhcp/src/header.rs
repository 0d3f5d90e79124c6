//! BOOTP/DHCP wire codec.
//!
//! A message is a fixed 240-byte prologue followed by a list of option TLVs
//! terminated by the END tag:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +---------------+---------------+---------------+---------------+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |                          ciaddr  (4)                          |
//! +---------------------------------------------------------------+
//! |                          yiaddr  (4)                          |
//! +---------------------------------------------------------------+
//! |                          siaddr  (4)                          |
//! +---------------------------------------------------------------+
//! |                          giaddr  (4)                          |
//! +---------------------------------------------------------------+
//! |                          chaddr  (16)                         |
//! +---------------------------------------------------------------+
//! |                          sname   (64)                         |
//! +---------------------------------------------------------------+
//! |                          file    (128)                        |
//! +---------------------------------------------------------------+
//! |        magic cookie (4)       |       options (variable)      |
//! +---------------------------------------------------------------+
//! ```
//!
//! Supported options: Subnet Mask (1), Requested Address (50), Lease
//! Time (51), Message Type (53), Server Identifier (54), Renew Time (58),
//! Rebind Time (59), End (255). All multi-byte fields are network order.
//! The `chaddr` region is always the full 16 bytes: the hardware address is
//! left-justified and zero padded.

use bitflags::bitflags;

use crate::{DhcpError, HardwareAddress, Ipv4Addr, Ipv4Mask};

/// Subnet Mask option.
const OPT_SUBNET_MASK: u8 = 1;
/// Requested Address option.
const OPT_REQUESTED_ADDR: u8 = 50;
/// Lease Time option.
const OPT_LEASE_TIME: u8 = 51;
/// Message Type option.
const OPT_MESSAGE_TYPE: u8 = 53;
/// Server Identifier option.
const OPT_SERVER_ID: u8 = 54;
/// Renew Time (T1) option.
const OPT_RENEW_TIME: u8 = 58;
/// Rebind Time (T2) option.
const OPT_REBIND_TIME: u8 = 59;
/// End of options.
const OPT_END: u8 = 255;

/// BOOTP operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootpOp {
    /// Boot request (client to server).
    Request = 1,
    /// Boot reply (server to client).
    Reply = 2,
}

impl TryFrom<u8> for BootpOp {
    type Error = DhcpError;

    fn try_from(value: u8) -> Result<Self, DhcpError> {
        match value {
            1 => Ok(BootpOp::Request),
            2 => Ok(BootpOp::Reply),
            _ => Err(DhcpError::MalformedPacket),
        }
    }
}

/// DHCP message types carried in option 53.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate available servers.
    Discover = 1,
    /// Server response to a DISCOVER, offering an address.
    Offer = 2,
    /// Client request for an offered address, or a lease extension.
    Request = 3,
    /// Server acknowledgement committing the address.
    Ack = 5,
    /// Server negative acknowledgement.
    Nack = 6,
}

impl TryFrom<u8> for MessageType {
    type Error = DhcpError;

    fn try_from(value: u8) -> Result<Self, DhcpError> {
        match value {
            1 => Ok(MessageType::Discover),
            2 => Ok(MessageType::Offer),
            3 => Ok(MessageType::Request),
            5 => Ok(MessageType::Ack),
            6 => Ok(MessageType::Nack),
            _ => Err(DhcpError::UnknownMessageType),
        }
    }
}

bitflags! {
    /// BOOTP flags field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BootpFlags: u16 {
        /// Ask the server to broadcast its reply.
        const BROADCAST = 0x8000;
    }
}

/// One BOOTP/DHCP message: the fixed prologue plus the set of options
/// present. Only options that are `Some` are emitted, in a fixed canonical
/// order (message type, requested address, server id, mask, lease, renew,
/// rebind, end).
#[derive(Debug, Clone, PartialEq)]
pub struct DhcpHeader {
    /// BOOTP operation.
    pub op: BootpOp,
    /// Hardware type, 1 for ethernet.
    pub htype: u8,
    /// Relay hop count.
    pub hops: u8,
    /// Transaction id correlating one exchange.
    pub xid: u32,
    /// Seconds since the client began the transaction.
    pub secs: u16,
    /// BOOTP flags.
    pub flags: BootpFlags,
    /// Client address, set on lease renewal.
    pub ciaddr: Ipv4Addr,
    /// "Your" address, the one being offered or committed.
    pub yiaddr: Ipv4Addr,
    /// Next-server address.
    pub siaddr: Ipv4Addr,
    /// Relay agent address.
    pub giaddr: Ipv4Addr,
    /// Client hardware address. `hlen` on the wire follows its width.
    pub chaddr: HardwareAddress,
    /// Option 53: message type.
    pub msg_type: Option<MessageType>,
    /// Option 50: address requested by the client.
    pub requested: Option<Ipv4Addr>,
    /// Option 54: server identifier.
    pub server_id: Option<Ipv4Addr>,
    /// Option 1: subnet mask.
    pub mask: Option<Ipv4Mask>,
    /// Option 51: lease time in seconds.
    pub lease: Option<u32>,
    /// Option 58: renew time (T1) in seconds.
    pub renew: Option<u32>,
    /// Option 59: rebind time (T2) in seconds.
    pub rebind: Option<u32>,
}

impl DhcpHeader {
    /// Size of the fixed prologue, including the magic cookie.
    pub const FIXED_LEN: usize = 240;

    /// Largest frame this codec emits. Callers size their scratch buffers
    /// with this.
    pub const MAX_LEN: usize = 576;

    /// The four bytes separating the prologue from the options.
    pub const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

    /// Create a message with an empty option set.
    pub fn new(op: BootpOp, chaddr: HardwareAddress) -> Self {
        DhcpHeader {
            op,
            htype: 1,
            hops: 0,
            xid: 0,
            secs: 0,
            flags: BootpFlags::empty(),
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr,
            msg_type: None,
            requested: None,
            server_id: None,
            mask: None,
            lease: None,
            renew: None,
            rebind: None,
        }
    }

    /// Serialized size: 240 bytes of prologue, 3 bytes for the message
    /// type, 6 bytes per four-byte option, 1 byte for END.
    pub fn serialized_len(&self) -> usize {
        let mut len = Self::FIXED_LEN + 1;
        if self.msg_type.is_some() {
            len += 3;
        }
        for present in [
            self.requested.is_some(),
            self.server_id.is_some(),
            self.mask.is_some(),
            self.lease.is_some(),
            self.renew.is_some(),
            self.rebind.is_some(),
        ] {
            if present {
                len += 6;
            }
        }
        len
    }

    /// Serialize into `buf` and return the number of bytes written.
    ///
    /// `buf` must hold at least `serialized_len()` bytes; [`Self::MAX_LEN`]
    /// always suffices.
    pub fn serialize(&self, buf: &mut [u8]) -> usize {
        buf[0] = self.op as u8;
        buf[1] = self.htype;
        buf[2] = self.chaddr.hlen();
        buf[3] = self.hops;
        buf[4..8].copy_from_slice(&self.xid.to_be_bytes());
        buf[8..10].copy_from_slice(&self.secs.to_be_bytes());
        buf[10..12].copy_from_slice(&self.flags.bits().to_be_bytes());
        buf[12..16].copy_from_slice(&self.ciaddr.octets());
        buf[16..20].copy_from_slice(&self.yiaddr.octets());
        buf[20..24].copy_from_slice(&self.siaddr.octets());
        buf[24..28].copy_from_slice(&self.giaddr.octets());

        // chaddr region is 16 bytes regardless of hlen, zero padded
        let hw = self.chaddr.as_bytes();
        buf[28..44].fill(0);
        buf[28..28 + hw.len()].copy_from_slice(hw);

        // sname and file are reserved
        buf[44..236].fill(0);
        buf[236..240].copy_from_slice(&Self::MAGIC_COOKIE);

        let mut offset = Self::FIXED_LEN;
        if let Some(msg_type) = self.msg_type {
            buf[offset] = OPT_MESSAGE_TYPE;
            buf[offset + 1] = 1;
            buf[offset + 2] = msg_type as u8;
            offset += 3;
        }
        if let Some(requested) = self.requested {
            offset = put_addr(buf, offset, OPT_REQUESTED_ADDR, requested);
        }
        if let Some(server_id) = self.server_id {
            offset = put_addr(buf, offset, OPT_SERVER_ID, server_id);
        }
        if let Some(mask) = self.mask {
            offset = put_u32(buf, offset, OPT_SUBNET_MASK, mask.to_u32());
        }
        if let Some(lease) = self.lease {
            offset = put_u32(buf, offset, OPT_LEASE_TIME, lease);
        }
        if let Some(renew) = self.renew {
            offset = put_u32(buf, offset, OPT_RENEW_TIME, renew);
        }
        if let Some(rebind) = self.rebind {
            offset = put_u32(buf, offset, OPT_REBIND_TIME, rebind);
        }
        buf[offset] = OPT_END;
        offset + 1
    }

    /// Parse a message from `data`. Returns the message and the number of
    /// bytes consumed (the serialized size). Never panics, whatever the
    /// input.
    pub fn deserialize(data: &[u8]) -> Result<(DhcpHeader, usize), DhcpError> {
        if data.len() < Self::FIXED_LEN {
            return Err(DhcpError::MalformedPacket);
        }

        let op = BootpOp::try_from(data[0])?;
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];
        let xid = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let secs = u16::from_be_bytes([data[8], data[9]]);
        let flags = BootpFlags::from_bits_retain(u16::from_be_bytes([data[10], data[11]]));
        let ciaddr = Ipv4Addr([data[12], data[13], data[14], data[15]]);
        let yiaddr = Ipv4Addr([data[16], data[17], data[18], data[19]]);
        let siaddr = Ipv4Addr([data[20], data[21], data[22], data[23]]);
        let giaddr = Ipv4Addr([data[24], data[25], data[26], data[27]]);

        let chaddr = match hlen {
            6 => {
                let mut bytes = [0u8; 6];
                bytes.copy_from_slice(&data[28..34]);
                HardwareAddress::Mac48(bytes)
            }
            8 => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&data[28..36]);
                HardwareAddress::Mac64(bytes)
            }
            _ => return Err(DhcpError::MalformedPacket),
        };

        if data[236..240] != Self::MAGIC_COOKIE {
            return Err(DhcpError::MalformedPacket);
        }

        let mut header = DhcpHeader {
            op,
            htype,
            hops,
            xid,
            secs,
            flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr,
            chaddr,
            msg_type: None,
            requested: None,
            server_id: None,
            mask: None,
            lease: None,
            renew: None,
            rebind: None,
        };

        let mut consumed = Self::FIXED_LEN;
        loop {
            if consumed >= data.len() {
                return Err(DhcpError::MalformedPacket);
            }
            let tag = data[consumed];
            consumed += 1;
            match tag {
                OPT_END => break,
                OPT_MESSAGE_TYPE => {
                    if consumed + 2 > data.len() || data[consumed] != 1 {
                        return Err(DhcpError::MalformedPacket);
                    }
                    header.msg_type = Some(MessageType::try_from(data[consumed + 1])?);
                    consumed += 2;
                }
                OPT_SUBNET_MASK | OPT_REQUESTED_ADDR | OPT_LEASE_TIME | OPT_SERVER_ID
                | OPT_RENEW_TIME | OPT_REBIND_TIME => {
                    if consumed + 5 > data.len() || data[consumed] != 4 {
                        return Err(DhcpError::MalformedPacket);
                    }
                    let value = [
                        data[consumed + 1],
                        data[consumed + 2],
                        data[consumed + 3],
                        data[consumed + 4],
                    ];
                    match tag {
                        OPT_SUBNET_MASK => {
                            header.mask = Some(Ipv4Mask(u32::from_be_bytes(value)));
                        }
                        OPT_REQUESTED_ADDR => header.requested = Some(Ipv4Addr(value)),
                        OPT_SERVER_ID => header.server_id = Some(Ipv4Addr(value)),
                        OPT_LEASE_TIME => header.lease = Some(u32::from_be_bytes(value)),
                        OPT_RENEW_TIME => header.renew = Some(u32::from_be_bytes(value)),
                        _ => header.rebind = Some(u32::from_be_bytes(value)),
                    }
                    consumed += 5;
                }
                _ => return Err(DhcpError::MalformedPacket),
            }
        }

        Ok((header, consumed))
    }
}

fn put_addr(buf: &mut [u8], offset: usize, tag: u8, addr: Ipv4Addr) -> usize {
    buf[offset] = tag;
    buf[offset + 1] = 4;
    buf[offset + 2..offset + 6].copy_from_slice(&addr.octets());
    offset + 6
}

fn put_u32(buf: &mut [u8], offset: usize, tag: u8, value: u32) -> usize {
    buf[offset] = tag;
    buf[offset + 1] = 4;
    buf[offset + 2..offset + 6].copy_from_slice(&value.to_be_bytes());
    offset + 6
}
