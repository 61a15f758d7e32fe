use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub const IPV4_HEADER_BYTES: u32 = 20;
pub const TCP_HEADER_BYTES: u32 = 20;
/// Room kept free for TCP options when sizing segments from the MTU.
pub const TCP_OPTIONS_ALLOWANCE: u32 = 20;
pub const PROTOCOL_TCP: u8 = 6;

/// TCP Header flags
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
}

/// Largest payload that fits one IP packet of `mtu` bytes.
pub fn segment_size_for_mtu(mtu: u32) -> Option<u32> {
    mtu.checked_sub(TCP_OPTIONS_ALLOWANCE + IPV4_HEADER_BYTES + TCP_HEADER_BYTES)
        .filter(|size| *size > 0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// Byte sequence number of the first payload byte.
    pub seq: u64,
    /// Next byte expected by the sender of this header (valid with ACK).
    pub ack: u64,
    pub flags: u8,
    /// Advertised receive window in bytes.
    pub window: u32,
}

impl TcpHeader {
    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }
}

/// An IPv4 packet carrying one TCP segment. Payload bytes are not materialised,
/// only their count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Assigned by the engine when the packet first enters the network.
    pub uid: u64,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub header: TcpHeader,
    pub payload_len: u32,
}

impl Packet {
    pub fn new_data(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        seq: u64,
        payload_len: u32,
    ) -> Self {
        Self {
            uid: 0,
            src,
            dst,
            header: TcpHeader {
                src_port,
                dst_port,
                seq,
                flags: flags::PSH | flags::ACK,
                ..Default::default()
            },
            payload_len,
        }
    }

    /// Create a pure ACK packet
    pub fn new_ack(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
        ack: u64,
        window: u32,
    ) -> Self {
        Self {
            uid: 0,
            src,
            dst,
            header: TcpHeader {
                src_port,
                dst_port,
                ack,
                flags: flags::ACK,
                window,
                ..Default::default()
            },
            payload_len: 0,
        }
    }

    /// Bytes on the wire, headers included.
    pub fn size(&self) -> u32 {
        self.payload_len + IPV4_HEADER_BYTES + TCP_HEADER_BYTES
    }

    pub fn five_tuple(&self) -> FiveTuple {
        FiveTuple {
            src: self.src,
            dst: self.dst,
            protocol: PROTOCOL_TCP,
            src_port: self.header.src_port,
            dst_port: self.header.dst_port,
        }
    }
}

/// Flow classification key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FiveTuple {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
}

impl fmt::Display for FiveTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src, self.src_port, self.dst, self.dst_port
        )
    }
}
