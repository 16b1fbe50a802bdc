//! Control-frame protocol
//!
//! Small tagged frames written on a dedicated stream to convey out-of-band
//! intent rather than user payload. Two variants exist on the client side: a
//! fingerprint announcement telling the peer which disguise profiles to
//! apply toward us, and a UDP-session-open binding a stream to a resolved
//! target address.
//!
//! Frame format:
//! ```text
//! +--------+-----------------------------------+
//! |  Tag   |        Variant payload            |
//! +--------+-----------------------------------+
//! ```
//!
//! The fingerprint payload is a count byte followed by 7-byte profiles
//! (ttl, window, mss, window scale, flag bits). The UDP-open payload is a
//! SOCKS-style address: type byte (0x01 IPv4 / 0x04 IPv6), raw octets, and
//! a big-endian port.

use crate::pconn::TcpFingerprint;
use crate::transport::Strm;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown frame tag: {0}")]
    UnknownTag(u8),

    #[error("unknown address type: {0}")]
    UnknownAddressType(u8),

    #[error("truncated frame")]
    Truncated,

    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

/// Fingerprint announcement tag
pub const TAG_FINGERPRINT: u8 = 0x01;
/// UDP session open tag
pub const TAG_UDP_OPEN: u8 = 0x02;

/// The announcement count field is a single byte.
pub const MAX_PROFILES: usize = u8::MAX as usize;

const ADDR_V4: u8 = 0x01;
const ADDR_V6: u8 = 0x04;
const PROFILE_LEN: usize = 7;

const FLAG_SACK: u8 = 0x01;
const FLAG_TIMESTAMPS: u8 = 0x02;

/// A tagged control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// Announce the TCP fingerprint profiles the peer should apply toward us.
    Fingerprint(Vec<TcpFingerprint>),
    /// Bind this stream to a virtual UDP session toward the given target.
    UdpOpen(SocketAddr),
}

impl ControlFrame {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        match self {
            Self::Fingerprint(profiles) => {
                buf.put_u8(TAG_FINGERPRINT);
                buf.put_u8(profiles.len() as u8);
                for p in profiles {
                    buf.put_u8(p.ttl);
                    buf.put_u16(p.window);
                    buf.put_u16(p.mss);
                    buf.put_u8(p.window_scale);
                    let mut flags = 0u8;
                    if p.sack_permitted {
                        flags |= FLAG_SACK;
                    }
                    if p.timestamps {
                        flags |= FLAG_TIMESTAMPS;
                    }
                    buf.put_u8(flags);
                }
            }
            Self::UdpOpen(addr) => {
                buf.put_u8(TAG_UDP_OPEN);
                match addr.ip() {
                    IpAddr::V4(ip) => {
                        buf.put_u8(ADDR_V4);
                        buf.put_slice(&ip.octets());
                    }
                    IpAddr::V6(ip) => {
                        buf.put_u8(ADDR_V6);
                        buf.put_slice(&ip.octets());
                    }
                }
                buf.put_u16(addr.port());
            }
        }
        buf.freeze()
    }

    /// Decode one frame. The server side of the contract; kept here so the
    /// wire format stays round-trip tested.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < 1 {
            return Err(ProtocolError::Truncated);
        }
        match buf.get_u8() {
            TAG_FINGERPRINT => {
                if buf.remaining() < 1 {
                    return Err(ProtocolError::Truncated);
                }
                let count = buf.get_u8() as usize;
                if buf.remaining() < count * PROFILE_LEN {
                    return Err(ProtocolError::Truncated);
                }
                let mut profiles = Vec::with_capacity(count);
                for _ in 0..count {
                    let ttl = buf.get_u8();
                    let window = buf.get_u16();
                    let mss = buf.get_u16();
                    let window_scale = buf.get_u8();
                    let flags = buf.get_u8();
                    profiles.push(TcpFingerprint {
                        ttl,
                        window,
                        mss,
                        window_scale,
                        sack_permitted: flags & FLAG_SACK != 0,
                        timestamps: flags & FLAG_TIMESTAMPS != 0,
                    });
                }
                Ok(Self::Fingerprint(profiles))
            }
            TAG_UDP_OPEN => {
                if buf.remaining() < 1 {
                    return Err(ProtocolError::Truncated);
                }
                let ip = match buf.get_u8() {
                    ADDR_V4 => {
                        if buf.remaining() < 4 {
                            return Err(ProtocolError::Truncated);
                        }
                        let mut octets = [0u8; 4];
                        buf.copy_to_slice(&mut octets);
                        IpAddr::V4(Ipv4Addr::from(octets))
                    }
                    ADDR_V6 => {
                        if buf.remaining() < 16 {
                            return Err(ProtocolError::Truncated);
                        }
                        let mut octets = [0u8; 16];
                        buf.copy_to_slice(&mut octets);
                        IpAddr::V6(Ipv6Addr::from(octets))
                    }
                    other => return Err(ProtocolError::UnknownAddressType(other)),
                };
                if buf.remaining() < 2 {
                    return Err(ProtocolError::Truncated);
                }
                let port = buf.get_u16();
                Ok(Self::UdpOpen(SocketAddr::new(ip, port)))
            }
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }

    /// Write the encoded frame onto a stream.
    pub async fn write_to(&self, strm: &dyn Strm) -> Result<(), ProtocolError> {
        strm.write_all(&self.encode()).await?;
        Ok(())
    }
}
