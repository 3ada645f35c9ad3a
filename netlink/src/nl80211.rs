// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Raw nl80211 driver: set the radio frequency via generic netlink.

use crate::ifindex::IfindexCache;
use byteorder::{ByteOrder, NativeEndian};
use netlink_packet_core::{
    NLM_F_ACK, NLM_F_REQUEST, NetlinkHeader, NetlinkMessage, NetlinkPayload,
};
use netlink_packet_generic::ctrl::nlas::GenlCtrlAttrs;
use netlink_packet_generic::ctrl::{GenlCtrl, GenlCtrlCmd};
use netlink_packet_generic::{GenlFamily, GenlHeader, GenlMessage};
use netlink_packet_utils::nla::Nla;
use netlink_packet_utils::{DecodeError, Emitable, ParseableParametrized};
use netlink_sys::protocols::NETLINK_GENERIC;
use netlink_sys::Socket;
use std::os::fd::AsRawFd;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

// Constants from linux/nl80211.h.
//
// NL80211_CMD_SET_WIPHY (2) succeeds while another process holds the monitor
// VIF open for capture; NL80211_CMD_SET_CHANNEL (65) fails with -EOPNOTSUPP
// in that situation, which is exactly the situation this sensor is in.
const NL80211_CMD_SET_WIPHY: u8 = 2;
const NL80211_ATTR_IFINDEX: u16 = 3;
const NL80211_ATTR_WIPHY_FREQ: u16 = 38;
const NL80211_ATTR_CHANNEL_WIDTH: u16 = 159;
const NL80211_ATTR_CENTER_FREQ1: u16 = 160;
const NL80211_CHAN_WIDTH_20_NOHT: u32 = 0;

const FAMILY_NAME: &str = "nl80211";
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// An error which may occur while driving nl80211.
#[derive(Debug, thiserror::Error)]
pub enum NetlinkError {
    /// Socket-level failure.
    #[error("netlink socket error: {0}")]
    Io(#[from] std::io::Error),
    /// The kernel does not know the requested generic netlink family.
    #[error("could not resolve generic netlink family {0:?}")]
    FamilyNotFound(&'static str),
    /// No ack arrived within the read timeout.
    #[error("netlink request timed out")]
    Timeout,
    /// The kernel nacked the request.
    #[error("kernel rejected request (errno {0})")]
    Kernel(i32),
    /// The response could not be decoded.
    #[error("failed to decode netlink response: {0}")]
    Decode(String),
    /// The interface name has no index in sysfs.
    #[error("unknown interface {0:?}")]
    UnknownInterface(String),
}

/// The attributes of a SET_WIPHY frequency change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nl80211Attr {
    IfIndex(u32),
    WiphyFreq(u32),
    ChannelWidth(u32),
    CenterFreq1(u32),
}

impl Nla for Nl80211Attr {
    fn value_len(&self) -> usize {
        4
    }

    fn kind(&self) -> u16 {
        match self {
            Nl80211Attr::IfIndex(_) => NL80211_ATTR_IFINDEX,
            Nl80211Attr::WiphyFreq(_) => NL80211_ATTR_WIPHY_FREQ,
            Nl80211Attr::ChannelWidth(_) => NL80211_ATTR_CHANNEL_WIDTH,
            Nl80211Attr::CenterFreq1(_) => NL80211_ATTR_CENTER_FREQ1,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        let value = match self {
            Nl80211Attr::IfIndex(v)
            | Nl80211Attr::WiphyFreq(v)
            | Nl80211Attr::ChannelWidth(v)
            | Nl80211Attr::CenterFreq1(v) => *v,
        };
        NativeEndian::write_u32(buffer, value);
    }
}

/// Payload of a SET_WIPHY request.
///
/// The kernel only ever answers with an ack or an error, so parsing an
/// incoming message of this type yields an empty attribute list.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SetWiphyRequest {
    nlas: Vec<Nl80211Attr>,
}

impl SetWiphyRequest {
    fn new(ifindex: u32, freq_mhz: u32) -> SetWiphyRequest {
        SetWiphyRequest {
            nlas: vec![
                Nl80211Attr::IfIndex(ifindex),
                Nl80211Attr::WiphyFreq(freq_mhz),
                Nl80211Attr::ChannelWidth(NL80211_CHAN_WIDTH_20_NOHT),
                Nl80211Attr::CenterFreq1(freq_mhz),
            ],
        }
    }
}

impl GenlFamily for SetWiphyRequest {
    fn family_name() -> &'static str {
        FAMILY_NAME
    }

    fn command(&self) -> u8 {
        NL80211_CMD_SET_WIPHY
    }

    fn version(&self) -> u8 {
        0
    }
}

impl Emitable for SetWiphyRequest {
    fn buffer_len(&self) -> usize {
        self.nlas.as_slice().buffer_len()
    }

    fn emit(&self, buffer: &mut [u8]) {
        self.nlas.as_slice().emit(buffer);
    }
}

impl ParseableParametrized<[u8], GenlHeader> for SetWiphyRequest {
    fn parse_with_param(_buf: &[u8], _header: GenlHeader) -> Result<Self, DecodeError> {
        Ok(SetWiphyRequest { nlas: Vec::new() })
    }
}

struct DriverInner {
    socket: Socket,
    family_id: u16,
    seq: u32,
    ifindex: IfindexCache,
}

/// Direct nl80211 channel control over a raw `NETLINK_GENERIC` socket.
///
/// One mutex serializes the full request-ack cycle; sequence numbers are
/// assigned under it.  Construction resolves the numeric nl80211 family id
/// via the generic netlink controller and fails when the kernel has no
/// wireless stack, in which case callers fall back to the `iw` tool.
pub struct Nl80211Channel {
    inner: Mutex<DriverInner>,
}

impl Nl80211Channel {
    /// Open the control socket and resolve the nl80211 family id.
    ///
    /// # Errors
    ///
    /// Returns [`NetlinkError`] when the socket cannot be opened or the
    /// family does not exist.
    pub fn new() -> Result<Nl80211Channel, NetlinkError> {
        let mut socket = Socket::new(NETLINK_GENERIC)?;
        socket.bind_auto()?;
        set_recv_timeout(&socket, RECV_TIMEOUT)?;

        let mut seq = 0;
        let family_id = resolve_family(&socket, &mut seq)?;
        info!("nl80211 netlink initialized (family_id={family_id})");
        Ok(Nl80211Channel {
            inner: Mutex::new(DriverInner {
                socket,
                family_id,
                seq,
                ifindex: IfindexCache::new(),
            }),
        })
    }

    /// Retune `interface` to `freq_mhz` (20 MHz, no HT).
    ///
    /// # Errors
    ///
    /// Returns [`NetlinkError`] when the interface is unknown, the request
    /// times out, or the kernel nacks it.
    pub fn set_channel(&self, interface: &str, freq_mhz: u32) -> Result<(), NetlinkError> {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let ifindex = inner
            .ifindex
            .lookup(interface)
            .ok_or_else(|| NetlinkError::UnknownInterface(interface.to_string()))?;

        inner.seq = inner.seq.wrapping_add(1);
        let seq = inner.seq;

        let mut genl = GenlMessage::from_payload(SetWiphyRequest::new(ifindex, freq_mhz));
        genl.set_resolved_family_id(inner.family_id);
        let mut header = NetlinkHeader::default();
        header.flags = NLM_F_REQUEST | NLM_F_ACK;
        header.sequence_number = seq;
        let mut msg = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(genl));
        msg.finalize();
        let mut buf = vec![0u8; msg.buffer_len()];
        msg.serialize(&mut buf);

        inner.socket.send(&buf, 0)?;

        let data = recv_datagram(&inner.socket)?;
        let rx = NetlinkMessage::<GenlMessage<SetWiphyRequest>>::deserialize(&data)
            .map_err(|err| NetlinkError::Decode(err.to_string()))?;
        match rx.payload {
            NetlinkPayload::Error(err) => match err.code {
                None => Ok(()),
                Some(code) => {
                    debug!(
                        "nl80211 set_channel failed: ifindex={ifindex} freq={freq_mhz} errno={code}"
                    );
                    Err(NetlinkError::Kernel(code.get()))
                }
            },
            _ => Ok(()),
        }
    }
}

/// Receive one datagram, mapping the SO_RCVTIMEO expiry to a typed error.
fn recv_datagram(socket: &Socket) -> Result<Vec<u8>, NetlinkError> {
    match socket.recv_from_full() {
        Ok((data, _addr)) => Ok(data),
        Err(err)
            if err.kind() == std::io::ErrorKind::WouldBlock
                || err.kind() == std::io::ErrorKind::TimedOut =>
        {
            Err(NetlinkError::Timeout)
        }
        Err(err) => Err(NetlinkError::Io(err)),
    }
}

/// Resolve a generic netlink family name to its numeric id.
fn resolve_family(socket: &Socket, seq: &mut u32) -> Result<u16, NetlinkError> {
    *seq = seq.wrapping_add(1);
    let genl = GenlMessage::from_payload(GenlCtrl {
        cmd: GenlCtrlCmd::GetFamily,
        nlas: vec![GenlCtrlAttrs::FamilyName(FAMILY_NAME.to_string())],
    });
    let mut header = NetlinkHeader::default();
    header.flags = NLM_F_REQUEST | NLM_F_ACK;
    header.sequence_number = *seq;
    let mut msg = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(genl));
    msg.finalize();
    let mut buf = vec![0u8; msg.buffer_len()];
    msg.serialize(&mut buf);
    socket.send(&buf, 0)?;

    // The reply may span several messages (the family dump, then the ack),
    // possibly split across datagrams.
    for _ in 0..8 {
        let data = recv_datagram(socket)?;
        let mut offset = 0;
        while offset < data.len() {
            let rx = NetlinkMessage::<GenlMessage<GenlCtrl>>::deserialize(&data[offset..])
                .map_err(|err| NetlinkError::Decode(err.to_string()))?;
            let length = rx.header.length as usize;
            match rx.payload {
                NetlinkPayload::InnerMessage(genl) => {
                    for nla in genl.payload.nlas {
                        if let GenlCtrlAttrs::FamilyId(id) = nla {
                            return Ok(id);
                        }
                    }
                }
                NetlinkPayload::Error(err) if err.code.is_some() => {
                    return Err(NetlinkError::FamilyNotFound(FAMILY_NAME));
                }
                _ => {}
            }
            if length == 0 {
                break;
            }
            offset += length;
        }
    }
    Err(NetlinkError::FamilyNotFound(FAMILY_NAME))
}

/// Bound blocking reads on the control socket.
fn set_recv_timeout(socket: &Socket, timeout: Duration) -> std::io::Result<()> {
    #[allow(clippy::cast_possible_wrap)]
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: libc::suseconds_t::from(timeout.subsec_micros()),
    };
    // SAFETY: the fd is owned by `socket` and outlives the call; timeval is
    // plain data read by the kernel.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            std::ptr::from_ref(&tv).cast(),
            libc::socklen_t::try_from(std::mem::size_of::<libc::timeval>()).unwrap_or(0),
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use netlink_packet_utils::nla::NlasIterator;

    #[test]
    fn set_wiphy_request_emits_four_u32_attributes() {
        let request = SetWiphyRequest::new(7, 2437);
        // Each attribute: 4 bytes header + 4 bytes value.
        assert_eq!(request.buffer_len(), 4 * 8);
        let mut buf = vec![0u8; request.buffer_len()];
        request.emit(&mut buf);

        let kinds_and_values: Vec<(u16, u32)> = NlasIterator::new(&buf[..])
            .map(|nla| {
                let nla = nla.unwrap();
                (nla.kind(), NativeEndian::read_u32(nla.value()))
            })
            .collect();
        assert_eq!(
            kinds_and_values,
            vec![
                (NL80211_ATTR_IFINDEX, 7),
                (NL80211_ATTR_WIPHY_FREQ, 2437),
                (NL80211_ATTR_CHANNEL_WIDTH, NL80211_CHAN_WIDTH_20_NOHT),
                (NL80211_ATTR_CENTER_FREQ1, 2437),
            ]
        );
    }

    #[test]
    fn request_serializes_with_ack_flag_and_resolved_family() {
        let mut genl = GenlMessage::from_payload(SetWiphyRequest::new(3, 5745));
        genl.set_resolved_family_id(0x1c);
        let mut header = NetlinkHeader::default();
        header.flags = NLM_F_REQUEST | NLM_F_ACK;
        header.sequence_number = 42;
        let mut msg = NetlinkMessage::new(header, NetlinkPayload::InnerMessage(genl));
        msg.finalize();
        let mut buf = vec![0u8; msg.buffer_len()];
        msg.serialize(&mut buf);

        // nlmsghdr: len(4) type(2) flags(2) seq(4) pid(4).
        let msg_len = NativeEndian::read_u32(&buf[0..4]);
        assert_eq!(msg_len as usize, buf.len());
        let msg_type = NativeEndian::read_u16(&buf[4..6]);
        assert_eq!(msg_type, 0x1c);
        let flags = NativeEndian::read_u16(&buf[6..8]);
        assert_eq!(flags, NLM_F_REQUEST | NLM_F_ACK);
        let seq = NativeEndian::read_u32(&buf[8..12]);
        assert_eq!(seq, 42);
        // genlmsghdr: cmd(1) version(1) reserved(2).
        assert_eq!(buf[16], NL80211_CMD_SET_WIPHY);
        assert_eq!(buf[17], 0);
    }

    #[test]
    fn parse_side_of_the_request_is_tolerant() {
        let header = GenlHeader {
            cmd: NL80211_CMD_SET_WIPHY,
            version: 0,
        };
        let parsed = SetWiphyRequest::parse_with_param(&[0u8; 16][..], header).unwrap();
        assert!(parsed.nlas.is_empty());
    }
}
