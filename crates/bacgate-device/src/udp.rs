//! BACnet/IP transport over UDP.
//!
//! Frames are BVLC-wrapped NPDU+APDU payloads. Socket reads are
//! serialised through the state lock so a confirmed-notification ack
//! wait and the 10 ms poll loop never compete for the same datagram;
//! requests received while waiting for an ack are queued and handed to
//! the next poll.

use crate::transport::{
    service, BacnetTransport, CovNotification, CovNotifier, PeerAddress, ServiceReply,
    ServiceRequest, TransportError,
};
use crate::wire::{self, services, Incoming};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

const MAX_FRAME: usize = 1500;
const ACK_TIMEOUT: Duration = Duration::from_millis(500);
const MIN_RECV_WAIT: Duration = Duration::from_millis(1);

/// The standard BACnet/IP UDP port.
pub const DEFAULT_PORT: u16 = 47_808;

struct State {
    pending: VecDeque<(SocketAddr, Vec<u8>)>,
    next_invoke_id: u8,
}

pub struct UdpTransport {
    socket: UdpSocket,
    state: Mutex<State>,
}

impl UdpTransport {
    /// Binds the BACnet/IP socket on the given interface address and port.
    pub fn bind(interface: Option<IpAddr>, port: u16) -> std::io::Result<Self> {
        let ip = interface.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let socket = UdpSocket::bind(SocketAddr::new(ip, port))?;
        socket.set_broadcast(true)?;
        Ok(Self {
            socket,
            state: Mutex::new(State {
                pending: VecDeque::new(),
                next_invoke_id: 0,
            }),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn send_body(&self, addr: SocketAddr, body: &[u8]) -> Result<(), TransportError> {
        let frame = wire::bvlc_frame(wire::BVLC_ORIGINAL_UNICAST, body);
        self.socket.send_to(&frame, addr)?;
        Ok(())
    }

    /// Receives one BVLC frame, returning the originating address and the
    /// NPDU+APDU body. `Ok(None)` covers timeouts and frames that are not
    /// BACnet/IP application traffic.
    fn recv_frame(&self, timeout: Duration) -> Result<Option<(SocketAddr, Vec<u8>)>, TransportError> {
        self.socket
            .set_read_timeout(Some(timeout.max(MIN_RECV_WAIT)))?;
        let mut buf = [0u8; MAX_FRAME];
        let (len, from) = match self.socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let (function, payload) = match wire::bvlc_unframe(&buf[..len]) {
            Ok(unframed) => unframed,
            Err(err) => {
                log::debug!("discarding non-BVLC datagram from {from}: {err}");
                return Ok(None);
            }
        };

        let (origin, body) = match function {
            wire::BVLC_ORIGINAL_UNICAST | wire::BVLC_ORIGINAL_BROADCAST => (from, payload),
            wire::BVLC_FORWARDED_NPDU if payload.len() >= 6 => {
                (bip_address(&payload[..6]), &payload[6..])
            }
            _ => return Ok(None),
        };
        Ok(Some((origin, body.to_vec())))
    }
}

impl BacnetTransport for UdpTransport {
    fn poll(
        &self,
        timeout: Duration,
    ) -> Result<Option<(PeerAddress, ServiceRequest)>, TransportError> {
        let mut state = self.state.lock();

        while let Some((from, body)) = state.pending.pop_front() {
            match services::decode_frame(&body) {
                Ok(Incoming::Request(request)) => {
                    return Ok(Some((addr_to_peer(from), request)));
                }
                Ok(_) => {}
                Err(err) => log::debug!("discarding queued frame from {from}: {err}"),
            }
        }

        match self.recv_frame(timeout)? {
            None => Ok(None),
            Some((from, body)) => match services::decode_frame(&body) {
                Ok(Incoming::Request(request)) => Ok(Some((addr_to_peer(from), request))),
                Ok(_) => Ok(None),
                Err(err) => {
                    log::debug!("discarding frame from {from}: {err}");
                    Ok(None)
                }
            },
        }
    }

    fn reply(&self, peer: &PeerAddress, reply: ServiceReply) -> Result<(), TransportError> {
        let addr = peer_to_addr(peer).ok_or(TransportError::UnroutableAddress)?;
        let body = services::encode_reply(&reply)?;
        self.send_body(addr, &body)
    }
}

impl CovNotifier for UdpTransport {
    fn notify(
        &self,
        address: &PeerAddress,
        confirmed: bool,
        notification: &CovNotification,
    ) -> Result<(), TransportError> {
        let addr = peer_to_addr(address).ok_or(TransportError::UnroutableAddress)?;

        if !confirmed {
            let body = services::encode_cov_notification(false, 0, notification)?;
            return self.send_body(addr, &body);
        }

        let mut state = self.state.lock();
        let invoke_id = state.next_invoke_id;
        state.next_invoke_id = state.next_invoke_id.wrapping_add(1);

        let body = services::encode_cov_notification(true, invoke_id, notification)?;
        self.send_body(addr, &body)?;

        let deadline = Instant::now() + ACK_TIMEOUT;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(TransportError::NotificationTimeout);
            }
            let Some((from, frame)) = self.recv_frame(deadline - now)? else {
                continue;
            };
            match services::decode_frame(&frame) {
                Ok(Incoming::SimpleAck {
                    invoke_id: acked,
                    service: choice,
                }) if acked == invoke_id
                    && choice == service::CONFIRMED_COV_NOTIFICATION
                    && from == addr =>
                {
                    return Ok(());
                }
                Ok(Incoming::Request(_)) => state.pending.push_back((from, frame)),
                _ => {}
            }
        }
    }
}

/// Packs a socket address into the BACnet/IP byte form (IP then port,
/// big-endian).
fn addr_to_peer(addr: SocketAddr) -> PeerAddress {
    let mut bytes = match addr.ip() {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    };
    bytes.extend_from_slice(&addr.port().to_be_bytes());
    PeerAddress::from_raw(bytes)
}

fn peer_to_addr(peer: &PeerAddress) -> Option<SocketAddr> {
    let bytes = peer.as_bytes();
    match bytes.len() {
        6 => {
            let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
            let port = u16::from_be_bytes([bytes[4], bytes[5]]);
            Some(SocketAddr::new(IpAddr::V4(ip), port))
        }
        18 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[..16]);
            let port = u16::from_be_bytes([bytes[16], bytes[17]]);
            Some(SocketAddr::new(IpAddr::from(octets), port))
        }
        _ => None,
    }
}

/// Decodes the 6-byte origin address of a forwarded NPDU.
fn bip_address(bytes: &[u8]) -> SocketAddr {
    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);
    SocketAddr::new(IpAddr::V4(ip), port)
}
