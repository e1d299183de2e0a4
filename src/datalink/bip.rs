//! BACnet/IP Transport
//!
//! BACnet/IP per ASHRAE 135 Annex J: UDP on port 47808 (0xBAC0) with the
//! BVLC framing for original unicast and broadcast NPDUs, plus
//! foreign-device registration with a BBMD. Lease renewal is driven from
//! [`Transport::maintenance_timer`], re-registering shortly before the
//! granted time-to-live expires.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::datalink::{DataLinkError, Result, Transport, TransportAddress};
use crate::BACNET_MAX_MPDU;

/// BACnet/IP well-known port number (0xBAC0)
pub const BACNET_IP_PORT: u16 = 47808;

/// Renew the foreign-device lease this many seconds before it expires.
const LEASE_RENEW_MARGIN: u64 = 30;

/// BVLC (BACnet Virtual Link Control) message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BvlcFunction {
    /// Original-Unicast-NPDU
    OriginalUnicastNpdu = 0x0A,
    /// Original-Broadcast-NPDU
    OriginalBroadcastNpdu = 0x0B,
    /// Forwarded-NPDU
    ForwardedNpdu = 0x04,
    /// Register-Foreign-Device
    RegisterForeignDevice = 0x05,
    /// BVLC-Result
    BvlcResult = 0x00,
}

impl TryFrom<u8> for BvlcFunction {
    type Error = DataLinkError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x0A => Ok(BvlcFunction::OriginalUnicastNpdu),
            0x0B => Ok(BvlcFunction::OriginalBroadcastNpdu),
            0x04 => Ok(BvlcFunction::ForwardedNpdu),
            0x05 => Ok(BvlcFunction::RegisterForeignDevice),
            0x00 => Ok(BvlcFunction::BvlcResult),
            _ => Err(DataLinkError::InvalidFrame),
        }
    }
}

/// BVLC header (type 0x81, function, total length)
#[derive(Debug, Clone)]
pub struct BvlcHeader {
    pub function: BvlcFunction,
    pub length: u16,
}

impl BvlcHeader {
    pub fn new(function: BvlcFunction, length: u16) -> Self {
        Self { function, length }
    }

    pub fn encode(&self) -> Vec<u8> {
        vec![
            0x81,
            self.function as u8,
            (self.length >> 8) as u8,
            (self.length & 0xFF) as u8,
        ]
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 || data[0] != 0x81 {
            return Err(DataLinkError::InvalidFrame);
        }
        let function = BvlcFunction::try_from(data[1])?;
        let length = u16::from_be_bytes([data[2], data[3]]);
        Ok(Self { function, length })
    }
}

/// Foreign-device registration state
#[derive(Debug, Clone, Copy)]
struct ForeignRegistration {
    bbmd: SocketAddr,
    ttl_seconds: u16,
    /// Seconds since the registration was last sent
    age: u64,
}

/// BACnet/IP transport over a standard UDP socket.
pub struct BipTransport {
    socket: Option<UdpSocket>,
    local_addr: Option<SocketAddr>,
    broadcast_addr: Option<SocketAddr>,
    foreign: Option<ForeignRegistration>,
}

impl BipTransport {
    pub fn new() -> Self {
        Self {
            socket: None,
            local_addr: None,
            broadcast_addr: None,
            foreign: None,
        }
    }

    /// Broadcast address of the interface carrying `local`, from the OS
    /// interface table; falls back to the limited broadcast.
    fn discover_broadcast(local: SocketAddr) -> SocketAddr {
        let fallback = SocketAddr::new(Ipv4Addr::BROADCAST.into(), BACNET_IP_PORT);
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(_) => return fallback,
        };
        for interface in interfaces {
            if let if_addrs::IfAddr::V4(v4) = interface.addr {
                if std::net::IpAddr::V4(v4.ip) == local.ip() {
                    if let Some(broadcast) = v4.broadcast {
                        return SocketAddr::new(broadcast.into(), BACNET_IP_PORT);
                    }
                }
            }
        }
        fallback
    }

    /// Register (or re-register) with a BBMD as a foreign device.
    pub fn register_foreign_device(&mut self, bbmd: SocketAddr, ttl_seconds: u16) -> Result<()> {
        let socket = self.socket.as_ref().ok_or(DataLinkError::Address(
            "transport not initialized".to_string(),
        ))?;
        let header = BvlcHeader::new(BvlcFunction::RegisterForeignDevice, 6);
        let mut frame = header.encode();
        frame.extend_from_slice(&ttl_seconds.to_be_bytes());
        socket.send_to(&frame, bbmd)?;
        self.foreign = Some(ForeignRegistration {
            bbmd,
            ttl_seconds,
            age: 0,
        });
        debug!("bip: registered as foreign device with {} ttl {}s", bbmd, ttl_seconds);
        Ok(())
    }

    fn frame(function: BvlcFunction, npdu: &[u8]) -> Vec<u8> {
        let mut frame = BvlcHeader::new(function, 4 + npdu.len() as u16).encode();
        frame.extend_from_slice(npdu);
        frame
    }

    /// Extract the NPDU from a received BVLC message, if it carries one.
    fn unwrap_npdu(data: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
        let header = BvlcHeader::decode(data)?;
        if data.len() != header.length as usize {
            return Err(DataLinkError::InvalidFrame);
        }
        match header.function {
            BvlcFunction::OriginalUnicastNpdu | BvlcFunction::OriginalBroadcastNpdu => {
                Ok(Some((data[4..].to_vec(), 4)))
            }
            // Forwarded-NPDU carries the original source before the NPDU
            BvlcFunction::ForwardedNpdu => {
                if data.len() < 10 {
                    return Err(DataLinkError::InvalidFrame);
                }
                Ok(Some((data[10..].to_vec(), 10)))
            }
            _ => Ok(None),
        }
    }
}

impl Default for BipTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for BipTransport {
    fn init(&mut self, interface: &str) -> Result<()> {
        let bind_addr: SocketAddr = if interface.is_empty() {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), BACNET_IP_PORT)
        } else {
            interface
                .parse()
                .map_err(|_| DataLinkError::Address(format!("bad bind address {:?}", interface)))?
        };

        // SO_REUSEADDR so several stacks can share the well-known port
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        raw.set_broadcast(true)?;
        raw.bind(&bind_addr.into())?;
        let socket: UdpSocket = raw.into();

        let local_addr = socket.local_addr()?;
        self.broadcast_addr = Some(Self::discover_broadcast(local_addr));
        self.local_addr = Some(local_addr);
        self.socket = Some(socket);
        Ok(())
    }

    fn send_pdu(&mut self, dest: &TransportAddress, npdu: &[u8]) -> Result<usize> {
        if 4 + npdu.len() > BACNET_MAX_MPDU {
            return Err(DataLinkError::InvalidFrame);
        }
        let socket = self.socket.as_ref().ok_or(DataLinkError::Address(
            "transport not initialized".to_string(),
        ))?;
        match dest {
            TransportAddress::Ip(addr) => {
                let frame = Self::frame(BvlcFunction::OriginalUnicastNpdu, npdu);
                socket.send_to(&frame, addr)?;
                Ok(npdu.len())
            }
            TransportAddress::Broadcast => {
                let broadcast = self.broadcast_addr.ok_or(DataLinkError::Address(
                    "no broadcast address".to_string(),
                ))?;
                let frame = Self::frame(BvlcFunction::OriginalBroadcastNpdu, npdu);
                socket.send_to(&frame, broadcast)?;
                Ok(npdu.len())
            }
            _ => Err(DataLinkError::UnsupportedAddress),
        }
    }

    fn receive(&mut self, timeout: Duration) -> Result<(Vec<u8>, TransportAddress)> {
        let socket = self.socket.as_ref().ok_or(DataLinkError::Timeout)?;
        let deadline = Instant::now() + timeout;

        let mut buffer = [0u8; BACNET_MAX_MPDU];
        loop {
            // shrink the read timeout as housekeeping frames are skipped so
            // the caller's deadline holds under sustained BVLC traffic
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(DataLinkError::Timeout);
            }
            socket.set_read_timeout(Some(remaining))?;
            match socket.recv_from(&mut buffer) {
                Ok((len, source)) => {
                    match Self::unwrap_npdu(&buffer[..len]) {
                        Ok(Some((npdu, _))) => {
                            return Ok((npdu, TransportAddress::Ip(source)));
                        }
                        // housekeeping BVLC traffic, keep listening
                        Ok(None) => continue,
                        Err(e) => {
                            warn!("bip: dropping malformed frame from {}: {}", source, e);
                            continue;
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return Err(DataLinkError::Timeout);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn broadcast_address(&self) -> TransportAddress {
        match self.broadcast_addr {
            Some(addr) => TransportAddress::Ip(addr),
            None => TransportAddress::Unspecified,
        }
    }

    fn local_address(&self) -> TransportAddress {
        match self.local_addr {
            Some(addr) => TransportAddress::Ip(addr),
            None => TransportAddress::Unspecified,
        }
    }

    fn maintenance_timer(&mut self, elapsed: Duration) {
        let Some(mut registration) = self.foreign else {
            return;
        };
        registration.age += elapsed.as_secs();
        let renew_after = u64::from(registration.ttl_seconds).saturating_sub(LEASE_RENEW_MARGIN);
        if registration.age >= renew_after {
            if let Err(e) =
                self.register_foreign_device(registration.bbmd, registration.ttl_seconds)
            {
                warn!("bip: foreign device re-registration failed: {}", e);
                self.foreign = Some(registration);
            }
        } else {
            self.foreign = Some(registration);
        }
    }

    fn cleanup(&mut self) {
        self.socket = None;
        self.local_addr = None;
        self.broadcast_addr = None;
        self.foreign = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bvlc_header_encode_decode() {
        let header = BvlcHeader::new(BvlcFunction::OriginalUnicastNpdu, 1024);
        let encoded = header.encode();
        assert_eq!(encoded, vec![0x81, 0x0A, 0x04, 0x00]);

        let decoded = BvlcHeader::decode(&encoded).unwrap();
        assert_eq!(decoded.function, BvlcFunction::OriginalUnicastNpdu);
        assert_eq!(decoded.length, 1024);

        assert!(BvlcHeader::decode(&[0x82, 0x0A, 0x00, 0x04]).is_err());
    }

    #[test]
    fn test_unwrap_npdu_variants() {
        let frame = BipTransport::frame(BvlcFunction::OriginalBroadcastNpdu, &[0xAA, 0xBB]);
        let (npdu, offset) = BipTransport::unwrap_npdu(&frame).unwrap().unwrap();
        assert_eq!(npdu, vec![0xAA, 0xBB]);
        assert_eq!(offset, 4);

        // length mismatch rejected
        let mut bad = frame.clone();
        bad.push(0x00);
        assert!(BipTransport::unwrap_npdu(&bad).is_err());

        // BVLC-Result carries no NPDU
        let result = vec![0x81, 0x00, 0x00, 0x06, 0x00, 0x00];
        assert_eq!(BipTransport::unwrap_npdu(&result).unwrap(), None);
    }

    #[test]
    fn test_loopback_send_receive() {
        let mut a = BipTransport::new();
        let mut b = BipTransport::new();
        a.init("127.0.0.1:0").unwrap();
        b.init("127.0.0.1:0").unwrap();

        let TransportAddress::Ip(dest) = b.local_address() else {
            panic!("no local address");
        };
        let sent = a.send_pdu(&TransportAddress::Ip(dest), &[1, 2, 3, 4]).unwrap();
        assert_eq!(sent, 4);

        let (npdu, source) = b.receive(Duration::from_millis(500)).unwrap();
        assert_eq!(npdu, vec![1, 2, 3, 4]);
        assert!(matches!(source, TransportAddress::Ip(_)));
    }

    #[test]
    fn test_receive_timeout() {
        let mut transport = BipTransport::new();
        transport.init("127.0.0.1:0").unwrap();
        let err = transport.receive(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, DataLinkError::Timeout));
    }

    #[test]
    fn test_foreign_device_lease_renewal() {
        let bbmd = UdpSocket::bind("127.0.0.1:0").unwrap();
        bbmd.set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();

        let mut transport = BipTransport::new();
        transport.init("127.0.0.1:0").unwrap();
        transport
            .register_foreign_device(bbmd.local_addr().unwrap(), 60)
            .unwrap();

        let mut buffer = [0u8; 16];
        let (len, _) = bbmd.recv_from(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], &[0x81, 0x05, 0x00, 0x06, 0x00, 60]);

        // 20s into a 60s lease is outside the renewal margin
        transport.maintenance_timer(Duration::from_secs(20));
        assert!(bbmd.recv_from(&mut buffer).is_err());

        // 35s crosses ttl minus margin, exactly one re-registration goes out
        transport.maintenance_timer(Duration::from_secs(15));
        let (len, _) = bbmd.recv_from(&mut buffer).unwrap();
        assert_eq!(&buffer[..len], &[0x81, 0x05, 0x00, 0x06, 0x00, 60]);
        assert!(bbmd.recv_from(&mut buffer).is_err());

        // the renewal restarted the lease age
        transport.maintenance_timer(Duration::from_secs(20));
        assert!(bbmd.recv_from(&mut buffer).is_err());
    }

    #[test]
    fn test_receive_deadline_holds_under_housekeeping_traffic() {
        let mut transport = BipTransport::new();
        transport.init("127.0.0.1:0").unwrap();
        let TransportAddress::Ip(dest) = transport.local_address() else {
            panic!("no local address");
        };

        // a peer that keeps the socket busy with BVLC-Result frames
        let sender = std::thread::spawn(move || {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            let result = [0x81, 0x00, 0x00, 0x06, 0x00, 0x00];
            for _ in 0..12 {
                let _ = socket.send_to(&result, dest);
                std::thread::sleep(Duration::from_millis(50));
            }
        });

        let start = Instant::now();
        let err = transport.receive(Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, DataLinkError::Timeout));
        assert!(start.elapsed() < Duration::from_millis(500));
        sender.join().unwrap();
    }

    #[test]
    fn test_send_before_init_fails() {
        let mut transport = BipTransport::new();
        assert!(transport
            .send_pdu(&TransportAddress::Broadcast, &[0x01])
            .is_err());
    }
}
