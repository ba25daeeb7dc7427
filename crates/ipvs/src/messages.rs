//! IPVS netlink message serialization and deserialization.
//!
//! This module provides types that implement the traits required for
//! netlink communication with the IPVS kernel module, plus the conversion
//! between high-level Service/Destination records and attribute trees.
//!
//! All kernel-compatibility risk lives here: attribute layout, the
//! family-dependent address encoding (4 bytes for AF_INET, 16 for
//! AF_INET6) and the big-endian port encoding.

use crate::commands::{IPVSAttr, IPVSCommand, IPVSDestAttr, IPVSInfoAttr, IPVSServiceAttr};
use crate::types::{
    Destination, ForwardingMethod, IPVSInfo, IPVSVersion, Protocol, Scheduler, Service,
    ServiceFlags,
};
use common::Error;
use netlink_packet_core::{DecodeError, ParseableParametrized};
use netlink_packet_generic::{GenlFamily, GenlHeader};
use netlink_packet_utils::{
    Parseable,
    nla::{Nla, NlaBuffer, NlasIterator},
    parsers::{parse_u16, parse_u32},
};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

// Import Emitable from utils for use in implementations
use netlink_packet_utils::Emitable as UtilsEmitable;

/// IPVS generic netlink message payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IPVSMessage {
    pub cmd: IPVSCommand,
    pub nlas: Vec<IPVSNla>,
}

impl IPVSMessage {
    pub fn new(cmd: IPVSCommand) -> Self {
        Self {
            cmd,
            nlas: Vec::new(),
        }
    }

    pub fn with_nlas(cmd: IPVSCommand, nlas: Vec<IPVSNla>) -> Self {
        Self { cmd, nlas }
    }

    /// The nested service attributes carried by this message, if any.
    pub fn service_nlas(&self) -> Option<&[ServiceNla]> {
        self.nlas.iter().find_map(|nla| match nla {
            IPVSNla::Service(nlas) => Some(nlas.as_slice()),
            _ => None,
        })
    }

    /// The nested destination attributes carried by this message, if any.
    pub fn dest_nlas(&self) -> Option<&[DestNla]> {
        self.nlas.iter().find_map(|nla| match nla {
            IPVSNla::Dest(nlas) => Some(nlas.as_slice()),
            _ => None,
        })
    }

    /// The top-level info attributes carried by this message, if any.
    pub fn info_nlas(&self) -> Option<&[InfoNla]> {
        self.nlas.iter().find_map(|nla| match nla {
            IPVSNla::Info(nlas) => Some(nlas.as_slice()),
            _ => None,
        })
    }
}

/// Top-level IPVS netlink attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IPVSNla {
    /// Service information (nested attributes)
    Service(Vec<ServiceNla>),
    /// Destination information (nested attributes)
    Dest(Vec<DestNla>),
    /// Info attributes (top-level in SET_INFO replies, never emitted)
    Info(Vec<InfoNla>),
    /// Unknown/unsupported attribute
    Other(u16, Vec<u8>),
}

/// Service-specific netlink attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceNla {
    /// Address family (AF_INET = 2, AF_INET6 = 10)
    AddressFamily(u16),
    /// Protocol (TCP = 6, UDP = 17)
    Protocol(u16),
    /// Address payload; 4 bytes for AF_INET, 16 for AF_INET6
    Address(Vec<u8>),
    /// Port number (host order here, big-endian on the wire)
    Port(u16),
    /// Firewall mark
    FirewallMark(u32),
    /// Scheduler name (null-terminated on the wire)
    Scheduler(String),
    /// Flags and mask (packed as two u32 values)
    Flags(u32, u32),
    /// Persistence timeout
    Timeout(u32),
    /// Network mask
    Netmask(u32),
    /// Unknown/unsupported attribute
    Other(u16, Vec<u8>),
}

/// Destination-specific netlink attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestNla {
    /// Address payload; 4 bytes for AF_INET, 16 for AF_INET6
    Address(Vec<u8>),
    /// Port number (host order here, big-endian on the wire)
    Port(u16),
    /// Forwarding method
    ForwardingMethod(u32),
    /// Weight
    Weight(i32),
    /// Upper threshold
    UpperThreshold(u32),
    /// Lower threshold
    LowerThreshold(u32),
    /// Unknown/unsupported attribute
    Other(u16, Vec<u8>),
}

/// Info-specific netlink attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoNla {
    /// IPVS version (encoded as u32)
    Version(u32),
    /// Connection table size
    ConnTableSize(u32),
    /// Unknown/unsupported attribute
    Other(u16, Vec<u8>),
}

// Implement Nla trait for top-level IPVS attributes
impl Nla for IPVSNla {
    fn value_len(&self) -> usize {
        match self {
            Self::Service(nlas) => nlas.iter().map(|nla| nla.buffer_len()).sum(),
            Self::Dest(nlas) => nlas.iter().map(|nla| nla.buffer_len()).sum(),
            Self::Info(nlas) => nlas.iter().map(|nla| nla.buffer_len()).sum(),
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Service(_) => IPVSAttr::Service as u16,
            Self::Dest(_) => IPVSAttr::Dest as u16,
            // Info attributes only appear top-level in kernel replies;
            // they are never emitted by this side.
            Self::Info(_) => IPVSAttr::Unspec as u16,
            Self::Other(kind, _) => *kind,
        }
    }

    fn is_nested(&self) -> bool {
        matches!(self, Self::Service(_) | Self::Dest(_))
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Service(nlas) => emit_nlas(nlas, buffer),
            Self::Dest(nlas) => emit_nlas(nlas, buffer),
            Self::Info(nlas) => emit_nlas(nlas, buffer),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

fn emit_nlas<T: Nla>(nlas: &[T], buffer: &mut [u8]) {
    let mut offset = 0;
    for nla in nlas {
        let len = nla.buffer_len();
        nla.emit(&mut buffer[offset..offset + len]);
        offset += len;
    }
}

// Implement Nla trait for ServiceNla
impl Nla for ServiceNla {
    fn value_len(&self) -> usize {
        match self {
            Self::AddressFamily(_) => 2,
            Self::Protocol(_) => 2,
            Self::Address(bytes) => bytes.len(),
            Self::Port(_) => 2,
            Self::FirewallMark(_) => 4,
            Self::Scheduler(s) => s.len() + 1, // null-terminated
            Self::Flags(_, _) => 8,            // two u32 values
            Self::Timeout(_) => 4,
            Self::Netmask(_) => 4,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::AddressFamily(_) => IPVSServiceAttr::AddressFamily as u16,
            Self::Protocol(_) => IPVSServiceAttr::Protocol as u16,
            Self::Address(_) => IPVSServiceAttr::Address as u16,
            Self::Port(_) => IPVSServiceAttr::Port as u16,
            Self::FirewallMark(_) => IPVSServiceAttr::FirewallMark as u16,
            Self::Scheduler(_) => IPVSServiceAttr::Scheduler as u16,
            Self::Flags(_, _) => IPVSServiceAttr::Flags as u16,
            Self::Timeout(_) => IPVSServiceAttr::Timeout as u16,
            Self::Netmask(_) => IPVSServiceAttr::Netmask as u16,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::AddressFamily(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Protocol(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Address(bytes) => buffer.copy_from_slice(bytes),
            Self::Port(v) => buffer.copy_from_slice(&v.to_be_bytes()),
            Self::FirewallMark(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Scheduler(s) => {
                buffer[..s.len()].copy_from_slice(s.as_bytes());
                buffer[s.len()] = 0; // null terminator
            }
            Self::Flags(flags, mask) => {
                buffer[..4].copy_from_slice(&flags.to_ne_bytes());
                buffer[4..8].copy_from_slice(&mask.to_ne_bytes());
            }
            Self::Timeout(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Netmask(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

// Implement Nla trait for DestNla
impl Nla for DestNla {
    fn value_len(&self) -> usize {
        match self {
            Self::Address(bytes) => bytes.len(),
            Self::Port(_) => 2,
            Self::ForwardingMethod(_) => 4,
            Self::Weight(_) => 4,
            Self::UpperThreshold(_) => 4,
            Self::LowerThreshold(_) => 4,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Address(_) => IPVSDestAttr::Address as u16,
            Self::Port(_) => IPVSDestAttr::Port as u16,
            Self::ForwardingMethod(_) => IPVSDestAttr::ForwardingMethod as u16,
            Self::Weight(_) => IPVSDestAttr::Weight as u16,
            Self::UpperThreshold(_) => IPVSDestAttr::UpperThreshold as u16,
            Self::LowerThreshold(_) => IPVSDestAttr::LowerThreshold as u16,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Address(bytes) => buffer.copy_from_slice(bytes),
            Self::Port(v) => buffer.copy_from_slice(&v.to_be_bytes()),
            Self::ForwardingMethod(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Weight(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::UpperThreshold(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::LowerThreshold(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

// Implement Nla trait for InfoNla
impl Nla for InfoNla {
    fn value_len(&self) -> usize {
        match self {
            Self::Version(_) => 4,
            Self::ConnTableSize(_) => 4,
            Self::Other(_, bytes) => bytes.len(),
        }
    }

    fn kind(&self) -> u16 {
        match self {
            Self::Version(_) => IPVSInfoAttr::Version as u16,
            Self::ConnTableSize(_) => IPVSInfoAttr::ConnTableSize as u16,
            Self::Other(kind, _) => *kind,
        }
    }

    fn emit_value(&self, buffer: &mut [u8]) {
        match self {
            Self::Version(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::ConnTableSize(v) => buffer.copy_from_slice(&v.to_ne_bytes()),
            Self::Other(_, bytes) => buffer.copy_from_slice(bytes),
        }
    }
}

// Parsing implementation for ServiceNla
impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for ServiceNla {
    type Error = DecodeError;

    fn parse(buf: &NlaBuffer<&'a T>) -> Result<Self, Self::Error> {
        let payload = buf.value();
        Ok(match buf.kind() {
            x if x == IPVSServiceAttr::AddressFamily as u16 => Self::AddressFamily(
                parse_u16(payload).map_err(|_| DecodeError::from("Invalid address family"))?,
            ),
            x if x == IPVSServiceAttr::Protocol as u16 => Self::Protocol(
                parse_u16(payload).map_err(|_| DecodeError::from("Invalid protocol"))?,
            ),
            x if x == IPVSServiceAttr::Address as u16 => Self::Address(payload.to_vec()),
            x if x == IPVSServiceAttr::Port as u16 => Self::Port(u16::from_be_bytes(
                payload
                    .try_into()
                    .map_err(|_| DecodeError::from("Invalid port"))?,
            )),
            x if x == IPVSServiceAttr::FirewallMark as u16 => Self::FirewallMark(
                parse_u32(payload).map_err(|_| DecodeError::from("Invalid firewall mark"))?,
            ),
            x if x == IPVSServiceAttr::Scheduler as u16 => {
                let s = std::str::from_utf8(payload)
                    .map_err(|_| DecodeError::from("Invalid scheduler name"))?
                    .trim_end_matches('\0')
                    .to_string();
                Self::Scheduler(s)
            }
            x if x == IPVSServiceAttr::Flags as u16 => {
                if payload.len() < 8 {
                    return Err(DecodeError::from("Invalid flags payload"));
                }
                let flags = u32::from_ne_bytes(payload[0..4].try_into().unwrap());
                let mask = u32::from_ne_bytes(payload[4..8].try_into().unwrap());
                Self::Flags(flags, mask)
            }
            x if x == IPVSServiceAttr::Timeout as u16 => Self::Timeout(
                parse_u32(payload).map_err(|_| DecodeError::from("Invalid timeout"))?,
            ),
            x if x == IPVSServiceAttr::Netmask as u16 => Self::Netmask(
                parse_u32(payload).map_err(|_| DecodeError::from("Invalid netmask"))?,
            ),
            kind => Self::Other(kind, payload.to_vec()),
        })
    }
}

// Parsing implementation for DestNla
impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for DestNla {
    type Error = DecodeError;

    fn parse(buf: &NlaBuffer<&'a T>) -> Result<Self, Self::Error> {
        let payload = buf.value();
        Ok(match buf.kind() {
            x if x == IPVSDestAttr::Address as u16 => Self::Address(payload.to_vec()),
            x if x == IPVSDestAttr::Port as u16 => Self::Port(u16::from_be_bytes(
                payload
                    .try_into()
                    .map_err(|_| DecodeError::from("Invalid port"))?,
            )),
            x if x == IPVSDestAttr::ForwardingMethod as u16 => Self::ForwardingMethod(
                parse_u32(payload).map_err(|_| DecodeError::from("Invalid forwarding method"))?,
            ),
            x if x == IPVSDestAttr::Weight as u16 => Self::Weight(
                parse_u32(payload).map_err(|_| DecodeError::from("Invalid weight"))? as i32,
            ),
            x if x == IPVSDestAttr::UpperThreshold as u16 => Self::UpperThreshold(
                parse_u32(payload).map_err(|_| DecodeError::from("Invalid upper threshold"))?,
            ),
            x if x == IPVSDestAttr::LowerThreshold as u16 => Self::LowerThreshold(
                parse_u32(payload).map_err(|_| DecodeError::from("Invalid lower threshold"))?,
            ),
            kind => Self::Other(kind, payload.to_vec()),
        })
    }
}

// Parsing implementation for InfoNla
impl<'a, T: AsRef<[u8]> + ?Sized> Parseable<NlaBuffer<&'a T>> for InfoNla {
    type Error = DecodeError;

    fn parse(buf: &NlaBuffer<&'a T>) -> Result<Self, Self::Error> {
        let payload = buf.value();
        Ok(match buf.kind() {
            x if x == IPVSInfoAttr::Version as u16 => {
                Self::Version(parse_u32(payload).map_err(|_| DecodeError::from("Invalid version"))?)
            }
            x if x == IPVSInfoAttr::ConnTableSize as u16 => Self::ConnTableSize(
                parse_u32(payload).map_err(|_| DecodeError::from("Invalid conn table size"))?,
            ),
            kind => Self::Other(kind, payload.to_vec()),
        })
    }
}

fn parse_nested<'a, N>(payload: &'a [u8]) -> Result<Vec<N>, DecodeError>
where
    N: Parseable<NlaBuffer<&'a [u8]>, Error = DecodeError>,
{
    let mut nlas = Vec::new();
    for nla in NlasIterator::new(payload) {
        let nla = nla.map_err(|e| DecodeError::from(e.to_string()))?;
        nlas.push(N::parse(&nla)?);
    }
    Ok(nlas)
}

// Implement Emitable from netlink-packet-core for IPVSMessage
impl netlink_packet_core::Emitable for IPVSMessage {
    fn buffer_len(&self) -> usize {
        self.nlas.iter().map(UtilsEmitable::buffer_len).sum()
    }

    fn emit(&self, buffer: &mut [u8]) {
        let mut offset = 0;
        for nla in &self.nlas {
            let len = UtilsEmitable::buffer_len(nla);
            UtilsEmitable::emit(nla, &mut buffer[offset..offset + len]);
            offset += len;
        }
    }
}

// Implement GenlFamily trait for IPVSMessage
impl GenlFamily for IPVSMessage {
    fn family_name() -> &'static str {
        "IPVS"
    }

    fn version(&self) -> u8 {
        1 // GENL_VERSION for the IPVS family
    }

    fn command(&self) -> u8 {
        self.cmd as u8
    }
}

// Implement Parseable for IPVSMessage - parse attributes from buffer
impl ParseableParametrized<[u8], GenlHeader> for IPVSMessage {
    fn parse_with_param(buf: &[u8], header: GenlHeader) -> Result<Self, DecodeError> {
        let cmd = IPVSCommand::try_from(header.cmd)
            .map_err(|_| DecodeError::from("Unknown IPVS command"))?;

        let nlas = if buf.is_empty() {
            Vec::new()
        } else {
            match cmd {
                // Info replies carry top-level info attributes.
                IPVSCommand::SetInfo | IPVSCommand::GetInfo => {
                    vec![IPVSNla::Info(parse_nested::<InfoNla>(buf)?)]
                }
                // Everything else nests service/dest attribute trees.
                _ => {
                    let mut nlas = Vec::new();
                    for nla in NlasIterator::new(buf) {
                        let nla = nla.map_err(|e| DecodeError::from(e.to_string()))?;
                        match nla.kind() {
                            x if x == IPVSAttr::Service as u16 => {
                                nlas.push(IPVSNla::Service(parse_nested(nla.value())?));
                            }
                            x if x == IPVSAttr::Dest as u16 => {
                                nlas.push(IPVSNla::Dest(parse_nested(nla.value())?));
                            }
                            kind => nlas.push(IPVSNla::Other(kind, nla.value().to_vec())),
                        }
                    }
                    nlas
                }
            }
        };

        Ok(Self { cmd, nlas })
    }
}

// Address encoding helpers

/// Encode an address for the wire: 4 bytes for v4, 16 bytes for v6.
fn addr_to_bytes(address: IpAddr) -> Vec<u8> {
    match address {
        IpAddr::V4(ip) => ip.octets().to_vec(),
        IpAddr::V6(ip) => ip.octets().to_vec(),
    }
}

/// Decode an address payload according to the address family.
///
/// The kernel pads v4 addresses to the full 16-byte nf_inet_addr union in
/// dumps, so for AF_INET any payload of at least 4 bytes is accepted and
/// only the leading octets are used.
fn addr_from_bytes(family: u16, bytes: &[u8]) -> Result<IpAddr, Error> {
    match family as i32 {
        libc::AF_INET => {
            let octets: [u8; 4] = bytes
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| {
                    Error::bad_address(format!("AF_INET address with {} bytes", bytes.len()))
                })?;
            Ok(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        libc::AF_INET6 => {
            let octets: [u8; 16] = bytes.try_into().map_err(|_| {
                Error::bad_address(format!("AF_INET6 address with {} bytes", bytes.len()))
            })?;
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => Err(Error::UnsupportedAf(family)),
    }
}

// Conversion between high-level records and attribute lists

impl Service {
    /// Convert a Service to netlink attributes.
    ///
    /// With `full = false` only the identifying attributes are emitted
    /// (enough for DEL_SERVICE and dest operations); `full = true` adds
    /// scheduler, flags, timeout and netmask for NEW/SET_SERVICE.
    pub fn to_nlas(&self, full: bool) -> Result<Vec<ServiceNla>, Error> {
        let mut nlas = vec![ServiceNla::AddressFamily(self.family())];

        if self.fwmark > 0 {
            nlas.push(ServiceNla::FirewallMark(self.fwmark));
        } else if self.port > 0 {
            nlas.push(ServiceNla::Protocol(self.protocol.number()));
            nlas.push(ServiceNla::Address(addr_to_bytes(self.address)));
            nlas.push(ServiceNla::Port(self.port));
        } else {
            return Err(Error::IncompleteIdentity(
                "service needs either addr:port or a firewall mark".to_string(),
            ));
        }

        if full {
            nlas.push(ServiceNla::Scheduler(self.scheduler.to_string()));
            nlas.push(ServiceNla::Flags(self.flags.0, u32::MAX));
            nlas.push(ServiceNla::Timeout(self.timeout));
            nlas.push(ServiceNla::Netmask(self.netmask));
        }

        Ok(nlas)
    }

    /// Rebuild a Service from parsed attributes.
    ///
    /// Unknown attributes are skipped. Identity attributes must be
    /// present; a missing scheduler falls back to the kernel's default
    /// (wlc). Fwmark services carry no protocol on the wire, so the
    /// record's protocol defaults to TCP for them.
    pub fn from_nlas(nlas: &[ServiceNla]) -> Result<Service, Error> {
        let mut family = None;
        let mut protocol = None;
        let mut addr_bytes: Option<&[u8]> = None;
        let mut port = 0u16;
        let mut fwmark = 0u32;
        let mut scheduler = None;
        let mut flags = ServiceFlags::default();
        let mut timeout = 0u32;
        let mut netmask = 0u32;

        for nla in nlas {
            match nla {
                ServiceNla::AddressFamily(af) => family = Some(*af),
                ServiceNla::Protocol(p) => protocol = Some(*p),
                ServiceNla::Address(bytes) => addr_bytes = Some(bytes),
                ServiceNla::Port(p) => port = *p,
                ServiceNla::FirewallMark(mark) => fwmark = *mark,
                ServiceNla::Scheduler(name) => scheduler = Some(Scheduler::from(name.as_str())),
                ServiceNla::Flags(bits, _mask) => flags = ServiceFlags(*bits),
                ServiceNla::Timeout(t) => timeout = *t,
                ServiceNla::Netmask(mask) => netmask = *mask,
                ServiceNla::Other(_, _) => {}
            }
        }

        let family = family.ok_or_else(|| {
            Error::IncompleteIdentity("service attributes lack an address family".to_string())
        })?;

        let (address, protocol) = if fwmark > 0 {
            let address = match family as i32 {
                libc::AF_INET => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                libc::AF_INET6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                _ => return Err(Error::UnsupportedAf(family)),
            };
            // Fwmark services carry IPPROTO_IP (0) on the wire; the
            // protocol is meaningless for them.
            (address, None)
        } else {
            let bytes = addr_bytes.ok_or_else(|| {
                Error::IncompleteIdentity("service attributes lack an address".to_string())
            })?;
            if port == 0 {
                return Err(Error::IncompleteIdentity(
                    "service attributes lack a port".to_string(),
                ));
            }
            let proto_num = protocol.ok_or_else(|| {
                Error::IncompleteIdentity("service attributes lack a protocol".to_string())
            })?;
            (
                addr_from_bytes(family, bytes)?,
                Some(Protocol::from_number(proto_num)?),
            )
        };

        Ok(Service {
            address,
            protocol: protocol.unwrap_or(Protocol::TCP),
            port,
            fwmark,
            scheduler: scheduler.unwrap_or(Scheduler::WeightedLeastConnection),
            flags,
            timeout,
            netmask,
        })
    }
}

impl Destination {
    /// Convert a Destination to netlink attributes.
    ///
    /// With `full = false` only the (addr, port) identity is emitted
    /// (enough for DEL_DEST); `full = true` adds forwarding method,
    /// weight and the connection thresholds.
    pub fn to_nlas(&self, full: bool) -> Result<Vec<DestNla>, Error> {
        let mut nlas = vec![
            DestNla::Address(addr_to_bytes(self.address)),
            DestNla::Port(self.port),
        ];

        if full {
            nlas.push(DestNla::ForwardingMethod(self.fwd_method as u32));
            nlas.push(DestNla::Weight(self.weight as i32));
            nlas.push(DestNla::UpperThreshold(self.upper_threshold));
            nlas.push(DestNla::LowerThreshold(self.lower_threshold));
        }

        Ok(nlas)
    }

    /// Rebuild a Destination from parsed attributes.
    ///
    /// The address family comes from the parent service; destination
    /// dumps carry raw address bytes only. Unknown attributes (connection
    /// counters, statistics) are skipped.
    pub fn from_nlas(family: u16, nlas: &[DestNla]) -> Result<Destination, Error> {
        let mut addr_bytes: Option<&[u8]> = None;
        let mut port = None;
        let mut fwd_method = ForwardingMethod::default();
        let mut weight = 0u32;
        let mut upper_threshold = 0u32;
        let mut lower_threshold = 0u32;

        for nla in nlas {
            match nla {
                DestNla::Address(bytes) => addr_bytes = Some(bytes),
                DestNla::Port(p) => port = Some(*p),
                DestNla::ForwardingMethod(raw) => fwd_method = ForwardingMethod::from_u32(*raw)?,
                DestNla::Weight(w) => weight = (*w).max(0) as u32,
                DestNla::UpperThreshold(t) => upper_threshold = *t,
                DestNla::LowerThreshold(t) => lower_threshold = *t,
                DestNla::Other(_, _) => {}
            }
        }

        let bytes = addr_bytes.ok_or_else(|| {
            Error::IncompleteIdentity("destination attributes lack an address".to_string())
        })?;
        let port = port.ok_or_else(|| {
            Error::IncompleteIdentity("destination attributes lack a port".to_string())
        })?;

        Ok(Destination {
            address: addr_from_bytes(family, bytes)?,
            port,
            weight,
            fwd_method,
            upper_threshold,
            lower_threshold,
        })
    }
}

impl IPVSInfo {
    /// Rebuild kernel info from the attributes of a SET_INFO reply.
    pub fn from_nlas(nlas: &[InfoNla]) -> Result<IPVSInfo, Error> {
        let mut version = None;
        let mut conn_tab_size = 0u32;

        for nla in nlas {
            match nla {
                InfoNla::Version(raw) => version = Some(IPVSVersion::from(*raw)),
                InfoNla::ConnTableSize(size) => conn_tab_size = *size,
                InfoNla::Other(_, _) => {}
            }
        }

        let version =
            version.ok_or_else(|| Error::decode("info reply lacks a version attribute"))?;
        Ok(IPVSInfo {
            version,
            conn_tab_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ForwardingMethod, Protocol, Scheduler, ServiceFlags};

    fn emit_all<T: Nla>(nlas: &[T]) -> Vec<u8> {
        let len = nlas.iter().map(|nla| nla.buffer_len()).sum();
        let mut buf = vec![0u8; len];
        emit_nlas(nlas, &mut buf);
        buf
    }

    fn reparse_service(nlas: &[ServiceNla]) -> Result<Service, Error> {
        let buf = emit_all(nlas);
        let parsed = parse_nested::<ServiceNla>(&buf).expect("nested parse");
        Service::from_nlas(&parsed)
    }

    fn reparse_dest(family: u16, nlas: &[DestNla]) -> Result<Destination, Error> {
        let buf = emit_all(nlas);
        let parsed = parse_nested::<DestNla>(&buf).expect("nested parse");
        Destination::from_nlas(family, &parsed)
    }

    fn sample_service() -> Service {
        Service {
            address: "10.0.0.1".parse().unwrap(),
            protocol: Protocol::TCP,
            port: 80,
            fwmark: 0,
            scheduler: Scheduler::WeightedRoundRobin,
            flags: ServiceFlags(ServiceFlags::PERSISTENT),
            timeout: 300,
            netmask: 0xffff_ffff,
        }
    }

    fn sample_dest() -> Destination {
        Destination {
            address: "192.168.1.10".parse().unwrap(),
            port: 8080,
            weight: 3,
            fwd_method: ForwardingMethod::DirectRoute,
            upper_threshold: 1000,
            lower_threshold: 100,
        }
    }

    #[test]
    fn test_service_round_trip_v4() {
        let svc = sample_service();
        let nlas = svc.to_nlas(true).unwrap();
        assert_eq!(reparse_service(&nlas).unwrap(), svc);
    }

    #[test]
    fn test_service_round_trip_v6() {
        let mut svc = sample_service();
        svc.address = "2001:db8::7".parse().unwrap();
        svc.netmask = 128;
        let nlas = svc.to_nlas(true).unwrap();
        assert_eq!(reparse_service(&nlas).unwrap(), svc);
    }

    #[test]
    fn test_service_round_trip_fwmark() {
        let mut svc = sample_service();
        svc.address = "0.0.0.0".parse().unwrap();
        svc.port = 0;
        svc.fwmark = 42;
        let nlas = svc.to_nlas(true).unwrap();
        assert_eq!(reparse_service(&nlas).unwrap(), svc);
    }

    #[test]
    fn test_fwmark_unpack_ignores_wire_protocol() {
        let mut svc = sample_service();
        svc.address = "0.0.0.0".parse().unwrap();
        svc.port = 0;
        svc.fwmark = 42;
        let mut nlas = svc.to_nlas(true).unwrap();
        // Kernel dumps carry IPPROTO_IP for fwmark services.
        nlas.insert(1, ServiceNla::Protocol(0));
        assert_eq!(reparse_service(&nlas).unwrap(), svc);
    }

    #[test]
    fn test_dest_round_trip() {
        let dest = sample_dest();
        let nlas = dest.to_nlas(true).unwrap();
        assert_eq!(reparse_dest(libc::AF_INET as u16, &nlas).unwrap(), dest);

        let mut dest6 = sample_dest();
        dest6.address = "fe80::1".parse().unwrap();
        let nlas = dest6.to_nlas(true).unwrap();
        assert_eq!(reparse_dest(libc::AF_INET6 as u16, &nlas).unwrap(), dest6);
    }

    #[test]
    fn test_identity_only_pack_omits_settings() {
        let nlas = sample_service().to_nlas(false).unwrap();
        assert!(
            nlas.iter()
                .all(|nla| !matches!(nla, ServiceNla::Scheduler(_) | ServiceNla::Flags(_, _)))
        );

        let nlas = sample_dest().to_nlas(false).unwrap();
        assert_eq!(nlas.len(), 2);
        assert!(matches!(nlas[0], DestNla::Address(_)));
        assert!(matches!(nlas[1], DestNla::Port(_)));
    }

    #[test]
    fn test_incomplete_identity_rejected() {
        let mut svc = sample_service();
        svc.port = 0;
        svc.fwmark = 0;
        assert!(matches!(
            svc.to_nlas(true),
            Err(Error::IncompleteIdentity(_))
        ));
    }

    #[test]
    fn test_port_is_big_endian_on_wire() {
        let buf = emit_all(&[ServiceNla::Port(80)]);
        // 4-byte NLA header, then the port in network byte order.
        assert_eq!(&buf[4..6], &[0x00, 0x50]);
    }

    #[test]
    fn test_address_encoding_widths() {
        let v4 = addr_to_bytes("10.0.0.1".parse().unwrap());
        assert_eq!(v4, vec![10, 0, 0, 1]);

        let v6 = addr_to_bytes("::1".parse().unwrap());
        assert_eq!(v6.len(), 16);
        assert_eq!(v6[15], 1);
    }

    #[test]
    fn test_scheduler_null_terminated() {
        let buf = emit_all(&[ServiceNla::Scheduler("wrr".to_string())]);
        assert_eq!(&buf[4..8], b"wrr\0");
    }

    #[test]
    fn test_flags_packed_as_bits_and_mask() {
        let buf = emit_all(&[ServiceNla::Flags(ServiceFlags::PERSISTENT, u32::MAX)]);
        assert_eq!(buf[4..8], ServiceFlags::PERSISTENT.to_ne_bytes());
        assert_eq!(buf[8..12], u32::MAX.to_ne_bytes());
    }

    #[test]
    fn test_unknown_attributes_skipped() {
        let mut nlas = sample_service().to_nlas(true).unwrap();
        nlas.push(ServiceNla::Other(200, vec![1, 2, 3, 4]));
        assert_eq!(Service::from_nlas(&nlas).unwrap(), sample_service());
    }

    #[test]
    fn test_v4_address_from_padded_union() {
        // Kernel dumps pad v4 addresses to the 16-byte nf_inet_addr union.
        let mut padded = vec![10, 0, 0, 7];
        padded.extend_from_slice(&[0u8; 12]);
        let addr = addr_from_bytes(libc::AF_INET as u16, &padded).unwrap();
        assert_eq!(addr, "10.0.0.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_bad_address_rejected() {
        assert!(matches!(
            addr_from_bytes(libc::AF_INET as u16, &[1, 2]),
            Err(Error::BadAddress(_))
        ));
        assert!(matches!(
            addr_from_bytes(libc::AF_INET6 as u16, &[0u8; 8]),
            Err(Error::BadAddress(_))
        ));
    }

    #[test]
    fn test_unsupported_family_rejected() {
        assert!(matches!(
            addr_from_bytes(libc::AF_PACKET as u16, &[0u8; 4]),
            Err(Error::UnsupportedAf(_))
        ));
    }

    #[test]
    fn test_info_from_nlas() {
        let info = IPVSInfo::from_nlas(&[
            InfoNla::Version((1 << 16) | (2 << 8) | 1),
            InfoNla::ConnTableSize(4096),
        ])
        .unwrap();
        assert_eq!(info.version.to_string(), "1.2.1");
        assert_eq!(info.conn_tab_size, 4096);

        assert!(IPVSInfo::from_nlas(&[InfoNla::ConnTableSize(4096)]).is_err());
    }

    #[test]
    fn test_message_attribute_parse_dispatch() {
        use netlink_packet_core::Emitable;

        let svc = sample_service();
        let msg = IPVSMessage::with_nlas(
            IPVSCommand::NewService,
            vec![IPVSNla::Service(svc.to_nlas(true).unwrap())],
        );

        let mut buf = vec![0u8; Emitable::buffer_len(&msg)];
        Emitable::emit(&msg, &mut buf);

        let header = GenlHeader {
            cmd: IPVSCommand::NewService as u8,
            version: 1,
        };
        let parsed = IPVSMessage::parse_with_param(&buf, header).unwrap();
        assert_eq!(parsed.cmd, IPVSCommand::NewService);
        let nlas = parsed.service_nlas().expect("service attributes");
        assert_eq!(Service::from_nlas(nlas).unwrap(), svc);
    }
}
