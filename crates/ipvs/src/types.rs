//! IPVS data types and structures.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use common::Error;

/// IPVS version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IPVSVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl From<u32> for IPVSVersion {
    fn from(raw: u32) -> Self {
        Self {
            major: (raw >> 16) & 0xff,
            minor: (raw >> 8) & 0xff,
            patch: raw & 0xff,
        }
    }
}

impl fmt::Display for IPVSVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Kernel-side IPVS information returned by IPVS_CMD_GET_INFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IPVSInfo {
    pub version: IPVSVersion,
    pub conn_tab_size: u32,
}

impl fmt::Display for IPVSInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IPVS {} (conn table size {})",
            self.version, self.conn_tab_size
        )
    }
}

/// IP protocol for IPVS services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    TCP,
    UDP,
}

impl Protocol {
    /// Lowercase protocol name, as used in canonical service keys.
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::TCP => "tcp",
            Protocol::UDP => "udp",
        }
    }

    /// IP protocol number.
    pub fn number(&self) -> u16 {
        match self {
            Protocol::TCP => libc::IPPROTO_TCP as u16,
            Protocol::UDP => libc::IPPROTO_UDP as u16,
        }
    }

    /// Map an IP protocol number back to a protocol.
    pub fn from_number(n: u16) -> Result<Self, Error> {
        match n as i32 {
            libc::IPPROTO_TCP => Ok(Protocol::TCP),
            libc::IPPROTO_UDP => Ok(Protocol::UDP),
            other => Err(Error::decode(format!("unsupported IP protocol {}", other))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::TCP => write!(f, "TCP"),
            Protocol::UDP => write!(f, "UDP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::TCP),
            "udp" => Ok(Protocol::UDP),
            other => Err(Error::config(format!("unknown protocol {:?}", other))),
        }
    }
}

/// IPVS scheduling algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduler {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnection,
    WeightedLeastConnection,
    SourceHashing,
    MaglevHashing,
    Other(String),
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheduler::RoundRobin => write!(f, "rr"),
            Scheduler::WeightedRoundRobin => write!(f, "wrr"),
            Scheduler::LeastConnection => write!(f, "lc"),
            Scheduler::WeightedLeastConnection => write!(f, "wlc"),
            Scheduler::SourceHashing => write!(f, "sh"),
            Scheduler::MaglevHashing => write!(f, "mh"),
            Scheduler::Other(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Scheduler {
    fn from(name: &str) -> Self {
        match name {
            "rr" => Scheduler::RoundRobin,
            "wrr" => Scheduler::WeightedRoundRobin,
            "lc" => Scheduler::LeastConnection,
            "wlc" => Scheduler::WeightedLeastConnection,
            "sh" => Scheduler::SourceHashing,
            "mh" => Scheduler::MaglevHashing,
            other => Scheduler::Other(other.to_string()),
        }
    }
}

/// Service flags for IPVS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceFlags(pub u32);

impl ServiceFlags {
    pub const PERSISTENT: u32 = 0x1;
    pub const HASHED: u32 = 0x2;
    pub const ONE_PACKET: u32 = 0x4;
    pub const SCHED_SH_FALLBACK: u32 = 0x8;
    pub const SCHED_SH_PORT: u32 = 0x10;
}

/// How packets are delivered to a destination.
///
/// Values match the kernel's IP_VS_CONN_F forwarding-method field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ForwardingMethod {
    /// NAT (masquerading)
    #[default]
    Masquerade = 0,
    /// Local delivery
    Local = 1,
    /// Tunnel (IP-in-IP)
    Tunnel = 2,
    /// Direct routing (DSR)
    DirectRoute = 3,
}

impl ForwardingMethod {
    pub fn from_u32(value: u32) -> Result<Self, Error> {
        // The kernel reports the method in the low bits of the connection
        // flags; IP_VS_CONN_F_FWD_MASK is 0x7.
        match value & 0x7 {
            0 => Ok(ForwardingMethod::Masquerade),
            1 => Ok(ForwardingMethod::Local),
            2 => Ok(ForwardingMethod::Tunnel),
            3 => Ok(ForwardingMethod::DirectRoute),
            other => Err(Error::decode(format!(
                "unsupported forwarding method {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ForwardingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardingMethod::Masquerade => write!(f, "masq"),
            ForwardingMethod::Local => write!(f, "local"),
            ForwardingMethod::Tunnel => write!(f, "tunnel"),
            ForwardingMethod::DirectRoute => write!(f, "droute"),
        }
    }
}

impl FromStr for ForwardingMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "masq" => Ok(ForwardingMethod::Masquerade),
            "local" => Ok(ForwardingMethod::Local),
            "tunnel" => Ok(ForwardingMethod::Tunnel),
            "droute" => Ok(ForwardingMethod::DirectRoute),
            other => Err(Error::config(format!(
                "unknown forwarding method {:?}",
                other
            ))),
        }
    }
}

/// An IPVS service (virtual server).
///
/// The identity is either (protocol, address, port) with port > 0, or a
/// firewall mark with fwmark > 0; the address family always comes from
/// `address` (an unspecified address selects the family for fwmark
/// services).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub address: IpAddr,
    pub protocol: Protocol,
    pub port: u16,
    pub fwmark: u32,
    pub scheduler: Scheduler,
    pub flags: ServiceFlags,
    pub timeout: u32,
    pub netmask: u32,
}

impl Service {
    /// Address family constant for this service (AF_INET or AF_INET6).
    pub fn family(&self) -> u16 {
        match self.address {
            IpAddr::V4(_) => libc::AF_INET as u16,
            IpAddr::V6(_) => libc::AF_INET6 as u16,
        }
    }

    fn family_name(&self) -> &'static str {
        match self.address {
            IpAddr::V4(_) => "inet",
            IpAddr::V6(_) => "inet6",
        }
    }

    /// Canonical identity string.
    ///
    /// Equal keys mean the same kernel service; address spelling is
    /// normalized because the address is held as a parsed `IpAddr`.
    pub fn key(&self) -> String {
        if self.fwmark > 0 {
            format!("{}-fwmark://#{}", self.family_name(), self.fwmark)
        } else {
            format!(
                "{}-{}://{}",
                self.family_name(),
                self.protocol.name(),
                SocketAddr::new(self.address, self.port)
            )
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fwmark > 0 {
            write!(f, "FWM {} ({})", self.fwmark, self.scheduler)
        } else {
            write!(
                f,
                "{} {}:{} ({})",
                self.protocol, self.address, self.port, self.scheduler
            )
        }
    }
}

/// An IPVS destination (real server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub address: IpAddr,
    pub port: u16,
    pub weight: u32,
    pub fwd_method: ForwardingMethod,
    pub upper_threshold: u32,
    pub lower_threshold: u32,
}

impl Destination {
    /// Canonical identity string within a parent service.
    pub fn key(&self) -> String {
        SocketAddr::new(self.address, self.port).to_string()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} w={})",
            SocketAddr::new(self.address, self.port),
            self.fwd_method,
            self.weight
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn tcp_service(addr: &str, port: u16) -> Service {
        Service {
            address: addr.parse().unwrap(),
            protocol: Protocol::TCP,
            port,
            fwmark: 0,
            scheduler: Scheduler::WeightedRoundRobin,
            flags: ServiceFlags::default(),
            timeout: 0,
            netmask: 0,
        }
    }

    #[test]
    fn test_service_key_port_shape() {
        let svc = tcp_service("10.0.0.1", 80);
        assert_eq!(svc.key(), "inet-tcp://10.0.0.1:80");
    }

    #[test]
    fn test_service_key_fwmark_shape() {
        let mut svc = tcp_service("0.0.0.0", 0);
        svc.fwmark = 100;
        assert_eq!(svc.key(), "inet-fwmark://#100");

        svc.address = IpAddr::V6(Ipv6Addr::UNSPECIFIED);
        assert_eq!(svc.key(), "inet6-fwmark://#100");
    }

    #[test]
    fn test_service_key_normalizes_v6_spelling() {
        let a = tcp_service("::1", 443);
        let b = tcp_service("0:0:0:0:0:0:0:1", 443);
        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "inet6-tcp://[::1]:443");
    }

    #[test]
    fn test_destination_key() {
        let dest = Destination {
            address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            port: 8080,
            weight: 1,
            fwd_method: ForwardingMethod::Masquerade,
            upper_threshold: 0,
            lower_threshold: 0,
        };
        assert_eq!(dest.key(), "10.0.0.2:8080");
    }

    #[test]
    fn test_version_decoding() {
        let version = IPVSVersion::from((1 << 16) | (2 << 8) | 1);
        assert_eq!(version.to_string(), "1.2.1");
    }

    #[test]
    fn test_forwarding_method_round_trip() {
        for method in [
            ForwardingMethod::Masquerade,
            ForwardingMethod::Local,
            ForwardingMethod::Tunnel,
            ForwardingMethod::DirectRoute,
        ] {
            assert_eq!(ForwardingMethod::from_u32(method as u32).unwrap(), method);
            assert_eq!(
                method.to_string().parse::<ForwardingMethod>().unwrap(),
                method
            );
        }
        assert!(ForwardingMethod::from_u32(4).is_err());
        assert!("nat".parse::<ForwardingMethod>().is_err());
    }

    #[test]
    fn test_protocol_parsing() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::TCP);
        assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::UDP);
        assert!("sctp".parse::<Protocol>().is_err());
        assert_eq!(Protocol::from_number(6).unwrap(), Protocol::TCP);
        assert_eq!(Protocol::from_number(17).unwrap(), Protocol::UDP);
    }

    #[test]
    fn test_scheduler_names() {
        assert_eq!(Scheduler::from("wlc"), Scheduler::WeightedLeastConnection);
        assert_eq!(Scheduler::from("wlc").to_string(), "wlc");
        assert_eq!(
            Scheduler::from("fo"),
            Scheduler::Other("fo".to_string())
        );
    }
}
