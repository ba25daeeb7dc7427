//! IPVS netlink commands and attribute definitions.
//!
//! Based on Linux kernel's include/uapi/linux/ip_vs.h

use common::Error;

/// IPVS generic netlink commands.
///
/// Values match the kernel's `enum ipvs_cmd`; the daemon-sync and timeout
/// commands are omitted because this control plane never issues them.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IPVSCommand {
    /// Add a new virtual service
    NewService = 1,
    /// Modify an existing virtual service
    SetService = 2,
    /// Delete a virtual service
    DelService = 3,
    /// Get virtual service information (dump)
    GetService = 4,
    /// Add a new destination to a service
    NewDest = 5,
    /// Modify an existing destination
    SetDest = 6,
    /// Delete a destination from a service
    DelDest = 7,
    /// Get destination information (dump)
    GetDest = 8,
    /// Kernel reply carrying info attributes
    SetInfo = 14,
    /// Get IPVS version and connection table size
    GetInfo = 15,
    /// Flush all virtual services
    Flush = 17,
}

impl From<IPVSCommand> for u8 {
    fn from(cmd: IPVSCommand) -> u8 {
        cmd as u8
    }
}

impl TryFrom<u8> for IPVSCommand {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        Ok(match value {
            1 => IPVSCommand::NewService,
            2 => IPVSCommand::SetService,
            3 => IPVSCommand::DelService,
            4 => IPVSCommand::GetService,
            5 => IPVSCommand::NewDest,
            6 => IPVSCommand::SetDest,
            7 => IPVSCommand::DelDest,
            8 => IPVSCommand::GetDest,
            14 => IPVSCommand::SetInfo,
            15 => IPVSCommand::GetInfo,
            17 => IPVSCommand::Flush,
            other => return Err(Error::decode(format!("unknown IPVS command {}", other))),
        })
    }
}

/// Top-level IPVS netlink attributes
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum IPVSAttr {
    Unspec = 0,
    /// Service information (nested)
    Service = 1,
    /// Destination information (nested)
    Dest = 2,
    /// Daemon information (nested)
    Daemon = 3,
}

/// Service-specific attributes (nested under IPVS_ATTR_SERVICE)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum IPVSServiceAttr {
    Unspec = 0,
    /// Address family (AF_INET or AF_INET6)
    AddressFamily = 1,
    /// IP protocol (IPPROTO_TCP, IPPROTO_UDP)
    Protocol = 2,
    /// Virtual IP address (4 or 16 bytes depending on family)
    Address = 3,
    /// Virtual port
    Port = 4,
    /// Firewall mark
    FirewallMark = 5,
    /// Scheduler name (null-terminated string)
    Scheduler = 6,
    /// Service flags and mask (packed as two u32 values)
    Flags = 7,
    /// Persistence timeout
    Timeout = 8,
    /// Network mask (for persistent connections)
    Netmask = 9,
    /// Service statistics (nested)
    Stats = 10,
    /// Persistence engine name
    PersistenceEngine = 11,
}

/// Destination-specific attributes (nested under IPVS_ATTR_DEST)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum IPVSDestAttr {
    Unspec = 0,
    /// Destination IP address (4 or 16 bytes depending on family)
    Address = 1,
    /// Destination port
    Port = 2,
    /// Forwarding method
    ForwardingMethod = 3,
    /// Weight
    Weight = 4,
    /// Upper connection threshold
    UpperThreshold = 5,
    /// Lower connection threshold
    LowerThreshold = 6,
    /// Active connections count
    ActiveConns = 7,
    /// Inactive connections count
    InactiveConns = 8,
    /// Persistent connections count
    PersistConns = 9,
    /// Destination statistics (nested)
    Stats = 10,
    /// Destination address family
    AddressFamily = 11,
}

/// Info attributes (top-level in IPVS_CMD_SET_INFO replies)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum IPVSInfoAttr {
    Unspec = 0,
    /// IPVS version
    Version = 1,
    /// Connection table size
    ConnTableSize = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trip() {
        for cmd in [
            IPVSCommand::NewService,
            IPVSCommand::DelDest,
            IPVSCommand::SetInfo,
            IPVSCommand::GetInfo,
            IPVSCommand::Flush,
        ] {
            assert_eq!(IPVSCommand::try_from(cmd as u8).unwrap(), cmd);
        }
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(IPVSCommand::try_from(0).is_err());
        assert!(IPVSCommand::try_from(42).is_err());
    }
}
