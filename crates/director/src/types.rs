//! Declarative model records and config events.
//!
//! These are the shapes the external watcher feeds into the reconciler.
//! They stay loosely typed (strings for protocol, scheduler and forwarding
//! method) and are resolved against the startup configuration into the
//! strict kernel-facing records.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use common::{Error, Result};
use ipvs::{Destination, Protocol, Scheduler, Service, ServiceFlags};
use serde::{Deserialize, Serialize};

use crate::config::Config;

/// A declarative virtual service, as supplied by the config source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualService {
    /// "tcp" or "udp"; defaults to tcp.
    #[serde(default)]
    pub protocol: Option<String>,

    #[serde(default)]
    pub address: Option<IpAddr>,

    #[serde(default)]
    pub port: u16,

    /// Nonzero selects the firewall-mark identity shape.
    #[serde(default)]
    pub fwmark: u32,

    /// Address family for fwmark services: "inet" (default) or "inet6".
    #[serde(default)]
    pub family: Option<String>,

    /// Scheduler name; the configured default applies when omitted.
    #[serde(default)]
    pub scheduler: Option<String>,

    #[serde(default)]
    pub persistent: bool,

    /// Persistence timeout in seconds.
    #[serde(default)]
    pub timeout: u32,

    /// Netmask for persistence; derived from the family when omitted.
    #[serde(default)]
    pub netmask: Option<u32>,
}

impl VirtualService {
    /// Resolve into a kernel-facing service record, applying configured
    /// defaults for everything the declarative record omits.
    pub fn resolve(&self, config: &Config) -> Result<Service> {
        let protocol = match self.protocol.as_deref() {
            Some(name) => name.parse::<Protocol>()?,
            None => Protocol::TCP,
        };

        let address = if self.fwmark > 0 {
            match self.family.as_deref() {
                None | Some("inet") => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                Some("inet6") => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                Some(other) => {
                    return Err(Error::config(format!("unknown address family {:?}", other)));
                }
            }
        } else {
            let address = self.address.ok_or_else(|| {
                Error::IncompleteIdentity("virtual service lacks an address".to_string())
            })?;
            if self.port == 0 {
                return Err(Error::IncompleteIdentity(
                    "virtual service lacks a port".to_string(),
                ));
            }
            address
        };

        let scheduler = self
            .scheduler
            .as_deref()
            .map(Scheduler::from)
            .unwrap_or_else(|| config.scheduler());

        let flags = if self.persistent {
            ServiceFlags(ServiceFlags::PERSISTENT)
        } else {
            ServiceFlags::default()
        };

        let netmask = self.netmask.unwrap_or(match address {
            IpAddr::V4(_) => u32::MAX,
            IpAddr::V6(_) => 128,
        });

        Ok(Service {
            address,
            protocol,
            port: self.port,
            fwmark: self.fwmark,
            scheduler,
            flags,
            timeout: self.timeout,
            netmask,
        })
    }
}

/// A declarative backend server within a virtual service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendServer {
    pub address: IpAddr,
    pub port: u16,

    /// This frontend's contribution to the merged kernel weight.
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// "masq", "tunnel", "droute" or "local"; the configured default
    /// applies when omitted.
    #[serde(default)]
    pub fwd_method: Option<String>,

    #[serde(default)]
    pub upper_threshold: u32,

    #[serde(default)]
    pub lower_threshold: u32,
}

fn default_weight() -> u32 {
    1
}

impl BackendServer {
    /// Resolve into a kernel-facing destination record.
    pub fn resolve(&self, config: &Config) -> Result<Destination> {
        let fwd_method = match self.fwd_method.as_deref() {
            Some(name) => name.parse()?,
            None => config.forwarding_method()?,
        };

        Ok(Destination {
            address: self.address,
            port: self.port,
            weight: self.weight,
            fwd_method,
            upper_threshold: self.upper_threshold,
            lower_threshold: self.lower_threshold,
        })
    }
}

/// One change to the declarative model, in the order the watcher saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConfigEvent {
    ServiceAdded {
        id: String,
        service: VirtualService,
    },
    ServiceChanged {
        id: String,
        service: VirtualService,
    },
    ServiceRemoved {
        id: String,
    },
    ServerAdded {
        service_id: String,
        server_id: String,
        server: BackendServer,
    },
    ServerChanged {
        service_id: String,
        server_id: String,
        server: BackendServer,
    },
    ServerRemoved {
        service_id: String,
        server_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipvs::ForwardingMethod;

    #[test]
    fn test_virtual_service_resolution_defaults() {
        let vs: VirtualService =
            serde_json::from_str(r#"{"address": "10.0.0.1", "port": 80}"#).unwrap();
        let svc = vs.resolve(&Config::default()).unwrap();

        assert_eq!(svc.protocol, Protocol::TCP);
        assert_eq!(svc.scheduler, Scheduler::WeightedLeastConnection);
        assert_eq!(svc.netmask, u32::MAX);
        assert_eq!(svc.key(), "inet-tcp://10.0.0.1:80");
    }

    #[test]
    fn test_fwmark_service_resolution() {
        let vs: VirtualService =
            serde_json::from_str(r#"{"fwmark": 7, "family": "inet6"}"#).unwrap();
        let svc = vs.resolve(&Config::default()).unwrap();
        assert_eq!(svc.fwmark, 7);
        assert_eq!(svc.netmask, 128);
        assert_eq!(svc.key(), "inet6-fwmark://#7");
    }

    #[test]
    fn test_incomplete_service_rejected() {
        let vs: VirtualService = serde_json::from_str(r#"{"port": 80}"#).unwrap();
        assert!(matches!(
            vs.resolve(&Config::default()),
            Err(Error::IncompleteIdentity(_))
        ));

        let vs: VirtualService = serde_json::from_str(r#"{"address": "10.0.0.1"}"#).unwrap();
        assert!(matches!(
            vs.resolve(&Config::default()),
            Err(Error::IncompleteIdentity(_))
        ));
    }

    #[test]
    fn test_backend_resolution_defaults() {
        let server: BackendServer =
            serde_json::from_str(r#"{"address": "10.0.0.2", "port": 8080}"#).unwrap();
        let dest = server.resolve(&Config::default()).unwrap();

        assert_eq!(dest.weight, 1);
        assert_eq!(dest.fwd_method, ForwardingMethod::Masquerade);

        let server: BackendServer = serde_json::from_str(
            r#"{"address": "10.0.0.2", "port": 8080, "weight": 4, "fwd_method": "droute"}"#,
        )
        .unwrap();
        let dest = server.resolve(&Config::default()).unwrap();
        assert_eq!(dest.weight, 4);
        assert_eq!(dest.fwd_method, ForwardingMethod::DirectRoute);
    }

    #[test]
    fn test_event_json_shape() {
        let event: ConfigEvent = serde_json::from_str(
            r#"{
                "event": "server_added",
                "service_id": "web",
                "server_id": "a",
                "server": {"address": "10.0.0.2", "port": 80, "weight": 2}
            }"#,
        )
        .unwrap();

        match event {
            ConfigEvent::ServerAdded {
                service_id,
                server_id,
                server,
            } => {
                assert_eq!(service_id, "web");
                assert_eq!(server_id, "a");
                assert_eq!(server.weight, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
