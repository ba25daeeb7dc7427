//! Rust implementation of IPVS (IP Virtual Server) management via netlink.
//!
//! This crate provides a safe, efficient interface to Linux IPVS through direct
//! netlink syscalls, eliminating the need for CGo and libnl dependencies.
//!
//! # Example
//!
//! ```no_run
//! use ipvs::IPVSManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = IPVSManager::new()?;
//!
//! // Get kernel-side IPVS information
//! let info = manager.info()?;
//! println!("{}", info);
//!
//! // List all services and their destinations
//! for service in manager.get_services()? {
//!     println!("Service: {}", service);
//!     for dest in manager.get_destinations(&service)? {
//!         println!("  -> {}", dest);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod messages;
mod netlink;
mod types;

pub use types::{
    Destination, ForwardingMethod, IPVSInfo, IPVSVersion, Protocol, Scheduler, Service,
    ServiceFlags,
};

use std::time::Duration;

use common::{Error, Result};
use tracing::debug;

use commands::IPVSCommand;
use messages::{IPVSNla, IPVSMessage};
use netlink::NetlinkSocket;

/// Default bound on each wait for a kernel acknowledgment.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// IPVS Manager - main interface for IPVS operations.
pub struct IPVSManager {
    socket: NetlinkSocket,
    ack_timeout: Duration,
    debug: bool,
}

impl IPVSManager {
    /// Create a new IPVS manager instance.
    ///
    /// This initializes the netlink connection and queries the IPVS generic netlink family.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The netlink socket cannot be created
    /// - The IPVS kernel module is not loaded
    /// - Insufficient permissions (requires CAP_NET_ADMIN)
    pub fn new() -> Result<Self> {
        Self::with_ack_timeout(DEFAULT_ACK_TIMEOUT)
    }

    /// Create a manager with an explicit kernel-ack timeout.
    pub fn with_ack_timeout(ack_timeout: Duration) -> Result<Self> {
        let socket = NetlinkSocket::new(ack_timeout)?;
        Ok(Self {
            socket,
            ack_timeout,
            debug: false,
        })
    }

    /// Get the IPVS family ID.
    pub fn family_id(&self) -> u16 {
        self.socket.family_id()
    }

    /// Enable or disable raw netlink frame tracing.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
        self.socket.set_debug(debug);
    }

    /// Tear down and re-establish the netlink connection.
    ///
    /// Used after a transport-level failure; the family id is resolved
    /// again on the fresh socket.
    pub fn reopen(&mut self) -> Result<()> {
        debug!("Reopening IPVS netlink socket");
        let mut socket = NetlinkSocket::new(self.ack_timeout)?;
        socket.set_debug(self.debug);
        self.socket = socket;
        Ok(())
    }

    /// Get the IPVS version and connection table size from the kernel.
    pub fn info(&mut self) -> Result<IPVSInfo> {
        let reply = self.socket.query(IPVSCommand::GetInfo, Vec::new())?;
        let nlas = reply
            .info_nlas()
            .ok_or_else(|| Error::decode("info reply carries no info attributes"))?;
        IPVSInfo::from_nlas(nlas)
    }

    /// Flush all services and destinations from IPVS.
    pub fn flush(&mut self) -> Result<()> {
        self.socket.ack_request(IPVSCommand::Flush, Vec::new())
    }

    /// Add a new service to IPVS.
    pub fn add_service(&mut self, service: &Service) -> Result<()> {
        self.service_request(IPVSCommand::NewService, service, true)
    }

    /// Update an existing service in IPVS.
    pub fn update_service(&mut self, service: &Service) -> Result<()> {
        self.service_request(IPVSCommand::SetService, service, true)
    }

    /// Delete a service from IPVS.
    pub fn delete_service(&mut self, service: &Service) -> Result<()> {
        self.service_request(IPVSCommand::DelService, service, false)
    }

    /// Get all services from IPVS.
    pub fn get_services(&mut self) -> Result<Vec<Service>> {
        let replies = self.socket.dump_request(IPVSCommand::GetService, Vec::new())?;
        replies
            .iter()
            .map(|reply| {
                let nlas = service_nlas(reply)?;
                Service::from_nlas(nlas)
            })
            .collect()
    }

    /// Add a destination to a service.
    pub fn add_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        self.dest_request(IPVSCommand::NewDest, service, dest, true)
    }

    /// Update a destination in a service.
    pub fn update_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        self.dest_request(IPVSCommand::SetDest, service, dest, true)
    }

    /// Delete a destination from a service.
    pub fn delete_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        self.dest_request(IPVSCommand::DelDest, service, dest, false)
    }

    /// Get all destinations of a service.
    pub fn get_destinations(&mut self, service: &Service) -> Result<Vec<Destination>> {
        let family = service.family();
        let identity = vec![IPVSNla::Service(service.to_nlas(false)?)];
        let replies = self.socket.dump_request(IPVSCommand::GetDest, identity)?;
        replies
            .iter()
            .map(|reply| {
                let nlas = dest_nlas(reply)?;
                Destination::from_nlas(family, nlas)
            })
            .collect()
    }

    fn service_request(&mut self, cmd: IPVSCommand, service: &Service, full: bool) -> Result<()> {
        let nlas = vec![IPVSNla::Service(service.to_nlas(full)?)];
        self.socket.ack_request(cmd, nlas)
    }

    fn dest_request(
        &mut self,
        cmd: IPVSCommand,
        service: &Service,
        dest: &Destination,
        full: bool,
    ) -> Result<()> {
        let nlas = vec![
            IPVSNla::Service(service.to_nlas(false)?),
            IPVSNla::Dest(dest.to_nlas(full)?),
        ];
        self.socket.ack_request(cmd, nlas)
    }
}

fn service_nlas(reply: &IPVSMessage) -> Result<&[messages::ServiceNla]> {
    reply
        .service_nlas()
        .ok_or_else(|| Error::decode("dump reply carries no service attributes"))
}

fn dest_nlas(reply: &IPVSMessage) -> Result<&[messages::DestNla]> {
    reply
        .dest_nlas()
        .ok_or_else(|| Error::decode("dump reply carries no destination attributes"))
}
