//! Transport seam between the driver and the kernel.
//!
//! The driver only ever talks to IPVS through this trait, so everything
//! above the wire codec can be exercised against an in-memory fake.

use common::Result;
use ipvs::{Destination, IPVSInfo, IPVSManager, Service};

/// Typed operations on the kernel's IPVS table.
///
/// Implementations are not required to be concurrency-safe; the driver
/// task serializes all access.
pub trait IPVSTransport {
    /// Kernel-side version and connection table size.
    fn info(&mut self) -> Result<IPVSInfo>;

    /// Remove every service and destination.
    fn flush(&mut self) -> Result<()>;

    fn add_service(&mut self, service: &Service) -> Result<()>;
    fn update_service(&mut self, service: &Service) -> Result<()>;
    fn delete_service(&mut self, service: &Service) -> Result<()>;

    fn add_destination(&mut self, service: &Service, dest: &Destination) -> Result<()>;
    fn update_destination(&mut self, service: &Service, dest: &Destination) -> Result<()>;
    fn delete_destination(&mut self, service: &Service, dest: &Destination) -> Result<()>;

    fn get_services(&mut self) -> Result<Vec<Service>>;
    fn get_destinations(&mut self, service: &Service) -> Result<Vec<Destination>>;

    /// Tear down and re-establish the channel after a transport failure.
    fn reopen(&mut self) -> Result<()>;
}

impl IPVSTransport for IPVSManager {
    fn info(&mut self) -> Result<IPVSInfo> {
        IPVSManager::info(self)
    }

    fn flush(&mut self) -> Result<()> {
        IPVSManager::flush(self)
    }

    fn add_service(&mut self, service: &Service) -> Result<()> {
        IPVSManager::add_service(self, service)
    }

    fn update_service(&mut self, service: &Service) -> Result<()> {
        IPVSManager::update_service(self, service)
    }

    fn delete_service(&mut self, service: &Service) -> Result<()> {
        IPVSManager::delete_service(self, service)
    }

    fn add_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        IPVSManager::add_destination(self, service, dest)
    }

    fn update_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        IPVSManager::update_destination(self, service, dest)
    }

    fn delete_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        IPVSManager::delete_destination(self, service, dest)
    }

    fn get_services(&mut self) -> Result<Vec<Service>> {
        IPVSManager::get_services(self)
    }

    fn get_destinations(&mut self, service: &Service) -> Result<Vec<Destination>> {
        IPVSManager::get_destinations(self, service)
    }

    fn reopen(&mut self) -> Result<()> {
        IPVSManager::reopen(self)
    }
}
