//! Driver façade.
//!
//! Owns the netlink transport, the destination merger and the refcounted
//! service table. Frontends never talk to the transport directly; every
//! kernel operation funnels through one driver owned by a single task.

use std::collections::HashMap;
use std::io::Write;

use common::Result;
use ipvs::{Destination, IPVSInfo, IPVSManager, Service};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::frontend::Frontend;
use crate::merger::{DestHandle, DestMerger};
use crate::transport::IPVSTransport;

/// A kernel-resident service and the number of frontends projecting it.
#[derive(Debug)]
struct ServiceEntry {
    service: Service,
    refs: usize,
}

/// The IPVS synchronization driver.
pub struct Driver<T: IPVSTransport> {
    transport: T,
    merger: DestMerger,
    services: HashMap<String, ServiceEntry>,
}

impl Driver<IPVSManager> {
    /// Open the real netlink transport and log the kernel-side version.
    pub fn setup(config: &Config) -> Result<Self> {
        let mut transport = IPVSManager::with_ack_timeout(config.ack_timeout)?;
        transport.set_debug(config.debug);

        let kernel = transport.info()?;
        info!(
            version = %kernel.version,
            conn_tab_size = kernel.conn_tab_size,
            "Connected to IPVS"
        );

        Ok(Self::with_transport(transport))
    }
}

impl<T: IPVSTransport> Driver<T> {
    /// Build a driver on an existing transport.
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport,
            merger: DestMerger::new(),
            services: HashMap::new(),
        }
    }

    /// Kernel-side version and connection table size.
    pub fn info(&mut self) -> Result<IPVSInfo> {
        self.transport.info()
    }

    /// Flush the kernel table and drop all local state.
    ///
    /// Called once at startup so the kernel starts from a known-empty
    /// state matching the empty projection, and again when recovering
    /// from a transport failure before replaying the model.
    pub fn sync(&mut self) -> Result<()> {
        self.transport.flush()?;
        self.merger.clear();
        self.services.clear();
        info!("Flushed IPVS state");
        Ok(())
    }

    /// Re-establish the transport channel after a fatal error.
    pub fn reopen(&mut self) -> Result<()> {
        self.transport.reopen()
    }

    /// A fresh projector bound to this driver.
    pub fn new_frontend(&self) -> Frontend {
        Frontend::new()
    }

    /// Number of kernel-resident services the driver tracks.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Number of merged destination entries.
    pub fn dest_count(&self) -> usize {
        self.merger.len()
    }

    /// Dump services and their destinations from the kernel.
    ///
    /// Diagnostic only; reads through the transport without touching
    /// merger state.
    pub fn print<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let kernel = self.transport.info()?;
        writeln!(out, "{}", kernel)?;

        for service in self.transport.get_services()? {
            writeln!(out, "{}", service)?;
            for dest in self.transport.get_destinations(&service)? {
                writeln!(out, "  -> {}", dest)?;
            }
        }
        Ok(())
    }

    /// Record a frontend's claim on a service, creating it in the kernel
    /// on the first claim.
    pub(crate) fn acquire_service(&mut self, service: &Service) -> Result<()> {
        let key = service.key();
        if let Some(entry) = self.services.get_mut(&key) {
            entry.refs += 1;
            if entry.service != *service {
                // Two frontends disagree on the settings; last writer wins.
                warn!(service = %key, "conflicting service settings, reconfiguring");
                self.transport.update_service(service)?;
                entry.service = service.clone();
            }
            debug!(service = %key, refs = entry.refs, "service claim added");
            return Ok(());
        }

        self.transport.add_service(service)?;
        debug!(service = %key, "service created");
        self.services.insert(
            key,
            ServiceEntry {
                service: service.clone(),
                refs: 1,
            },
        );
        Ok(())
    }

    /// Push changed service settings to the kernel (identity unchanged).
    pub(crate) fn reconfigure_service(&mut self, service: &Service) -> Result<()> {
        let key = service.key();
        match self.services.get_mut(&key) {
            Some(entry) => {
                if entry.service != *service {
                    self.transport.update_service(service)?;
                    entry.service = service.clone();
                    debug!(service = %key, "service reconfigured");
                }
                Ok(())
            }
            None => {
                warn!(service = %key, "reconfigure for untracked service, creating");
                self.transport.add_service(service)?;
                self.services.insert(
                    key,
                    ServiceEntry {
                        service: service.clone(),
                        refs: 1,
                    },
                );
                Ok(())
            }
        }
    }

    /// Drop a frontend's claim; the last claim deletes the kernel service.
    pub(crate) fn release_service(&mut self, service: &Service) -> Result<()> {
        let key = service.key();
        let Some(entry) = self.services.get_mut(&key) else {
            warn!(service = %key, "release for untracked service");
            return Ok(());
        };

        if entry.refs > 1 {
            entry.refs -= 1;
            debug!(service = %key, refs = entry.refs, "service claim dropped");
            return Ok(());
        }

        let kernel_service = entry.service.clone();
        self.transport.delete_service(&kernel_service)?;
        // DEL_SERVICE drops attached destinations transitively; purge any
        // table entries that survived (they are gone from the kernel).
        self.merger.clear_service(&kernel_service);
        self.services.remove(&key);
        debug!(service = %key, "service deleted");
        Ok(())
    }

    pub(crate) fn up(
        &mut self,
        service: &Service,
        dest: &Destination,
        weight: u32,
    ) -> Result<DestHandle> {
        self.merger.up(&mut self.transport, service, dest, weight)
    }

    pub(crate) fn adjust(
        &mut self,
        service: &Service,
        handle: &DestHandle,
        delta: i64,
    ) -> Result<()> {
        self.merger.adjust(&mut self.transport, service, handle, delta)
    }

    pub(crate) fn down(
        &mut self,
        service: &Service,
        handle: &DestHandle,
        weight: u32,
    ) -> Result<()> {
        self.merger.down(&mut self.transport, service, handle, weight)
    }

    #[cfg(test)]
    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
