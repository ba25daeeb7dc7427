//! In-memory transport used by the driver-level tests.
//!
//! Models the kernel table closely enough to catch ordering bugs: adding
//! a destination to a missing service fails with ENOENT, re-adding an
//! existing service fails with EEXIST, and deleting a service drops its
//! destinations transitively, as the kernel does. Every operation is
//! recorded in an op log for ordering assertions.

use std::collections::BTreeMap;

use common::{Error, Result};
use ipvs::{Destination, IPVSInfo, IPVSVersion, Service};

use crate::transport::IPVSTransport;

/// Injected failure for the next operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Failure {
    Kernel(i32),
    Timeout,
}

/// One recorded transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    AddService(String),
    UpdateService(String),
    DeleteService(String),
    AddDest(String, String, u32),
    UpdateDest(String, String, u32),
    DeleteDest(String, String),
    Flush,
    Reopen,
}

#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    pub services: BTreeMap<String, Service>,
    pub dests: BTreeMap<String, BTreeMap<String, Destination>>,
    pub ops: Vec<Op>,
    pub fail_next: Option<Failure>,
    /// When set, every operation fails until `reopen` is called.
    pub broken: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The weight the fake kernel holds for a destination, if present.
    pub fn dest_weight(&self, service: &Service, dest_key: &str) -> Option<u32> {
        self.dests
            .get(&service.key())
            .and_then(|dests| dests.get(dest_key))
            .map(|dest| dest.weight)
    }

    /// Positions of the given ops in the log; panics if one is missing.
    pub fn op_position(&self, op: &Op) -> usize {
        self.ops
            .iter()
            .position(|o| o == op)
            .unwrap_or_else(|| panic!("op {:?} not found in {:?}", op, self.ops))
    }

    fn check_failure(&mut self) -> Result<()> {
        if self.broken {
            return Err(Error::Timeout);
        }
        match self.fail_next.take() {
            Some(Failure::Kernel(errno)) => Err(Error::kernel_reject(errno)),
            Some(Failure::Timeout) => Err(Error::Timeout),
            None => Ok(()),
        }
    }
}

impl IPVSTransport for FakeTransport {
    fn info(&mut self) -> Result<IPVSInfo> {
        self.check_failure()?;
        Ok(IPVSInfo {
            version: IPVSVersion::from((1 << 16) | (2 << 8) | 1),
            conn_tab_size: 4096,
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.check_failure()?;
        self.ops.push(Op::Flush);
        self.services.clear();
        self.dests.clear();
        Ok(())
    }

    fn add_service(&mut self, service: &Service) -> Result<()> {
        self.check_failure()?;
        let key = service.key();
        if self.services.contains_key(&key) {
            return Err(Error::kernel_reject(libc::EEXIST));
        }
        self.ops.push(Op::AddService(key.clone()));
        self.services.insert(key.clone(), service.clone());
        self.dests.insert(key, BTreeMap::new());
        Ok(())
    }

    fn update_service(&mut self, service: &Service) -> Result<()> {
        self.check_failure()?;
        let key = service.key();
        if !self.services.contains_key(&key) {
            return Err(Error::kernel_reject(libc::ESRCH));
        }
        self.ops.push(Op::UpdateService(key.clone()));
        self.services.insert(key, service.clone());
        Ok(())
    }

    fn delete_service(&mut self, service: &Service) -> Result<()> {
        self.check_failure()?;
        let key = service.key();
        if self.services.remove(&key).is_none() {
            return Err(Error::kernel_reject(libc::ESRCH));
        }
        self.ops.push(Op::DeleteService(key.clone()));
        // The kernel drops attached destinations with the service.
        self.dests.remove(&key);
        Ok(())
    }

    fn add_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        self.check_failure()?;
        let key = service.key();
        let dests = self
            .dests
            .get_mut(&key)
            .ok_or_else(|| Error::kernel_reject(libc::ESRCH))?;
        if dests.contains_key(&dest.key()) {
            return Err(Error::kernel_reject(libc::EEXIST));
        }
        self.ops
            .push(Op::AddDest(key, dest.key(), dest.weight));
        dests.insert(dest.key(), dest.clone());
        Ok(())
    }

    fn update_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        self.check_failure()?;
        let key = service.key();
        let dests = self
            .dests
            .get_mut(&key)
            .ok_or_else(|| Error::kernel_reject(libc::ESRCH))?;
        if !dests.contains_key(&dest.key()) {
            return Err(Error::kernel_reject(libc::ENOENT));
        }
        self.ops
            .push(Op::UpdateDest(key, dest.key(), dest.weight));
        dests.insert(dest.key(), dest.clone());
        Ok(())
    }

    fn delete_destination(&mut self, service: &Service, dest: &Destination) -> Result<()> {
        self.check_failure()?;
        let key = service.key();
        let dests = self
            .dests
            .get_mut(&key)
            .ok_or_else(|| Error::kernel_reject(libc::ESRCH))?;
        if dests.remove(&dest.key()).is_none() {
            return Err(Error::kernel_reject(libc::ENOENT));
        }
        self.ops.push(Op::DeleteDest(key, dest.key()));
        Ok(())
    }

    fn get_services(&mut self) -> Result<Vec<Service>> {
        self.check_failure()?;
        Ok(self.services.values().cloned().collect())
    }

    fn get_destinations(&mut self, service: &Service) -> Result<Vec<Destination>> {
        self.check_failure()?;
        let dests = self
            .dests
            .get(&service.key())
            .ok_or_else(|| Error::kernel_reject(libc::ESRCH))?;
        Ok(dests.values().cloned().collect())
    }

    fn reopen(&mut self) -> Result<()> {
        self.ops.push(Op::Reopen);
        self.broken = false;
        self.fail_next = None;
        Ok(())
    }
}
