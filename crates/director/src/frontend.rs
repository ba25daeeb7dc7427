//! Frontend projector.
//!
//! One `Frontend` stands for one logical virtual service from the
//! declarative model. On every update it diffs the newly desired backend
//! set against its own prior projection and turns the difference into
//! merger contributions, so overlapping frontends never fight over shared
//! kernel destinations.

use std::collections::HashMap;

use common::Result;
use ipvs::{Destination, Service};
use tracing::debug;

use crate::driver::Driver;
use crate::merger::DestHandle;
use crate::transport::IPVSTransport;

/// One projected backend contribution.
#[derive(Debug, Clone)]
struct Contribution {
    dest: Destination,
    weight: u32,
    handle: DestHandle,
}

/// Projects one logical frontend onto the merger.
#[derive(Debug, Default)]
pub struct Frontend {
    service: Option<Service>,
    contributions: HashMap<String, Contribution>,
}

impl Frontend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The service this frontend currently projects, if any.
    pub fn service(&self) -> Option<&Service> {
        self.service.as_ref()
    }

    /// Number of live backend contributions.
    pub fn backend_count(&self) -> usize {
        self.contributions.len()
    }

    /// Reconcile this frontend to the given service and backend set.
    ///
    /// The backend records carry this frontend's contributed weight in
    /// their `weight` field; zero-weight backends are treated as absent.
    /// Kernel operations are ordered so that the service exists before
    /// its destinations and destinations are removed before the service.
    pub fn apply<T: IPVSTransport>(
        &mut self,
        driver: &mut Driver<T>,
        service: Service,
        backends: &[Destination],
    ) -> Result<()> {
        // A changed identity is a remove-then-add of the whole frontend.
        if let Some(prev) = &self.service {
            if prev.key() != service.key() {
                debug!(from = %prev.key(), to = %service.key(), "frontend identity changed");
                self.teardown(driver)?;
            }
        }

        if self.service.is_none() {
            driver.acquire_service(&service)?;
        } else if self.service.as_ref() != Some(&service) {
            driver.reconfigure_service(&service)?;
        }
        self.service = Some(service.clone());

        let desired: HashMap<String, &Destination> = backends
            .iter()
            .filter(|dest| dest.weight > 0)
            .map(|dest| (dest.key(), dest))
            .collect();

        // New backends come up first.
        for (key, dest) in &desired {
            if !self.contributions.contains_key(key) {
                let handle = driver.up(&service, dest, dest.weight)?;
                self.contributions.insert(
                    key.clone(),
                    Contribution {
                        dest: (*dest).clone(),
                        weight: dest.weight,
                        handle,
                    },
                );
            }
        }

        // Dropped backends go down.
        let stale: Vec<String> = self
            .contributions
            .keys()
            .filter(|key| !desired.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            let contribution = &self.contributions[&key];
            driver.down(&service, &contribution.handle, contribution.weight)?;
            self.contributions.remove(&key);
        }

        // Weight changes shift by the delta.
        for (key, dest) in &desired {
            let contribution = self
                .contributions
                .get_mut(key)
                .expect("desired backend just projected");
            if contribution.weight != dest.weight {
                let delta = dest.weight as i64 - contribution.weight as i64;
                driver.adjust(&service, &contribution.handle, delta)?;
                contribution.weight = dest.weight;
                contribution.dest = (*dest).clone();
            }
        }

        Ok(())
    }

    /// Withdraw every contribution and drop the service claim.
    pub fn withdraw<T: IPVSTransport>(&mut self, driver: &mut Driver<T>) -> Result<()> {
        self.teardown(driver)
    }

    fn teardown<T: IPVSTransport>(&mut self, driver: &mut Driver<T>) -> Result<()> {
        let Some(prev) = self.service.clone() else {
            return Ok(());
        };

        let keys: Vec<String> = self.contributions.keys().cloned().collect();
        for key in keys {
            let contribution = &self.contributions[&key];
            driver.down(&prev, &contribution.handle, contribution.weight)?;
            self.contributions.remove(&key);
        }

        driver.release_service(&prev)?;
        self.service = None;
        Ok(())
    }
}
