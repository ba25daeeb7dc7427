//! Destination merger.
//!
//! Multiple frontends may legitimately reference the same real destination
//! with different weights. This table collapses them into a single kernel
//! entry whose weight is the sum of all live contributions, and issues the
//! matching netlink operations as contributions come and go.
//!
//! Misuse (a stale handle, withdrawing more weight than was contributed)
//! indicates a projector bug and aborts the process: continuing silently
//! would leave the kernel out of sync with the projection model.

use std::cmp::Ordering;
use std::collections::HashMap;

use common::Result;
use ipvs::{Destination, Service};
use tracing::debug;

use crate::transport::IPVSTransport;

/// Composite key: canonical service identity plus destination identity.
type MergeKey = (String, String);

/// Opaque reference to a merged destination.
///
/// Returned by [`DestMerger::up`] and required by `adjust`/`down`. The
/// serial is minted per table entry, so a handle from a deleted and
/// re-created destination no longer matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestHandle {
    key: MergeKey,
    serial: u64,
}

/// A kernel-resident destination and its currently programmed weight.
#[derive(Debug, Clone)]
struct MergedDest {
    dest: Destination,
    weight: u32,
    serial: u64,
}

/// Table of merged destinations, keyed by (service, dest) identity.
#[derive(Debug, Default)]
pub struct DestMerger {
    table: HashMap<MergeKey, MergedDest>,
    next_serial: u64,
}

impl DestMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live table entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The weight currently programmed for (service, dest), if present.
    pub fn recorded_weight(&self, service: &Service, dest: &Destination) -> Option<u32> {
        self.table
            .get(&(service.key(), dest.key()))
            .map(|entry| entry.weight)
    }

    /// Add a contribution of `weight` for (service, dest).
    ///
    /// Creates the kernel destination on the first contribution; later
    /// contributions raise the programmed weight. On transport failure the
    /// table is left untouched.
    pub fn up<T: IPVSTransport>(
        &mut self,
        transport: &mut T,
        service: &Service,
        dest: &Destination,
        weight: u32,
    ) -> Result<DestHandle> {
        assert!(weight > 0, "zero-weight contribution for {}", dest);

        let key = (service.key(), dest.key());

        if let Some(entry) = self.table.get_mut(&key) {
            let new_weight = entry.weight + weight;
            let mut kernel_dest = entry.dest.clone();
            kernel_dest.weight = new_weight;
            transport.update_destination(service, &kernel_dest)?;

            debug!(
                service = %key.0, dest = %key.1, weight = new_weight,
                "raised merged destination weight"
            );
            entry.dest = kernel_dest;
            entry.weight = new_weight;
            return Ok(DestHandle {
                key,
                serial: entry.serial,
            });
        }

        let mut kernel_dest = dest.clone();
        kernel_dest.weight = weight;
        transport.add_destination(service, &kernel_dest)?;

        self.next_serial += 1;
        let serial = self.next_serial;
        debug!(service = %key.0, dest = %key.1, weight, "created merged destination");
        self.table.insert(
            key.clone(),
            MergedDest {
                dest: kernel_dest,
                weight,
                serial,
            },
        );
        Ok(DestHandle { key, serial })
    }

    /// Shift an existing contribution by `delta`.
    ///
    /// The caller guarantees the resulting weight stays positive; a result
    /// of zero or less is a bug in the caller's accounting.
    pub fn adjust<T: IPVSTransport>(
        &mut self,
        transport: &mut T,
        service: &Service,
        handle: &DestHandle,
        delta: i64,
    ) -> Result<()> {
        let entry = self.checked_entry(service, handle, "adjust");

        let new_weight = entry.weight as i64 + delta;
        if new_weight <= 0 {
            panic!(
                "adjust by {} would drop {}/{} to weight {}",
                delta, handle.key.0, handle.key.1, new_weight
            );
        }

        let mut kernel_dest = entry.dest.clone();
        kernel_dest.weight = new_weight as u32;
        transport.update_destination(service, &kernel_dest)?;

        debug!(
            service = %handle.key.0, dest = %handle.key.1, weight = new_weight,
            "adjusted merged destination weight"
        );
        entry.dest = kernel_dest;
        entry.weight = new_weight as u32;
        Ok(())
    }

    /// Withdraw a contribution of `weight`.
    ///
    /// Removes the kernel destination when the last contribution goes;
    /// withdrawing more than was contributed is a bug in the caller.
    pub fn down<T: IPVSTransport>(
        &mut self,
        transport: &mut T,
        service: &Service,
        handle: &DestHandle,
        weight: u32,
    ) -> Result<()> {
        assert!(weight > 0, "zero-weight withdrawal for {}", handle.key.1);

        let entry = self.checked_entry(service, handle, "down");

        match entry.weight.cmp(&weight) {
            Ordering::Less => panic!(
                "over-withdrawal of {} from {}/{} holding weight {}",
                weight, handle.key.0, handle.key.1, entry.weight
            ),
            Ordering::Greater => {
                let new_weight = entry.weight - weight;
                let mut kernel_dest = entry.dest.clone();
                kernel_dest.weight = new_weight;
                transport.update_destination(service, &kernel_dest)?;

                debug!(
                    service = %handle.key.0, dest = %handle.key.1, weight = new_weight,
                    "lowered merged destination weight"
                );
                entry.dest = kernel_dest;
                entry.weight = new_weight;
            }
            Ordering::Equal => {
                let kernel_dest = entry.dest.clone();
                transport.delete_destination(service, &kernel_dest)?;

                debug!(
                    service = %handle.key.0, dest = %handle.key.1,
                    "removed merged destination"
                );
                self.table.remove(&handle.key);
            }
        }
        Ok(())
    }

    /// Drop every table entry belonging to `service` without touching the
    /// kernel; used when the parent service is being deleted and the
    /// kernel drops its destinations transitively.
    pub fn clear_service(&mut self, service: &Service) {
        let service_key = service.key();
        self.table.retain(|(svc, _), _| *svc != service_key);
    }

    /// Drop the whole table; pairs with a kernel flush.
    pub fn clear(&mut self) {
        self.table.clear();
    }

    fn checked_entry(
        &mut self,
        service: &Service,
        handle: &DestHandle,
        op: &str,
    ) -> &mut MergedDest {
        if handle.key.0 != service.key() {
            panic!(
                "{} called with service {} but handle for {}",
                op,
                service.key(),
                handle.key.0
            );
        }
        let entry = self
            .table
            .get_mut(&handle.key)
            .unwrap_or_else(|| panic!("{} for unknown destination {}/{}", op, handle.key.0, handle.key.1));
        if entry.serial != handle.serial {
            panic!(
                "{} with stale handle for {}/{}",
                op, handle.key.0, handle.key.1
            );
        }
        entry
    }
}
