//! Reconciliation task.
//!
//! A single task owns the driver and consumes config events from a queue,
//! applying them serially. There is no rollback on a partially applied
//! event: the desired model is updated first, so the next cycle re-diffs
//! against whatever the kernel actually holds. Transport collapse is
//! recovered by reopening the channel, flushing the kernel and replaying
//! the whole model.

use std::collections::{BTreeMap, HashMap};

use common::Result;
use ipvs::Destination;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::driver::Driver;
use crate::frontend::Frontend;
use crate::transport::IPVSTransport;
use crate::types::{BackendServer, ConfigEvent, VirtualService};

/// Desired state and live projection for one logical frontend.
struct FrontendState {
    frontend: Frontend,
    service: VirtualService,
    servers: BTreeMap<String, BackendServer>,
}

/// Applies config events to the driver, one at a time.
pub struct Reconciler<T: IPVSTransport> {
    driver: Driver<T>,
    config: Config,
    frontends: HashMap<String, FrontendState>,
}

impl<T: IPVSTransport> Reconciler<T> {
    pub fn new(driver: Driver<T>, config: Config) -> Self {
        Self {
            driver,
            config,
            frontends: HashMap::new(),
        }
    }

    /// Consume events until the channel closes.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ConfigEvent>) {
        info!("Reconciler task started");

        while let Some(event) = rx.recv().await {
            self.dispatch(event);
        }

        info!("Reconciler task stopped");
    }

    /// Apply one event, handling errors per the recovery policy: fatal
    /// transport errors rebuild the kernel state, anything else drops the
    /// event and waits for the next cycle.
    pub fn dispatch(&mut self, event: ConfigEvent) {
        if let Err(e) = self.handle_event(event) {
            if e.is_fatal() {
                error!(error = %e, "transport failure, rebuilding kernel state");
                self.recover();
            } else {
                warn!(error = %e, "event failed, waiting for next cycle");
            }
        }
    }

    /// Update the desired model and reproject the affected frontend.
    pub fn handle_event(&mut self, event: ConfigEvent) -> Result<()> {
        match event {
            ConfigEvent::ServiceAdded { id, service }
            | ConfigEvent::ServiceChanged { id, service } => {
                match self.frontends.get_mut(&id) {
                    Some(state) => state.service = service,
                    None => {
                        self.frontends.insert(
                            id.clone(),
                            FrontendState {
                                frontend: Frontend::new(),
                                service,
                                servers: BTreeMap::new(),
                            },
                        );
                    }
                }
                self.project(&id)
            }
            ConfigEvent::ServiceRemoved { id } => match self.frontends.remove(&id) {
                Some(mut state) => state.frontend.withdraw(&mut self.driver),
                None => {
                    warn!(id = %id, "removal of unknown service");
                    Ok(())
                }
            },
            ConfigEvent::ServerAdded {
                service_id,
                server_id,
                server,
            }
            | ConfigEvent::ServerChanged {
                service_id,
                server_id,
                server,
            } => {
                let Some(state) = self.frontends.get_mut(&service_id) else {
                    warn!(service_id = %service_id, "server event for unknown service");
                    return Ok(());
                };
                state.servers.insert(server_id, server);
                self.project(&service_id)
            }
            ConfigEvent::ServerRemoved {
                service_id,
                server_id,
            } => {
                let Some(state) = self.frontends.get_mut(&service_id) else {
                    warn!(service_id = %service_id, "server removal for unknown service");
                    return Ok(());
                };
                if state.servers.remove(&server_id).is_none() {
                    warn!(service_id = %service_id, server_id = %server_id, "removal of unknown server");
                    return Ok(());
                }
                self.project(&service_id)
            }
        }
    }

    /// Flush the kernel and replay the whole desired model.
    ///
    /// Also used at startup through [`Driver::sync`] semantics: the kernel
    /// begins in a known-empty state matching the empty projection.
    pub fn resync(&mut self) -> Result<()> {
        self.driver.sync()?;

        let ids: Vec<String> = self.frontends.keys().cloned().collect();
        for id in &ids {
            if let Some(state) = self.frontends.get_mut(id) {
                // The old projection died with the flush.
                state.frontend = Frontend::new();
            }
            if let Err(e) = self.project(id) {
                error!(service = %id, error = %e, "replay failed");
            }
        }

        info!(frontends = ids.len(), "replayed declarative model");
        Ok(())
    }

    pub fn driver_mut(&mut self) -> &mut Driver<T> {
        &mut self.driver
    }

    fn project(&mut self, id: &str) -> Result<()> {
        let Some(state) = self.frontends.get_mut(id) else {
            return Ok(());
        };

        let service = state.service.resolve(&self.config)?;
        let backends: Vec<Destination> = state
            .servers
            .values()
            .map(|server| server.resolve(&self.config))
            .collect::<Result<_>>()?;

        state.frontend.apply(&mut self.driver, service, &backends)
    }

    fn recover(&mut self) {
        if let Err(e) = self.driver.reopen() {
            error!(error = %e, "failed to reopen transport");
            return;
        }
        if let Err(e) = self.resync() {
            error!(error = %e, "failed to rebuild kernel state");
        }
    }
}
