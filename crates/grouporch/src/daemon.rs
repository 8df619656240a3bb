//! Group reconciliation daemon.
//!
//! The daemon wires a [`GroupManager`] to its southbound side from
//! configuration: one simulated provider per URI scheme listed in
//! `simulated_devices`, and a simulated driver for `driver_devices`.
//! It then runs until asked to stop.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::GroupOrchConfig;
use crate::error::GroupResult;
use crate::event::ListenerRegistry;
use crate::manager::GroupManager;
use crate::provider::{DriverResolver, GroupProvider, ProviderRegistry};
use crate::sim::{SimulatedDeviceProvider, SimulatedDriver};
use grouporch_types::DeviceId;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

const SOURCE: &str = "GroupOrchDaemon";

pub struct GroupOrchDaemon {
    manager: GroupManager,
    simulators: BTreeMap<String, Arc<SimulatedDeviceProvider>>,
    driver: Option<Arc<SimulatedDeviceProvider>>,
    poller: Option<JoinHandle<()>>,
    running: bool,
}

impl GroupOrchDaemon {
    /// Builds the manager and its registries. Must run inside a Tokio
    /// runtime.
    pub fn new(config: GroupOrchConfig) -> Self {
        let driver = (!config.driver_devices.is_empty()).then(|| {
            let sim = Arc::new(SimulatedDeviceProvider::new("driver"));
            for device_id in &config.driver_devices {
                sim.add_device(device_id.clone());
            }
            sim
        });
        let resolver = driver
            .as_ref()
            .map(|sim| Arc::new(SimulatedDriver(Arc::clone(sim))) as Arc<dyn DriverResolver>);

        let manager = GroupManager::new(
            config,
            Arc::new(ProviderRegistry::new()),
            resolver,
            Arc::new(ListenerRegistry::default()),
        );

        Self {
            manager,
            simulators: BTreeMap::new(),
            driver,
            poller: None,
            running: false,
        }
    }

    pub fn manager(&self) -> &GroupManager {
        &self.manager
    }

    /// Simulated provider serving a scheme, once [`init`](Self::init) ran.
    pub fn simulator(&self, scheme: &str) -> Option<&Arc<SimulatedDeviceProvider>> {
        self.simulators.get(scheme)
    }

    /// Simulator behind the driver, if any devices are driver-managed.
    pub fn driver_simulator(&self) -> Option<&Arc<SimulatedDeviceProvider>> {
        self.driver.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Registers simulated providers, pushes their initial tables, and
    /// starts the driver poller.
    pub fn init(&mut self) -> GroupResult<()> {
        let config = self.manager.config();
        let mut by_scheme: BTreeMap<String, Vec<DeviceId>> = BTreeMap::new();
        for device_id in &config.simulated_devices {
            by_scheme
                .entry(device_id.scheme().to_string())
                .or_default()
                .push(device_id.clone());
        }

        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "daemon_initialization_start")
                .with_outcome(AuditOutcome::InProgress)
                .with_details(serde_json::json!({
                    "simulated_devices": config.simulated_devices.len(),
                    "driver_devices": config.driver_devices.len(),
                    "schemes": by_scheme.keys().collect::<Vec<_>>(),
                }))
        );

        for (scheme, devices) in by_scheme {
            let sim = Arc::new(SimulatedDeviceProvider::new(scheme.clone()));
            for device_id in devices {
                sim.add_device(device_id);
            }
            let service = match self
                .manager
                .register_provider(Arc::clone(&sim) as Arc<dyn GroupProvider>)
            {
                Ok(service) => service,
                Err(e) => {
                    error!(scheme = %scheme, error = %e, "Failed to register simulated provider");
                    audit_log!(
                        AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "daemon_initialization_failed")
                            .with_object_id(scheme.as_str())
                            .with_object_type("provider")
                            .with_error(e.to_string())
                    );
                    return Err(e);
                }
            };
            sim.attach(service);
            sim.report_all();
            info!(scheme = %scheme, devices = sim.device_ids().len(), "Simulated provider ready");
            self.simulators.insert(scheme, sim);
        }

        self.poller = self.manager.spawn_driver_poller();

        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "daemon_initialization_end")
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({
                    "providers": self.simulators.len(),
                    "driver_polling": self.poller.is_some(),
                }))
        );
        Ok(())
    }

    /// Runs until `shutdown` completes, then stops the daemon.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.running = true;
        info!("Group reconciliation daemon running");
        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "daemon_started")
                .with_outcome(AuditOutcome::Success)
                .with_details(serde_json::json!({
                    "driver_poll_interval_ms": self.manager.config().driver_poll_interval_ms,
                }))
        );

        shutdown.await;
        self.stop().await;
    }

    /// Stops polling, drains device tasks, and delivers pending events.
    pub async fn stop(&mut self) {
        info!("Stopping group reconciliation daemon");
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.manager.shutdown().await;
        self.running = false;

        audit_log!(
            AuditRecord::new(AuditCategory::SystemLifecycle, SOURCE, "daemon_stopped")
                .with_outcome(AuditOutcome::Success)
        );
    }
}
