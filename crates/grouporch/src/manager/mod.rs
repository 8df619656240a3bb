//! Application-facing group service.
//!
//! [`GroupManager`] routes each request to the reconciliation task of the
//! device it names, spawning that task on first use. Requests on different
//! devices run in parallel; requests on one device are handled in arrival
//! order together with that device's southbound reports.
//!
//! Mutating calls return once intent has been recorded. Whether the device
//! accepted the change is reported later through [`GroupListener`] events.

mod actor;
mod reconcile;

pub use actor::DeviceStatus;
pub(crate) use actor::DeviceCommand;

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::GroupOrchConfig;
use crate::error::{GroupError, GroupResult};
use crate::event::{EventDispatcher, GroupListener, ListenerId, ListenerRegistry};
use crate::model::{Group, GroupBuckets, GroupDescription, ObservedGroup};
use crate::provider::{DriverResolver, GroupProvider, ProviderId, ProviderRegistry, ProviderService, Transport};
use crate::store::{BucketUpdate, UpdateType};
use actor::DeviceActor;
use dashmap::DashMap;
use grouporch_types::{ApplicationId, DeviceId, GroupKey};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const SOURCE: &str = "GroupManager";

/// State shared by manager clones and provider services.
pub(crate) struct ManagerInner {
    config: GroupOrchConfig,
    transport: Arc<Transport>,
    listeners: Arc<ListenerRegistry>,
    events: EventDispatcher,
    devices: DashMap<DeviceId, mpsc::UnboundedSender<DeviceCommand>>,
    runtime: Handle,
    shutdown: AtomicBool,
}

impl ManagerInner {
    /// Channel of the device's task, spawning the task if needed.
    fn device(&self, device_id: &DeviceId) -> GroupResult<mpsc::UnboundedSender<DeviceCommand>> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(GroupError::Shutdown);
        }
        let tx = self
            .devices
            .entry(device_id.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let actor = DeviceActor::new(
                    device_id.clone(),
                    self.config.first_group_id,
                    Arc::clone(&self.transport),
                    self.events.clone(),
                );
                self.runtime.spawn(actor.run(rx));
                debug!(device = %device_id, "Spawned device task");
                tx
            })
            .clone();
        Ok(tx)
    }

    fn existing(&self, device_id: &DeviceId) -> Option<mpsc::UnboundedSender<DeviceCommand>> {
        self.devices.get(device_id).map(|tx| tx.clone())
    }

    pub(crate) fn submit(&self, device_id: &DeviceId, command: DeviceCommand) -> GroupResult<()> {
        self.device(device_id)?
            .send(command)
            .map_err(|_| GroupError::Shutdown)
    }

    fn known_devices(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Entry point for applications and providers.
///
/// Cheap to clone; all clones share the same devices, registries, and
/// event dispatcher.
#[derive(Clone)]
pub struct GroupManager {
    inner: Arc<ManagerInner>,
}

impl GroupManager {
    /// Builds a manager on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(
        config: GroupOrchConfig,
        providers: Arc<ProviderRegistry>,
        driver: Option<Arc<dyn DriverResolver>>,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        let runtime = Handle::current();
        let (events, _task) =
            EventDispatcher::spawn(&runtime, Arc::clone(&listeners), config.event_queue_warn_threshold);
        let inner = ManagerInner {
            config,
            transport: Arc::new(Transport::new(providers, driver)),
            listeners,
            events,
            devices: DashMap::new(),
            runtime,
            shutdown: AtomicBool::new(false),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &GroupOrchConfig {
        &self.inner.config
    }

    async fn request<T>(
        &self,
        device_id: &DeviceId,
        command: impl FnOnce(oneshot::Sender<T>) -> DeviceCommand,
    ) -> GroupResult<T> {
        let (tx, rx) = oneshot::channel();
        self.inner.submit(device_id, command(tx))?;
        rx.await.map_err(|_| GroupError::Shutdown)
    }

    /// Query on a device; `None` if the device has no task yet.
    async fn query<T>(
        &self,
        device_id: &DeviceId,
        command: impl FnOnce(oneshot::Sender<T>) -> DeviceCommand,
    ) -> Option<T> {
        let tx = self.inner.existing(device_id)?;
        let (reply, rx) = oneshot::channel();
        tx.send(command(reply)).ok()?;
        rx.await.ok()
    }

    // --- application API ---

    /// Records a new desired group.
    ///
    /// Before the device's first report the request is queued and replayed
    /// once the device has been audited.
    pub async fn add_group(&self, desc: GroupDescription) -> GroupResult<()> {
        let device_id = desc.device_id.clone();
        self.request(&device_id, |reply| DeviceCommand::AddGroup { desc, reply })
            .await?
    }

    pub async fn get_group(&self, device_id: &DeviceId, key: &GroupKey) -> Option<Group> {
        let key = key.clone();
        self.query(device_id, |reply| DeviceCommand::GetGroup { key, reply })
            .await
            .flatten()
    }

    /// Groups of one application on a device, ordered by id.
    pub async fn get_groups(&self, device_id: &DeviceId, app_id: &ApplicationId) -> Vec<Group> {
        let app_id = Some(app_id.clone());
        self.query(device_id, |reply| DeviceCommand::GetGroups { app_id, reply })
            .await
            .unwrap_or_default()
    }

    /// Every group on a device, whatever application owns it.
    pub async fn get_device_groups(&self, device_id: &DeviceId) -> Vec<Group> {
        self.query(device_id, |reply| DeviceCommand::GetGroups { app_id: None, reply })
            .await
            .unwrap_or_default()
    }

    pub async fn group_count(&self, device_id: &DeviceId) -> usize {
        self.get_device_groups(device_id).await.len()
    }

    /// Groups present on the device that nothing asked for.
    pub async fn get_extraneous_groups(&self, device_id: &DeviceId) -> Vec<ObservedGroup> {
        self.query(device_id, |reply| DeviceCommand::GetExtraneous { reply })
            .await
            .unwrap_or_default()
    }

    pub async fn device_status(&self, device_id: &DeviceId) -> Option<DeviceStatus> {
        self.query(device_id, |reply| DeviceCommand::Status { reply })
            .await
    }

    async fn update_buckets(
        &self,
        device_id: &DeviceId,
        update: BucketUpdate,
    ) -> GroupResult<()> {
        self.request(device_id, |reply| DeviceCommand::UpdateBuckets { update, reply })
            .await?
    }

    /// Appends buckets; buckets already present with another weight are
    /// replaced. The group is known by `new_key` afterwards, if given.
    pub async fn add_buckets_to_group(
        &self,
        device_id: &DeviceId,
        key: &GroupKey,
        buckets: GroupBuckets,
        new_key: Option<GroupKey>,
        app_id: &ApplicationId,
    ) -> GroupResult<()> {
        let update = BucketUpdate {
            key: key.clone(),
            update_type: UpdateType::Add,
            buckets,
            new_key,
            app_id: app_id.clone(),
        };
        self.update_buckets(device_id, update).await
    }

    pub async fn remove_buckets_from_group(
        &self,
        device_id: &DeviceId,
        key: &GroupKey,
        buckets: GroupBuckets,
        new_key: Option<GroupKey>,
        app_id: &ApplicationId,
    ) -> GroupResult<()> {
        let update = BucketUpdate {
            key: key.clone(),
            update_type: UpdateType::Remove,
            buckets,
            new_key,
            app_id: app_id.clone(),
        };
        self.update_buckets(device_id, update).await
    }

    /// Replaces the whole bucket list.
    pub async fn set_buckets_for_group(
        &self,
        device_id: &DeviceId,
        key: &GroupKey,
        buckets: GroupBuckets,
        new_key: Option<GroupKey>,
        app_id: &ApplicationId,
    ) -> GroupResult<()> {
        let update = BucketUpdate {
            key: key.clone(),
            update_type: UpdateType::Set,
            buckets,
            new_key,
            app_id: app_id.clone(),
        };
        self.update_buckets(device_id, update).await
    }

    pub async fn remove_group(
        &self,
        device_id: &DeviceId,
        key: &GroupKey,
        app_id: &ApplicationId,
    ) -> GroupResult<()> {
        let key = key.clone();
        let app_id = app_id.clone();
        self.request(device_id, |reply| DeviceCommand::RemoveGroup { key, app_id, reply })
            .await?
    }

    /// Forgets every group of a device without touching the device.
    ///
    /// The device returns to the unaudited state. No events are emitted.
    pub async fn purge_group_entries(&self, device_id: &DeviceId) -> GroupResult<usize> {
        match self.inner.existing(device_id) {
            Some(_) => self.request(device_id, |reply| DeviceCommand::Purge { reply }).await,
            None => Ok(0),
        }
    }

    pub async fn purge_all_group_entries(&self) -> GroupResult<usize> {
        let mut removed = 0;
        for device_id in self.inner.known_devices() {
            removed += self.purge_group_entries(&device_id).await?;
        }
        Ok(removed)
    }

    pub fn add_listener(&self, listener: Arc<dyn GroupListener>) -> ListenerId {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    // --- southbound ---

    /// Registers a provider for its URI scheme.
    ///
    /// Operations parked for devices of that scheme are sent right away.
    pub fn register_provider(&self, provider: Arc<dyn GroupProvider>) -> GroupResult<ProviderService> {
        let provider_id = provider.id().clone();
        let registry = Arc::clone(self.inner.transport.providers());
        let token = match registry.register(provider) {
            Ok(token) => token,
            Err(e) => {
                audit_log!(
                    AuditRecord::new(AuditCategory::ProviderRegistration, SOURCE, "register_provider")
                        .with_object_id(provider_id.to_string())
                        .with_object_type("provider")
                        .with_error(e.to_string())
                );
                return Err(e);
            }
        };

        info!(provider = %provider_id, "Provider registered");
        audit_log!(
            AuditRecord::new(AuditCategory::ProviderRegistration, SOURCE, "register_provider")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(provider_id.to_string())
                .with_object_type("provider")
        );

        for device_id in self.inner.known_devices() {
            if device_id.scheme() == provider_id.scheme {
                let _ = self.inner.submit(&device_id, DeviceCommand::Redispatch);
            }
        }

        Ok(ProviderService::new(
            provider_id,
            token,
            registry,
            Arc::downgrade(&self.inner),
        ))
    }

    pub fn unregister_provider(&self, provider_id: &ProviderId) -> GroupResult<()> {
        let result = self.inner.transport.providers().unregister(provider_id);
        let mut record = AuditRecord::new(AuditCategory::ProviderRegistration, SOURCE, "unregister_provider")
            .with_object_id(provider_id.to_string())
            .with_object_type("provider");
        record = match &result {
            Ok(_) => record.with_outcome(AuditOutcome::Success),
            Err(e) => record.with_error(e.to_string()),
        };
        audit_log!(record);
        result?;
        info!(provider = %provider_id, "Provider unregistered");
        Ok(())
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.inner.transport.providers().providers()
    }

    /// Reads the group table of every driver-served device and feeds it to
    /// reconciliation. Returns the number of devices polled.
    pub fn poll_drivers(&self) -> usize {
        let Some(driver) = self.inner.transport.driver() else {
            return 0;
        };
        let devices: BTreeSet<DeviceId> = driver
            .devices()
            .into_iter()
            .chain(self.inner.known_devices())
            .collect();

        let mut polled = 0;
        for device_id in devices {
            let Some(observed) = self.inner.transport.poll_driver(&device_id) else {
                continue;
            };
            if self.inner.submit(&device_id, DeviceCommand::Metrics(observed)).is_err()
                || self.inner.submit(&device_id, DeviceCommand::Redispatch).is_err()
            {
                break;
            }
            polled += 1;
        }
        debug!(polled, "Driver poll complete");
        polled
    }

    /// Polls drivers on the configured interval until the manager shuts
    /// down. Returns `None` when polling is disabled.
    pub fn spawn_driver_poller(&self) -> Option<JoinHandle<()>> {
        let period = self.inner.config.driver_poll_interval_ms;
        if period == 0 || self.inner.transport.driver().is_none() {
            return None;
        }
        let manager = self.clone();
        Some(self.inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(period));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if manager.is_shut_down() {
                    break;
                }
                manager.poll_drivers();
            }
        }))
    }

    // --- lifecycle ---

    /// Waits until the device's queued work, including reports it triggers
    /// along the way, is handled and the resulting events are delivered.
    pub async fn sync(&self, device_id: &DeviceId) {
        if let Some(tx) = self.inner.existing(device_id) {
            loop {
                let (reply, rx) = oneshot::channel();
                if tx.send(DeviceCommand::Sync { reply }).is_err() {
                    break;
                }
                match rx.await {
                    Ok(true) | Err(_) => break,
                    Ok(false) => tokio::task::yield_now().await,
                }
            }
        }
        self.inner.events.barrier().await;
    }

    pub async fn sync_all(&self) {
        for device_id in self.inner.known_devices() {
            self.sync(&device_id).await;
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Stops accepting work, drains device tasks, and delivers pending
    /// events.
    pub async fn shutdown(&self) {
        self.sync_all().await;
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.devices.clear();
        self.inner.events.barrier().await;
        info!("Group manager shut down");
    }
}
