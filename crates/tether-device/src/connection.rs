//! Device registry and connection manager
//!
//! Owns the device lifecycle: discovery diffing, one transport connection per
//! device at most, and periodic liveness pings.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use tether_types::{
    Connection, ConnectionConfig, ConnectionStatus, Device, DeviceId, DeviceProtocol, EventBus,
    EventSource, TetherEvent,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ConnectionManagerConfig;
use crate::discovery::DeviceDiscovery;
use crate::error::{DeviceError, Result};
use crate::transport::Transport;

/// Result of diffing one discovery pass against the known device set
#[derive(Debug, Clone, Default)]
pub struct DiscoveryDiff {
    /// Devices seen for the first time
    pub added: Vec<Device>,

    /// Previously known devices that are gone
    pub lost: Vec<DeviceId>,

    /// Every device currently present
    pub present: Vec<Device>,
}

/// Outcome of one health-check pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthCheckReport {
    pub checked: usize,
    pub healthy: usize,
    pub failed: Vec<DeviceId>,
}

/// Device registry and connection manager
pub struct ConnectionManager {
    config: ConnectionManagerConfig,
    discovery: Arc<dyn DeviceDiscovery>,
    transports: DashMap<DeviceProtocol, Arc<dyn Transport>>,
    devices: DashMap<DeviceId, Device>,
    connections: DashMap<DeviceId, Connection>,
    events: EventBus,

    /// Serializes discovery passes so a device is never reported lost twice
    discovery_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionManagerConfig,
        discovery: Arc<dyn DeviceDiscovery>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            discovery,
            transports: DashMap::new(),
            devices: DashMap::new(),
            connections: DashMap::new(),
            events,
            discovery_lock: Mutex::new(()),
        }
    }

    /// Register the transport for a protocol, replacing any previous one
    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        debug!(protocol = %transport.protocol(), "Registering transport");
        self.transports.insert(transport.protocol(), transport);
    }

    pub fn config(&self) -> &ConnectionManagerConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run discovery and return the current device set
    pub async fn get_available_devices(&self) -> Result<Vec<Device>> {
        Ok(self.refresh_devices().await?.present)
    }

    /// Run discovery and apply the diff against known devices
    ///
    /// New devices produce `DeviceDiscovered`. Devices that disappeared are
    /// force-disconnected first and then produce `DeviceLost`.
    #[instrument(skip(self))]
    pub async fn refresh_devices(&self) -> Result<DiscoveryDiff> {
        let _guard = self.discovery_lock.lock().await;

        let discovered: BTreeMap<DeviceId, Device> = self
            .discovery
            .discover()
            .await?
            .into_iter()
            .map(|device| (device.id.clone(), device))
            .collect();

        let lost: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|entry| !discovered.contains_key(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for device_id in &lost {
            if let Err(e) = self.disconnect_device(device_id).await {
                warn!(device_id = %device_id, error = %e, "Forced disconnect of lost device failed");
            }
            self.connections.remove(device_id);

            if self.devices.remove(device_id).is_some() {
                info!(device_id = %device_id, "Device lost");
                self.events.emit(
                    EventSource::Connection,
                    TetherEvent::DeviceLost {
                        device_id: device_id.clone(),
                    },
                );
            }
        }

        let mut diff = DiscoveryDiff {
            lost,
            ..Default::default()
        };

        for (device_id, device) in discovered {
            let known = self.devices.get(&device_id).map(|d| d.clone());
            match known {
                Some(known) => diff.present.push(known),
                None => {
                    info!(device_id = %device_id, name = %device.name, protocol = %device.protocol, "Device discovered");
                    self.devices.insert(device_id, device.clone());
                    self.events.emit(
                        EventSource::Connection,
                        TetherEvent::DeviceDiscovered {
                            device: device.clone(),
                        },
                    );
                    diff.added.push(device.clone());
                    diff.present.push(device);
                }
            }
        }

        Ok(diff)
    }

    /// Known devices without running discovery
    pub fn known_devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.iter().map(|d| d.value().clone()).collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    pub fn get_device(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices.get(device_id).map(|d| d.clone())
    }

    /// Open a connection to a known device
    ///
    /// Returns the existing connection if the device is already connected.
    #[instrument(skip(self, config), fields(device_id = %device_id))]
    pub async fn connect_to_device(
        &self,
        device_id: &DeviceId,
        config: ConnectionConfig,
    ) -> Result<Connection> {
        let device = self
            .get_device(device_id)
            .ok_or_else(|| DeviceError::DeviceNotFound(device_id.clone()))?;

        let existing = self.connections.get(device_id).map(|c| c.clone());
        if let Some(existing) = existing {
            if existing.is_connected() {
                debug!("Already connected");
                return Ok(existing);
            }
            // A link that failed after opening is closed before reconnecting
            self.teardown(&existing).await;
        }

        let protocol = config.protocol.unwrap_or(device.protocol);
        let transport = self
            .transports
            .get(&protocol)
            .map(|t| Arc::clone(t.value()))
            .ok_or(DeviceError::NoTransport(protocol))?;

        let config = ConnectionConfig {
            protocol: Some(protocol),
            baud_rate: Some(config.baud_rate.unwrap_or(self.config.default_baud_rate)),
            timeout: config.timeout,
        };
        let timeout = config.timeout.unwrap_or_else(|| self.config.connect_timeout());

        let mut connection = Connection::new(device_id.clone(), protocol);
        connection.status = ConnectionStatus::Connecting;
        self.connections.insert(device_id.clone(), connection.clone());

        debug!(protocol = %protocol, timeout_ms = timeout.as_millis() as u64, "Connecting");

        match tokio::time::timeout(timeout, transport.connect(&device, &config)).await {
            Ok(Ok(params)) => {
                let now = Utc::now();
                connection.status = ConnectionStatus::Connected;
                connection.connected_at = Some(now);
                connection.last_activity = Some(now);
                connection.params = params;
                self.connections.insert(device_id.clone(), connection.clone());

                info!(protocol = %protocol, "Connection established");
                self.events.emit(
                    EventSource::Connection,
                    TetherEvent::ConnectionEstablished {
                        device_id: device_id.clone(),
                        protocol,
                    },
                );
                Ok(connection)
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                self.mark_failed(device_id, ConnectionStatus::Error, &message);
                Err(DeviceError::Connection {
                    device_id: device_id.clone(),
                    message,
                })
            }
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                self.mark_failed(
                    device_id,
                    ConnectionStatus::Timeout,
                    &format!("connection timed out after {}ms", timeout_ms),
                );
                Err(DeviceError::Timeout {
                    device_id: device_id.clone(),
                    timeout_ms,
                })
            }
        }
    }

    fn mark_failed(&self, device_id: &DeviceId, status: ConnectionStatus, message: &str) {
        if let Some(mut conn) = self.connections.get_mut(device_id) {
            conn.status = status;
            conn.error = Some(message.to_string());
        }

        error!(device_id = %device_id, status = %status, error = %message, "Connection failed");
        self.events.emit(
            EventSource::Connection,
            TetherEvent::ConnectionError {
                device_id: device_id.clone(),
                message: message.to_string(),
            },
        );
    }

    /// Close the connection to a device. No-op if not connected.
    #[instrument(skip(self), fields(device_id = %device_id))]
    pub async fn disconnect_device(&self, device_id: &DeviceId) -> Result<()> {
        let existing = self.connections.get(device_id).map(|c| c.clone());
        let connection = match existing {
            Some(conn) if conn.is_connected() => conn,
            Some(conn) => {
                // Failed or pending: close a link that did open, no event
                self.teardown(&conn).await;
                self.connections.remove(device_id);
                return Ok(());
            }
            None => return Ok(()),
        };

        self.teardown(&connection).await;
        self.connections.remove(device_id);
        info!("Connection closed");
        self.events.emit(
            EventSource::Connection,
            TetherEvent::ConnectionLost {
                device_id: device_id.clone(),
            },
        );

        Ok(())
    }

    /// Best-effort transport teardown for a link that was opened
    async fn teardown(&self, connection: &Connection) {
        if connection.connected_at.is_none() {
            return;
        }
        let transport = self
            .transports
            .get(&connection.protocol)
            .map(|t| Arc::clone(t.value()));

        if let Some(transport) = transport {
            if let Err(e) = transport.disconnect(&connection.device_id).await {
                warn!(device_id = %connection.device_id, error = %e, "Transport teardown failed");
            }
        }
    }

    pub fn is_device_connected(&self, device_id: &DeviceId) -> bool {
        self.connections
            .get(device_id)
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    pub fn get_connection(&self, device_id: &DeviceId) -> Option<Connection> {
        self.connections.get(device_id).map(|c| c.clone())
    }

    pub fn list_connections(&self) -> Vec<Connection> {
        self.connections.iter().map(|c| c.value().clone()).collect()
    }

    /// Ping every connected device
    #[instrument(skip(self))]
    pub async fn check_connection_health(&self) -> HealthCheckReport {
        let targets: Vec<(DeviceId, Option<Arc<dyn Transport>>)> = self
            .connections
            .iter()
            .filter(|c| c.is_connected())
            .map(|c| {
                let transport = self.transports.get(&c.protocol).map(|t| Arc::clone(t.value()));
                (c.device_id.clone(), transport)
            })
            .collect();

        let pings = targets.into_iter().map(|(device_id, transport)| async move {
            let outcome = match transport {
                Some(transport) => transport.ping(&device_id).await.map_err(|e| e.to_string()),
                None => Err("no transport registered".to_string()),
            };
            (device_id, outcome)
        });

        let mut report = HealthCheckReport::default();
        for (device_id, outcome) in join_all(pings).await {
            report.checked += 1;
            match outcome {
                Ok(()) => {
                    report.healthy += 1;
                    if let Some(mut conn) = self.connections.get_mut(&device_id) {
                        conn.last_activity = Some(Utc::now());
                    }
                    self.events.emit(
                        EventSource::Connection,
                        TetherEvent::DeviceActivity { device_id },
                    );
                }
                Err(message) => {
                    self.mark_failed(&device_id, ConnectionStatus::Error, &message);
                    report.failed.push(device_id);
                }
            }
        }

        report
    }

    /// Spawn the discovery and health-check loops
    ///
    /// The loops stop when `shutdown` is cancelled.
    pub fn spawn_background_tasks(self: &Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let discovery_manager = Arc::clone(self);
        let discovery_token = shutdown.clone();
        let discovery_handle = tokio::spawn(async move {
            let mut ticker = interval(discovery_manager.config.discovery_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = discovery_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = discovery_manager.refresh_devices().await {
                            error!(error = %e, "Device discovery cycle failed");
                        }
                    }
                }
            }
            debug!("Discovery loop stopped");
        });

        let health_manager = Arc::clone(self);
        let health_token = shutdown;
        let health_handle = tokio::spawn(async move {
            let mut ticker = interval(health_manager.config.health_check_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = health_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = health_manager.check_connection_health().await;
                        if !report.failed.is_empty() {
                            warn!(failed = report.failed.len(), checked = report.checked, "Connection health check found failures");
                        }
                    }
                }
            }
            debug!("Health check loop stopped");
        });

        vec![discovery_handle, health_handle]
    }
}
