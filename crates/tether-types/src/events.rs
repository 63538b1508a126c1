//! Event types and the event bus
//!
//! Every conceptual transition (device found, connection opened, runtime
//! bound, pin written, ...) produces exactly one [`TetherEvent`]. Events are
//! wrapped in a [`TetherEventEnvelope`] and fanned out over a broadcast
//! [`EventBus`] shared by all subsystems.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::device::{Device, DeviceProtocol};
use crate::hardware::{ConflictResolution, PinMode, PinValue};
use crate::ids::{AbstractionId, DeviceId, ExecutionId};
use crate::runtime::RuntimeType;

/// Channel capacity for the event bus
const EVENT_CHANNEL_CAPACITY: usize = 4096;

/// Envelope wrapping all Tether events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TetherEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Subsystem that emitted the event
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// The actual event
    pub event: TetherEvent,
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Connection manager
    Connection,
    /// Capability store
    Device,
    /// Hardware abstraction registry
    Hardware,
    /// Runtime binder
    Binding,
    /// Execution manager
    Execution,
    /// Runtime coordinator
    Coordinator,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Tether events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TetherEvent {
    // ═══════════════════════════════════════════════════════════════════
    // DEVICE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    /// A device appeared in discovery
    DeviceDiscovered { device: Device },

    /// A previously known device disappeared
    DeviceLost { device_id: DeviceId },

    /// Capabilities were computed or merged
    CapabilitiesUpdated { device_id: DeviceId },

    // ═══════════════════════════════════════════════════════════════════
    // CONNECTION EVENTS
    // ═══════════════════════════════════════════════════════════════════
    ConnectionEstablished {
        device_id: DeviceId,
        protocol: DeviceProtocol,
    },

    ConnectionError { device_id: DeviceId, message: String },

    ConnectionLost { device_id: DeviceId },

    /// A health ping succeeded
    DeviceActivity { device_id: DeviceId },

    // ═══════════════════════════════════════════════════════════════════
    // BINDING EVENTS
    // ═══════════════════════════════════════════════════════════════════
    RuntimeBound {
        device_id: DeviceId,
        runtime_type: RuntimeType,
    },

    RuntimeSwitched {
        device_id: DeviceId,
        from: RuntimeType,
        to: RuntimeType,
    },

    RuntimeUnbound {
        device_id: DeviceId,
        runtime_type: RuntimeType,
    },

    // ═══════════════════════════════════════════════════════════════════
    // HARDWARE EVENTS
    // ═══════════════════════════════════════════════════════════════════
    AbstractionRegistered {
        abstraction_id: AbstractionId,
        device_id: DeviceId,
        runtime_type: RuntimeType,
    },

    AbstractionUnregistered {
        abstraction_id: AbstractionId,
        released_resources: usize,
    },

    PinStateChanged {
        abstraction_id: AbstractionId,
        pin: u8,
        mode: PinMode,
        value: Option<PinValue>,
    },

    SensorDataUpdated {
        abstraction_id: AbstractionId,
        sensor_id: String,
        value: serde_json::Value,
    },

    ComponentUpdated {
        abstraction_id: AbstractionId,
        component_id: String,
    },

    /// A claim hit a resource owned by another abstraction
    HardwareConflict {
        resource: String,
        owner: AbstractionId,
        claimant: AbstractionId,
        strategy: ConflictResolution,
        granted: bool,
    },

    // ═══════════════════════════════════════════════════════════════════
    // EXECUTION EVENTS
    // ═══════════════════════════════════════════════════════════════════
    ExecutionStarted {
        device_id: DeviceId,
        execution_id: ExecutionId,
        runtime_type: RuntimeType,
    },

    ExecutionCompleted {
        device_id: DeviceId,
        execution_id: ExecutionId,
        success: bool,
        duration_ms: u64,
    },

    ExecutionFailed {
        device_id: DeviceId,
        execution_id: ExecutionId,
        error: String,
    },

    ExecutionInterrupted {
        device_id: DeviceId,
        execution_id: ExecutionId,
    },

    // ═══════════════════════════════════════════════════════════════════
    // COORDINATOR EVENTS
    // ═══════════════════════════════════════════════════════════════════
    RuntimeInitialized { runtime_type: RuntimeType },

    RuntimeInitializationFailed {
        runtime_type: RuntimeType,
        reason: String,
    },

    /// A runtime's liveness flag flipped to not ready
    HealthWarning {
        runtime_type: RuntimeType,
        message: String,
    },

    /// A runtime previously flagged unresponsive is ready again
    RuntimeRecovered { runtime_type: RuntimeType },

    CoordinatorReady { runtimes: Vec<RuntimeType> },

    CoordinatorShutdown,
}

impl TetherEvent {
    /// Device the event concerns, if any
    pub fn device_id(&self) -> Option<&DeviceId> {
        match self {
            TetherEvent::DeviceDiscovered { device } => Some(&device.id),
            TetherEvent::DeviceLost { device_id }
            | TetherEvent::CapabilitiesUpdated { device_id }
            | TetherEvent::ConnectionEstablished { device_id, .. }
            | TetherEvent::ConnectionError { device_id, .. }
            | TetherEvent::ConnectionLost { device_id }
            | TetherEvent::DeviceActivity { device_id }
            | TetherEvent::RuntimeBound { device_id, .. }
            | TetherEvent::RuntimeSwitched { device_id, .. }
            | TetherEvent::RuntimeUnbound { device_id, .. }
            | TetherEvent::AbstractionRegistered { device_id, .. }
            | TetherEvent::ExecutionStarted { device_id, .. }
            | TetherEvent::ExecutionCompleted { device_id, .. }
            | TetherEvent::ExecutionFailed { device_id, .. }
            | TetherEvent::ExecutionInterrupted { device_id, .. } => Some(device_id),
            _ => None,
        }
    }
}

impl TetherEventEnvelope {
    /// Create a new event envelope
    pub fn new(event: TetherEvent, source: EventSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity: Self::infer_severity(&event),
            event,
        }
    }

    /// Infer severity from event type
    fn infer_severity(event: &TetherEvent) -> EventSeverity {
        match event {
            TetherEvent::ConnectionError { .. }
            | TetherEvent::ExecutionFailed { .. }
            | TetherEvent::RuntimeInitializationFailed { .. } => EventSeverity::Error,

            TetherEvent::DeviceLost { .. }
            | TetherEvent::ConnectionLost { .. }
            | TetherEvent::HardwareConflict { .. }
            | TetherEvent::HealthWarning { .. }
            | TetherEvent::ExecutionInterrupted { .. } => EventSeverity::Warning,

            TetherEvent::DeviceActivity { .. }
            | TetherEvent::PinStateChanged { .. }
            | TetherEvent::SensorDataUpdated { .. }
            | TetherEvent::ComponentUpdated { .. } => EventSeverity::Debug,

            _ => EventSeverity::Info,
        }
    }
}

/// Broadcast bus shared by every subsystem
///
/// Cloning the bus clones the sender; all clones feed the same stream.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TetherEventEnvelope>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<TetherEventEnvelope> {
        self.tx.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emit an event. Having no subscribers is fine.
    pub fn emit(&self, source: EventSource, event: TetherEvent) {
        let _ = self.tx.send(TetherEventEnvelope::new(event, source));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_emission() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(
            EventSource::Connection,
            TetherEvent::ConnectionError {
                device_id: DeviceId::new("d1"),
                message: "port busy".into(),
            },
        );

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        assert_eq!(received.source, EventSource::Connection);
        assert_eq!(received.severity, EventSeverity::Error);
        assert_eq!(received.event.device_id(), Some(&DeviceId::new("d1")));
    }

    #[test]
    fn test_subscriber_count() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let _rx1 = bus.subscribe();
        let _rx2 = bus.clone().subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_severity_inference() {
        let envelope = TetherEventEnvelope::new(
            TetherEvent::HealthWarning {
                runtime_type: RuntimeType::MicroPython,
                message: "not ready".into(),
            },
            EventSource::Coordinator,
        );
        assert_eq!(envelope.severity, EventSeverity::Warning);
    }
}
