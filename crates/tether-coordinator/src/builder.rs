//! Coordinator builder

use std::collections::BTreeMap;
use std::sync::Arc;

use tether_binding::{BindingStore, RuntimeBinder};
use tether_device::{ConnectionManager, DeviceDiscovery, StaticDiscovery, Transport, VirtualTransport};
use tether_execution::ExecutionManager;
use tether_hardware::HardwareRegistry;
use tether_selection::{CustomScorer, SelectionPolicy};
use tether_types::{EventBus, RuntimeType};
use tracing::warn;

use crate::config::CoordinatorConfig;
use crate::coordinator::RuntimeCoordinator;
use crate::provider::RuntimeProvider;

/// Assembles a [`RuntimeCoordinator`] from its collaborators
///
/// Without an explicit discovery source the coordinator sees no devices.
/// A [`VirtualTransport`] is always registered; transports added here
/// replace it for the protocol they serve.
#[derive(Default)]
pub struct RuntimeCoordinatorBuilder {
    config: CoordinatorConfig,
    events: Option<EventBus>,
    discovery: Option<Arc<dyn DeviceDiscovery>>,
    transports: Vec<Arc<dyn Transport>>,
    providers: Vec<Arc<dyn RuntimeProvider>>,
    binding_store: Option<Arc<dyn BindingStore>>,
    custom_scorer: Option<Arc<dyn CustomScorer>>,
}

impl RuntimeCoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_discovery(mut self, discovery: Arc<dyn DeviceDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn RuntimeProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_binding_store(mut self, store: Arc<dyn BindingStore>) -> Self {
        self.binding_store = Some(store);
        self
    }

    pub fn with_custom_scorer(mut self, scorer: Arc<dyn CustomScorer>) -> Self {
        self.custom_scorer = Some(scorer);
        self
    }

    pub fn build(self) -> Arc<RuntimeCoordinator> {
        let config = self.config;
        let events = self.events.unwrap_or_default();

        let discovery = self
            .discovery
            .unwrap_or_else(|| Arc::new(StaticDiscovery::new()));
        let connections = Arc::new(ConnectionManager::new(
            config.connection.clone(),
            discovery,
            events.clone(),
        ));
        connections.register_transport(Arc::new(VirtualTransport::new()));
        for transport in self.transports {
            connections.register_transport(transport);
        }

        let hardware = Arc::new(HardwareRegistry::new(config.hardware.clone(), events.clone()));

        let mut policy = SelectionPolicy::new(config.selection.clone());
        if let Some(scorer) = self.custom_scorer {
            policy = policy.with_custom_scorer(scorer);
        }

        let binder = Arc::new(match self.binding_store {
            Some(store) => RuntimeBinder::with_store(events.clone(), store),
            None => RuntimeBinder::new(events.clone()),
        });
        let executions = Arc::new(ExecutionManager::new(
            config.execution.clone(),
            Arc::clone(&binder),
            events.clone(),
        ));

        let mut providers: BTreeMap<RuntimeType, Arc<dyn RuntimeProvider>> = BTreeMap::new();
        for provider in self.providers {
            if providers.insert(provider.runtime_type(), provider).is_some() {
                warn!("Duplicate runtime provider replaced an earlier one");
            }
        }

        Arc::new(RuntimeCoordinator::from_parts(
            config,
            events,
            connections,
            hardware,
            policy,
            binder,
            executions,
            providers,
        ))
    }
}
