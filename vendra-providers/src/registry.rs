use std::collections::HashMap;
use std::sync::Arc;

use vendra_core::{ProviderDriver, ProviderKind};

use crate::{InternalStoreDriver, PinDeckDriver, TopupBoxDriver};

/// Provider kind to driver instance, resolved once at startup. Dispatch never
/// selects a driver by string comparison.
pub struct DriverRegistry {
    drivers: HashMap<ProviderKind, Arc<dyn ProviderDriver>>,
}

impl DriverRegistry {
    /// Registry covering every supported provider kind.
    pub fn with_defaults() -> Self {
        let mut drivers: HashMap<ProviderKind, Arc<dyn ProviderDriver>> = HashMap::new();
        drivers.insert(
            ProviderKind::Internal,
            Arc::new(InternalStoreDriver::new()),
        );
        drivers.insert(ProviderKind::PinDeck, Arc::new(PinDeckDriver::new()));
        drivers.insert(ProviderKind::TopupBox, Arc::new(TopupBoxDriver::new()));
        Self { drivers }
    }

    /// Empty registry for wiring scripted drivers in tests.
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: ProviderKind, driver: Arc<dyn ProviderDriver>) {
        self.drivers.insert(kind, driver);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderDriver>> {
        self.drivers.get(&kind).cloned()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl vendra_core::DriverLookup for DriverRegistry {
    fn driver_for(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderDriver>> {
        self.get(kind)
    }
}
