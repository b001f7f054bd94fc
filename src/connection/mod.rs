use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::cloud_provider::{CloudConnection, CloudDriver, Kind};
use crate::errors::EngineError;
use crate::resources::RegionInfo;

pub mod catalog;

pub use catalog::{ConnectionCatalog, ConnectionConfig, StaticCatalog};

/// Resolved once per connection name and cached for the adapter's lifetime.
/// Immutable after construction; concurrent calls share it freely.
pub struct ConnectionBundle {
    pub connection_name: String,
    pub provider: Kind,
    pub region: RegionInfo,
    pub connection: Arc<dyn CloudConnection>,
}

/// Startup-time driver table: provider kind -> factory. Adding a provider is
/// one `register` call at process startup, nothing in the core changes.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<Kind, Arc<dyn CloudDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        DriverRegistry::default()
    }

    pub fn register(mut self, driver: Arc<dyn CloudDriver>) -> Self {
        self.drivers.insert(driver.kind(), driver);
        self
    }

    pub fn get(&self, kind: Kind) -> Option<Arc<dyn CloudDriver>> {
        self.drivers.get(&kind).cloned()
    }
}

/// Routes a connection name to its instantiated adapter bundle. Pure
/// routing: no retries, no backend calls beyond driver instantiation.
pub struct ConnectionManager {
    registry: DriverRegistry,
    catalog: Arc<dyn ConnectionCatalog>,
    bundles: RwLock<HashMap<String, Arc<ConnectionBundle>>>,
}

impl ConnectionManager {
    pub fn new(registry: DriverRegistry, catalog: Arc<dyn ConnectionCatalog>) -> Self {
        ConnectionManager {
            registry,
            catalog,
            bundles: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached bundle for `connection_name`, constructing it on
    /// first use. Construction happens under the write lock, so racing
    /// callers for one unseen name converge on a single bundle: the first
    /// writer wins and everyone else reuses its backend client handles.
    pub fn resolve(&self, connection_name: &str) -> Result<Arc<ConnectionBundle>, EngineError> {
        if let Ok(bundles) = self.bundles.read() {
            if let Some(bundle) = bundles.get(connection_name) {
                return Ok(bundle.clone());
            }
        }

        let mut bundles = self
            .bundles
            .write()
            .map_err(|_| EngineError::new_validation("connection cache lock poisoned".to_string()))?;
        if let Some(bundle) = bundles.get(connection_name) {
            return Ok(bundle.clone());
        }

        let config = self
            .catalog
            .get(connection_name)
            .ok_or_else(|| EngineError::new_unknown_connection(connection_name))?;
        let driver = self.registry.get(config.provider).ok_or_else(|| {
            EngineError::new_driver_load(config.provider, "driver is not registered".to_string())
        })?;
        let connection = driver.connect(&config.credential, &config.region)?;
        info!(
            "connection `{}` bound to {} in {} (capabilities {:?})",
            connection_name,
            config.provider,
            config.region.region_zone(),
            driver.capabilities()
        );

        let bundle = Arc::new(ConnectionBundle {
            connection_name: connection_name.to_string(),
            provider: config.provider,
            region: config.region,
            connection,
        });
        bundles.insert(connection_name.to_string(), bundle.clone());
        Ok(bundle)
    }

    /// Drops the cached bundle; the next resolve reconstructs it. Adapters
    /// are stateless wrappers over client handles, nothing else to tear
    /// down.
    pub fn invalidate(&self, connection_name: &str) {
        if let Ok(mut bundles) = self.bundles.write() {
            bundles.remove(connection_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::cloud_provider::mock::MockDriver;
    use crate::cloud_provider::{Capability, ProviderCredential};
    use crate::resources::RegionInfo;

    struct CountingDriver {
        connects: AtomicU32,
        inner: MockDriver,
    }

    impl CloudDriver for CountingDriver {
        fn kind(&self) -> Kind {
            Kind::Mock
        }
        fn capabilities(&self) -> Capability {
            Capability::all()
        }
        fn connect(
            &self,
            credential: &ProviderCredential,
            region: &RegionInfo,
        ) -> Result<Arc<dyn CloudConnection>, EngineError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.inner.connect(credential, region)
        }
    }

    fn mock_config() -> ConnectionConfig {
        ConnectionConfig {
            provider: Kind::Mock,
            credential: ProviderCredential {
                identity: "mock-user".to_string(),
                secret: "mock-secret".to_string(),
                extra: vec![],
            },
            region: RegionInfo::new("mock-region-1", "zone-a"),
        }
    }

    #[test]
    fn test_unknown_connection_name() {
        let manager = ConnectionManager::new(
            DriverRegistry::new().register(Arc::new(MockDriver::new())),
            Arc::new(StaticCatalog::new()),
        );
        assert!(matches!(
            manager.resolve("nowhere"),
            Err(EngineError::UnknownConnection { .. })
        ));
    }

    #[test]
    fn test_unregistered_driver_is_a_load_error() {
        let manager = ConnectionManager::new(
            DriverRegistry::new(),
            Arc::new(StaticCatalog::new().with_connection("mock-seoul", mock_config())),
        );
        assert!(matches!(
            manager.resolve("mock-seoul"),
            Err(EngineError::DriverLoad { .. })
        ));
    }

    #[test]
    fn test_concurrent_resolves_construct_exactly_one_bundle() {
        // setup:
        let driver = Arc::new(CountingDriver {
            connects: AtomicU32::new(0),
            inner: MockDriver::new(),
        });
        let manager = Arc::new(ConnectionManager::new(
            DriverRegistry::new().register(driver.clone()),
            Arc::new(StaticCatalog::new().with_connection("mock-seoul", mock_config())),
        ));

        // execute: 50 simulated callers race on one unseen connection name
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || manager.resolve("mock-seoul").map(|bundle| Arc::as_ptr(&bundle) as usize))
            })
            .collect();
        let pointers: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();

        // verify: one construction, every caller sees the same instance
        assert_eq!(driver.connects.load(Ordering::SeqCst), 1);
        assert!(pointers.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn test_invalidate_forces_reconstruction() {
        let driver = Arc::new(CountingDriver {
            connects: AtomicU32::new(0),
            inner: MockDriver::new(),
        });
        let manager = ConnectionManager::new(
            DriverRegistry::new().register(driver.clone()),
            Arc::new(StaticCatalog::new().with_connection("mock-seoul", mock_config())),
        );

        manager.resolve("mock-seoul").unwrap();
        manager.resolve("mock-seoul").unwrap();
        assert_eq!(driver.connects.load(Ordering::SeqCst), 1);

        manager.invalidate("mock-seoul");
        manager.resolve("mock-seoul").unwrap();
        assert_eq!(driver.connects.load(Ordering::SeqCst), 2);
    }
}
