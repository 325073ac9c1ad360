/// Pool manager behaviour around driver unload and concurrent first access.
mod helpers;
use driver_engine::registry::{DriverPreUnloadEvent, DriverRegistry, UnloadListener};
use driver_engine::{Connection, DataSourcePool, DriverError, DynamicPoolManager};
use helpers::Harness;
use std::sync::{Arc, Barrier, Mutex, Weak};
use std::thread;

/// Subscribed after the pool manager; records what it sees during the
/// pre-unload notification.
struct TeardownObserver {
    registry: Weak<DriverRegistry>,
    pool: Arc<DataSourcePool>,
    seen: Mutex<Vec<(bool, bool)>>,
}

impl UnloadListener for TeardownObserver {
    fn on_pre_unload(&self, event: &DriverPreUnloadEvent) {
        let loaded = self
            .registry
            .upgrade()
            .map(|r| r.is_loaded(event.driver_id))
            .unwrap_or(false);
        self.seen
            .lock()
            .unwrap()
            .push((self.pool.is_closed(), loaded));
    }
}

#[test]
fn test_pools_close_before_driver_teardown() {
    let h = Harness::new();
    let stats = h.loader.provide_mock("a.so", "mock.Driver", "mock:");
    let driver = h.registry.register(&h.module("a.so", "A"), &[], None).unwrap();
    let ds = h.data_source("orders", "mock:orders", driver.id);

    let pool = h.pools.get_pool(ds.id).unwrap();
    {
        let conn = pool.get().unwrap();
        assert_eq!(conn.get_connection().product_name().unwrap(), "mock.Driver");
    }
    assert!(stats.open() >= 1);

    let observer = Arc::new(TeardownObserver {
        registry: Arc::downgrade(&h.registry),
        pool: Arc::clone(&pool),
        seen: Mutex::new(Vec::new()),
    });
    h.registry.events().subscribe_pre_unload(observer.clone());

    h.registry.unload(driver.id).unwrap();

    // Pool already closed while the driver was still loaded.
    assert_eq!(*observer.seen.lock().unwrap(), vec![(true, true)]);
    assert!(pool.is_closed());
    assert_eq!(stats.open(), 0);
    assert!(!h.pools.is_cached(ds.id));
    assert!(matches!(pool.get(), Err(DriverError::PoolClosed(_))));
    assert!(matches!(
        h.pools.get_pool(ds.id),
        Err(DriverError::DriverNotLoaded(_))
    ));
    assert_eq!(h.registry.metrics().get_lifecycle_metrics().pools_closed, 1);
}

/// Asks the pool manager for a pool while the unload is in flight.
struct LateRequester {
    pools: Weak<DynamicPoolManager>,
    data_source_id: i64,
    outcomes: Mutex<Vec<Result<Arc<DataSourcePool>, DriverError>>>,
}

impl UnloadListener for LateRequester {
    fn on_pre_unload(&self, _event: &DriverPreUnloadEvent) {
        if let Some(pools) = self.pools.upgrade() {
            let outcome = pools.get_pool(self.data_source_id);
            self.outcomes.lock().unwrap().push(outcome);
        }
    }
}

#[test]
fn test_pool_requested_during_unload_is_refused() {
    let h = Harness::new();
    let stats = h.loader.provide_mock("a.so", "mock.Driver", "mock:");
    let driver = h.registry.register(&h.module("a.so", "A"), &[], None).unwrap();
    let ds = h.data_source("orders", "mock:orders", driver.id);
    let before = h.pools.get_pool(ds.id).unwrap();

    let requester = Arc::new(LateRequester {
        pools: Arc::downgrade(&h.pools),
        data_source_id: ds.id,
        outcomes: Mutex::new(Vec::new()),
    });
    h.registry.events().subscribe_pre_unload(requester.clone());
    h.registry.unload(driver.id).unwrap();

    {
        let outcomes = requester.outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], Err(DriverError::DriverNotLoaded(id)) if id == driver.id));
    }
    assert!(before.is_closed());
    assert!(!h.pools.is_cached(ds.id));
    assert!(matches!(
        h.pools.get_pool(ds.id),
        Err(DriverError::DriverNotLoaded(_))
    ));
    assert_eq!(stats.open(), 0);

    // Reactivation brings the same id back with a fresh pool.
    let again = h.registry.register(&h.module("a.so", "A"), &[], None).unwrap();
    assert_eq!(again.id, driver.id);
    let after = h.pools.get_pool(ds.id).unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(!after.is_closed());
    let conn = after.get().unwrap();
    assert_eq!(conn.get_connection().product_name().unwrap(), "mock.Driver");
}

#[test]
fn test_unload_closes_only_pools_of_that_driver() {
    let h = Harness::new();
    h.loader.provide_mock("a.so", "mock.A", "a:");
    h.loader.provide_mock("b.so", "mock.B", "b:");
    let a = h.registry.register(&h.module("a.so", "A"), &[], None).unwrap();
    let b = h.registry.register(&h.module("b.so", "B"), &[], None).unwrap();
    let ds_a1 = h.data_source("a1", "a:one", a.id);
    let ds_a2 = h.data_source("a2", "a:two", a.id);
    let ds_b = h.data_source("b", "b:one", b.id);

    let pool_a1 = h.pools.get_pool(ds_a1.id).unwrap();
    let pool_a2 = h.pools.get_pool(ds_a2.id).unwrap();
    let pool_b = h.pools.get_pool(ds_b.id).unwrap();

    h.registry.unload(a.id).unwrap();
    assert!(pool_a1.is_closed() && pool_a2.is_closed());
    assert!(!pool_b.is_closed());
    assert!(pool_b.get().is_ok());
    assert!(h.pools.is_cached(ds_b.id));
}

#[test]
fn test_pool_connects_through_bound_driver_only() {
    let h = Harness::new();
    h.loader.provide_mock("a.so", "mock.A", "shared:");
    h.loader.provide_mock("b.so", "mock.B", "shared:");
    let a = h.registry.register(&h.module("a.so", "A"), &[], None).unwrap();
    let b = h.registry.register(&h.module("b.so", "B"), &[], None).unwrap();
    let ds = h.data_source("bound", "shared:db", b.id);

    let pool = h.pools.get_pool(ds.id).unwrap();
    let conn = pool.get().unwrap();
    assert_eq!(conn.get_connection().product_name().unwrap(), "mock.B");
    assert_ne!(a.id, b.id);
}

#[test]
fn test_concurrent_first_access_builds_one_pool() {
    const THREADS: usize = 8;
    let h = Harness::new();
    h.loader.provide_mock("a.so", "mock.Driver", "mock:");
    let driver = h.registry.register(&h.module("a.so", "A"), &[], None).unwrap();
    let ds = h.data_source("hot", "mock:hot", driver.id);

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let pools: Arc<DynamicPoolManager> = Arc::clone(&h.pools);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                pools.get_pool(ds.id).unwrap()
            })
        })
        .collect();

    let pools: Vec<Arc<DataSourcePool>> = handles.into_iter().map(|t| t.join().unwrap()).collect();
    assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
    assert_eq!(h.registry.metrics().get_lifecycle_metrics().pools_created, 1);
}

#[test]
fn test_missing_data_source_and_unloaded_driver() {
    let h = Harness::new();
    assert!(matches!(
        h.pools.get_pool(42),
        Err(DriverError::DataSourceNotFound(42))
    ));

    h.loader.provide_mock("a.so", "mock.Driver", "mock:");
    let driver = h.registry.register(&h.module("a.so", "A"), &[], None).unwrap();
    h.registry.unload(driver.id).unwrap();
    let ds = h.data_source("late", "mock:db", driver.id);
    assert!(matches!(
        h.pools.get_pool(ds.id),
        Err(DriverError::DriverNotLoaded(_))
    ));
    assert!(!h.pools.is_cached(ds.id));
}

#[test]
fn test_pool_credentials_reach_driver() {
    let h = Harness::new();
    let stats = h.loader.provide_mock("a.so", "mock.Driver", "mock:");
    let driver = h.registry.register(&h.module("a.so", "A"), &[], None).unwrap();
    let ds = h
        .store
        .save_data_source(
            &driver_engine::DataSourceDescriptor::new("secure", "mock:db", driver.id)
                .with_credentials("app", "s3cret"),
        )
        .unwrap();

    let pool = h.pools.get_pool(ds.id).unwrap();
    assert!(pool.health_check());
    assert!(stats.connects() >= 1);
    h.pools.close_all();
    assert!(pool.is_closed());
}
