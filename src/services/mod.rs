// Resolution
pub mod customer_resolver;
pub mod page_cache;
pub mod pricing_context;
pub mod territory_resolver;

// Document building
pub mod bundle_expander;
pub mod delivery_slot;
pub mod payment_reconciler;

// Orchestration
pub mod batch_migration;
pub mod order_sync;

// Background work
pub mod customer_sync;
pub mod live_poller;
pub mod sync_worker;
pub mod zone_sync;

pub use batch_migration::{BackfillOptions, BatchMigrationCoordinator, BatchReport};
pub use customer_resolver::{CustomerResolver, ResolvedCustomer};
pub use customer_sync::CustomerSync;
pub use live_poller::LivePoller;
pub use order_sync::{OrderSyncCoordinator, PreparedSync};
pub use page_cache::PageCache;
pub use payment_reconciler::{categorize, PaymentReconciler};
pub use pricing_context::PricingContextResolver;
pub use sync_worker::SyncWorker;
pub use territory_resolver::{TerritoryMatch, TerritoryResolver};
pub use zone_sync::{ZoneSync, ZoneSyncReport};
