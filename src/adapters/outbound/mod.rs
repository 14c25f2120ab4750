mod corrosion_backend_repo;
mod dashmap_binding_repo;
mod dashmap_metrics_store;
mod maxmind_geo_resolver;
mod sqlite_backend_repo;

pub use corrosion_backend_repo::{CorrosionBackendRepository, CorrosionConfig};
pub use dashmap_binding_repo::DashMapBindingRepository;
pub use dashmap_metrics_store::DashMapMetricsStore;
pub use maxmind_geo_resolver::MaxMindGeoResolver;
pub use sqlite_backend_repo::SqliteBackendRepository;
