mod backend_repository;
mod binding_repository;
mod geo_resolver;
mod metrics_store;

pub use backend_repository::BackendRepository;
pub use binding_repository::BindingRepository;
pub use geo_resolver::GeoResolver;
pub use metrics_store::MetricsStore;
