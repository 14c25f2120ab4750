mod proxy_service;

pub use proxy_service::ProxyService;
