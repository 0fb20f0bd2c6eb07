// Sabre travel API client with a pooled SOAP session manager

pub mod api_client;
pub mod config;
pub mod endpoints;
pub mod envelope;
pub mod queries;
pub mod session_pool;
pub mod session_source;
pub mod shared_cache;
pub mod soap;

// Re-export key types for convenience
pub use api_client::{
    AccessToken, ApiClient, ApiError, ClientError, HttpMethod, Payload, StaticTokenProvider,
    TokenProvider,
};
pub use config::{ClientConfig, Environment, PoolConfig, SoapConfig};
pub use endpoints::{CityPairsKind, Endpoint};
pub use envelope::{extract_security_token, ExtractionError, SessionToken};
pub use queries::{CityPairsQuery, DestinationFinderQuery, LeadPriceQuery, TopDestinationsQuery};
pub use session_pool::{PoolError, SessionPool, SweepReport};
pub use session_source::{SessionTokenSource, SoapSessionSource};
pub use shared_cache::{CacheError, CacheStatsReport, MemoryCache, SharedCache};
pub use soap::SoapServices;
