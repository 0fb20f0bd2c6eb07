// Pooled SOAP services
// Each call checks a session out of the pool, posts the action and checks it back in

use crate::session_pool::{PoolError, SessionPool};
use crate::session_source::SoapSessionSource;
use crate::shared_cache::SharedCache;
use std::sync::Arc;
use tracing::info;

pub const BARGAIN_FINDER_MAX: &str = "BargainFinderMaxRQ";
pub const HOTEL_AVAILABILITY: &str = "OTA_HotelAvailLLSRQ";

pub struct SoapServices<C> {
    pool: Arc<SessionPool<C, SoapSessionSource>>,
}

impl<C: SharedCache> SoapServices<C> {
    pub fn new(pool: Arc<SessionPool<C, SoapSessionSource>>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<SessionPool<C, SoapSessionSource>> {
        &self.pool
    }

    // `body` is the serialized request element placed inside the SOAP body
    pub async fn call(&self, action: &str, body: &str) -> Result<String, PoolError> {
        info!(action, "pooled SOAP call");
        let source = self.pool.source();
        self.pool
            .with_session(|token| async move { source.call(action, &token, body).await })
            .await
    }

    pub async fn bargain_finder_max(&self, body: &str) -> Result<String, PoolError> {
        self.call(BARGAIN_FINDER_MAX, body).await
    }

    pub async fn hotel_availability(&self, body: &str) -> Result<String, PoolError> {
        self.call(HOTEL_AVAILABILITY, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::mock_server::{serve, XML};
    use crate::api_client::ApiError;
    use crate::config::{ClientConfig, PoolConfig};
    use crate::envelope::SessionToken;
    use crate::session_source::mock_source::CREATE_RS;
    use crate::shared_cache::MemoryCache;

    // nothing listens here, so calls that reach the network fail fast
    const UNREACHABLE: &str = "http://127.0.0.1:9";

    fn services(cache: Arc<MemoryCache>) -> SoapServices<MemoryCache> {
        services_at(cache, UNREACHABLE)
    }

    fn services_at(cache: Arc<MemoryCache>, base_url: &str) -> SoapServices<MemoryCache> {
        let mut config = ClientConfig::default();
        config.soap.url = Some(format!("{}/websvc", base_url));
        config.timeout_ms = 500;

        let source = Arc::new(SoapSessionSource::new(&config).unwrap());
        let pool = SessionPool::new(cache, source, PoolConfig::default());
        SoapServices::new(Arc::new(pool))
    }

    #[tokio::test]
    async fn test_call_without_pool_is_not_initialized() {
        let services = services(Arc::new(MemoryCache::new()));
        let result = services.hotel_availability("<OTA_HotelAvailRQ/>").await;
        assert!(matches!(result, Err(PoolError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_network_failure_still_releases_session() {
        let cache = Arc::new(MemoryCache::new());
        // seed a one-slot pool by hand so no remote create is needed
        cache.set("index_sessions", "1".to_string());
        cache.set("session_0", "Shared/IDL:T1".to_string());
        let services = services(Arc::clone(&cache));

        let result = services.bargain_finder_max("<BargainFinderMaxRQ/>").await;

        assert!(matches!(result, Err(PoolError::Api(ApiError::Network(_)))));
        assert_eq!(services.pool().available(), Some(1));
    }

    #[tokio::test]
    async fn test_pooled_call_sends_checked_out_token() {
        let (base_url, server) = serve(
            XML,
            vec![(200, CREATE_RS), (200, "<BargainFinderMaxRS Version=\"3.4.0\"/>")],
        )
        .await;
        let services = services_at(Arc::new(MemoryCache::new()), &base_url);

        let created = services.pool().create_session_pool(1).await;
        assert_eq!(created[&0], Some(SessionToken::new("Shared/IDL:S1")));

        let response = services
            .bargain_finder_max("<BargainFinderMaxRQ Version=\"3.4.0\"/>")
            .await
            .unwrap();
        assert_eq!(response, "<BargainFinderMaxRS Version=\"3.4.0\"/>");
        assert_eq!(services.pool().available(), Some(1));

        let requests = server.await.unwrap();
        let sent = &requests[1];
        assert!(sent.starts_with("POST /websvc HTTP/1.1"));
        assert!(sent.contains("<eb:Action>BargainFinderMaxRQ</eb:Action>"));
        assert!(sent.contains(">Shared/IDL:S1</wsse:BinarySecurityToken>"));
        assert!(sent.contains(
            "<SOAP-ENV:Body><BargainFinderMaxRQ Version=\"3.4.0\"/></SOAP-ENV:Body>"
        ));
    }
}
