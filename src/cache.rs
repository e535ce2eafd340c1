use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::models::{AvailabilitySnapshot, TenantId, ZoneId};
use crate::redis_client::RedisClient;
use crate::services::Engine;

/// Кеш снимков доступности для витрины.
///
/// Только для чтения: решения о блокировках всегда принимаются по хранилищу.
/// Без Redis каждый запрос идёт напрямую в движок.
#[derive(Clone)]
pub struct AvailabilityCache {
    redis: Option<RedisClient>,
    ttl_secs: u64,
}

impl AvailabilityCache {
    pub fn new(redis: Option<RedisClient>, ttl_secs: u64) -> Self {
        Self { redis, ttl_secs }
    }

    pub fn disabled() -> Self {
        Self::new(None, 0)
    }

    fn key(tenant: TenantId, zone_id: ZoneId) -> String {
        format!("availability:{}:{}", tenant, zone_id)
    }

    // Сначала пробуем кеш, при промахе или ошибке Redis идём в движок
    pub async fn snapshot(&self, engine: &Engine, tenant: TenantId, zone_id: ZoneId) -> EngineResult<AvailabilitySnapshot> {
        let Some(redis) = &self.redis else {
            return engine.inventory().snapshot(tenant, zone_id).await;
        };

        let key = Self::key(tenant, zone_id);
        match redis.get_json::<AvailabilitySnapshot>(&key).await {
            Ok(Some(snapshot)) => {
                debug!(tenant = %tenant, zone = %zone_id, "Availability cache hit");
                return Ok(snapshot);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Availability cache read failed"),
        }

        let snapshot = engine.inventory().snapshot(tenant, zone_id).await?;
        if let Err(e) = redis.set_json_ex(&key, &snapshot, self.ttl_secs).await {
            warn!(error = %e, "Availability cache write failed");
        }
        Ok(snapshot)
    }

    /// Сбрасывает снимки зон после изменяющих запросов.
    pub async fn invalidate(&self, tenant: TenantId, zone_ids: impl IntoIterator<Item = ZoneId>) {
        let Some(redis) = &self.redis else {
            return;
        };
        for zone_id in zone_ids {
            if let Err(e) = redis.del(&Self::key(tenant, zone_id)).await {
                warn!(zone = %zone_id, error = %e, "Availability cache invalidation failed");
            }
        }
    }
}
