use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::TenantId;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Тенант текущего запроса из заголовка `X-Tenant-Id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tenant(pub TenantId);

impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = EngineError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // Получаем заголовок
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| EngineError::InvalidRequest("missing X-Tenant-Id header".into()))?;

        // Проверяем что это UUID
        let id = Uuid::parse_str(raw.trim())
            .map_err(|_| EngineError::InvalidRequest("X-Tenant-Id must be a UUID".into()))?;

        Ok(Tenant(TenantId::from(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<Tenant, EngineError> {
        let mut builder = Request::builder().uri("/api/holds/lock");
        if let Some(value) = header {
            builder = builder.header("X-Tenant-Id", value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Tenant::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_tenant_from_header() {
        let id = Uuid::new_v4();
        let tenant = extract(Some(&id.to_string())).await.unwrap();
        assert_eq!(tenant.0, TenantId::from(id));
    }

    #[tokio::test]
    async fn missing_header_is_a_bad_request() {
        let err = extract(None).await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_header_is_a_bad_request() {
        let err = extract(Some("tenant-42")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }
}
