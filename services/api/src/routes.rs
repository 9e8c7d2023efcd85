use crate::infra::AppState;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use axum::Json;
use preload_registry::workflows::preload::{
    registry_router, DomainStore, EligibilityScanner, PreloadListSource, PreloadRegistry,
};
use serde_json::json;
use std::sync::Arc;

/// Prefix the registry API is served under.
pub(crate) const API_PREFIX: &str = "/api/v2";

const HSTS_POLICY: &str = "max-age=31536000; includeSubDomains; preload";

pub(crate) fn with_registry_routes<S, C, L>(registry: Arc<PreloadRegistry<S, C, L>>) -> axum::Router
where
    S: DomainStore + 'static,
    C: EligibilityScanner + 'static,
    L: PreloadListSource + 'static,
{
    axum::Router::new()
        .nest(API_PREFIX, registry_router(registry))
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .layer(middleware::from_fn(strict_transport_security))
}

/// Adds the service's own HSTS policy to responses served over HTTPS by the
/// fronting proxy.
pub(crate) async fn strict_transport_security(request: Request, next: Next) -> Response {
    let secure = request
        .headers()
        .get("x-forwarded-proto")
        .is_some_and(|proto| proto.as_bytes() == b"https");
    let mut response = next.run(request).await;
    if secure {
        response.headers_mut().insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS_POLICY),
        );
    }
    response
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use preload_registry::workflows::preload::{
        Issues, MemoryDomainStore, PolicyType, PreloadList, PreloadListError, RegistrySettings,
    };
    use std::sync::atomic::AtomicBool;
    use tower::ServiceExt;

    struct AcceptAll;

    #[async_trait::async_trait]
    impl EligibilityScanner for AcceptAll {
        async fn eligible(&self, _domain: &str, _policy: &PolicyType) -> Issues {
            Issues::default()
        }

        async fn removable(&self, _domain: &str) -> Issues {
            Issues::default()
        }
    }

    struct EmptyList;

    #[async_trait::async_trait]
    impl PreloadListSource for EmptyList {
        async fn latest(&self) -> Result<PreloadList, PreloadListError> {
            Ok(PreloadList::default())
        }
    }

    fn app(ready: bool) -> axum::Router {
        let registry = Arc::new(PreloadRegistry::new(
            Arc::new(MemoryDomainStore::default()),
            Arc::new(AcceptAll),
            Arc::new(EmptyList),
            RegistrySettings::default(),
        ));
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(recorder.handle()),
        };
        with_registry_routes(registry).layer(Extension(state))
    }

    #[tokio::test]
    async fn registry_routes_are_served_under_the_api_prefix() {
        let response = app(true)
            .oneshot(
                Request::get("/api/v2/status?domain=example.com")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .get(header::STRICT_TRANSPORT_SECURITY)
            .is_none());
    }

    #[tokio::test]
    async fn https_requests_carry_the_hsts_policy() {
        let response = app(true)
            .oneshot(
                Request::get("/health")
                    .header("X-Forwarded-Proto", "https")
                    .body(Body::empty())
                    .expect("request builds"),
            )
            .await
            .expect("route executes");
        assert_eq!(
            response.headers().get(header::STRICT_TRANSPORT_SECURITY),
            Some(&HeaderValue::from_static(HSTS_POLICY))
        );
    }

    #[tokio::test]
    async fn readiness_reflects_the_flag() {
        let response = app(false)
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request builds"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
