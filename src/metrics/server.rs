use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;

use super::Metrics;
use crate::utils::CircuitState;

/// Serve `/metrics` and `/health` until the actix system stops.
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> std::io::Result<()> {
    tracing::info!("Starting metrics server on http://0.0.0.0:{}/metrics", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(metrics.clone()))
            .configure(routes)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler));
}

async fn metrics_handler(metrics: web::Data<Arc<Metrics>>) -> impl Responder {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metrics.registry().gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

/// Checkout keeps working while notifications are down, so an open breaker
/// reports `degraded` rather than failing the check.
async fn health_handler(metrics: web::Data<Arc<Metrics>>) -> impl Responder {
    let notifications = match metrics.circuit_breaker_state.get() {
        s if s == CircuitState::Open.as_gauge() => "open",
        s if s == CircuitState::HalfOpen.as_gauge() => "half_open",
        _ => "closed",
    };

    HttpResponse::Ok().json(serde_json::json!({
        "status": if notifications == "open" { "degraded" } else { "healthy" },
        "service": "storefront-orders",
        "notifications": notifications,
        "orders_created": metrics.orders_created.get(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;

    fn app_metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new().unwrap())
    }

    #[actix_web::test]
    async fn test_health_reports_notification_breaker() {
        let metrics = app_metrics();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(metrics.clone()))
                .configure(routes),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["notifications"], "closed");

        metrics.update_circuit_breaker_state(CircuitState::Open.as_gauge());
        metrics.orders_created.inc();

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["orders_created"], 1);
    }

    #[actix_web::test]
    async fn test_metrics_endpoint_exposes_registry() {
        let metrics = app_metrics();
        metrics.record_rejection("duplicate");
        let app = test::init_service(App::new().app_data(web::Data::new(metrics)).configure(routes)).await;

        let body = test::call_and_read_body(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
        let text = String::from_utf8(body.to_vec()).unwrap();

        assert!(text.contains("checkout_rejections_total{reason=\"duplicate\"} 1"));
    }
}
