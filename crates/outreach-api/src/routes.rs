//! API routes

use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use outreach_common::config::ApiConfig;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::handlers::{campaigns, conversations, health, messages, metrics, send, signals};
use crate::state::AppState;

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let state = Arc::new(state);

    // Health check routes
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Campaign routes
    let campaign_routes = Router::new()
        .route("/", get(campaigns::list_campaigns))
        .route("/", post(campaigns::create_campaign))
        .route("/:campaign_id", get(campaigns::get_campaign))
        .route("/:campaign_id/start", post(campaigns::start_campaign))
        .route("/:campaign_id/pause", post(campaigns::pause_campaign))
        .route("/:campaign_id/progress", get(campaigns::get_campaign_progress))
        .route("/:campaign_id/contacts", post(campaigns::upload_contacts));

    let tenant_routes = Router::new()
        .route("/send", post(send::send))
        .route("/messages", get(messages::list_messages))
        .route("/signals", post(signals::receive_signal))
        .route("/conversations/exists", get(conversations::conversation_exists))
        .nest("/campaigns", campaign_routes);

    let api_v1 = Router::new()
        .nest("/tenants/:tenant_id", tenant_routes)
        .with_state(state.clone());

    Router::new()
        .nest("/health", health_routes)
        .route("/metrics", get(metrics::metrics))
        .with_state(state)
        .nest("/api/v1", api_v1)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config.cors_origins)),
        )
}

/// No configured origins means no cross-origin access; `*` allows any
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::campaigns::{CampaignListResponse, CampaignResponse};
    use crate::handlers::conversations::ExistsResponse;
    use crate::handlers::messages::MessageListResponse;
    use crate::handlers::send::SendResponse;
    use crate::handlers::signals::SignalResponse;
    use crate::ErrorResponse;
    use axum::http::StatusCode;
    use axum_test::TestServer;
    use chrono::Utc;
    use outreach_common::config::{ChannelSettings, Config};
    use outreach_core::{Backends, IngestReceipt, Metrics, Services};
    use outreach_storage::memory::MemoryStore;
    use outreach_storage::models::{CampaignProgress, SendSetting};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;

    struct TestApp {
        server: TestServer,
        setting: SendSetting,
    }

    impl TestApp {
        fn tenant_path(&self, path: &str) -> String {
            format!("/api/v1/tenants/{}{}", self.setting.tenant_id, path)
        }
    }

    fn setting(tenant_id: Uuid) -> SendSetting {
        SendSetting {
            id: Uuid::new_v4(),
            tenant_id,
            name: "reminders".to_string(),
            channel_token: "main".to_string(),
            api_token: Uuid::new_v4().simple().to_string(),
            enabled: true,
            callback_url: None,
            expiration_value: None,
            expiration_unit: None,
            suspend_value: None,
            suspend_unit: None,
            send_message_to_open_conversation: false,
            objective: None,
            action: None,
            template_id: None,
            team_id: None,
            tags: json!([]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
        let mut config = Config::default();
        config.gateway.channels.insert(
            "main".to_string(),
            ChannelSettings {
                enabled: true,
                workspace_id: "ws-1".to_string(),
                channel_id: "chan-1".to_string(),
                bot_id: Some("bot-1".to_string()),
                session_window_hours: Some(24),
            },
        );
        configure(&mut config);

        let store = Arc::new(MemoryStore::new());
        let setting = setting(Uuid::new_v4());
        store.insert_send_setting(setting.clone()).await;

        let metrics = Arc::new(Metrics::new().unwrap());
        let services = Services::build(
            Backends::in_memory(store, &config, metrics.clone()),
            metrics,
            &config,
        )
        .unwrap();

        let router = create_router(AppState::new(Arc::new(services), None), &config.api);
        TestApp {
            server: TestServer::new(router).unwrap(),
            setting,
        }
    }

    async fn app() -> TestApp {
        app_with(|_| {}).await
    }

    #[tokio::test]
    async fn test_health_checks() {
        let app = app().await;

        app.server.get("/health").await.assert_status_ok();
        app.server.get("/health/live").await.assert_status_ok();
        app.server.get("/health/ready").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let app = app().await;

        let response = app.server.get("/metrics").await;
        response.assert_status_ok();
        assert!(response.text().contains("outreach_rate_limited_total"));
    }

    #[tokio::test]
    async fn test_send_is_accepted() {
        let app = app().await;

        let response = app
            .server
            .post(&app.tenant_path("/send"))
            .json(&json!({
                "api_token": app.setting.api_token,
                "phone": "+55 11 98765-4321",
                "text": "hello",
                "external_id": "order-1"
            }))
            .await;

        response.assert_status(StatusCode::ACCEPTED);
        let body: SendResponse = response.json();
        assert_eq!(body.external_id, "order-1");
        assert_eq!(body.status, "queued");
    }

    #[tokio::test]
    async fn test_repeated_external_id_is_in_flight() {
        let app = app().await;
        let body = json!({
            "api_token": app.setting.api_token,
            "phone": "5511987654321",
            "text": "hello",
            "external_id": "order-2"
        });

        app.server
            .post(&app.tenant_path("/send"))
            .json(&body)
            .await
            .assert_status(StatusCode::ACCEPTED);
        let response = app.server.post(&app.tenant_path("/send")).json(&body).await;

        response.assert_status(StatusCode::ACCEPTED);
        let body: SendResponse = response.json();
        assert_eq!(body.status, "in_flight");
        assert!(body.attempt_id.is_none());
    }

    #[tokio::test]
    async fn test_signals() {
        let app = app().await;

        let response = app
            .server
            .post(&app.tenant_path("/signals"))
            .json(&json!({
                "kind": "received",
                "phone": "5511987654321",
                "channel_id": "chan-1"
            }))
            .await;
        response.assert_status_ok();
        let body: SignalResponse = response.json();
        assert_eq!(body.applied, 0);

        app.server
            .post(&app.tenant_path("/signals"))
            .json(&json!({
                "kind": "status",
                "conversation_id": "conv-1",
                "code": -99
            }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);

        app.server
            .post(&app.tenant_path("/signals"))
            .json(&json!({
                "kind": "read",
                "phone": "12",
                "channel_id": "chan-1"
            }))
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_send_with_foreign_token_is_not_found() {
        let app = app().await;

        let response = app
            .server
            .post(&format!("/api/v1/tenants/{}/send", Uuid::new_v4()))
            .json(&json!({
                "api_token": app.setting.api_token,
                "phone": "5511987654321",
                "text": "hello"
            }))
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_send_over_rate_limit() {
        let app = app_with(|c| c.rate_limit.max_per_window = 1).await;
        let body = json!({
            "api_token": app.setting.api_token,
            "phone": "5511987654321",
            "text": "hello"
        });

        app.server
            .post(&app.tenant_path("/send"))
            .json(&body)
            .await
            .assert_status(StatusCode::ACCEPTED);
        app.server
            .post(&app.tenant_path("/send"))
            .json(&body)
            .await
            .assert_status(StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_send_with_bad_phone() {
        let app = app().await;

        let response = app
            .server
            .post(&app.tenant_path("/send"))
            .json(&json!({
                "api_token": app.setting.api_token,
                "phone": "123",
                "text": "hello"
            }))
            .await;

        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_list_messages_empty() {
        let app = app().await;

        let response = app
            .server
            .get(&app.tenant_path("/messages"))
            .add_query_param("api_token", &app.setting.api_token)
            .await;

        response.assert_status_ok();
        let body: MessageListResponse = response.json();
        assert!(body.data.is_empty());
    }

    #[tokio::test]
    async fn test_list_messages_with_unknown_token() {
        let app = app().await;

        app.server
            .get(&app.tenant_path("/messages"))
            .add_query_param("api_token", "nope")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_conversation_exists() {
        let app = app().await;

        let response = app
            .server
            .get(&app.tenant_path("/conversations/exists"))
            .add_query_param("phone", "5511987654321")
            .await;

        response.assert_status_ok();
        let body: ExistsResponse = response.json();
        assert!(!body.exists);

        app.server
            .get(&app.tenant_path("/conversations/exists"))
            .add_query_param("phone", "12")
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    async fn create_campaign(app: &TestApp) -> CampaignResponse {
        let response = app
            .server
            .post(&app.tenant_path("/campaigns"))
            .json(&json!({
                "name": "Black friday",
                "send_setting_id": app.setting.id,
                "template_id": "promo",
                "send_interval_secs": 0,
                "attributes": [{ "name": "first_name", "label": "First name" }]
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        response.json()
    }

    #[tokio::test]
    async fn test_campaign_lifecycle() {
        let app = app().await;
        let campaign = create_campaign(&app).await;
        assert_eq!(campaign.status, "draft");

        let fetched: CampaignResponse = app
            .server
            .get(&app.tenant_path(&format!("/campaigns/{}", campaign.id)))
            .await
            .json();
        assert_eq!(fetched.id, campaign.id);

        let listed: CampaignListResponse = app
            .server
            .get(&app.tenant_path("/campaigns"))
            .add_query_param("status", "draft")
            .await
            .json();
        assert_eq!(listed.data.len(), 1);

        let later = Utc::now() + chrono::Duration::hours(1);
        let response = app
            .server
            .post(&app.tenant_path(&format!("/campaigns/{}/start", campaign.id)))
            .json(&json!({ "scheduled_at": later }))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        let scheduled: CampaignResponse = response.json();
        assert_eq!(scheduled.status, "awaiting_send");

        let paused: CampaignResponse = app
            .server
            .post(&app.tenant_path(&format!("/campaigns/{}/pause", campaign.id)))
            .await
            .json();
        assert_eq!(paused.status, "paused");
    }

    #[tokio::test]
    async fn test_unknown_campaign() {
        let app = app().await;

        let response = app
            .server
            .get(&app.tenant_path(&format!("/campaigns/{}", Uuid::new_v4())))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "CAMPAIGN_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_upload_contacts_reports_progress() {
        let app = app().await;
        let campaign = create_campaign(&app).await;

        let response = app
            .server
            .post(&app.tenant_path(&format!("/campaigns/{}/contacts", campaign.id)))
            .json(&json!({
                "contacts": [
                    { "phone": "5511987654321", "name": "Ana",
                      "attributes": [{ "name": "first_name", "value": "Ana" }] },
                    { "phone": "5511987650000", "name": "Bia",
                      "attributes": [{ "name": "first_name", "value": "Bia" }] },
                    { "phone": "x", "name": "broken" }
                ]
            }))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        let receipt: IngestReceipt = response.json();
        assert_eq!(receipt.queued, 2);
        assert_eq!(receipt.rejected, 1);

        let mut progress = CampaignProgress::default();
        for _ in 0..50 {
            progress = app
                .server
                .get(&app.tenant_path(&format!("/campaigns/{}/progress", campaign.id)))
                .await
                .json();
            if progress.finished {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(progress.finished);
        assert_eq!(progress.processing_total, 2);
        assert_eq!(progress.processed_total, 2);
    }
}
