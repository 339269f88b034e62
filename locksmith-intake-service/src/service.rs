use axum::{
    Form, Router,
    extract::{Path, State},
    http::{HeaderValue, Request, StatusCode, header},
    middleware::{Next, from_fn},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use intake_flow::{Coordinates, InboundMessage, IntakeRunner, Session};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

const EMPTY_TWIML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>";

#[derive(Clone)]
pub struct AppState {
    pub runner: IntakeRunner,
}

impl AppState {
    pub fn new(runner: IntakeRunner) -> Self {
        Self { runner }
    }
}

/// Fields of Twilio's inbound WhatsApp webhook that the intake uses
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TwilioWebhook {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body")]
    pub body: String,
    #[serde(rename = "Latitude")]
    pub latitude: Option<String>,
    #[serde(rename = "Longitude")]
    pub longitude: Option<String>,
}

impl TwilioWebhook {
    /// Coordinates of a shared location, when both parse
    fn coordinates(&self) -> Option<Coordinates> {
        let latitude = self.latitude.as_deref()?.trim().parse().ok()?;
        let longitude = self.longitude.as_deref()?.trim().parse().ok()?;
        Some(Coordinates::new(latitude, longitude)).filter(Coordinates::is_valid)
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/whatsapp", post(whatsapp_webhook))
        .route("/session/{client_id}", get(get_session))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(mut request: Request<axum::body::Body>, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }
    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

async fn health_check() -> &'static str {
    "OK"
}

/// Twilio retries on anything but 200, so the webhook always acknowledges
async fn whatsapp_webhook(State(state): State<AppState>, Form(webhook): Form<TwilioWebhook>) -> Response {
    let client_id = webhook.from.trim().to_string();
    if client_id.is_empty() {
        warn!("Webhook without sender ignored");
        return twiml_ack();
    }

    let mut message = InboundMessage::new(client_id.clone(), webhook.body.clone());
    if let Some(coordinates) = webhook.coordinates() {
        message = message.with_coordinates(coordinates);
    }

    info!(
        client_id = %client_id,
        content_length = webhook.body.len(),
        has_location = message.coordinates.is_some(),
        "Processing inbound message"
    );

    match state.runner.handle(message).await {
        Ok(report) => info!(
            client_id = %client_id,
            stage = %report.stage,
            replied = report.delivered.is_some(),
            ticket = ?report.ticket,
            "Message handled"
        ),
        Err(e) => error!(client_id = %client_id, error = %e, "Failed to handle message"),
    }

    twiml_ack()
}

fn twiml_ack() -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], EMPTY_TWIML).into_response()
}

async fn get_session(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<Session>, (StatusCode, Json<Value>)> {
    match state.runner.storage().get(&client_id).await {
        Ok(Some(session)) => Ok(Json(session)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Session not found", "client_id": client_id })),
        )),
        Err(e) => {
            error!(client_id = %client_id, error = %e, "Failed to get session");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to get session", "details": e.to_string() })),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use intake_flow::{DialogueMachine, HandoffNotifier, InMemorySessionStorage, ProviderCatalog, ReplySender};
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    #[derive(Default)]
    struct Outbox(Mutex<Vec<String>>);

    #[async_trait]
    impl ReplySender for Outbox {
        async fn send(&self, _client_id: &str, text: &str) -> intake_flow::Result<()> {
            self.0.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl HandoffNotifier for Outbox {
        async fn notify(&self, _client_id: &str, summary: &str) -> intake_flow::Result<()> {
            self.0.lock().unwrap().push(summary.to_string());
            Ok(())
        }
    }

    fn app() -> (Router, Arc<Outbox>) {
        let outbox = Arc::new(Outbox::default());
        let runner = IntakeRunner::new(
            Arc::new(InMemorySessionStorage::new()),
            Arc::new(DialogueMachine::new(Arc::new(ProviderCatalog::empty()))),
            outbox.clone(),
            Arc::new(Outbox::default()),
        );
        (build_router(AppState::new(runner)), outbox)
    }

    fn inbound(form: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/whatsapp")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "OK");
    }

    #[tokio::test]
    async fn test_webhook_acknowledges_and_advances_session() {
        let (app, outbox) = app();

        let response = app
            .clone()
            .oneshot(inbound("From=whatsapp%3A%2B5491155550000&Body=1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("<Response></Response>"));
        assert_eq!(outbox.0.lock().unwrap().len(), 1);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/session/whatsapp:%2B5491155550000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let session: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(session["stage"], "duplicate_role");
    }

    #[tokio::test]
    async fn test_webhook_without_sender_still_returns_200() {
        let (app, outbox) = app();
        let response = app.oneshot(inbound("Body=hola")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(outbox.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::builder().uri("/session/nobody").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_webhook_coordinates() {
        let webhook = TwilioWebhook {
            latitude: Some("-34.6509".to_string()),
            longitude: Some("-58.6198".to_string()),
            ..Default::default()
        };
        assert_eq!(webhook.coordinates(), Some(Coordinates::new(-34.6509, -58.6198)));

        let broken = TwilioWebhook {
            latitude: Some("north".to_string()),
            longitude: Some("-58.6".to_string()),
            ..Default::default()
        };
        assert!(broken.coordinates().is_none());
        assert!(TwilioWebhook::default().coordinates().is_none());
    }
}
