//! Router assembly

use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    capture_paypal_order, check_code, create_paypal_order, generate_free_key, health_check, paypal_webhook, send_code,
    test_validate, validate,
};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static("x-api-key")]);

    Router::new()
        // Health
        .route("/health", get(health_check))
        // Phone validation
        .route("/api/validate", get(validate))
        .route("/api/test-validate", get(test_validate))
        // Keys and payments
        .route("/api/generate-free-key", post(generate_free_key))
        .route("/api/create-paypal-order", post(create_paypal_order))
        .route("/api/capture-paypal-order", post(capture_paypal_order))
        .route("/api/paypal-webhook", post(paypal_webhook))
        // OTP
        .route("/api/send-code", post(send_code))
        .route("/api/check-code", post(check_code))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::DemoRateLimiter;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use phoneval_billing::{
        ApiKey, BillingError, CapturedOrder, CreatedOrder, CredentialIssuer, CredentialStore, DisabledNotifier, Fulfillment,
        MemoryCredentialStore, OrderRequest, OrderVerification, PaymentProcessor, PlanCatalog,
    };
    use phoneval_otp::{E164Parser, MemoryAttemptStore, MockOtpProvider, PhoneParser, RateLimitPolicy, VerificationFlow};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Every order is paid
    struct PaidProcessor;

    #[async_trait]
    impl PaymentProcessor for PaidProcessor {
        async fn verify_order(&self, order_id: &str) -> phoneval_billing::Result<OrderVerification> {
            Ok(OrderVerification::from_order(
                order_id,
                json!({ "id": order_id, "status": "COMPLETED" }),
            ))
        }

        async fn create_order(&self, request: &OrderRequest) -> phoneval_billing::Result<CreatedOrder> {
            Ok(CreatedOrder {
                order_id: format!("O-{}", request.plan),
                links: json!([]),
            })
        }

        async fn capture_order(&self, _order_id: &str) -> phoneval_billing::Result<CapturedOrder> {
            Err(BillingError::ProcessorUnavailable("sandbox down".into()))
        }
    }

    fn state(with_collaborators: bool) -> AppState {
        let credentials: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let issuer = Arc::new(CredentialIssuer::new(
            credentials.clone(),
            PlanCatalog::default(),
            Arc::new(DisabledNotifier::new("email disabled in tests")),
        ));
        let parser: Arc<dyn PhoneParser> = Arc::new(E164Parser::new());

        let (payments, otp) = if with_collaborators {
            let payments = Arc::new(Fulfillment::new(issuer.clone(), Arc::new(PaidProcessor)));
            let otp = Arc::new(VerificationFlow::new(
                parser.clone(),
                Arc::new(MockOtpProvider::new()),
                Arc::new(MemoryAttemptStore::new()),
                RateLimitPolicy::default(),
            ));
            (Some(payments), Some(otp))
        } else {
            (None, None)
        };

        AppState {
            credentials,
            issuer,
            payments,
            otp,
            parser,
            demo_limiter: DemoRateLimiter::default(),
        }
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_req(uri: &str, api_key: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(uri);
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, api_key: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::post(uri).header("content-type", "application/json");
        if let Some(key) = api_key {
            builder = builder.header("x-api-key", key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn free_key(app: &Router, email: &str) -> String {
        let (status, body) = call(app, post_json("/api/generate-free-key", None, json!({ "email": email }))).await;
        assert_eq!(status, StatusCode::OK);
        body["api_key"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_reports_collaborators() {
        let (status, body) = call(&router(state(false)), get_req("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["payments_configured"], false);
        assert_eq!(body["otp_configured"], false);

        let (_, body) = call(&router(state(true)), get_req("/health", None)).await;
        assert_eq!(body["otp_configured"], true);
        assert_eq!(body["otp_provider"], "mock");
    }

    #[tokio::test]
    async fn test_free_key_signup_is_idempotent() {
        let app = router(state(false));

        let (status, first) = call(&app, post_json("/api/generate-free-key", None, json!({ "email": "Ada@Example.com" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["plan"], "free");
        assert_eq!(first["requests_limit"], 7);
        assert_eq!(first["existing"], false);
        assert_eq!(first["email_sent"], false);
        assert!(first["email_error"].is_string());

        let (_, second) = call(&app, post_json("/api/generate-free-key", None, json!({ "email": "ada@example.com" }))).await;
        assert_eq!(second["api_key"], first["api_key"]);
        assert_eq!(second["existing"], true);

        let (status, body) = call(&app, post_json("/api/generate-free-key", None, json!({ "email": "not-an-email" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_validate_meters_until_quota_exhausted() {
        let app = router(state(false));
        let key = free_key(&app, "meter@example.com").await;

        let (status, _) = call(&app, get_req("/api/validate?phone=%2B14155552671", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, get_req("/api/validate?phone=%2B14155552671", Some("pk_unknown"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, get_req("/api/validate", Some(&key))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MISSING_PARAMETER");

        for i in 0..7 {
            let (status, body) = call(&app, get_req("/api/validate?phone=%2B14155552671", Some(&key))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["valid"], true);
            assert_eq!(body["number"], "+14155552671");
            assert_eq!(body["country"], "US");
            assert_eq!(body["requests_remaining"], 6 - i);
        }

        let (status, body) = call(&app, get_req("/api/validate?phone=%2B14155552671", Some(&key))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "QUOTA_EXCEEDED");
    }

    #[tokio::test]
    async fn test_rejected_input_is_not_metered() {
        let state = state(false);
        let credentials = state.credentials.clone();
        let app = router(state);
        let key = free_key(&app, "typo@example.com").await;

        for _ in 0..7 {
            let (status, body) = call(&app, get_req("/api/validate?phone=garbage", Some(&key))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["code"], "INVALID_PHONE");
        }

        let stored = credentials.find_by_key(&ApiKey::from_string(key.as_str())).await.unwrap().unwrap();
        assert_eq!(stored.requests_used, 0);

        let (status, body) = call(&app, get_req("/api/validate?phone=%2B14155552671", Some(&key))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requests_remaining"], 6);
    }

    #[tokio::test]
    async fn test_international_numbers_validate() {
        let app = router(state(false));
        let key = free_key(&app, "intl@example.com").await;

        let (status, body) = call(&app, get_req("/api/validate?phone=%2B353871234567", Some(&key))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["country"], "IE");
        assert_eq!(body["type"], "mobile");
    }

    #[tokio::test]
    async fn test_demo_endpoint_throttles_per_ip() {
        let app = router(state(false));
        let request = |ip: &str| {
            Request::get("/api/test-validate?number=020%207946%200958&country=GB")
                .header("x-forwarded-for", ip)
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..5 {
            let (status, body) = call(&app, request("203.0.113.9")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["number"], "+442079460958");
            assert_eq!(body["country"], "GB");
        }

        let (status, body) = call(&app, request("203.0.113.9")).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["retry_after"].as_u64().unwrap() >= 1);

        let (status, _) = call(&app, request("198.51.100.4")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_disabled_collaborators_return_503() {
        let app = router(state(false));
        let key = free_key(&app, "off@example.com").await;

        let (status, body) = call(&app, post_json("/api/send-code", Some(&key), json!({ "phone": "+14155552671" }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "OTP_DISABLED");

        let (status, body) = call(&app, post_json("/api/paypal-webhook", None, json!({ "orderId": "O-1" }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "PAYMENTS_DISABLED");
    }

    #[tokio::test]
    async fn test_webhook_issues_once_per_order() {
        let app = router(state(true));
        let payload = json!({ "orderId": "O-77", "email": "buyer@example.com", "name": "Buyer", "plan": "pro" });

        let (status, first) = call(&app, post_json("/api/paypal-webhook", None, payload.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["plan"], "pro");
        assert_eq!(first["requests_limit"], 10_000);
        assert_eq!(first["existing"], false);

        let (_, second) = call(&app, post_json("/api/paypal-webhook", None, payload)).await;
        assert_eq!(second["api_key"], first["api_key"]);
        assert_eq!(second["existing"], true);

        let (status, body) = call(&app, post_json("/api/paypal-webhook", None, json!({ "email": "x@example.com" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_webhook_acknowledges_ignored_event_types() {
        let app = router(state(true));
        let envelope = json!({ "event_type": "PAYMENT.CAPTURE.REFUNDED", "resource": { "id": "CAP-1" } });

        let (status, body) = call(&app, post_json("/api/paypal-webhook", None, envelope)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ignored"], "PAYMENT.CAPTURE.REFUNDED");
    }

    #[tokio::test]
    async fn test_order_routes() {
        let app = router(state(true));

        let order = json!({ "name": "Ada", "email": "ada@example.com", "plan": "standard" });
        let (status, body) = call(&app, post_json("/api/create-paypal-order", None, order)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["orderId"], "O-standard");

        let (status, body) = call(&app, post_json("/api/capture-paypal-order", None, json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MISSING_PARAMETER");

        let (status, body) = call(&app, post_json("/api/capture-paypal-order", None, json!({ "orderId": "O-1" }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "PROCESSOR_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_send_and_check_code() {
        let app = router(state(true));
        let key = free_key(&app, "otp@example.com").await;
        let phone = json!({ "phone": "+14155552671" });

        let (status, _) = call(&app, post_json("/api/send-code", None, phone.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = call(&app, post_json("/api/send-code", Some(&key), phone.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["phone"], "+14155552671");

        let check = |code: &str| json!({ "phone": "+14155552671", "code": code });

        let (status, body) = call(&app, post_json("/api/check-code", Some(&key), check("12ab56"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (status, body) = call(&app, post_json("/api/check-code", Some(&key), check("000000"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["verified"], false);

        let (status, body) = call(&app, post_json("/api/check-code", Some(&key), check("123456"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verified"], true);

        // The challenge is consumed
        let (status, body) = call(&app, post_json("/api/check-code", Some(&key), check("123456"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "VERIFICATION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_send_code_rate_limited_per_phone() {
        let app = router(state(true));
        let key = free_key(&app, "limit@example.com").await;
        let phone = json!({ "phone": "+14155552671" });

        for _ in 0..3 {
            let (status, _) = call(&app, post_json("/api/send-code", Some(&key), phone.clone())).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = call(&app, post_json("/api/send-code", Some(&key), phone)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["code"], "RATE_LIMITED");
        assert!(body["error"].as_str().unwrap().contains("minute"));
        assert!(body["retry_after"].as_u64().unwrap() > 0);
    }
}
