//! HTTP Handlers

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use phoneval_billing::{
    ApiKey, BillingError, CapturedOrder, CreatedOrder, Credential, IssueOutcome, OrderRequest, PaymentPayload, Plan,
    Usage,
};
use phoneval_otp::{LineType, OtpError, ParsedPhone, PhoneParser, ProviderError};

use crate::state::AppState;
use crate::throttle::client_ip;

const API_KEY_HEADER: &str = "x-api-key";

// ============================================================================
// Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub payments_configured: bool,
    pub otp_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp_provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.into(),
            retry_after: None,
        }),
    )
}

#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TestValidateQuery {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub number: String,
    pub country: String,
    #[serde(rename = "type")]
    pub line_type: LineType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_remaining: Option<u64>,
}

impl ValidateResponse {
    fn new(parsed: ParsedPhone, requests_remaining: Option<u64>) -> Self {
        Self {
            valid: parsed.valid,
            number: parsed.e164,
            country: parsed.region,
            line_type: parsed.line_type,
            requests_remaining,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FreeKeyRequest {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CaptureRequest {
    #[serde(default, rename = "orderId")]
    pub order_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct KeyResponse {
    pub api_key: String,
    pub plan: Plan,
    pub requests_limit: u64,
    pub requests_used: u64,
    pub existing: bool,
    pub email_sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_error: Option<String>,
    pub message: String,
}

impl From<IssueOutcome> for KeyResponse {
    fn from(outcome: IssueOutcome) -> Self {
        let message = match (outcome.created, outcome.email_sent, &outcome.email_error) {
            (false, _, _) => "API key already exists",
            (true, true, _) => "API key generated and welcome email sent successfully",
            (true, false, Some(_)) => {
                "API key generated successfully. Email could not be sent - see email_error for details."
            }
            (true, false, None) => "API key generated successfully",
        };
        let credential = outcome.credential;
        Self {
            api_key: credential.key.to_string(),
            plan: credential.plan,
            requests_limit: credential.requests_limit,
            requests_used: credential.requests_used,
            existing: !outcome.created,
            email_sent: outcome.email_sent,
            email_error: outcome.email_error,
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendCodeRequest {
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendCodeResponse {
    pub success: bool,
    pub message: &'static str,
    pub phone: String,
    pub verification_sid: String,
}

#[derive(Debug, Deserialize)]
pub struct CheckCodeRequest {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckCodeResponse {
    pub success: bool,
    pub verified: bool,
    pub phone: String,
    pub message: &'static str,
}

// ============================================================================
// Error Mapping
// ============================================================================

fn billing_error(e: BillingError) -> ApiError {
    let status = match &e {
        BillingError::Validation(_) | BillingError::PaymentRejected { .. } => StatusCode::BAD_REQUEST,
        BillingError::ProcessorUnavailable(_) | BillingError::StorageDegraded(_) => StatusCode::SERVICE_UNAVAILABLE,
        BillingError::Notification(_) | BillingError::Config(_) | BillingError::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        tracing::error!(code = e.code(), "Billing error: {}", e);
    } else {
        tracing::info!(code = e.code(), "Billing request rejected: {}", e);
    }
    api_error(status, e.user_message(), e.code())
}

fn otp_error(e: OtpError) -> ApiError {
    let (status, code) = match &e {
        OtpError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
        OtpError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED"),
        OtpError::Provider(ProviderError::InvalidDestination(_)) => (StatusCode::BAD_REQUEST, "INVALID_PHONE"),
        OtpError::Provider(ProviderError::RateLimited(_)) => (StatusCode::TOO_MANY_REQUESTS, "PROVIDER_RATE_LIMITED"),
        OtpError::Provider(ProviderError::UnknownChallenge(_)) => (StatusCode::NOT_FOUND, "VERIFICATION_NOT_FOUND"),
        OtpError::Provider(ProviderError::AuthMisconfigured(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_MISCONFIGURED")
        }
        OtpError::Provider(ProviderError::Unavailable(_)) | OtpError::StorageDegraded(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
        }
        OtpError::Provider(ProviderError::Other { .. }) => (StatusCode::INTERNAL_SERVER_ERROR, "PROVIDER_ERROR"),
        OtpError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
    };
    if status.is_server_error() {
        tracing::error!(code, "OTP error: {}", e);
    }

    let retry_after = match &e {
        OtpError::RateLimited { retry_after_secs, .. } => Some(*retry_after_secs),
        _ => None,
    };
    let (status, Json(mut body)) = api_error(status, e.user_message(), code);
    body.retry_after = retry_after;
    (status, Json(body))
}

fn payments_disabled() -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "Payments not configured", "PAYMENTS_DISABLED")
}

fn otp_disabled() -> ApiError {
    api_error(StatusCode::SERVICE_UNAVAILABLE, "SMS verification service is not configured", "OTP_DISABLED")
}

// ============================================================================
// Helpers
// ============================================================================

fn api_key_header(headers: &HeaderMap) -> Result<ApiKey, ApiError> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(ApiKey::from_string)
        .filter(|k| !k.as_str().is_empty())
        .ok_or_else(|| {
            api_error(
                StatusCode::UNAUTHORIZED,
                "API key is required. Provide it in the x-api-key header",
                "API_KEY_REQUIRED",
            )
        })
}

fn invalid_api_key() -> ApiError {
    api_error(
        StatusCode::UNAUTHORIZED,
        "The provided API key is not valid or does not exist",
        "INVALID_API_KEY",
    )
}

/// Resolve the caller's credential. A storage failure is never an invalid key.
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Credential, ApiError> {
    let key = api_key_header(headers)?;
    match state.credentials.find_by_key(&key).await {
        Ok(Some(credential)) => Ok(credential),
        Ok(None) => Err(invalid_api_key()),
        Err(e) => Err(billing_error(e)),
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("Missing required parameter: {name}"),
                "MISSING_PARAMETER",
            )
        })
}

fn parse_phone(parser: &dyn PhoneParser, raw: &str, country: Option<&str>) -> Result<ParsedPhone, ApiError> {
    parser
        .parse(raw, country)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "Failed to parse phone number", "INVALID_PHONE"))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        payments_configured: state.payments.is_some(),
        otp_configured: state.otp.is_some(),
        otp_provider: state.otp.as_ref().map(|flow| flow.provider_name().to_string()),
    })
}

/// Metered phone validation
pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ValidateQuery>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let key = authenticate(&state, &headers).await?.key;
    let phone = required(query.phone, "phone")?;

    // Rejected input is never metered
    let parsed = parse_phone(state.parser.as_ref(), &phone, query.country.as_deref())?;

    let credential = match state.credentials.record_usage(&key).await {
        Ok(Usage::Counted(credential)) => credential,
        Ok(Usage::Exhausted(credential)) => {
            tracing::info!(key = %key.redacted(), limit = credential.requests_limit, "Quota exhausted");
            return Err(api_error(
                StatusCode::TOO_MANY_REQUESTS,
                format!(
                    "Monthly quota of {} requests for the {} plan is used up",
                    credential.requests_limit,
                    credential.plan.display_name()
                ),
                "QUOTA_EXCEEDED",
            ));
        }
        Ok(Usage::UnknownKey) => return Err(invalid_api_key()),
        Err(e) => return Err(billing_error(e)),
    };

    Ok(Json(ValidateResponse::new(parsed, Some(credential.remaining_requests()))))
}

/// Public demo validation, throttled per client IP
pub async fn test_validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TestValidateQuery>,
) -> Result<Json<ValidateResponse>, ApiError> {
    let ip = client_ip(&headers);
    if let Err(retry_after) = state.demo_limiter.check(&ip) {
        tracing::warn!(ip = %ip, retry_after_secs = retry_after, "Demo endpoint rate limited");
        let (status, Json(mut body)) = api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Please try again later.",
            "RATE_LIMITED",
        );
        body.retry_after = Some(retry_after);
        return Err((status, Json(body)));
    }

    let number = required(query.number, "number")?;
    let parsed = parse_phone(state.parser.as_ref(), &number, query.country.as_deref())?;
    Ok(Json(ValidateResponse::new(parsed, None)))
}

/// Issue (or return) a free-tier key for an email
pub async fn generate_free_key(
    State(state): State<AppState>,
    Json(payload): Json<FreeKeyRequest>,
) -> Result<Json<KeyResponse>, ApiError> {
    let email = payload.email.unwrap_or_default();
    let outcome = state.issuer.issue_free(&email).await.map_err(billing_error)?;
    Ok(Json(KeyResponse::from(outcome)))
}

/// Create a PayPal order carrying the buyer's metadata
pub async fn create_paypal_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut payload): Json<OrderRequest>,
) -> Result<Json<CreatedOrder>, ApiError> {
    let payments = state.payments.as_ref().ok_or_else(payments_disabled)?;

    if payload.origin.is_none() {
        payload.origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let order = payments.processor().create_order(&payload).await.map_err(billing_error)?;
    tracing::info!(order_id = %order.order_id, plan = %payload.plan, "PayPal order created");
    Ok(Json(order))
}

/// Capture an approved PayPal order
pub async fn capture_paypal_order(
    State(state): State<AppState>,
    Json(payload): Json<CaptureRequest>,
) -> Result<Json<CapturedOrder>, ApiError> {
    let payments = state.payments.as_ref().ok_or_else(payments_disabled)?;
    let order_id = required(payload.order_id, "orderId")?;

    let captured = payments.processor().capture_order(&order_id).await.map_err(billing_error)?;
    Ok(Json(captured))
}

/// Payment notification in any supported shape
pub async fn paypal_webhook(State(state): State<AppState>, Json(body): Json<Value>) -> Result<Response, ApiError> {
    let payments = state.payments.as_ref().ok_or_else(payments_disabled)?;

    // Acknowledge event types we do not act on so PayPal stops retrying
    if let PaymentPayload::Webhook(envelope) = PaymentPayload::classify(&body) {
        if !envelope.is_accepted() {
            tracing::debug!(event_type = %envelope.event_type, "Ignoring webhook event");
            return Ok(Json(json!({ "received": true, "ignored": envelope.event_type })).into_response());
        }
    }

    let outcome = payments.fulfill(&body).await.map_err(billing_error)?;
    Ok(Json(KeyResponse::from(outcome)).into_response())
}

/// Send an OTP to a phone number
pub async fn send_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SendCodeRequest>,
) -> Result<Json<SendCodeResponse>, ApiError> {
    let credential = authenticate(&state, &headers).await?;
    let otp = state.otp.as_ref().ok_or_else(otp_disabled)?;
    let phone = required(payload.phone, "phone")?;

    let receipt = otp.send_code(&phone, credential.key.as_str()).await.map_err(otp_error)?;

    Ok(Json(SendCodeResponse {
        success: true,
        message: "Verification code sent successfully",
        phone: receipt.phone,
        verification_sid: receipt.reference,
    }))
}

/// Check a submitted OTP
pub async fn check_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CheckCodeRequest>,
) -> Result<(StatusCode, Json<CheckCodeResponse>), ApiError> {
    let credential = authenticate(&state, &headers).await?;
    let otp = state.otp.as_ref().ok_or_else(otp_disabled)?;
    let phone = required(payload.phone, "phone")?;
    let code = required(payload.code, "code")?;

    let result = otp
        .check_code(&phone, credential.key.as_str(), &code)
        .await
        .map_err(otp_error)?;

    if result.verified {
        Ok((
            StatusCode::OK,
            Json(CheckCodeResponse {
                success: true,
                verified: true,
                phone: result.phone,
                message: "Verification code is correct",
            }),
        ))
    } else {
        Ok((
            StatusCode::BAD_REQUEST,
            Json(CheckCodeResponse {
                success: false,
                verified: false,
                phone: result.phone,
                message: "The verification code provided is incorrect or expired",
            }),
        ))
    }
}
