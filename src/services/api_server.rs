// src/services/api_server.rs
//! API Server for the guest-key gate.
//!
//! REST interface over the verification engine and the owner-side writers,
//! built on Axum. Endpoints:
//! - Guest verification (and the resulting actuation)
//! - Key issuance and revocation (owner session required)
//! - Owner lock / unlock events and reconstructed lock state
//! - The device's recent audit log

use crate::blockchain::ledger::LedgerReader;
use crate::error::IssuanceError;
use crate::models::credential::KeyId;
use crate::models::outcome::VerificationOutcome;
use crate::services::actuation::{ActuationNotifier, AuditEntry};
use crate::services::credential_issuer::{CredentialIssuer, LockCommand};
use crate::services::lock_state::{reconstruct_lock_state, LockState};
use crate::services::verifier::VerificationEngine;
use crate::utils::address::Address;
use crate::utils::serialization::{now_epoch, TimeValue};
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;

// API request and response structures

/// Request payload for verifying a presented credential
#[derive(Serialize, Deserialize)]
struct VerifyRequest {
    payload: String,
}

/// Request payload for issuing a guest key
#[derive(Serialize, Deserialize)]
struct IssueKeyRequest {
    name: String,
    recipient: String,
    /// Epoch seconds or ISO-8601; defaults to now
    #[serde(default)]
    valid_from: Option<TimeValue>,
    valid_until: TimeValue,
}

/// Response for key issuance
#[derive(Serialize, Deserialize)]
struct IssueKeyResponse {
    key_id: String,
    tx_id: String,
    payload: String,
}

/// Response for any single ledger write
#[derive(Serialize, Deserialize)]
struct TxResponse {
    tx_id: String,
}

/// Response for the lock-state query
#[derive(Serialize)]
struct LockStateResponse {
    /// Ledger-derived state, if any actuation event exists
    recorded: Option<LockState>,
    /// State of the local actuator
    actuator_locked: bool,
}

#[derive(Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

/// Response containing recent audit entries
#[derive(Serialize)]
struct AuditLogResponse {
    entries: Vec<AuditEntry>,
}

#[derive(Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

/// Error returned by handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn no_session() -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "no owner session configured")
    }
}

impl From<IssuanceError> for ApiError {
    fn from(e: IssuanceError) -> Self {
        let status = match &e {
            IssuanceError::InvalidRecipient { .. } | IssuanceError::InvalidTimeRange(_) => {
                StatusCode::BAD_REQUEST
            }
            IssuanceError::Ledger(_) => StatusCode::BAD_GATEWAY,
            IssuanceError::Signer(_) | IssuanceError::Encoding(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            error!("Owner operation failed: {}", e);
        }
        Self::new(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

/// API server state containing all service dependencies
pub struct ApiServer {
    /// Verifier for presented credentials
    engine: Arc<VerificationEngine>,

    /// Lock signal and audit trail
    notifier: Arc<ActuationNotifier>,

    /// Owner-side writers; absent on verify-only devices
    issuer: Option<Arc<CredentialIssuer>>,

    /// Read access for lock-state reconstruction
    ledger: Arc<dyn LedgerReader>,

    /// Account whose history carries lock events
    lock_account: Option<Address>,

    /// Transactions inspected when reconstructing lock state
    history_limit: usize,
}

impl ApiServer {
    /// Creates a new instance of the API server
    ///
    /// # Arguments
    /// * `engine` - Verification engine
    /// * `notifier` - Actuation notifier fed with every outcome
    /// * `ledger` - Ledger read access
    pub fn new(
        engine: VerificationEngine,
        notifier: ActuationNotifier,
        ledger: Arc<dyn LedgerReader>,
    ) -> Self {
        ApiServer {
            engine: Arc::new(engine),
            notifier: Arc::new(notifier),
            issuer: None,
            ledger,
            lock_account: None,
            history_limit: 1000,
        }
    }

    /// Enables the owner routes. Lock state is then read from the owner's
    /// account unless another account was set.
    pub fn with_issuer(mut self, issuer: CredentialIssuer) -> Self {
        self.lock_account = self.lock_account.or(Some(issuer.owner()));
        self.issuer = Some(Arc::new(issuer));
        self
    }

    pub fn with_lock_account(mut self, account: Option<Address>) -> Self {
        if account.is_some() {
            self.lock_account = account;
        }
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Builds the router with all API routes
    pub fn router(self: Arc<Self>, request_timeout: Duration) -> Router {
        Router::new()
            .route("/verify", post(Self::verify_handler))
            .route("/keys", post(Self::issue_key_handler))
            .route("/keys/:key_id/revoke", post(Self::revoke_key_handler))
            .route("/lock", post(Self::lock_handler))
            .route("/unlock", post(Self::unlock_handler))
            .route("/lock-state", get(Self::lock_state_handler))
            .route("/audit-log", get(Self::audit_log_handler))
            .layer(TimeoutLayer::new(request_timeout))
            .with_state(self)
    }

    /// Starts the API server and begins listening for requests
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind to (e.g., "127.0.0.1:3000")
    /// * `request_timeout` - Upper bound on handling a single request
    pub async fn run(
        self: Arc<Self>,
        addr: SocketAddr,
        request_timeout: Duration,
    ) -> std::io::Result<()> {
        let app = self.router(request_timeout);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API server listening on http://{}", addr);
        axum::serve(listener, app).await
    }

    fn issuer(&self) -> Result<&Arc<CredentialIssuer>, ApiError> {
        self.issuer.as_ref().ok_or_else(ApiError::no_session)
    }

    // =====================
    // Guest Handlers
    // =====================

    /// Verifies a presented credential and drives the lock
    ///
    /// # Endpoint
    /// POST /verify
    ///
    /// # Responses
    /// - 200 OK: Verification outcome (granted or denied)
    async fn verify_handler(
        State(state): State<Arc<ApiServer>>,
        Json(request): Json<VerifyRequest>,
    ) -> Json<VerificationOutcome> {
        let now = now_epoch();
        let outcome = state.engine.verify(&request.payload, now).await;
        // Publication runs in the background; the response does not wait.
        let _ = state.notifier.handle(&outcome, now);
        Json(outcome)
    }

    // =====================
    // Owner Handlers
    // =====================

    /// Issues a new guest key
    ///
    /// # Endpoint
    /// POST /keys
    ///
    /// # Responses
    /// - 200 OK: Key id, transaction id and transport payload
    /// - 400 Bad Request: Invalid recipient or time range
    /// - 502 Bad Gateway: Ledger write failed
    /// - 503 Service Unavailable: No owner session
    async fn issue_key_handler(
        State(state): State<Arc<ApiServer>>,
        Json(request): Json<IssueKeyRequest>,
    ) -> Result<Json<IssueKeyResponse>, ApiError> {
        let issuer = state.issuer()?;
        let now = now_epoch();
        let valid_from = match &request.valid_from {
            Some(value) => parse_time(value, "valid_from")?,
            None => now,
        };
        let valid_until = parse_time(&request.valid_until, "valid_until")?;
        let issued = issuer
            .issue_credential(&request.name, &request.recipient, valid_from, valid_until, now)
            .await?;
        Ok(Json(IssueKeyResponse {
            key_id: issued.key_id.to_string(),
            tx_id: issued.tx_id,
            payload: issued.payload,
        }))
    }

    /// Revokes a guest key
    ///
    /// # Endpoint
    /// POST /keys/:key_id/revoke
    async fn revoke_key_handler(
        Path(key_id): Path<String>,
        State(state): State<Arc<ApiServer>>,
    ) -> Result<Json<TxResponse>, ApiError> {
        let tx_id = state
            .issuer()?
            .revoke_credential(&KeyId::new(key_id), now_epoch())
            .await?;
        Ok(Json(TxResponse { tx_id }))
    }

    /// Records an owner lock event
    ///
    /// # Endpoint
    /// POST /lock
    async fn lock_handler(
        State(state): State<Arc<ApiServer>>,
    ) -> Result<Json<TxResponse>, ApiError> {
        Self::lock_command(&state, LockCommand::Lock).await
    }

    /// Records an owner unlock event
    ///
    /// # Endpoint
    /// POST /unlock
    async fn unlock_handler(
        State(state): State<Arc<ApiServer>>,
    ) -> Result<Json<TxResponse>, ApiError> {
        Self::lock_command(&state, LockCommand::Unlock).await
    }

    async fn lock_command(
        state: &ApiServer,
        command: LockCommand,
    ) -> Result<Json<TxResponse>, ApiError> {
        let tx_id = state.issuer()?.record_lock_action(command, now_epoch()).await?;
        Ok(Json(TxResponse { tx_id }))
    }

    // =====================
    // State Handlers
    // =====================

    /// Returns the lock state reconstructed from the ledger
    ///
    /// # Endpoint
    /// GET /lock-state
    ///
    /// # Responses
    /// - 200 OK: Recorded and local state
    /// - 502 Bad Gateway: History could not be read
    /// - 503 Service Unavailable: No account to read lock events from
    async fn lock_state_handler(
        State(state): State<Arc<ApiServer>>,
    ) -> Result<Json<LockStateResponse>, ApiError> {
        let account = state.lock_account.ok_or_else(ApiError::no_session)?;
        let recorded = reconstruct_lock_state(
            state.ledger.as_ref(),
            &account,
            state.engine.app_id(),
            state.history_limit,
        )
            .await
            .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()))?;
        Ok(Json(LockStateResponse {
            recorded,
            actuator_locked: state.notifier.is_locked(),
        }))
    }

    /// Returns recent verification attempts, newest first
    ///
    /// # Endpoint
    /// GET /audit-log?limit=N
    async fn audit_log_handler(
        State(state): State<Arc<ApiServer>>,
        Query(query): Query<AuditQuery>,
    ) -> Json<AuditLogResponse> {
        let limit = query.limit.unwrap_or(usize::MAX);
        Json(AuditLogResponse {
            entries: state.notifier.audit().recent(limit),
        })
    }
}

fn parse_time(value: &TimeValue, field: &str) -> Result<u64, ApiError> {
    value
        .to_epoch()
        .ok_or_else(|| {
            ApiError::new(StatusCode::BAD_REQUEST, format!("{} is not a timestamp", field))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::memory_ledger::MemoryLedger;
    use crate::models::credential::AppId;
    use crate::services::actuation::{AuditTrail, SimulatedLock};
    use crate::services::record_reader::LedgerStrategy;
    use crate::services::verifier::EngineOptions;
    use crate::wallet::key_management::LocalSigner;
    use crate::wallet::session::OwnerSession;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const APP: u64 = 12;

    fn server(with_owner: bool) -> (Arc<MemoryLedger>, Router) {
        let ledger = Arc::new(MemoryLedger::new(now_epoch()));
        let strategy = LedgerStrategy::ObjectStore { application_id: APP };
        let engine = VerificationEngine::new(
            ledger.clone(),
            AppId::new("gate"),
            strategy,
            EngineOptions::default(),
        );
        let notifier = ActuationNotifier::new(
            Arc::new(SimulatedLock::new(4)),
            Arc::new(AuditTrail::new(10)),
            Duration::from_secs(10),
        );
        let mut server = ApiServer::new(engine, notifier, ledger.clone());
        if with_owner {
            let signer = LocalSigner::from_seed([3u8; 32]).unwrap();
            let session = Arc::new(OwnerSession::new(Arc::new(signer)));
            ledger.deploy_application(APP, session.address());
            let issuer =
                CredentialIssuer::new(ledger.clone(), session, AppId::new("gate"), strategy);
            server = server.with_issuer(issuer);
        }
        (ledger, Arc::new(server).router(Duration::from_secs(5)))
    }

    async fn call(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn issue_verify_revoke_over_http() {
        let (_ledger, router) = server(true);
        let recipient = Address::from_bytes([9u8; 32]).to_string();
        let (status, issued) = call(
            &router,
            "POST",
            "/keys",
            Some(json!({
                "name": "Walker",
                "recipient": recipient,
                "valid_until": now_epoch() + 3600,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", issued);

        let payload = issued["payload"].as_str().unwrap().to_string();
        let (status, outcome) =
            call(&router, "POST", "/verify", Some(json!({ "payload": payload }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["decision"], "GRANTED");
        assert_eq!(outcome["verified_recipient"], recipient);

        let uri = format!("/keys/{}/revoke", issued["key_id"].as_str().unwrap());
        let (status, _) = call(&router, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, outcome) =
            call(&router, "POST", "/verify", Some(json!({ "payload": payload }))).await;
        assert_eq!(outcome["decision"], "DENIED");
        assert_eq!(outcome["reason"], "Revoked");

        let (_, log) = call(&router, "GET", "/audit-log?limit=1", None).await;
        assert_eq!(log["entries"].as_array().unwrap().len(), 1);
        assert_eq!(log["entries"][0]["decision"], "DENIED");
    }

    #[tokio::test]
    async fn issuance_errors_map_to_statuses() {
        let (ledger, router) = server(true);
        let (status, _) = call(
            &router,
            "POST",
            "/keys",
            Some(json!({"name": "A", "recipient": "nope", "valid_until": now_epoch() + 60})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        ledger.fail_writes(true);
        let recipient = Address::from_bytes([9u8; 32]).to_string();
        let (status, body) = call(
            &router,
            "POST",
            "/keys",
            Some(json!({"name": "A", "recipient": recipient, "valid_until": now_epoch() + 60})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains("transport"));
    }

    #[tokio::test]
    async fn owner_routes_need_a_session() {
        let (_ledger, router) = server(false);
        let owner_routes = [
            ("POST", "/lock"),
            ("POST", "/keys/abc/revoke"),
            ("GET", "/lock-state"),
        ];
        for (method, uri) in owner_routes {
            let (status, _) = call(&router, method, uri, None).await;
            assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
        }
        let (status, outcome) =
            call(&router, "POST", "/verify", Some(json!({"payload": "garbage"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["reason"], "MalformedCredential");
    }

    #[tokio::test]
    async fn lock_state_follows_owner_events() {
        let (_ledger, router) = server(true);
        let (_, state) = call(&router, "GET", "/lock-state", None).await;
        assert_eq!(state["recorded"], Value::Null);

        let (status, _) = call(&router, "POST", "/unlock", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, state) = call(&router, "GET", "/lock-state", None).await;
        assert_eq!(state["recorded"]["locked"], false);
        assert_eq!(state["actuator_locked"], true);
    }
}
