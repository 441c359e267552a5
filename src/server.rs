//! HTTP surface of the operator.
//!
//! Four routes, all speaking raw encoded envelopes: `POST /init` admits a
//! ceremony, `POST /dkg` advances one, `POST /results` persists a concluded
//! ceremony's artifacts, and `GET /health_check` returns a signed pong.
//! Failures are rendered uniformly as `400 {"error": ...}`; the transport
//! is TLS-only and rate limited globally and per route.

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_server::tls_rustls::RustlsConfig;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tracing::{debug, info, warn};

use crate::{
    constants::{PROTOCOL_VERSION, READ_HEADER_TIMEOUT, rate},
    error::Error,
    switch::Switch,
    wire::{self, SignedTransport, TransportType},
};

/// Body returned on any rate-limit rejection.
const TOO_MANY_REQUESTS_BODY: &str = r#"{"error": "too many requests to /route"}"#;

/// Arguments for the start command.
pub struct StartArgs {
    /// TLS listen port.
    pub port: u16,
    /// Path to the PEM-encoded operator RSA private key.
    pub private_key: PathBuf,
    /// Path to the TLS certificate.
    pub cert: PathBuf,
    /// Path to the TLS key.
    pub key: PathBuf,
    /// This node's operator id.
    pub operator_id: u64,
    /// Base directory for emitted ceremony results.
    pub output_path: PathBuf,
}

#[derive(Clone)]
struct AppState {
    switch: Arc<Switch>,
    output_path: Arc<PathBuf>,
}

struct RouteLimit {
    limiter: DefaultDirectRateLimiter,
    path: &'static str,
}

impl RouteLimit {
    fn new(per_minute: u32, path: &'static str) -> Arc<Self> {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).expect("limit is nonzero"));
        Arc::new(Self {
            limiter: RateLimiter::direct(quota),
            path,
        })
    }
}

/// Build the operator router over a shared switch.
pub fn router(switch: Arc<Switch>, output_path: PathBuf) -> Router {
    let state = AppState {
        switch,
        output_path: Arc::new(output_path),
    };
    let route = |path| RouteLimit::new(rate::ROUTE_LIMIT, path);

    Router::new()
        .route(
            "/init",
            post(handle_init).layer(middleware::from_fn_with_state(route("/init"), rate_limit)),
        )
        .route(
            "/dkg",
            post(handle_dkg).layer(middleware::from_fn_with_state(route("/dkg"), rate_limit)),
        )
        .route(
            "/results",
            post(handle_results)
                .layer(middleware::from_fn_with_state(route("/results"), rate_limit)),
        )
        .route(
            "/health_check",
            get(handle_health_check)
                .layer(middleware::from_fn_with_state(route("/health_check"), rate_limit)),
        )
        .layer(middleware::from_fn_with_state(
            RouteLimit::new(rate::GENERAL_LIMIT, "*"),
            rate_limit,
        ))
        .with_state(state)
}

/// Load the operator identity and serve the router over TLS.
pub async fn run(args: StartArgs) -> eyre::Result<()> {
    let private_key = load_private_key(&args.private_key)?;
    let switch = Arc::new(Switch::new(
        private_key,
        args.operator_id,
        PROTOCOL_VERSION.as_bytes().to_vec(),
    )?);
    std::fs::create_dir_all(&args.output_path)?;
    let app = router(switch, args.output_path.clone());

    let config = RustlsConfig::from_pem_file(&args.cert, &args.key).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(
        port = args.port,
        operator = args.operator_id,
        version = PROTOCOL_VERSION,
        "operator listening for ceremony requests"
    );
    let mut server = axum_server::bind_rustls(addr, config);
    server
        .http_builder()
        .http1()
        .header_read_timeout(READ_HEADER_TIMEOUT);
    server.serve(app.into_make_service()).await?;
    Ok(())
}

fn load_private_key(path: &std::path::Path) -> eyre::Result<rsa::RsaPrivateKey> {
    crate::crypto::load_rsa_private_key(path)
        .map_err(|err| eyre::eyre!("loading operator private key from {}: {err}", path.display()))
}

async fn rate_limit(
    State(limit): State<Arc<RouteLimit>>,
    request: Request,
    next: Next,
) -> Response {
    if limit.limiter.check().is_err() {
        debug!(path = limit.path, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::CONTENT_TYPE, "application/json")],
            TOO_MANY_REQUESTS_BODY,
        )
            .into_response();
    }
    next.run(request).await
}

async fn handle_init(State(app): State<AppState>, body: Bytes) -> Response {
    debug!("incoming init message");
    let result = (|| {
        let signed: SignedTransport = wire::decode_exact(&body)?;
        if signed.message.kind != TransportType::Init {
            return Err(Error::UnexpectedMessageType {
                got: signed.message.kind,
                phase: "init",
            });
        }
        app.switch.init_instance(
            signed.message.identifier,
            &signed.message,
            &signed.signer,
            &signed.signature,
        )
    })();
    match result {
        Ok(reply) => (StatusCode::OK, reply).into_response(),
        Err(err) => error_response(&app, err),
    }
}

async fn handle_dkg(State(app): State<AppState>, body: Bytes) -> Response {
    debug!("incoming dkg protocol message");
    match app.switch.process_message(&body).await {
        Ok(reply) => (StatusCode::OK, reply).into_response(),
        Err(err) => error_response(&app, err),
    }
}

async fn handle_results(State(app): State<AppState>, body: Bytes) -> Response {
    debug!("incoming result message");
    let result = (|| {
        let signed: SignedTransport = wire::decode_exact(&body)?;
        if signed.message.kind != TransportType::Result {
            return Err(Error::UnexpectedMessageType {
                got: signed.message.kind,
                phase: "result",
            });
        }
        app.switch
            .save_result(&signed, &app.output_path)
            .map_err(|err| Error::sensitive("failed to write results", err))
    })();
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(&app, err),
    }
}

async fn handle_health_check(State(app): State<AppState>) -> Response {
    (StatusCode::OK, app.switch.pong()).into_response()
}

fn error_response(app: &AppState, err: Error) -> Response {
    match &err {
        Error::Sensitive { public, private } => {
            warn!(operator = app.switch.operator_id(), error = %private, "request failed ({public})");
        }
        other => {
            warn!(operator = app.switch.operator_id(), error = %other, "request failed");
        }
    }
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": err.public_message() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{crypto, wire::{CeremonyId, Init, Operator, Transport}};
    use axum::{body::Body, http::Request as HttpRequest};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use tower::ServiceExt;

    const VERSION: &[u8] = b"v2.1.0";

    struct Fixture {
        router: Router,
        initiator: RsaPrivateKey,
        initiator_pem: Vec<u8>,
        operators: Vec<(u64, RsaPrivateKey, Vec<u8>)>,
    }

    fn fixture() -> Fixture {
        let operators: Vec<(u64, RsaPrivateKey, Vec<u8>)> = (1..=4u64)
            .map(|id| {
                let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
                let pem = crypto::encode_rsa_public_key(&RsaPublicKey::from(&key)).unwrap();
                (id, key, pem)
            })
            .collect();
        let initiator = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let initiator_pem =
            crypto::encode_rsa_public_key(&RsaPublicKey::from(&initiator)).unwrap();
        let switch =
            Arc::new(Switch::new(operators[0].1.clone(), 1, VERSION.to_vec()).unwrap());
        let dir = tempfile::tempdir().unwrap();
        Fixture {
            router: router(switch, dir.keep()),
            initiator,
            initiator_pem,
            operators,
        }
    }

    fn init_body(fixture: &Fixture, identifier: CeremonyId, operator_ids: &[u64], threshold: u64) -> Vec<u8> {
        let mut withdrawal_credentials = vec![0u8; 32];
        withdrawal_credentials[0] = 0x01;
        let init = Init {
            operators: operator_ids
                .iter()
                .map(|id| {
                    let pem = fixture
                        .operators
                        .iter()
                        .find(|(op_id, _, _)| op_id == id)
                        .map(|(_, _, pem)| pem.clone())
                        .unwrap();
                    Operator {
                        id: *id,
                        public_key: pem,
                    }
                })
                .collect(),
            threshold,
            withdrawal_credentials,
            fork: alloy_primitives::FixedBytes([0, 0, 16, 32]),
            owner: alloy_primitives::Address::repeat_byte(0xAA),
            nonce: 0,
        };
        let message = Transport {
            kind: TransportType::Init,
            identifier,
            data: wire::encode_to_vec(&init),
            version: VERSION.to_vec(),
        };
        let signature = crypto::sign_rsa(&fixture.initiator, &wire::encode_to_vec(&message));
        wire::encode_to_vec(&SignedTransport {
            message,
            signer: fixture.initiator_pem.clone(),
            signature,
        })
    }

    async fn post(router: &Router, path: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let response = router
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri(path)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    fn error_of(body: &[u8]) -> String {
        let value: serde_json::Value = serde_json::from_slice(body).unwrap();
        value["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn valid_init_returns_exchange() {
        let fixture = fixture();
        let body = init_body(&fixture, CeremonyId([1u8; 24]), &[1, 2, 3, 4], 3);
        let (status, reply) = post(&fixture.router, "/init", body).await;
        assert_eq!(status, StatusCode::OK);
        let signed: SignedTransport = wire::decode_exact(&reply).unwrap();
        assert_eq!(signed.message.kind, TransportType::Exchange);
    }

    #[tokio::test]
    async fn disordered_operators_render_exact_error() {
        let fixture = fixture();
        let body = init_body(&fixture, CeremonyId([2u8; 24]), &[1, 2, 4, 3], 3);
        let (status, reply) = post(&fixture.router, "/init", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_of(&reply), "operators not unique or not ordered");
    }

    #[tokio::test]
    async fn threshold_mismatch_renders_exact_error() {
        let fixture = fixture();
        let body = init_body(&fixture, CeremonyId([3u8; 24]), &[1, 2, 3, 4], 2);
        let (status, reply) = post(&fixture.router, "/init", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_of(&reply), "threshold set is invalid");
    }

    #[tokio::test]
    async fn wrong_version_mentions_versions() {
        let fixture = fixture();
        let mut body = init_body(&fixture, CeremonyId([4u8; 24]), &[1, 2, 3, 4], 3);
        // Re-sign under a different version string so only the gate trips.
        let mut signed: SignedTransport = wire::decode_exact(&body).unwrap();
        signed.message.version = b"v1.0.0".to_vec();
        signed.signature =
            crypto::sign_rsa(&fixture.initiator, &wire::encode_to_vec(&signed.message));
        body = wire::encode_to_vec(&signed);

        let (status, reply) = post(&fixture.router, "/init", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error_of(&reply).contains("wrong version"));
    }

    #[tokio::test]
    async fn non_init_message_rejected_on_init_route() {
        let fixture = fixture();
        let mut body = init_body(&fixture, CeremonyId([5u8; 24]), &[1, 2, 3, 4], 3);
        let mut signed: SignedTransport = wire::decode_exact(&body).unwrap();
        signed.message.kind = TransportType::Deal;
        signed.signature =
            crypto::sign_rsa(&fixture.initiator, &wire::encode_to_vec(&signed.message));
        body = wire::encode_to_vec(&signed);

        let (status, _) = post(&fixture.router, "/init", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let fixture = fixture();
        let (status, reply) = post(&fixture.router, "/dkg", vec![0xFF; 16]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(error_of(&reply).contains("malformed"));
    }

    #[tokio::test]
    async fn health_check_returns_signed_pong() {
        let fixture = fixture();
        let response = fixture
            .router
            .clone()
            .oneshot(
                HttpRequest::builder()
                    .uri("/health_check")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let signed: SignedTransport = wire::decode_exact(&bytes).unwrap();
        assert_eq!(signed.message.kind, TransportType::Pong);
    }

    #[tokio::test]
    async fn route_limit_yields_429_with_fixed_body() {
        let fixture = fixture();
        let mut last = (StatusCode::OK, Vec::new());
        for _ in 0..=rate::ROUTE_LIMIT {
            let response = fixture
                .router
                .clone()
                .oneshot(
                    HttpRequest::builder()
                        .uri("/health_check")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            last = (status, bytes.to_vec());
        }
        assert_eq!(last.0, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(last.1, TOO_MANY_REQUESTS_BODY.as_bytes());
    }
}
