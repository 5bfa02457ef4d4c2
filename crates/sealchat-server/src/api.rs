use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{Method, StatusCode},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use sealchat_shared::constants::{MAX_MESSAGE_SIZE, NONCE_SIZE, TAG_SIZE};
use sealchat_shared::deletion::{
    apply_if_valid, authorize_requester, require_valid_signature, DeleteRecord, MessageStore,
};
use sealchat_shared::identity::{fingerprint, parse_public_key};
use sealchat_shared::protocol::{
    CreateChatRequest, CreateChatResponse, ListDeletesQuery, ListMessagesQuery, MessageEnvelope,
    PostDeleteRequest, PostDeleteResponse, PostMessageRequest, PostSignalRequest,
    PostSignalResponse, PublishKeyRequest, SigningKeyResponse,
};
use sealchat_shared::signal::SignalRecord;
use sealchat_shared::types::{ChatId, DeleteId, UserId};
use sealchat_store::{Database, DeleteFilter};

use crate::auth::AuthUser;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::relay::{ensure_member, SignalRelay};

const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub relay: SignalRelay,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        let db = Arc::new(Mutex::new(db));
        Self {
            relay: SignalRelay::new(db.clone(), config.signal_ttl),
            rate_limiter: RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst),
            db,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/chats", post(create_chat))
        .route("/users/me/signing-key", put(publish_signing_key))
        .route("/users/:user_id/signing-key", get(get_signing_key))
        .route("/chats/:chat_id/messages", post(post_message).get(list_messages))
        .route("/chats/:chat_id/deletes", post(post_delete).get(list_deletes))
        .route("/chats/:chat_id/signals", post(post_signal).get(fetch_signals))
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Chats and keys ───

async fn create_chat(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<CreateChatResponse>), ServerError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("chat name must not be empty".into()));
    }

    let mut members = vec![me];
    members.extend(req.members);

    let chat = state.db.lock().await.create_chat(name, &members)?;
    info!(chat = %chat.id, creator = %me, members = members.len(), "Chat created");

    Ok((StatusCode::CREATED, Json(CreateChatResponse { chat_id: chat.id })))
}

async fn publish_signing_key(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Json(req): Json<PublishKeyRequest>,
) -> Result<Json<SigningKeyResponse>, ServerError> {
    let pubkey = parse_public_key(&req.public_key)
        .map_err(|_| ServerError::BadRequest("public_key must be 64 hex chars".into()))?;
    let public_key = hex::encode(pubkey);

    state.db.lock().await.set_signing_key(&me, &public_key)?;
    info!(user = %me, fingerprint = %fingerprint(&pubkey), "Signing key published");

    Ok(Json(SigningKeyResponse {
        user_id: me,
        public_key,
        fingerprint: fingerprint(&pubkey),
    }))
}

async fn get_signing_key(
    AuthUser(_): AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<SigningKeyResponse>, ServerError> {
    let public_key = state
        .db
        .lock()
        .await
        .get_signing_key(&user_id)?
        .ok_or_else(|| ServerError::NotFound("signing key".into()))?;
    let pubkey = parse_public_key(&public_key)
        .map_err(|_| ServerError::Internal(format!("stored key for {user_id} is malformed")))?;

    Ok(Json(SigningKeyResponse {
        user_id,
        public_key,
        fingerprint: fingerprint(&pubkey),
    }))
}

// ─── Messages ───

async fn post_message(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Json(req): Json<PostMessageRequest>,
) -> Result<(StatusCode, Json<MessageEnvelope>), ServerError> {
    if req.nonce.len() != NONCE_SIZE {
        return Err(ServerError::BadRequest(format!(
            "nonce must be {NONCE_SIZE} bytes"
        )));
    }
    if req.ciphertext.len() < TAG_SIZE || req.ciphertext.len() > MAX_MESSAGE_SIZE + TAG_SIZE {
        return Err(ServerError::BadRequest("ciphertext length out of range".into()));
    }

    let db = state.db.lock().await;
    ensure_member(&db, &chat_id, &me)?;
    let message = db.create_message(&chat_id, &me, &req.ciphertext, &req.nonce)?;

    tracing::debug!(chat = %chat_id, message = %message.id, size = req.ciphertext.len(), "Message stored");
    Ok((StatusCode::CREATED, Json(message.into())))
}

async fn list_messages(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<Vec<MessageEnvelope>>, ServerError> {
    let db = state.db.lock().await;
    ensure_member(&db, &chat_id, &me)?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let messages = db.list_messages(&chat_id, query.after.as_ref(), limit)?;
    Ok(Json(messages.into_iter().map(MessageEnvelope::from).collect()))
}

// ─── Deletes ───

/// Accept a signed delete only from the original sender, with a signature
/// that verifies against their published key. The server then tombstones
/// its own copy and queues the record for the other members.
async fn post_delete(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Json(req): Json<PostDeleteRequest>,
) -> Result<(StatusCode, Json<PostDeleteResponse>), ServerError> {
    let record = DeleteRecord {
        id: DeleteId::new(),
        message_id: req.message_id,
        chat_id,
        requester_id: me,
        timestamp: req.timestamp,
        signature: req.signature,
        delivered: false,
        received_at: 0,
    };

    let db = state.db.lock().await;
    ensure_member(&db, &chat_id, &me)?;

    let status = db
        .message_status(&record.message_id)?
        .filter(|s| s.chat_id == chat_id)
        .ok_or_else(|| ServerError::NotFound("message".into()))?;
    authorize_requester(&record, &status)?;

    let Some(key_hex) = db.get_signing_key(&me)? else {
        tracing::warn!(target: "security", requester = %me, "Delete from user without a published key");
        return Err(ServerError::SignatureInvalid);
    };
    let pubkey = parse_public_key(&key_hex)
        .map_err(|_| ServerError::Internal(format!("stored key for {me} is malformed")))?;
    require_valid_signature(&record, &pubkey)?;

    db.insert_delete_record(&record)?;
    // Signature already checked above.
    let outcome = apply_if_valid(&record, &*db, |_| true)?;

    info!(chat = %chat_id, message = %record.message_id, ?outcome, "Delete accepted");
    Ok((
        StatusCode::CREATED,
        Json(PostDeleteResponse {
            id: record.id,
            outcome,
        }),
    ))
}

async fn list_deletes(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<ListDeletesQuery>,
) -> Result<Json<Vec<DeleteRecord>>, ServerError> {
    let mut db = state.db.lock().await;
    ensure_member(&db, &chat_id, &me)?;

    let records = match query.since {
        None => db.take_undelivered_deletes(&chat_id, &me)?,
        Some(since) => db.list_deletes(&chat_id, &me, DeleteFilter::CreatedAfter(since))?,
    };
    Ok(Json(records))
}

// ─── Signals ───

async fn post_signal(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
    Json(req): Json<PostSignalRequest>,
) -> Result<(StatusCode, Json<PostSignalResponse>), ServerError> {
    let record = state.relay.post_signal(me, req.to, chat_id, req.signal).await?;
    Ok((
        StatusCode::CREATED,
        Json(PostSignalResponse {
            id: record.id,
            expires_at: record.expires_at,
        }),
    ))
}

async fn fetch_signals(
    AuthUser(me): AuthUser,
    State(state): State<AppState>,
    Path(chat_id): Path<ChatId>,
) -> Result<Json<Vec<SignalRecord>>, ServerError> {
    Ok(Json(state.relay.fetch_signals(chat_id, me).await?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
