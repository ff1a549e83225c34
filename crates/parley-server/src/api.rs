use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_shared::constants::PROTOCOL_VERSION;
use parley_shared::protocol::UnseenCount;
use parley_shared::{Conversation, GroupId, UserId};
use parley_store::{Group, Message, SqliteStore, User};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::ChatHub;
use crate::ws::ws_handler;

/// Header carrying the caller's identity. Verifying it is the job of
/// whatever sits in front of this server.
const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ChatHub<SqliteStore>>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/online", get(online_users))
        .route("/ws", get(ws_handler))
        .route("/users", post(create_user))
        .route("/unseen", get(unseen_counts))
        .route("/history/direct/:peer", get(direct_history))
        .route("/history/group/:group", get(group_history))
        .route("/groups", get(my_groups).post(create_group))
        .route("/groups/:group/members", post(add_member))
        .route("/groups/:group/members/:user", delete(remove_member))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    protocol: &'static str,
}

#[derive(Serialize)]
struct OnlineResponse {
    online: Vec<UserId>,
}

#[derive(Serialize)]
struct UnseenResponse {
    counts: Vec<UnseenCount>,
}

#[derive(Deserialize)]
struct CreateUserRequest {
    display_name: String,
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    members: Vec<UserId>,
    #[serde(default)]
    avatar: Option<String>,
}

#[derive(Deserialize)]
struct AddMemberRequest {
    user_id: UserId,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        protocol: PROTOCOL_VERSION,
    })
}

async fn online_users(State(state): State<AppState>) -> Json<OnlineResponse> {
    Json(OnlineResponse {
        online: state.hub.online_users().await,
    })
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ServerError> {
    let user = state.hub.create_user(&req.display_name).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn unseen_counts(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<UnseenResponse>, ServerError> {
    let user = caller(&headers, &state).await?;
    Ok(Json(UnseenResponse {
        counts: state.hub.unseen_counts(user).await,
    }))
}

async fn direct_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(peer): Path<UserId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let user = caller(&headers, &state).await?;
    let messages = state.hub.history(user, Conversation::Direct(peer)).await?;
    Ok(Json(messages))
}

async fn group_history(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(group): Path<GroupId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let user = caller(&headers, &state).await?;
    let messages = state.hub.history(user, Conversation::Group(group)).await?;
    Ok(Json(messages))
}

async fn my_groups(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Vec<Group>>, ServerError> {
    let user = caller(&headers, &state).await?;
    Ok(Json(state.hub.groups_for_user(user).await?))
}

async fn create_group(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>), ServerError> {
    let admin = caller(&headers, &state).await?;
    let group = state
        .hub
        .create_group(
            admin,
            &req.name,
            req.description.as_deref(),
            req.members,
            req.avatar,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

async fn add_member(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(group): Path<GroupId>,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<Group>, ServerError> {
    let admin = caller(&headers, &state).await?;
    let group = state.hub.add_member(admin, group, req.user_id).await?;
    info!(group = %group.id, user = %req.user_id, "Member added");
    Ok(Json(group))
}

async fn remove_member(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path((group, user)): Path<(GroupId, UserId)>,
) -> Result<Json<Group>, ServerError> {
    let admin = caller(&headers, &state).await?;
    let group = state.hub.remove_member(admin, group, user).await?;
    info!(group = %group.id, user = %user, "Member removed");
    Ok(Json(group))
}

/// Resolve the `x-user-id` header to a known user.
async fn caller(headers: &HeaderMap, state: &AppState) -> Result<UserId, ServerError> {
    let raw = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::BadRequest(format!("missing {USER_HEADER} header")))?;

    let user: UserId = raw
        .parse()
        .map_err(|e| ServerError::BadRequest(format!("Invalid {USER_HEADER}: {e}")))?;

    if !state.hub.user_exists(user).await? {
        return Err(ServerError::NotFound(format!("user {user}")));
    }
    Ok(user)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState {
            hub: Arc::new(ChatHub::new(Arc::new(
                SqliteStore::open_in_memory().unwrap(),
            ))),
            config: Arc::new(ServerConfig::default()),
        }
    }

    async fn call(
        state: &AppState,
        method: Method,
        uri: &str,
        user: Option<UserId>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header(USER_HEADER, user.to_string());
        }
        let req = match body {
            Some(json) => req
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = build_router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn new_user(state: &AppState, name: &str) -> UserId {
        let (status, body) = call(
            state,
            Method::POST,
            "/users",
            None,
            Some(serde_json::json!({ "display_name": name })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        serde_json::from_value(body["id"].clone()).unwrap()
    }

    #[tokio::test]
    async fn health() {
        let (status, body) = call(&state(), Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["protocol"], PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn identity_header_is_required() {
        let state = state();
        let (status, _) = call(&state, Method::GET, "/unseen", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) =
            call(&state, Method::GET, "/unseen", Some(UserId::new()), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn group_lifecycle_over_http() {
        let state = state();
        let a = new_user(&state, "a").await;
        let b = new_user(&state, "b").await;
        let c = new_user(&state, "c").await;
        let d = new_user(&state, "d").await;

        let (status, group) = call(
            &state,
            Method::POST,
            "/groups",
            Some(a),
            Some(serde_json::json!({ "name": "team", "members": [b, c] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let group_id: GroupId = serde_json::from_value(group["id"].clone()).unwrap();

        let members_uri = format!("/groups/{group_id}/members");
        let (status, _) = call(
            &state,
            Method::POST,
            &members_uri,
            Some(b),
            Some(serde_json::json!({ "user_id": d })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, group) = call(
            &state,
            Method::POST,
            &members_uri,
            Some(a),
            Some(serde_json::json!({ "user_id": d })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(group["members"].as_array().map(Vec::len), Some(4));

        let (status, _) = call(
            &state,
            Method::DELETE,
            &format!("/groups/{group_id}/members/{a}"),
            Some(a),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, groups) = call(&state, Method::GET, "/groups", Some(d), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(groups.as_array().map(Vec::len), Some(1));

        let (status, _) = call(
            &state,
            Method::GET,
            &format!("/history/group/{group_id}"),
            Some(UserId::new()),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn direct_history_and_unseen() {
        let state = state();
        let a = new_user(&state, "a").await;
        let b = new_user(&state, "b").await;
        state
            .hub
            .send_direct(a, b, Some("hi".into()), None, None)
            .await
            .unwrap();

        let (status, history) = call(
            &state,
            Method::GET,
            &format!("/history/direct/{a}"),
            Some(b),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history[0]["text"], "hi");
        assert_eq!(history[0]["receiver_id"], b.to_string());
        assert_eq!(history[0]["status"], "sent");

        let (_, unseen) = call(&state, Method::GET, "/unseen", Some(b), None).await;
        assert_eq!(unseen["counts"][0]["count"], 1);
        assert_eq!(unseen["counts"][0]["conversation"]["kind"], "direct");

        let (_, online) = call(&state, Method::GET, "/online", None, None).await;
        assert_eq!(online["online"].as_array().map(Vec::len), Some(0));
    }
}
