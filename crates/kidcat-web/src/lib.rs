//! Axum + Askama chat surface for kidcat: the home page, the conversation
//! endpoints, and a direct profile-to-recommendations endpoint.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use askama::Template;
use axum::{
    body::Bytes,
    extract::{Path as AxumPath, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kidcat_match::{
    Conversation, MatchError, MatchingEngine, ProductProfile, Recommendation, SessionContext,
    FREE_FLOW_CHOICE, GUIDED_CHOICE,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "kidcat-web";
pub const SESSION_HEADER: &str = "x-session-id";
pub const SESSION_COOKIE: &str = "kidcat_session";
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

type SharedSession = Arc<Mutex<SessionContext>>;

struct SessionSlot {
    context: SharedSession,
    last_seen: Instant,
}

pub struct AppState {
    conversation: Conversation,
    engine: MatchingEngine,
    static_root: PathBuf,
    session_ttl: Duration,
    sessions: Mutex<HashMap<String, SessionSlot>>,
}

impl AppState {
    pub fn new(conversation: Conversation, engine: MatchingEngine) -> Self {
        Self {
            conversation,
            engine,
            static_root: PathBuf::from("static"),
            session_ttl: DEFAULT_SESSION_TTL,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_static_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.static_root = root.into();
        self
    }

    /// Sessions idle for longer than `ttl` are dropped on the next request.
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    async fn session(&self, id: &str) -> SharedSession {
        self.session_at(id, Instant::now()).await
    }

    async fn session_at(&self, id: &str, now: Instant) -> SharedSession {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, slot| now.saturating_duration_since(slot.last_seen) <= self.session_ttl);
        if sessions.len() < before {
            debug!(evicted = before - sessions.len(), "dropped idle chat sessions");
        }

        let slot = sessions.entry(id.to_string()).or_insert_with(|| SessionSlot {
            context: SharedSession::default(),
            last_seen: now,
        });
        slot.last_seen = now;
        slot.context.clone()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[derive(Debug, Default, Deserialize)]
struct MessageRequest {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct RecommendResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response: Option<String>,
    products: Vec<Recommendation>,
}

#[derive(Template)]
#[template(path = "home.html")]
struct HomeTemplate {
    guided_choice: &'static str,
    free_flow_choice: &'static str,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(home_handler))
        .route("/set-choice", post(set_choice_handler))
        .route("/set-choice/", post(set_choice_handler))
        .route("/chat", post(chat_handler))
        .route("/chat/", post(chat_handler))
        .route("/recommend", post(recommend_handler))
        .route("/static/{*path}", get(static_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "kidcat web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Session id from the `x-session-id` header, then the session cookie.
fn session_id(headers: &HeaderMap) -> Option<String> {
    if let Some(id) = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(id.to_string());
    }
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

/// Existing id, or a fresh one plus the cookie that carries it.
fn resolve_session(headers: &HeaderMap) -> (String, Option<HeaderValue>) {
    match session_id(headers) {
        Some(id) => (id, None),
        None => {
            let id = Uuid::new_v4().to_string();
            let cookie = HeaderValue::from_str(&format!(
                "{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax"
            ))
            .ok();
            (id, cookie)
        }
    }
}

fn with_cookie(mut resp: Response, cookie: Option<HeaderValue>) -> Response {
    if let Some(cookie) = cookie {
        resp.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    resp
}

fn bad_request(message: &'static str) -> Response {
    (StatusCode::BAD_REQUEST, message).into_response()
}

async fn home_handler(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let (id, cookie) = resolve_session(&headers);
    state.session(&id).await.lock().await.reset();
    let resp = render_html(HomeTemplate {
        guided_choice: GUIDED_CHOICE,
        free_flow_choice: FREE_FLOW_CHOICE,
    });
    with_cookie(resp, cookie)
}

async fn set_choice_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(request) = serde_json::from_slice::<MessageRequest>(&body) else {
        return bad_request("Invalid JSON format");
    };
    let (id, cookie) = resolve_session(&headers);
    let session = state.session(&id).await;
    let mut session = session.lock().await;
    match state.conversation.choose(&mut session, &request.message) {
        Ok(turn) => with_cookie(Json(turn).into_response(), cookie),
        Err(err) => {
            warn!(session = %id, error = %err, "rejected chat mode choice");
            with_cookie(bad_request("Invalid choice"), cookie)
        }
    }
}

async fn chat_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Ok(request) = serde_json::from_slice::<MessageRequest>(&body) else {
        return bad_request("Invalid JSON format");
    };
    let (id, cookie) = resolve_session(&headers);
    let session = state.session(&id).await;
    let mut session = session.lock().await;
    let turn = state.conversation.reply(&mut session, &request.message).await;
    with_cookie(Json(turn).into_response(), cookie)
}

async fn recommend_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Ok(profile) = serde_json::from_slice::<ProductProfile>(&body) else {
        return bad_request("Invalid JSON format");
    };
    match state.engine.recommend(&profile).await {
        Ok(products) => Json(RecommendResponse {
            success: true,
            response: None,
            products,
        })
        .into_response(),
        Err(err) => {
            warn!(error = %err, "recommendation failed");
            let status = match err {
                MatchError::IncompleteProfile(_) | MatchError::InvalidBudget(_) => {
                    StatusCode::BAD_REQUEST
                }
                MatchError::Embedding(_) | MatchError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            };
            (
                status,
                Json(RecommendResponse {
                    success: false,
                    response: Some(err.user_message().to_string()),
                    products: Vec::new(),
                }),
            )
                .into_response()
        }
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

async fn static_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(path): AxumPath<String>,
) -> Response {
    let rel = Path::new(&path);
    if rel
        .components()
        .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        return (StatusCode::NOT_FOUND, "not found").into_response();
    }
    let full = state.static_root.join(rel);
    match tokio::fs::read(&full).await {
        Ok(bytes) => ([(header::CONTENT_TYPE, content_type_for(&full))], bytes).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use kidcat_core::{AgeSuitability, CatalogueRecord, Gender, InferredAttributes};
    use kidcat_match::stand_in::{HashEmbedder, ScriptedChat};
    use kidcat_match::{digest, Embedder, Role};
    use kidcat_storage::MemoryCatalogueStore;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn catalogue() -> MemoryCatalogueStore {
        let mut dress = CatalogueRecord::new("https://kiddoz.lk/party-dress-k-11.html", "Party Dress", 42.0);
        dress.inferred = InferredAttributes {
            age_suitability: Some(AgeSuitability::Years3To5),
            gender: Some(Gender::Female),
            giftability: Some(9.0),
            ..Default::default()
        };
        dress.embedding = Some(HashEmbedder.embed(&digest(&dress.inferred)).await.unwrap());
        MemoryCatalogueStore::with_records(vec![dress]).await
    }

    async fn test_app(replies: &[&str]) -> Router {
        let engine = MatchingEngine::new(Arc::new(HashEmbedder), Arc::new(catalogue().await));
        let chat = Arc::new(ScriptedChat::new(replies.iter().copied()));
        app(AppState::new(Conversation::new(chat, engine.clone()), engine))
    }

    fn post(uri: &str, session: &str, body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(SESSION_HEADER, session)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn text_body(resp: Response) -> String {
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_and_active_ones_kept() {
        let engine = MatchingEngine::new(Arc::new(HashEmbedder), Arc::new(MemoryCatalogueStore::new()));
        let chat = Arc::new(ScriptedChat::new(Vec::<String>::new()));
        let state = AppState::new(Conversation::new(chat, engine.clone()), engine)
            .with_session_ttl(Duration::from_secs(30 * 60));
        let start = Instant::now();
        let minutes = |m: u64| start + Duration::from_secs(m * 60);

        let first = state.session_at("a", minutes(0)).await;
        first.lock().await.push(Role::User, "hello");
        state.session_at("b", minutes(0)).await;
        state.session_at("a", minutes(20)).await;
        assert_eq!(state.session_count().await, 2);

        state.session_at("c", minutes(45)).await;
        assert_eq!(state.session_count().await, 2);
        let kept = state.session_at("a", minutes(45)).await;
        assert!(Arc::ptr_eq(&first, &kept));

        let fresh = state.session_at("b", minutes(46)).await;
        assert_eq!(*fresh.lock().await, SessionContext::new());
    }

    #[tokio::test]
    async fn home_page_renders_and_issues_a_session_cookie() {
        let app = test_app(&[]).await;
        let resp = app
            .oneshot(axum::http::Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
        assert!(cookie.starts_with("kidcat_session="));
        assert!(text_body(resp).await.contains("Guided Questions"));
    }

    #[tokio::test]
    async fn set_choice_rejects_unknown_choices_and_bad_json() {
        let app = test_app(&[]).await;
        let resp = app
            .clone()
            .oneshot(post("/set-choice", "s1", r#"{"message": "Surprise me"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(text_body(resp).await, "Invalid choice");

        let resp = app
            .oneshot(post("/set-choice/", "s1", "{not json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(text_body(resp).await, "Invalid JSON format");
    }

    #[tokio::test]
    async fn guided_flow_walks_the_questions_per_session() {
        let app = test_app(&[]).await;
        let start = json_body(
            app.clone()
                .oneshot(post("/set-choice", "mum", r#"{"message": "Guided Questions"}"#))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(start["response"][1], "Who are you shopping for?");
        assert_eq!(start["options"][0], "Mothers");

        let next = json_body(
            app.clone()
                .oneshot(post("/chat", "mum", r#"{"message": "Your Baby"}"#))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(next["response"], "What is your budget?");

        // a second shopper starts from the first question
        let other = json_body(
            app.clone()
                .oneshot(post("/chat/", "dad", r#"{"message": "Toys"}"#))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(other["response"], "What is your budget?");

        let reset = json_body(
            app.oneshot(post("/chat", "mum", r#"{"message": "Start Over"}"#))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(reset["response"], "Chat reset. You can start over.");
    }

    #[tokio::test]
    async fn free_flow_results_come_back_with_products() {
        let app = test_app(&[r#"{"response": "Here are some ideas",
              "results": {"maximum_price": 50, "age_suitability": "3-5 years", "gender": "female"}}"#])
        .await;
        app.clone()
            .oneshot(post("/set-choice", "s2", r#"{"message": "Free Flow"}"#))
            .await
            .unwrap();
        let turn = json_body(
            app.oneshot(post("/chat", "s2", r#"{"message": "A dress for my 4 year old, under 50"}"#))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(turn["success"], true);
        assert_eq!(turn["response"], "Here are some ideas");
        assert_eq!(turn["results"]["gender"], "female");
        assert_eq!(turn["products"][0]["name"], "Party Dress");
    }

    #[tokio::test]
    async fn recommend_endpoint_filters_and_explains_failures() {
        let app = test_app(&[]).await;
        let ok = app
            .clone()
            .oneshot(post(
                "/recommend",
                "s3",
                r#"{"maximum_price": 40, "age_suitability": "3-5 years", "gender": "female"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(json_body(ok).await["products"].as_array().unwrap().len(), 0);

        let incomplete = app
            .oneshot(post("/recommend", "s3", r#"{"maximum_price": 40}"#))
            .await
            .unwrap();
        assert_eq!(incomplete.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(incomplete).await["success"], false);
    }

    #[test]
    fn session_id_prefers_header_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; kidcat_session=abc"));
        assert_eq!(session_id(&headers).as_deref(), Some("abc"));
        headers.insert(SESSION_HEADER, HeaderValue::from_static("xyz"));
        assert_eq!(session_id(&headers).as_deref(), Some("xyz"));
        assert!(session_id(&HeaderMap::new()).is_none());
    }
}
