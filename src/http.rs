//! HTTP API for the gamification engine
//!
//! Identity comes from the gateway in `X-User-Id` / `X-User-Role`
//! headers. JSON bodies use camelCase field names.
//!
//! ## Routes
//!
//! - `GET /health` - DB reachability and row counts
//! - `POST /files`, `GET /files/{hash}` - submission uploads
//! - `/gamification/settings` - ranking windows and eligibility
//! - `/gamification/challenges[/{id}[/...]]` - challenges, submissions, comments
//! - `/gamification/submissions` - review queue and decisions
//! - `/gamification/ranking` - leaderboard
//! - `/gamification/points` - ledger extract, manual awards, revocations
//! - `/gamification/comments/{id}[/like]` - comment edits, deletes and likes
//!
//! ## Example Usage
//!
//! ```bash
//! curl -H "X-User-Id: u1" -H "X-User-Role: user" \
//!      http://localhost:8095/gamification/challenges
//!
//! curl -X DELETE -H "X-User-Id: admin" -H "X-User-Role: admin" \
//!      "http://localhost:8095/gamification/challenges/$ID?force=true"
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::auth::{identity_from_headers, require_admin, require_authenticated, Requester};
use crate::error::GamificationError;
use crate::object_store::ObjectMetadata;
use crate::services::response::{
    binary_response, created, error_response, from_create_result, from_delete_result, from_result,
    json_response, method_not_allowed, not_found, ok, payload_too_large, HandlerResult,
};
use crate::services::{
    ChallengeDeletion, ChallengeInput, CommentInput, ManualAwardInput, RankingWindow, ReviewInput, Services,
    SettingsInput, SubmitRequest,
};

/// Largest JSON body accepted on non-upload routes
const MAX_JSON_BODY: usize = 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    admin: bool,
}

#[derive(Debug, Default, Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Default, Deserialize)]
struct QueueQuery {
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RankingQuery {
    window: Option<String>,
    category_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommentUpdate {
    content: String,
}

/// HTTP server state
pub struct HttpServer {
    services: Arc<Services>,
    bind_addr: SocketAddr,
    max_upload_bytes: u64,
}

impl HttpServer {
    pub fn new(services: Arc<Services>, bind_addr: SocketAddr, max_upload_bytes: u64) -> Self {
        Self { services, bind_addr, max_upload_bytes }
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), GamificationError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Route requests to handlers
    pub async fn handle_request(&self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or("").to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        let result = match (&method, segments.as_slice()) {
            (&Method::GET, ["health"]) => self.handle_health(),

            (&Method::POST, ["files"]) => self.handle_upload(req).await,
            (&Method::GET, ["files", hash]) => self.handle_get_file(hash).await,
            (_, ["files", ..]) => Ok(method_not_allowed()),

            (_, ["gamification", rest @ ..]) => self.route_gamification(&method, rest, &query, req).await,

            _ => Ok(not_found("Not found")),
        };

        Ok(result.unwrap_or_else(error_response))
    }

    async fn route_gamification(
        &self,
        method: &Method,
        segments: &[&str],
        query: &str,
        req: Request<Incoming>,
    ) -> HandlerResult {
        let requester = self.requester(&req)?;
        let s = &self.services;

        match (method, segments) {
            // Settings
            (&Method::GET, ["settings"]) => {
                require_authenticated(requester)?;
                Ok(from_result(s.ranking.settings()))
            }
            (&Method::PUT, ["settings"]) => {
                let admin = self.admin(requester)?;
                let input: SettingsInput = read_json(req).await?;
                Ok(from_result(s.ranking.update_settings(input, &admin.id)))
            }

            // Challenges
            (&Method::GET, ["challenges"]) => {
                let user = require_authenticated(requester)?;
                let params: ListQuery = parse_query(query)?;
                Ok(from_result(s.challenges.list(&user, params.admin)))
            }
            (&Method::POST, ["challenges"]) => {
                let admin = self.admin(requester)?;
                let input: ChallengeInput = read_json(req).await?;
                Ok(from_create_result(s.challenges.create(input, &admin.id)))
            }
            (&Method::GET, ["challenges", id]) => {
                let user = require_authenticated(requester)?;
                Ok(from_result(s.challenges.get(&user, id)))
            }
            (&Method::PUT, ["challenges", id]) => {
                self.admin(requester)?;
                let input: ChallengeInput = read_json(req).await?;
                Ok(from_result(s.challenges.update(id, input)))
            }
            (&Method::DELETE, ["challenges", id]) => {
                self.admin(requester)?;
                let params: DeleteQuery = parse_query(query)?;
                match s.challenges.delete(id, params.force).await? {
                    ChallengeDeletion::RequiresConfirmation(confirmation) => {
                        Ok(json_response(StatusCode::CONFLICT, &confirmation))
                    }
                    ChallengeDeletion::Deleted(summary) => Ok(ok(&summary)),
                }
            }
            (&Method::GET, ["challenges", id, "submission-count"]) => {
                self.admin(requester)?;
                Ok(from_result(s.challenges.submission_count(id)))
            }
            (&Method::POST, ["challenges", id, "return-submissions"]) => {
                self.admin(requester)?;
                Ok(from_result(s.challenges.return_submissions(id).await))
            }

            // Submissions
            (&Method::POST, ["challenges", id, "submit"]) => {
                let user = require_authenticated(requester)?;
                let body: SubmitRequest = read_json(req).await?;
                Ok(from_create_result(s.submissions.submit(&user, id, body.submission_data).await))
            }
            (&Method::GET, ["challenges", id, "my-submission"]) => {
                let user = require_authenticated(requester)?;
                Ok(from_result(s.submissions.my_submission(&user, id)))
            }
            (&Method::GET, ["challenges", id, "submissions"]) => {
                self.admin(requester)?;
                Ok(from_result(s.submissions.list_for_challenge(id)))
            }
            (&Method::GET, ["submissions"]) => {
                self.admin(requester)?;
                let params: QueueQuery = parse_query(query)?;
                Ok(from_result(s.submissions.list_queue(params.status.as_deref())))
            }
            (&Method::POST, ["submissions", id, "review"]) => {
                let admin = self.admin(requester)?;
                let input: ReviewInput = read_json(req).await?;
                Ok(from_result(s.submissions.review(&admin, id, input)))
            }

            // Ranking and points
            (&Method::GET, ["ranking"]) => {
                require_authenticated(requester)?;
                let params: RankingQuery = parse_query(query)?;
                let window: RankingWindow = params.window.as_deref().unwrap_or("all").parse()?;
                let category = params.category_id.as_deref().filter(|c| !c.is_empty());
                Ok(from_result(s.ranking.rank(window, category)))
            }
            (&Method::GET, ["points", "me"]) => {
                let user = require_authenticated(requester)?;
                let settings = s.ranking.settings()?;
                Ok(from_result(s.ledger.extract(&user.id, &settings)))
            }
            (&Method::GET, ["points", "user", user_id]) => {
                self.admin(requester)?;
                let settings = s.ranking.settings()?;
                Ok(from_result(s.ledger.extract(user_id, &settings)))
            }
            (&Method::POST, ["points"]) => {
                let admin = self.admin(requester)?;
                let input: ManualAwardInput = read_json(req).await?;
                Ok(from_create_result(s.ledger.award(input, &admin.id)))
            }
            (&Method::DELETE, ["points", id]) => {
                self.admin(requester)?;
                Ok(from_delete_result(s.ledger.revoke(id).map(|_| ())))
            }

            // Comments
            (&Method::GET, ["challenges", id, "comments"]) => {
                let user = require_authenticated(requester)?;
                Ok(from_result(s.comments.list(&user, id)))
            }
            (&Method::POST, ["challenges", id, "comments"]) => {
                let user = require_authenticated(requester)?;
                let input: CommentInput = read_json(req).await?;
                Ok(from_create_result(s.comments.post(&user, id, input)))
            }
            (&Method::PUT, ["comments", id]) => {
                let user = require_authenticated(requester)?;
                let body: CommentUpdate = read_json(req).await?;
                Ok(from_result(s.comments.update(&user, id, &body.content)))
            }
            (&Method::DELETE, ["comments", id]) => {
                let user = require_authenticated(requester)?;
                Ok(from_delete_result(s.comments.delete(&user, id)))
            }
            (&Method::POST, ["comments", id, "like"]) => {
                let user = require_authenticated(requester)?;
                Ok(from_result(s.comments.toggle_like(&user, id)))
            }

            _ => Ok(not_found("Not found")),
        }
    }

    fn requester(&self, req: &Request<Incoming>) -> Result<Option<Requester>, GamificationError> {
        match identity_from_headers(req.headers())? {
            Some(identity) => Ok(Some(self.services.db.with_conn(|conn| Requester::resolve(conn, identity))?)),
            None => Ok(None),
        }
    }

    fn admin(&self, requester: Option<Requester>) -> Result<Requester, GamificationError> {
        let requester = require_authenticated(requester)?;
        require_admin(&requester)?;
        Ok(requester)
    }

    /// Health check endpoint
    fn handle_health(&self) -> HandlerResult {
        let stats = self.services.db.stats()?;
        Ok(ok(&serde_json::json!({
            "status": "ok",
            "database": stats,
            "eventSubscribers": self.services.events.subscriber_count(),
        })))
    }

    /// POST /files - store an upload, returns its URL
    async fn handle_upload(&self, req: Request<Incoming>) -> HandlerResult {
        require_authenticated(self.requester(&req)?)?;

        let declared = req
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.map_or(false, |len| len > self.max_upload_bytes) {
            return Ok(payload_too_large(self.max_upload_bytes));
        }

        let metadata = ObjectMetadata {
            content_type: header_string(&req, header::CONTENT_TYPE.as_str()),
            file_name: header_string(&req, "x-file-name"),
        };

        let limit = usize::try_from(self.max_upload_bytes).unwrap_or(usize::MAX);
        let data = match Limited::new(req.into_body(), limit).collect().await {
            Ok(body) => body.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Ok(payload_too_large(self.max_upload_bytes));
            }
            Err(e) => return Err(GamificationError::Validation(format!("Failed to read body: {}", e))),
        };
        if data.is_empty() {
            return Err(GamificationError::Validation("Upload body is empty".into()));
        }

        let stored = self.services.objects.store(&data, metadata).await?;
        info!(hash = %stored.hash, size = stored.size_bytes, existed = stored.already_existed, "Stored upload");

        Ok(created(&stored))
    }

    /// GET /files/{hash}
    async fn handle_get_file(&self, hash: &str) -> HandlerResult {
        match self.services.objects.get(hash).await? {
            Some(content) => {
                let content_type = content
                    .metadata
                    .content_type
                    .as_deref()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let mut response = binary_response(&content_type, content.data);
                if let Ok(etag) = header::HeaderValue::from_str(&format!("\"{}\"", hash)) {
                    response.headers_mut().insert(header::ETAG, etag);
                }
                response.headers_mut().insert(
                    header::CACHE_CONTROL,
                    header::HeaderValue::from_static("public, max-age=31536000, immutable"),
                );
                Ok(response)
            }
            None => Ok(not_found("File not found")),
        }
    }
}

fn header_string(req: &Request<Incoming>, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, GamificationError> {
    let body = Limited::new(req.into_body(), MAX_JSON_BODY)
        .collect()
        .await
        .map_err(|e| GamificationError::Validation(format!("Failed to read body: {}", e)))?
        .to_bytes();

    parse_json(&body)
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, GamificationError> {
    serde_json::from_slice(body).map_err(|e| GamificationError::Validation(format!("Invalid JSON body: {}", e)))
}

fn parse_query<T: DeserializeOwned + Default>(query: &str) -> Result<T, GamificationError> {
    if query.is_empty() {
        return Ok(T::default());
    }
    serde_urlencoded::from_str(query)
        .map_err(|e| GamificationError::Validation(format!("Invalid query string: {}", e)))
}
