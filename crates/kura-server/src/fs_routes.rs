//! The `/fs/*` HTTP surface.
//!
//! | Method | Meaning |
//! |--------|---------|
//! | `GET`  | `stat` with `?stat=true`, else `readdir` on directories, else `read` |
//! | `PUT`  | `write` |
//! | `DELETE` | `unlink` on files, `rmdir` on directories |
//! | `POST /fs/mkdir` | `mkdir` |
//! | `POST /fs/rename` | `rename` |
//!
//! `GET <dir>?stream=true` emits the listing as newline-delimited JSON.
//! With streaming enabled the connection stays open for the duration of
//! the stream; otherwise the sequence is collected inside the transaction
//! and framed afterwards.
//!
//! The caller is derived from plain headers (`x-kura-tenant`,
//! `x-kura-user`, …); a real deployment puts its token validation in
//! front and replaces [`caller_from_headers`].

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Path as UrlPath, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use kura_kernel::vfs::path as vpath;
use kura_kernel::{FileType, FsEntry};
use kura_types::{Caller, Role};

use crate::error::ApiError;
use crate::txn::{self, AppState};

pub fn router(state: AppState) -> Router {
    let max_body = state.config.max_request_body;
    Router::new()
        .route("/fs", get(get_root))
        .route("/fs/mkdir", post(post_mkdir))
        .route("/fs/rename", post(post_rename))
        .route(
            "/fs/{*path}",
            get(get_path).put(put_path).delete(delete_path),
        )
        .layer(DefaultBodyLimit::max(max_body))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct FsQuery {
    #[serde(default)]
    stat: bool,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct MkdirBody {
    path: String,
}

#[derive(Debug, Deserialize)]
struct RenameBody {
    from: String,
    to: String,
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Derive the caller and namespace from request headers.
fn caller_from_headers(headers: &HeaderMap) -> Result<(Caller, String), ApiError> {
    let ns = header_str(headers, "x-kura-tenant")
        .ok_or_else(|| ApiError::bad_request("/", "missing x-kura-tenant header"))?
        .to_string();

    let username = header_str(headers, "x-kura-user").unwrap_or("anonymous");
    let user_id = header_str(headers, "x-kura-user-id").unwrap_or(username);
    let role = header_str(headers, "x-kura-role")
        .and_then(Role::parse)
        .unwrap_or(Role::User);
    let groups: Vec<String> = header_str(headers, "x-kura-groups")
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut caller = Caller::new(user_id, username, role).with_groups(groups);
    if matches!(header_str(headers, "x-kura-sudo"), Some("true" | "1")) {
        caller = caller.with_sudo_token();
    }
    Ok((caller, ns))
}

async fn get_root(
    State(state): State<AppState>,
    Query(q): Query<FsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    handle_get(state, String::new(), q, headers).await
}

async fn get_path(
    State(state): State<AppState>,
    UrlPath(raw): UrlPath<String>,
    Query(q): Query<FsQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    handle_get(state, raw, q, headers).await
}

enum GetBody {
    Listing(Vec<FsEntry>),
    File(Vec<u8>),
}

async fn handle_get(
    state: AppState,
    raw: String,
    q: FsQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (caller, ns) = caller_from_headers(&headers)?;
    let p = vpath::normalize(&format!("/{raw}"));

    if q.stat {
        let entry = txn::with_search_path(&state, caller, &ns, &p, {
            let p = p.clone();
            move |env| async move { env.vfs.stat(&p).await }
        })
        .await?;
        return Ok(Json(entry).into_response());
    }

    if q.stream {
        return streamed_listing(state, caller, ns, p).await;
    }

    let body = txn::with_search_path(&state, caller, &ns, &p, {
        let p = p.clone();
        move |env| async move {
            let is_dir = match env.vfs.probe(&p) {
                Some(FileType::Directory) => true,
                Some(FileType::File | FileType::Symlink) => false,
                None => env.vfs.stat(&p).await?.is_dir(),
            };
            if is_dir {
                Ok(GetBody::Listing(env.vfs.readdir(&p).await?))
            } else {
                Ok(GetBody::File(env.vfs.read(&p).await?))
            }
        }
    })
    .await?;

    Ok(match body {
        GetBody::Listing(entries) => Json(json!({
            "type": "directory",
            "path": p,
            "entries": entries,
        }))
        .into_response(),
        GetBody::File(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
    })
}

/// `?stream=true`: NDJSON, one `FSEntry` per line.
async fn streamed_listing(
    state: AppState,
    caller: Caller,
    ns: String,
    p: String,
) -> Result<Response, ApiError> {
    if state.config.streaming_enabled {
        let stream = txn::stream_entries(state.clone(), caller, ns, p).await?;
        let body = Body::from_stream(stream.map(|item| match item {
            Ok(value) => {
                let mut line = serde_json::to_vec(&value).map_err(std::io::Error::other)?;
                line.push(b'\n');
                Ok::<_, std::io::Error>(line)
            }
            Err(e) => Err(std::io::Error::other(e.to_string())),
        }));
        return Ok((
            [
                (
                    header::CONTENT_TYPE,
                    header::HeaderValue::from_static("application/x-ndjson"),
                ),
                (
                    header::HeaderName::from_static("x-kura-streamable"),
                    header::HeaderValue::from_static("true"),
                ),
            ],
            body,
        )
            .into_response());
    }

    // Streaming disabled: collect the sequence inside the transaction
    // (the connection is only valid there), then frame it afterwards.
    let entries = txn::with_transaction(&state, caller, &ns, &p, {
        let p = p.clone();
        move |env| async move {
            let children = env.vfs.readdir(&p).await?;
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                out.push(env.vfs.stat(&vpath::join(&p, &child.name)).await?);
            }
            Ok(out)
        }
    })
    .await?;
    let mut body = Vec::new();
    for entry in &entries {
        let line = serde_json::to_vec(entry)
            .map_err(|e| ApiError::internal(state.config.dev_mode, &p, e))?;
        body.extend(line);
        body.push(b'\n');
    }
    Ok((
        [
            (
                header::CONTENT_TYPE,
                header::HeaderValue::from_static("application/x-ndjson"),
            ),
            (
                header::HeaderName::from_static("x-kura-streamable"),
                header::HeaderValue::from_static("true"),
            ),
        ],
        body,
    )
        .into_response())
}

async fn put_path(
    State(state): State<AppState>,
    UrlPath(raw): UrlPath<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let (caller, ns) = caller_from_headers(&headers)?;
    let p = vpath::normalize(&format!("/{raw}"));
    txn::with_transaction(&state, caller, &ns, &p, {
        let p = p.clone();
        move |env| async move { env.vfs.write(&p, &body).await }
    })
    .await?;
    Ok(Json(json!({ "ok": true, "path": p })).into_response())
}

async fn delete_path(
    State(state): State<AppState>,
    UrlPath(raw): UrlPath<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let (caller, ns) = caller_from_headers(&headers)?;
    let p = vpath::normalize(&format!("/{raw}"));
    txn::with_transaction(&state, caller, &ns, &p, {
        let p = p.clone();
        move |env| async move {
            let entry = env.vfs.stat(&p).await?;
            if entry.is_dir() {
                env.vfs.rmdir(&p).await
            } else {
                env.vfs.unlink(&p).await
            }
        }
    })
    .await?;
    Ok(Json(json!({ "ok": true, "path": p })).into_response())
}

async fn post_mkdir(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<MkdirBody>,
) -> Result<Response, ApiError> {
    let (caller, ns) = caller_from_headers(&headers)?;
    let p = vpath::normalize(&body.path);
    txn::with_transaction(&state, caller, &ns, &p, {
        let p = p.clone();
        move |env| async move { env.vfs.mkdir(&p).await }
    })
    .await?;
    Ok(Json(json!({ "ok": true, "path": p })).into_response())
}

async fn post_rename(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RenameBody>,
) -> Result<Response, ApiError> {
    let (caller, ns) = caller_from_headers(&headers)?;
    let from = vpath::normalize(&body.from);
    let to = vpath::normalize(&body.to);
    txn::with_transaction(&state, caller, &ns, &from, {
        let from = from.clone();
        let to = to.clone();
        move |env| async move { env.vfs.rename(&from, &to).await }
    })
    .await?;
    Ok(Json(json!({ "ok": true, "from": from, "to": to })).into_response())
}
