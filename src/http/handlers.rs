//! Management endpoint handlers.
//!
//! Every config-bearing response uses one header profile (connection-close
//! plus `application/json`) so at most one response per connection can
//! trigger a restart, which keeps the deferred-restart reasoning simple.
//! Handlers never call the restart primitive themselves; they mark the
//! triggering connection and let the dispatcher act on close.

use std::path::{Path, PathBuf};

use axum::body::Bytes;
use axum::extract::{Multipart, RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde::Serialize;

use crate::config::acl::AccessList;
use crate::config::store::{ConfigError, ConfigStore};
use crate::config::DeviceConfig;
use crate::http::registry::{EndpointOptions, EndpointRegistry};
use crate::http::server::Ctx;
use crate::net::connection::ConnectionId;

/// JSON error envelope: `{status, message?}`.
#[derive(Debug, Serialize)]
struct StatusBody {
    status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Register the management endpoint set on every active surface, with the
/// global auth binding from the configuration.
pub fn register_management_endpoints(registry: &mut EndpointRegistry<Ctx>, config: &DeviceConfig) {
    let opts = EndpointOptions {
        auth_domain: config.http.auth_domain.clone(),
        auth_file: config.http.auth_file.as_ref().map(PathBuf::from),
    };

    registry.register(
        "/conf",
        Router::new()
            .route("/defaults", get(conf_defaults))
            .route("/current", get(conf_current))
            .route("/save", post(conf_save))
            .route("/reset", post(conf_reset)),
        &opts,
    );
    registry.register("/reboot", Router::new().route("/", post(reboot)), &opts);
    registry.register("/ro_vars", Router::new().route("/", get(ro_vars)), &opts);
    registry.register("/upload", Router::new().route("/", post(upload)), &opts);
}

fn json_close(status: StatusCode, body: String) -> Response {
    (
        status,
        [
            (header::CONNECTION, "close"),
            (header::CONTENT_TYPE, "application/json"),
        ],
        body,
    )
        .into_response()
}

fn wants_pretty(query: &Option<String>) -> bool {
    query.as_deref() == Some("pretty")
}

/// Serialize a schema-shaped value as the whole response body.
fn schema_response<T: Serialize>(value: &T, pretty: bool) -> Response {
    let serialized = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match serialized {
        Ok(body) => json_close(StatusCode::OK, body),
        Err(err) => {
            tracing::error!(error = %err, "Schema serialization failed");
            envelope_response(-10, None)
        }
    }
}

fn envelope_response(status: i32, message: Option<String>) -> Response {
    let body = StatusBody { status, message };
    let body = serde_json::to_string(&body).unwrap_or_else(|_| format!("{{\"status\":{status}}}"));
    tracing::error!(status, body = %body, "Management request failed");
    json_close(StatusCode::INTERNAL_SERVER_ERROR, body)
}

fn config_error_response(err: &ConfigError) -> Response {
    let message = match err {
        ConfigError::Persist(m) => Some(m.clone()),
        ConfigError::Io(e) => Some(e.to_string()),
        _ => None,
    };
    envelope_response(err.status(), message)
}

fn ok_status() -> Response {
    json_close(StatusCode::OK, "{\"status\":0}".to_string())
}

/// `GET /conf/defaults[?pretty]`: built-in defaults, no device overrides.
/// Never mutates persisted state.
async fn conf_defaults(State(ctx): State<Ctx>, RawQuery(query): RawQuery) -> Response {
    match ctx.store.defaults() {
        Ok(cfg) => schema_response(&cfg, wants_pretty(&query)),
        Err(err) => config_error_response(&err),
    }
}

/// `GET /conf/current[?pretty]`: the live, in-memory effective config.
async fn conf_current(State(ctx): State<Ctx>, RawQuery(query): RawQuery) -> Response {
    schema_response(&*ctx.config, wants_pretty(&query))
}

/// `POST /conf/save`: overlay the body onto a scratch copy of the defaults
/// and persist. The key ACL comes from the defaults, never from the request.
/// On success the connection is marked for a deferred restart.
async fn conf_save(
    State(ctx): State<Ctx>,
    Extension(conn): Extension<ConnectionId>,
    body: Bytes,
) -> Response {
    let mut scratch = match ctx.store.defaults() {
        Ok(cfg) => cfg,
        Err(err) => return config_error_response(&err),
    };
    let acl = AccessList::parse(&scratch.conf_acl);

    if let Err(err) = ConfigStore::overlay(&mut scratch, &body, &acl) {
        // Parse failure: persisted state stays untouched, no restart.
        return config_error_response(&err);
    }
    if let Err(err) = ctx.store.persist(&scratch) {
        return config_error_response(&err);
    }

    ctx.restart.request_restart(conn);
    ok_status()
}

/// `POST /conf/reset`: delete the persisted user configuration, if any,
/// then mark for a deferred restart.
async fn conf_reset(State(ctx): State<Ctx>, Extension(conn): Extension<ConnectionId>) -> Response {
    match ctx.store.reset() {
        Ok(_removed) => {
            ctx.restart.request_restart(conn);
            ok_status()
        }
        Err(err) => config_error_response(&err),
    }
}

/// `POST /reboot`: empty 200, restart deferred to connection close.
async fn reboot(State(ctx): State<Ctx>, Extension(conn): Extension<ConnectionId>) -> Response {
    tracing::debug!(conn = %conn, "Reboot requested");
    ctx.restart.request_restart(conn);
    json_close(StatusCode::OK, String::new())
}

/// `GET /ro_vars[?pretty]`: read-only diagnostics through the same JSON
/// emission path as the config schema.
async fn ro_vars(State(ctx): State<Ctx>, RawQuery(query): RawQuery) -> Response {
    tracing::debug!("RO-vars requested");
    schema_response(&ctx.ro_vars(), wants_pretty(&query))
}

#[derive(Debug, Serialize)]
struct UploadOutcome {
    status: i32,
    saved: Vec<String>,
    rejected: Vec<String>,
}

/// `POST /upload`: multipart file upload. Filenames failing the upload ACL
/// are rejected without touching the filesystem.
async fn upload(State(ctx): State<Ctx>, mut multipart: Multipart) -> Response {
    let acl = AccessList::parse(&ctx.config.http.upload_acl);
    let upload_dir = Path::new(&ctx.config.http.upload_dir);
    let mut outcome = UploadOutcome {
        status: 0,
        saved: Vec::new(),
        rejected: Vec::new(),
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "Malformed upload body");
                return json_close(
                    StatusCode::BAD_REQUEST,
                    "{\"status\":-11}".to_string(),
                );
            }
        };
        let Some(name) = field.file_name().map(ToString::to_string) else {
            continue;
        };

        // The ACL decides, and path separators never reach the filesystem.
        if !acl.allows(&name) || name.contains('/') || name.contains("..") {
            tracing::warn!(file = %name, "Upload rejected by ACL");
            outcome.rejected.push(name);
            continue;
        }

        let data = match field.bytes().await {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(file = %name, error = %err, "Upload read failed");
                return json_close(StatusCode::BAD_REQUEST, "{\"status\":-11}".to_string());
            }
        };
        if let Err(err) = std::fs::create_dir_all(upload_dir)
            .and_then(|()| std::fs::write(upload_dir.join(&name), &data))
        {
            return config_error_response(&ConfigError::Io(err));
        }
        tracing::info!(file = %name, bytes = data.len(), "Upload complete");
        outcome.saved.push(name);
    }

    match serde_json::to_string(&outcome) {
        Ok(body) => json_close(StatusCode::OK, body),
        Err(_) => ok_status(),
    }
}
