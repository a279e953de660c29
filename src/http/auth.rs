//! Per-endpoint HTTP Basic authentication.
//!
//! Registrations carry an auth domain and a credentials file; when the file
//! is set, the endpoint's routes are wrapped in this middleware. Credentials
//! are `user:password` lines; the file is read per request so rotating it
//! does not require a restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::Engine;

#[derive(Clone)]
struct BasicAuth {
    domain: String,
    file: Arc<PathBuf>,
}

/// Wrap `routes` so every request must carry valid basic-auth credentials
/// from `file`; failures get a 401 challenge naming `domain`.
pub fn protect<S>(routes: Router<S>, domain: &str, file: &Path) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let auth = BasicAuth {
        domain: domain.to_string(),
        file: Arc::new(file.to_path_buf()),
    };
    routes.layer(middleware::from_fn(move |request: Request, next: Next| {
        let auth = auth.clone();
        async move { auth.check(request, next).await }
    }))
}

impl BasicAuth {
    async fn check(self, request: Request, next: Next) -> Response {
        if self.authorized(request.headers()) {
            next.run(request).await
        } else {
            (
                StatusCode::UNAUTHORIZED,
                [(
                    header::WWW_AUTHENTICATE,
                    format!("Basic realm=\"{}\"", self.domain),
                )],
                "Unauthorized",
            )
                .into_response()
        }
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(value) = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        let Some(encoded) = value.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(presented) = String::from_utf8(decoded) else {
            return false;
        };

        let contents = match std::fs::read_to_string(self.file.as_ref()) {
            Ok(contents) => contents,
            Err(err) => {
                tracing::warn!(
                    file = %self.file.display(),
                    error = %err,
                    "Credentials file unreadable, denying"
                );
                return false;
            }
        };
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .any(|line| line == presented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::routing::get;
    use tower::ServiceExt;

    fn credentials_file(lines: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(lines.as_bytes()).unwrap();
        file
    }

    fn app(file: &Path) -> Router {
        protect(
            Router::new().route("/secret", get(|| async { "ok" })),
            "device",
            file,
        )
    }

    fn basic(user_pass: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(user_pass)
        )
    }

    #[tokio::test]
    async fn missing_credentials_get_a_challenge() {
        let file = credentials_file("admin:secret\n");
        let response = app(file.path())
            .oneshot(
                axum::http::Request::builder()
                    .uri("/secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(challenge.contains("device"));
    }

    #[tokio::test]
    async fn valid_credentials_pass() {
        let file = credentials_file("# devices\nadmin:secret\nops:hunter2\n");
        let response = app(file.path())
            .oneshot(
                axum::http::Request::builder()
                    .uri("/secret")
                    .header(header::AUTHORIZATION, basic("ops:hunter2"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_password_rejected() {
        let file = credentials_file("admin:secret\n");
        let response = app(file.path())
            .oneshot(
                axum::http::Request::builder()
                    .uri("/secret")
                    .header(header::AUTHORIZATION, basic("admin:wrong"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
