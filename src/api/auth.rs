//! Bearer-token auth middleware. The token is generated once per daemon
//! start and persisted to `.oak/ci/.daemon_token` (mode 0600); an
//! `OAK_CI_TOKEN` environment variable overrides it, letting CI or a
//! supervising process pin a known token instead of reading the file.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::AppError;

use super::ServerState;

pub fn resolve_token(generated: &str) -> String {
    std::env::var("OAK_CI_TOKEN")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| generated.to_string())
}

pub fn generate_token() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    (0..32)
        .map(|_| {
            const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
            CHARS[rng.random_range(0..CHARS.len())] as char
        })
        .collect()
}

/// Writes the token to `path` with mode 0600 on unix, best-effort elsewhere.
pub fn persist_token(path: &std::path::Path, token: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, token)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

pub async fn require_bearer_token(
    State(state): State<std::sync::Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let presented = header.and_then(|h| h.strip_prefix("Bearer "));
    if presented != Some(state.token.as_str()) {
        return Err(AppError::Auth);
    }
    Ok(next.run(request).await)
}
