//! Two-role Basic Auth and access logging middleware.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use tracing::{debug, info, warn};

// ============================================================
// Roles and credentials
// ============================================================

/// Viewers may read; admins may also start and stop monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Role {
    Viewer,
    Admin,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug)]
struct Credential {
    user: String,
    password: String,
    role: Role,
}

#[derive(Debug)]
pub(crate) struct AuthConfig {
    credentials: Vec<Credential>,
}

impl AuthConfig {
    /// Builds the credential table. Returns `Ok(None)` when no credentials are
    /// configured (auth disabled) and an error when a pair is only half set.
    pub(crate) fn from_pairs(
        admin: (Option<String>, Option<String>),
        viewer: (Option<String>, Option<String>),
    ) -> Result<Option<Self>, String> {
        let mut credentials = Vec::new();
        for ((user, password), role) in [(admin, Role::Admin), (viewer, Role::Viewer)] {
            match (user, password) {
                (Some(user), Some(password)) => credentials.push(Credential {
                    user,
                    password,
                    role,
                }),
                (Some(_), None) | (None, Some(_)) => {
                    return Err(format!(
                        "--{0}-user and --{0}-password must both be set",
                        role.as_str()
                    ));
                }
                (None, None) => {}
            }
        }
        if credentials.is_empty() {
            return Ok(None);
        }
        if credentials.len() == 2 && credentials[0].user == credentials[1].user {
            return Err("admin and viewer users must differ".to_string());
        }
        Ok(Some(Self { credentials }))
    }

    fn role_of(&self, user: &str, password: &str) -> Option<Role> {
        self.credentials
            .iter()
            .find(|c| c.user == user && c.password == password)
            .map(|c| c.role)
    }
}

/// Role needed for a request, `None` for public endpoints.
pub(crate) fn required_role(method: &Method, path: &str) -> Option<Role> {
    if path == "/api/v1/health" || !path.starts_with("/api/") {
        return None;
    }
    if *method == Method::POST && path.starts_with("/api/v1/monitoring/") {
        Some(Role::Admin)
    } else {
        Some(Role::Viewer)
    }
}

fn basic_credentials(headers: &HeaderMap) -> Result<(String, String), &'static str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or("no authorization header")?;
    let value = value.to_str().map_err(|_| "invalid header encoding")?;
    let encoded = value.strip_prefix("Basic ").ok_or("not basic auth")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| "invalid base64")?;
    let decoded = String::from_utf8(decoded).map_err(|_| "invalid utf8")?;
    let (user, password) = decoded.split_once(':').ok_or("malformed credentials")?;
    Ok((user.to_owned(), password.to_owned()))
}

// ============================================================
// Basic Auth middleware
// ============================================================

/// Authenticated caller, inserted into request extensions by the auth middleware.
#[derive(Clone)]
pub(crate) struct AuthUser {
    pub(crate) name: String,
    pub(crate) role: Role,
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic realm=\"pgpulse\"")],
        axum::Json(serde_json::json!({"error": "unauthorized"})),
    )
        .into_response()
}

fn forbidden(user: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        axum::Json(serde_json::json!({"error": "forbidden", "username": user})),
    )
        .into_response()
}

pub(crate) async fn basic_auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();
    let Some(required) = required_role(req.method(), &path) else {
        return next.run(req).await;
    };

    let (user, password) = match basic_credentials(req.headers()) {
        Ok(pair) => pair,
        Err(reason) => {
            warn!(path = %path, "auth failed: {reason}");
            return unauthorized();
        }
    };

    let Some(role) = auth.role_of(&user, &password) else {
        warn!(user = %user, path = %path, "auth failed: invalid credentials");
        return unauthorized();
    };

    if role < required {
        warn!(
            user = %user,
            role = role.as_str(),
            path = %path,
            "auth failed: insufficient role"
        );
        return forbidden(&user);
    }

    debug!(user = %user, role = role.as_str(), path = %path, "authenticated");
    req.extensions_mut().insert(AuthUser { name: user, role });
    next.run(req).await
}

// ============================================================
// Access log layer (tower Layer + Service)
// ============================================================

#[derive(Clone)]
pub(crate) struct AccessLogLayer;

impl<S> tower::Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

#[derive(Clone)]
pub(crate) struct AccessLogService<S> {
    inner: S,
}

impl<S> tower::Service<Request> for AccessLogService<S>
where
    S: tower::Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let method = req.method().clone();
        let path = req.uri().path().to_owned();
        let client = req
            .extensions()
            .get::<axum::extract::ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "-".to_owned());
        let user = req
            .extensions()
            .get::<AuthUser>()
            .map(|u| format!("{}({})", u.name, u.role.as_str()))
            .unwrap_or_else(|| "-".to_owned());
        let t0 = Instant::now();

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let response = inner.call(req).await?;
            let latency_ms = t0.elapsed().as_millis() as u64;
            let status = response.status().as_u16();
            if !path.starts_with("/swagger-ui") {
                info!(client, user, status, latency_ms, "{method} {path}");
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn some(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    fn basic(user: &str, password: &str) -> HeaderMap {
        let token = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn no_credentials_disables_auth() {
        assert!(AuthConfig::from_pairs((None, None), (None, None)).unwrap().is_none());
    }

    #[test]
    fn half_configured_pair_is_rejected() {
        let err = AuthConfig::from_pairs((some("root"), None), (None, None)).unwrap_err();
        assert!(err.contains("--admin-password"), "{err}");
        let err = AuthConfig::from_pairs((None, None), (None, some("pw"))).unwrap_err();
        assert!(err.contains("--viewer-user"), "{err}");
    }

    #[test]
    fn roles_resolve_by_credentials() {
        let auth = AuthConfig::from_pairs((some("root"), some("s3cret")), (some("ta"), some("pw")))
            .unwrap()
            .unwrap();
        assert_eq!(auth.role_of("root", "s3cret"), Some(Role::Admin));
        assert_eq!(auth.role_of("ta", "pw"), Some(Role::Viewer));
        assert_eq!(auth.role_of("ta", "s3cret"), None);
    }

    #[test]
    fn same_user_for_both_roles_is_rejected() {
        assert!(AuthConfig::from_pairs((some("u"), some("a")), (some("u"), some("b"))).is_err());
    }

    #[test]
    fn mutating_routes_need_admin() {
        assert_eq!(required_role(&Method::GET, "/api/v1/health"), None);
        assert_eq!(required_role(&Method::GET, "/swagger-ui/"), None);
        assert_eq!(
            required_role(&Method::POST, "/api/v1/monitoring/start"),
            Some(Role::Admin)
        );
        assert_eq!(
            required_role(&Method::GET, "/api/v1/monitoring/status"),
            Some(Role::Viewer)
        );
        assert_eq!(
            required_role(&Method::GET, "/api/v1/metrics/stream"),
            Some(Role::Viewer)
        );
    }

    #[test]
    fn basic_header_parsing() {
        assert_eq!(
            basic_credentials(&basic("ta", "p:w")),
            Ok(("ta".to_string(), "p:w".to_string()))
        );
        assert_eq!(
            basic_credentials(&HeaderMap::new()),
            Err("no authorization header")
        );
        let mut bearer = HeaderMap::new();
        bearer.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        assert_eq!(basic_credentials(&bearer), Err("not basic auth"));
    }
}
