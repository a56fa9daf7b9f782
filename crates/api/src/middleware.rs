use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use branchpos_auth::JwtValidator;
use branchpos_core::BranchId;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{BranchContext, PrincipalContext, TenantContext};

/// Header a tenant-wide user sets to act for one branch.
pub const BRANCH_HEADER: &str = "x-branch-id";

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let token = extract_bearer(req.headers())
        .map_err(|status| errors::json_error(status, "unauthenticated", "missing or malformed bearer token"))?;

    let claims = state.jwt.validate(token, Utc::now()).map_err(|e| {
        tracing::debug!(error = %e, "token rejected");
        errors::json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "invalid token")
    })?;

    let requested = requested_branch(req.headers())?;
    let branch_id = match (claims.branch_id, requested) {
        (Some(pinned), Some(asked)) if pinned != asked => {
            return Err(errors::json_error(
                StatusCode::FORBIDDEN,
                "branch_mismatch",
                "token is bound to a different branch",
            ));
        }
        (Some(pinned), _) => Some(pinned),
        (None, asked) => asked,
    };

    req.extensions_mut().insert(TenantContext::new(claims.tenant_id));
    req.extensions_mut()
        .insert(PrincipalContext::new(claims.sub, claims.roles.clone()));
    req.extensions_mut().insert(BranchContext::new(branch_id));

    Ok(next.run(req).await)
}

/// Rejects writes made on behalf of a deactivated branch. Runs inside the
/// auth layer, so the request contexts are present.
pub async fn active_branch_middleware(
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, Response> {
    let read_only = matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS);
    let tenant = req.extensions().get::<TenantContext>().copied();
    let branch = req.extensions().get::<BranchContext>().and_then(BranchContext::branch_id);
    let services = req.extensions().get::<Arc<AppServices>>();

    if let (false, Some(tenant), Some(branch_id), Some(services)) = (read_only, tenant, branch, services) {
        if !services.projections().branches.accepts_writes(tenant.tenant_id(), branch_id) {
            tracing::debug!(branch_id = %branch_id, "write rejected for inactive branch");
            return Err(errors::json_error(
                StatusCode::FORBIDDEN,
                "branch_inactive",
                "the acting branch is inactive",
            ));
        }
    }

    Ok(next.run(req).await)
}

fn requested_branch(headers: &HeaderMap) -> Result<Option<BranchId>, Response> {
    let Some(value) = headers.get(BRANCH_HEADER) else {
        return Ok(None);
    };
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<BranchId>().ok())
        .map(Some)
        .ok_or_else(|| errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid X-Branch-Id header"))
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
