use std::fmt::Display;

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde::Serialize;

use branchpos_auth::{CommandAuthorization, Permission};
use branchpos_branches::{EntityKind, Ownership};
use branchpos_core::AggregateId;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{BranchContext, PrincipalContext, TenantContext};

/// Associates required permissions with a command.
pub struct CmdAuth<C> {
    pub inner: C,
    pub required: Vec<Permission>,
}

impl<C> CommandAuthorization for CmdAuth<C> {
    fn required_permissions(&self) -> &[Permission] {
        &self.required
    }
}

/// Check `permission` for the request and hand `command` back for dispatch.
pub fn authorized<C>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    permission: &'static str,
    command: C,
) -> Result<C, Response> {
    let cmd_auth = CmdAuth {
        inner: command,
        required: vec![Permission::new(permission)],
    };
    crate::authz::authorize_command(tenant, principal, &cmd_auth).map_err(errors::forbidden)?;
    Ok(cmd_auth.inner)
}

/// Permission check for read endpoints.
pub fn require(tenant: &TenantContext, principal: &PrincipalContext, permission: &'static str) -> Result<(), Response> {
    authorized(tenant, principal, permission, ())
}

pub fn parse_id(raw: &str, what: &str) -> Result<AggregateId, Response> {
    raw.trim().parse().map_err(|_| errors::invalid_id(what))
}

/// Writes go only to records the acting branch can see. `ownership` is `None`
/// when the aggregate does not exist; both cases answer 404.
pub fn ensure_visible(
    services: &AppServices,
    tenant: &TenantContext,
    branch: &BranchContext,
    kind: EntityKind,
    ownership: Option<Ownership>,
    what: &str,
) -> Result<(), Response> {
    let visible = ownership.is_some_and(|o| {
        services
            .scoped(tenant.tenant_id(), branch.branch_id())
            .policy()
            .is_visible(kind, &o)
    });
    if visible { Ok(()) } else { Err(errors::not_found(what)) }
}

pub fn created(id: impl Display, events_committed: usize) -> Response {
    (
        StatusCode::CREATED,
        Json(serde_json::json!({ "id": id.to_string(), "events_committed": events_committed })),
    )
        .into_response()
}

pub fn committed(id: impl Display, events_committed: usize) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "id": id.to_string(), "events_committed": events_committed })),
    )
        .into_response()
}

pub fn items<T: Serialize>(items: Vec<T>) -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
}

pub fn one<T: Serialize>(item: T) -> Response {
    (StatusCode::OK, Json(item)).into_response()
}
