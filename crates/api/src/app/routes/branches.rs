use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    routing::{get, post},
};
use chrono::Utc;

use branchpos_branches::{
    Branch, BranchCommand, ChangeIsolationMode, CreateBranch, DeactivateBranch, SharingSettings,
    UpdateSharing,
};
use branchpos_core::{BranchId, TenantId};
use branchpos_infra::projections::branches::AGGREGATE_TYPE;

use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{authorized, committed, created, items, one, parse_id, require};
use crate::app::services::AppServices;
use crate::app::dto;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_branch).get(list_branches))
        .route("/:id", get(get_branch))
        .route("/:id/mode", post(change_mode))
        .route("/:id/sharing", post(update_sharing))
        .route("/:id/deactivate", post(deactivate_branch))
}

pub async fn create_branch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<dto::CreateBranchRequest>,
) -> ApiResult {
    let branch_id = BranchId::new();
    let cmd = authorized(
        &tenant,
        &principal,
        "branches.write",
        BranchCommand::CreateBranch(CreateBranch {
            tenant_id: tenant.tenant_id(),
            branch_id,
            name: body.name,
            code: body.code,
            mode: body.mode,
            sharing: body.shared.map(SharingSettings::from_kinds),
            occurred_at: Utc::now(),
        }),
    )?;

    let events = dispatch(&services, tenant.tenant_id(), branch_id, cmd)?;
    Ok(created(branch_id, events))
}

pub async fn list_branches(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    require(&tenant, &principal, "branches.read")?;
    Ok(items(services.projections().branches.list(tenant.tenant_id())))
}

pub async fn get_branch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "branches.read")?;
    let branch_id = BranchId::from(parse_id(&id, "branch id")?);
    services
        .projections()
        .branches
        .get(tenant.tenant_id(), &branch_id)
        .map(one)
        .ok_or_else(|| errors::not_found("branch"))
}

pub async fn change_mode(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangeModeRequest>,
) -> ApiResult {
    let branch_id = BranchId::from(parse_id(&id, "branch id")?);
    let cmd = authorized(
        &tenant,
        &principal,
        "branches.write",
        BranchCommand::ChangeIsolationMode(ChangeIsolationMode {
            tenant_id: tenant.tenant_id(),
            branch_id,
            mode: body.mode,
            occurred_at: Utc::now(),
        }),
    )?;

    let events = dispatch(&services, tenant.tenant_id(), branch_id, cmd)?;
    Ok(committed(branch_id, events))
}

pub async fn update_sharing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::UpdateSharingRequest>,
) -> ApiResult {
    let branch_id = BranchId::from(parse_id(&id, "branch id")?);
    let cmd = authorized(
        &tenant,
        &principal,
        "branches.write",
        BranchCommand::UpdateSharing(UpdateSharing {
            tenant_id: tenant.tenant_id(),
            branch_id,
            sharing: SharingSettings::from_kinds(body.shared),
            occurred_at: Utc::now(),
        }),
    )?;

    let events = dispatch(&services, tenant.tenant_id(), branch_id, cmd)?;
    Ok(committed(branch_id, events))
}

pub async fn deactivate_branch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let branch_id = BranchId::from(parse_id(&id, "branch id")?);
    let cmd = authorized(
        &tenant,
        &principal,
        "branches.write",
        BranchCommand::DeactivateBranch(DeactivateBranch {
            tenant_id: tenant.tenant_id(),
            branch_id,
            occurred_at: Utc::now(),
        }),
    )?;

    let events = dispatch(&services, tenant.tenant_id(), branch_id, cmd)?;
    Ok(committed(branch_id, events))
}

fn dispatch(
    services: &AppServices,
    tenant_id: TenantId,
    branch_id: BranchId,
    cmd: BranchCommand,
) -> Result<usize, axum::response::Response> {
    services
        .dispatch::<Branch>(tenant_id, branch_id.into(), AGGREGATE_TYPE, cmd, |_, _| {
            Branch::empty(branch_id)
        })
        .map(|events| events.len())
        .map_err(errors::dispatch_error_to_response)
}
