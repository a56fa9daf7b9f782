use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use chrono::Utc;

use branchpos_branches::BranchStatus;
use branchpos_catalog::{Product, ProductId, ProductStatus, VariantId, VariantKind};
use branchpos_core::{AggregateId, BranchId, TenantId};
use branchpos_infra::projections::inventory::AGGREGATE_TYPE;
use branchpos_inventory::{
    ApproveTransfer, CancelTransfer, DispatchTransfer, RejectTransfer, RequestTransfer,
    StockLocation, StockTransfer, StockTransferCommand, StockTransferId,
};

use crate::app::dto;
use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{authorized, committed, created, items, one, parse_id, require};
use crate::app::services::AppServices;
use crate::context::{BranchContext, PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(request_transfer).get(list_transfers))
        .route("/stats", get(transfer_stats))
        .route("/:id", get(get_transfer))
        .route("/:id/approve", post(approve_transfer))
        .route("/:id/reject", post(reject_transfer))
        .route("/:id/dispatch", post(dispatch_transfer))
        .route("/:id/complete", post(complete_transfer))
        .route("/:id/cancel", post(cancel_transfer))
}

/// Ask for stock to move from the sending branch to another branch.
pub async fn request_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Json(body): Json<dto::CreateStockTransferRequest>,
) -> ApiResult {
    let from_branch = match body.from_branch_id.as_deref() {
        Some(raw) => BranchId::from(parse_id(raw, "from_branch_id")?),
        None => branch.branch_id().ok_or_else(|| {
            errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "from_branch_id is required")
        })?,
    };
    let to_branch = BranchId::from(parse_id(&body.to_branch_id, "to_branch_id")?);
    let source = location(&body.source)?;
    let destination = location(&body.destination)?;
    let transfer_id = StockTransferId::new(AggregateId::new());

    let cmd = authorized(
        &tenant,
        &principal,
        "catalog.write",
        StockTransferCommand::RequestTransfer(RequestTransfer {
            tenant_id: tenant.tenant_id(),
            transfer_id,
            from_branch,
            to_branch,
            source,
            destination,
            quantity: body.quantity,
            notes: body.notes,
            requested_by: Some(principal.user_id()),
            occurred_at: Utc::now(),
        }),
    )?;
    ensure_acting_as(&branch, from_branch, "requested by the sending branch")?;
    for b in [from_branch, to_branch] {
        ensure_active_branch(&services, tenant.tenant_id(), b)?;
    }

    let available = branch_stock(&services, tenant.tenant_id(), source, from_branch, "source")?;
    branch_stock(&services, tenant.tenant_id(), destination, to_branch, "destination")?;

    let open = services.projections().stock_transfers.open_from(tenant.tenant_id(), source);
    if open
        .iter()
        .any(|t| t.destination == destination && t.to_branch == to_branch)
    {
        return Err(errors::json_error(
            StatusCode::CONFLICT,
            "conflict",
            "an open transfer for this stock already exists",
        ));
    }
    let claimed: i64 = open.iter().map(|t| t.quantity).sum();
    if body.quantity > 0 && available - claimed < body.quantity {
        return Err(errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invariant_violation",
            format!(
                "insufficient stock: available {}, claimed by open transfers {claimed}, requested {}",
                available, body.quantity
            ),
        ));
    }

    let events = dispatch(&services, tenant.tenant_id(), transfer_id, cmd)?;
    Ok(created(transfer_id, events))
}

pub async fn list_transfers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Query(query): Query<dto::TransferListQuery>,
) -> ApiResult {
    require(&tenant, &principal, "catalog.read")?;
    let rows = services
        .scoped(tenant.tenant_id(), branch.branch_id())
        .filter(services.projections().stock_transfers.list(tenant.tenant_id()));
    let rows = match query.status.as_deref().map(str::trim) {
        None | Some("") | Some("all") => rows,
        Some(status) => rows
            .into_iter()
            .filter(|t| t.status.as_str() == status)
            .collect(),
    };
    Ok(items(rows))
}

pub async fn transfer_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
) -> ApiResult {
    require(&tenant, &principal, "catalog.read")?;
    let transfers = &services.projections().stock_transfers;
    let rows = services
        .scoped(tenant.tenant_id(), branch.branch_id())
        .filter(transfers.list(tenant.tenant_id()));
    Ok(one(transfers.stats(&rows)))
}

pub async fn get_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "catalog.read")?;
    let transfer_id = StockTransferId::new(parse_id(&id, "transfer id")?);
    services
        .scoped(tenant.tenant_id(), branch.branch_id())
        .get(services.projections().stock_transfers.get(tenant.tenant_id(), &transfer_id))
        .map(one)
        .ok_or_else(|| errors::not_found("stock transfer"))
}

/// The receiving branch accepts the request.
pub async fn approve_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let transfer_id = StockTransferId::new(parse_id(&id, "transfer id")?);
    let cmd = authorized(
        &tenant,
        &principal,
        "catalog.write",
        StockTransferCommand::ApproveTransfer(ApproveTransfer {
            tenant_id: tenant.tenant_id(),
            transfer_id,
            approved_by: Some(principal.user_id()),
            occurred_at: Utc::now(),
        }),
    )?;
    let transfer = load_visible(&services, &tenant, &branch, transfer_id)?;
    ensure_receiver(&branch, &transfer)?;

    let events = dispatch(&services, tenant.tenant_id(), transfer_id, cmd)?;
    Ok(committed(transfer_id, events))
}

pub async fn reject_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RejectTransferRequest>,
) -> ApiResult {
    let transfer_id = StockTransferId::new(parse_id(&id, "transfer id")?);
    let cmd = authorized(
        &tenant,
        &principal,
        "catalog.write",
        StockTransferCommand::RejectTransfer(RejectTransfer {
            tenant_id: tenant.tenant_id(),
            transfer_id,
            reason: body.reason,
            occurred_at: Utc::now(),
        }),
    )?;
    let transfer = load_visible(&services, &tenant, &branch, transfer_id)?;
    ensure_receiver(&branch, &transfer)?;

    let events = dispatch(&services, tenant.tenant_id(), transfer_id, cmd)?;
    Ok(committed(transfer_id, events))
}

/// The sending branch ships the goods.
pub async fn dispatch_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let transfer_id = StockTransferId::new(parse_id(&id, "transfer id")?);
    let cmd = authorized(
        &tenant,
        &principal,
        "catalog.write",
        StockTransferCommand::DispatchTransfer(DispatchTransfer {
            tenant_id: tenant.tenant_id(),
            transfer_id,
            occurred_at: Utc::now(),
        }),
    )?;
    let transfer = load_visible(&services, &tenant, &branch, transfer_id)?;
    ensure_sender(&branch, &transfer)?;

    let events = dispatch(&services, tenant.tenant_id(), transfer_id, cmd)?;
    Ok(committed(transfer_id, events))
}

/// The receiving branch confirms arrival; stock moves between the catalogs.
pub async fn complete_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "catalog.write")?;
    let transfer_id = StockTransferId::new(parse_id(&id, "transfer id")?);
    let transfer = load_visible(&services, &tenant, &branch, transfer_id)?;
    ensure_receiver(&branch, &transfer)?;

    let done = services
        .inventory()
        .complete_transfer(tenant.tenant_id(), transfer_id, Some(principal.user_id()))
        .map_err(errors::stock_error_to_response)?;
    Ok(one(done))
}

pub async fn cancel_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::CancelTransferRequest>>,
) -> ApiResult {
    let transfer_id = StockTransferId::new(parse_id(&id, "transfer id")?);
    let reason = body.and_then(|Json(b)| b.reason);
    let cmd = authorized(
        &tenant,
        &principal,
        "catalog.write",
        StockTransferCommand::CancelTransfer(CancelTransfer {
            tenant_id: tenant.tenant_id(),
            transfer_id,
            reason,
            occurred_at: Utc::now(),
        }),
    )?;
    let transfer = load_visible(&services, &tenant, &branch, transfer_id)?;
    ensure_sender(&branch, &transfer)?;

    let events = dispatch(&services, tenant.tenant_id(), transfer_id, cmd)?;
    Ok(committed(transfer_id, events))
}

fn location(raw: &dto::StockLocationRequest) -> Result<StockLocation, Response> {
    Ok(StockLocation {
        product_id: ProductId::new(parse_id(&raw.product_id, "product_id")?),
        variant_id: VariantId::new(parse_id(&raw.variant_id, "variant_id")?),
    })
}

/// A request acting for a branch may only do what that branch is allowed to.
fn ensure_acting_as(branch: &BranchContext, expected: BranchId, rule: &str) -> Result<(), Response> {
    match branch.branch_id() {
        Some(acting) if acting != expected => Err(errors::json_error(
            StatusCode::FORBIDDEN,
            "wrong_branch",
            format!("this step must be {rule}"),
        )),
        _ => Ok(()),
    }
}

fn ensure_sender(branch: &BranchContext, transfer: &StockTransfer) -> Result<(), Response> {
    match transfer.from_branch() {
        Some(from) => ensure_acting_as(branch, from, "taken by the sending branch"),
        None => Err(errors::not_found("stock transfer")),
    }
}

fn ensure_receiver(branch: &BranchContext, transfer: &StockTransfer) -> Result<(), Response> {
    match transfer.to_branch() {
        Some(to) => ensure_acting_as(branch, to, "taken by the receiving branch"),
        None => Err(errors::not_found("stock transfer")),
    }
}

fn ensure_active_branch(services: &AppServices, tenant_id: TenantId, branch_id: BranchId) -> Result<(), Response> {
    match services.projections().branches.get(tenant_id, &branch_id) {
        Some(rm) if rm.status == BranchStatus::Active => Ok(()),
        Some(_) => Err(errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "branch_inactive",
            format!("branch {branch_id} is not active"),
        )),
        None => Err(errors::not_found("branch")),
    }
}

/// Stock of a standard variant held by `branch_id`.
fn branch_stock(
    services: &AppServices,
    tenant_id: TenantId,
    at: StockLocation,
    branch_id: BranchId,
    side: &str,
) -> Result<i64, Response> {
    let product: Product = services
        .load(tenant_id, at.product_id.0, |_, _| Product::empty(at.product_id))
        .map_err(errors::dispatch_error_to_response)?;
    if product.tenant_id() != Some(tenant_id) {
        return Err(errors::not_found("product"));
    }
    let unprocessable = |msg: String| errors::json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg);

    if product.ownership().branch_id != Some(branch_id) {
        return Err(unprocessable(format!("{side} product is not held by branch {branch_id}")));
    }
    if product.status() == ProductStatus::Archived {
        return Err(unprocessable(format!("{side} product is archived")));
    }
    let variant = product.variant(at.variant_id).ok_or_else(|| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("{side} variant does not belong to its product"),
        )
    })?;
    if variant.kind != VariantKind::Standard || !variant.active {
        return Err(unprocessable(format!(
            "{side} variant must be an active standard variant"
        )));
    }
    Ok(variant.quantity)
}

/// Load a transfer the acting branch sends or receives; anything else is 404.
fn load_visible(
    services: &AppServices,
    tenant: &TenantContext,
    branch: &BranchContext,
    transfer_id: StockTransferId,
) -> Result<StockTransfer, Response> {
    let transfer: StockTransfer = services
        .load(tenant.tenant_id(), transfer_id.0, |_, _| StockTransfer::empty(transfer_id))
        .map_err(errors::dispatch_error_to_response)?;
    let visible = transfer.tenant_id().is_some()
        && branch.branch_id().is_none_or(|b| transfer.involves(b));
    if visible {
        Ok(transfer)
    } else {
        Err(errors::not_found("stock transfer"))
    }
}

fn dispatch(
    services: &AppServices,
    tenant_id: TenantId,
    transfer_id: StockTransferId,
    cmd: StockTransferCommand,
) -> Result<usize, Response> {
    services
        .dispatch::<StockTransfer>(tenant_id, transfer_id.0, AGGREGATE_TYPE, cmd, |_, _| {
            StockTransfer::empty(transfer_id)
        })
        .map(|events| events.len())
        .map_err(errors::dispatch_error_to_response)
}
