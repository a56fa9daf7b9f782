use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;

use branchpos_branches::EntityKind;
use branchpos_catalog::{Product, ProductId, ProductStatus, VariantId, VariantKind};
use branchpos_core::{AggregateId, BASE_CURRENCY, Money, TenantId};
use branchpos_finance::{AccountId, FinanceAccount};
use branchpos_infra::projections::purchasing::AGGREGATE_TYPE;
use branchpos_parties::{Party, PartyId, PartyKind};
use branchpos_purchasing::{
    CreatePurchaseOrder, NewLine, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderId, SendOrder,
};

use crate::app::dto;
use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{
    authorized, committed, created, ensure_visible, items, one, parse_id, require,
};
use crate::app::services::AppServices;
use crate::context::{BranchContext, PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new().nest("/orders", orders_router())
}

fn orders_router() -> Router {
    Router::new()
        .route("/", post(create_purchase_order).get(list_purchase_orders))
        .route("/:id", get(get_purchase_order))
        .route("/:id/send", post(send_purchase_order))
        .route("/:id/receive", post(receive_purchase_order_goods))
        .route("/:id/payments", post(record_payment).get(payment_summary))
        .route("/:id/payments/:pid/reverse", post(reverse_payment))
}

pub async fn create_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Json(body): Json<dto::CreatePurchaseOrderRequest>,
) -> ApiResult {
    let supplier_id = PartyId::new(parse_id(&body.supplier_id, "supplier_id")?);
    let order_id = PurchaseOrderId::new(AggregateId::new());
    let ownership =
        services.ownership_for_new_record(tenant.tenant_id(), branch.branch_id(), EntityKind::PurchaseOrders);

    let mut lines = Vec::with_capacity(body.lines.len());
    for line in &body.lines {
        lines.push(NewLine {
            product_id: ProductId::new(parse_id(&line.product_id, "product_id")?),
            variant_id: VariantId::new(parse_id(&line.variant_id, "variant_id")?),
            quantity: line.quantity,
            unit_cost: line.unit_cost,
        });
    }

    let cmd = authorized(
        &tenant,
        &principal,
        "purchases.write",
        PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
            tenant_id: tenant.tenant_id(),
            order_id,
            supplier_id,
            ownership,
            currency: body.currency.unwrap_or(BASE_CURRENCY),
            exchange_rate: body.exchange_rate,
            lines: lines.clone(),
            occurred_at: Utc::now(),
        }),
    )?;

    let supplier: Party = services
        .load(tenant.tenant_id(), supplier_id.0, |_, _| Party::empty(supplier_id))
        .map_err(errors::dispatch_error_to_response)?;
    let supplier_ownership = supplier
        .tenant_id()
        .filter(|_| supplier.kind() == PartyKind::Supplier)
        .map(|_| supplier.ownership());
    ensure_visible(&services, &tenant, &branch, EntityKind::Suppliers, supplier_ownership, "supplier")?;

    for line in &lines {
        ensure_orderable(&services, &tenant, &branch, line)?;
    }

    // One command: either the order and all its lines are stored, or nothing is.
    let events = dispatch(&services, tenant.tenant_id(), order_id, cmd)?;
    Ok(created(order_id, events))
}

pub async fn list_purchase_orders(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
) -> ApiResult {
    require(&tenant, &principal, "purchases.read")?;
    let rows = services.projections().purchase_orders.list(tenant.tenant_id());
    Ok(items(services.scoped(tenant.tenant_id(), branch.branch_id()).filter(rows)))
}

pub async fn get_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "purchases.read")?;
    let order_id = PurchaseOrderId::new(parse_id(&id, "purchase order id")?);
    services
        .scoped(tenant.tenant_id(), branch.branch_id())
        .get(services.projections().purchase_orders.get(tenant.tenant_id(), &order_id))
        .map(one)
        .ok_or_else(|| errors::not_found("purchase order"))
}

pub async fn send_purchase_order(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let order_id = PurchaseOrderId::new(parse_id(&id, "purchase order id")?);
    let cmd = authorized(
        &tenant,
        &principal,
        "purchases.write",
        PurchaseOrderCommand::SendOrder(SendOrder {
            tenant_id: tenant.tenant_id(),
            order_id,
            occurred_at: Utc::now(),
        }),
    )?;
    ensure_order_visible(&services, &tenant, &branch, order_id)?;

    let events = dispatch(&services, tenant.tenant_id(), order_id, cmd)?;
    Ok(committed(order_id, events))
}

/// Book received goods on the order and put them into stock.
pub async fn receive_purchase_order_goods(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ReceiveGoodsRequest>,
) -> ApiResult {
    require(&tenant, &principal, "purchases.write")?;
    let order_id = PurchaseOrderId::new(parse_id(&id, "purchase order id")?);
    ensure_order_visible(&services, &tenant, &branch, order_id)?;

    let received = services
        .inventory()
        .receive_goods(tenant.tenant_id(), order_id, body.receipts)
        .map_err(errors::stock_error_to_response)?;
    Ok(one(received))
}

pub async fn record_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordPaymentRequest>,
) -> ApiResult {
    require(&tenant, &principal, "purchases.pay")?;
    let order_id = PurchaseOrderId::new(parse_id(&id, "purchase order id")?);
    let account_id = AccountId::new(parse_id(&body.account_id, "account_id")?);
    ensure_order_visible(&services, &tenant, &branch, order_id)?;

    let account: FinanceAccount = services
        .load(tenant.tenant_id(), account_id.0, |_, _| FinanceAccount::empty(account_id))
        .map_err(errors::dispatch_error_to_response)?;
    let account_ownership = account.tenant_id().map(|_| account.ownership());
    ensure_visible(&services, &tenant, &branch, EntityKind::Accounts, account_ownership, "account")?;

    let applied = services
        .reconciler()
        .apply_payment(
            tenant.tenant_id(),
            order_id,
            account_id,
            Money::new(body.amount, BASE_CURRENCY),
            body.method,
            body.reference,
            Some(principal.user_id()),
        )
        .map_err(errors::reconcile_error_to_response)?;
    Ok((StatusCode::CREATED, Json(applied)).into_response())
}

pub async fn reverse_payment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path((id, pid)): Path<(String, String)>,
    Json(body): Json<dto::ReversePaymentRequest>,
) -> ApiResult {
    require(&tenant, &principal, "purchases.pay")?;
    let order_id = PurchaseOrderId::new(parse_id(&id, "purchase order id")?);
    let payment_id = pid
        .trim()
        .parse::<uuid::Uuid>()
        .map_err(|_| errors::invalid_id("payment id"))?;
    ensure_order_visible(&services, &tenant, &branch, order_id)?;

    let reversed = services
        .reconciler()
        .reverse_payment(tenant.tenant_id(), order_id, payment_id, &body.reason)
        .map_err(errors::reconcile_error_to_response)?;
    Ok(one(reversed))
}

pub async fn payment_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "purchases.read")?;
    let order_id = PurchaseOrderId::new(parse_id(&id, "purchase order id")?);
    // Hidden orders answer 404 like missing ones.
    services
        .scoped(tenant.tenant_id(), branch.branch_id())
        .get(services.projections().purchase_orders.get(tenant.tenant_id(), &order_id))
        .and_then(|_| services.reconciler().payment_summary(tenant.tenant_id(), order_id))
        .map(one)
        .ok_or_else(|| errors::not_found("purchase order"))
}

/// A line must name a visible product and one of its own orderable variants.
fn ensure_orderable(
    services: &AppServices,
    tenant: &TenantContext,
    branch: &BranchContext,
    line: &NewLine,
) -> Result<(), Response> {
    let product: Product = services
        .load(tenant.tenant_id(), line.product_id.0, |_, _| Product::empty(line.product_id))
        .map_err(errors::dispatch_error_to_response)?;
    let ownership = product.tenant_id().map(|_| product.ownership());
    ensure_visible(services, tenant, branch, EntityKind::Products, ownership, "product")?;

    if product.status() == ProductStatus::Archived {
        return Err(errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invariant_violation",
            format!("product {} is archived", line.product_id),
        ));
    }
    let variant = product.variant(line.variant_id).ok_or_else(|| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("variant {} does not belong to product {}", line.variant_id, line.product_id),
        )
    })?;
    if !variant.active {
        return Err(errors::json_error(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invariant_violation",
            format!("variant {} is inactive", line.variant_id),
        ));
    }
    // Parent variants are received unit by unit with IMEIs; a single unit is never reordered.
    if let VariantKind::ImeiChild { .. } = variant.kind {
        return Err(errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            format!("variant {} is a single IMEI unit, order its parent variant", line.variant_id),
        ));
    }
    Ok(())
}

fn ensure_order_visible(
    services: &AppServices,
    tenant: &TenantContext,
    branch: &BranchContext,
    order_id: PurchaseOrderId,
) -> Result<(), Response> {
    let order: PurchaseOrder = services
        .load(tenant.tenant_id(), order_id.0, |_, _| PurchaseOrder::empty(order_id))
        .map_err(errors::dispatch_error_to_response)?;
    let ownership = order.tenant_id().map(|_| order.ownership());
    ensure_visible(services, tenant, branch, EntityKind::PurchaseOrders, ownership, "purchase order")
}

fn dispatch(
    services: &AppServices,
    tenant_id: TenantId,
    order_id: PurchaseOrderId,
    cmd: PurchaseOrderCommand,
) -> Result<usize, Response> {
    services
        .dispatch::<PurchaseOrder>(tenant_id, order_id.0, AGGREGATE_TYPE, cmd, |_, _| {
            PurchaseOrder::empty(order_id)
        })
        .map(|events| events.len())
        .map_err(errors::dispatch_error_to_response)
}
