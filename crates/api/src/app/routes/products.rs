use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    response::Response,
    routing::{get, post},
};
use chrono::Utc;

use branchpos_branches::EntityKind;
use branchpos_catalog::{
    AddVariant, AdjustVariantStock, ChangeSharing, CreateProduct, Product, ProductCommand,
    ProductId, RegisterImeiUnit, VariantId,
};
use branchpos_core::{AggregateId, TenantId};
use branchpos_infra::projections::catalog::AGGREGATE_TYPE;

use crate::app::dto;
use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{
    authorized, committed, created, ensure_visible, items, one, parse_id, require,
};
use crate::app::services::AppServices;
use crate::context::{BranchContext, PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_product).get(list_products))
        .route("/:id", get(get_product))
        .route("/:id/variants", post(add_variant))
        .route("/:id/variants/:vid/imei", post(register_imei_unit))
        .route("/:id/variants/:vid/stock", post(adjust_stock))
        .route("/:id/sharing", post(change_sharing))
}

pub async fn create_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Json(body): Json<dto::CreateProductRequest>,
) -> ApiResult {
    let product_id = ProductId::new(AggregateId::new());
    let ownership =
        services.ownership_for_new_record(tenant.tenant_id(), branch.branch_id(), EntityKind::Products);
    let cmd = authorized(
        &tenant,
        &principal,
        "catalog.write",
        ProductCommand::CreateProduct(CreateProduct {
            tenant_id: tenant.tenant_id(),
            product_id,
            sku: body.sku,
            name: body.name,
            category: body.category,
            ownership,
            occurred_at: Utc::now(),
        }),
    )?;

    let events = dispatch(&services, tenant.tenant_id(), product_id, cmd)?;
    Ok(created(product_id, events))
}

pub async fn list_products(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Query(query): Query<dto::SearchQuery>,
) -> ApiResult {
    require(&tenant, &principal, "catalog.read")?;
    let catalog = &services.projections().products;
    let rows = match query.q.as_deref() {
        Some(q) => catalog.search(tenant.tenant_id(), q),
        None => catalog.list(tenant.tenant_id()),
    };
    Ok(items(services.scoped(tenant.tenant_id(), branch.branch_id()).filter(rows)))
}

pub async fn get_product(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "catalog.read")?;
    let product_id = ProductId::new(parse_id(&id, "product id")?);
    services
        .scoped(tenant.tenant_id(), branch.branch_id())
        .get(services.projections().products.get(tenant.tenant_id(), &product_id))
        .map(one)
        .ok_or_else(|| errors::not_found("product"))
}

pub async fn add_variant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::AddVariantRequest>,
) -> ApiResult {
    let product_id = ProductId::new(parse_id(&id, "product id")?);
    let variant_id = VariantId::new(AggregateId::new());
    let cmd = authorized(
        &tenant,
        &principal,
        "catalog.write",
        ProductCommand::AddVariant(AddVariant {
            tenant_id: tenant.tenant_id(),
            product_id,
            variant_id,
            sku: body.sku,
            name: body.name,
            is_parent: body.is_parent,
            cost_price: body.cost_price,
            selling_price: body.selling_price,
            initial_quantity: body.initial_quantity,
            occurred_at: Utc::now(),
        }),
    )?;
    ensure_product_visible(&services, &tenant, &branch, product_id)?;

    let events = dispatch(&services, tenant.tenant_id(), product_id, cmd)?;
    Ok(created(variant_id, events))
}

pub async fn register_imei_unit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path((id, vid)): Path<(String, String)>,
    Json(body): Json<dto::RegisterImeiRequest>,
) -> ApiResult {
    let product_id = ProductId::new(parse_id(&id, "product id")?);
    let parent_variant_id = VariantId::new(parse_id(&vid, "variant id")?);
    let variant_id = VariantId::new(AggregateId::new());
    let cmd = authorized(
        &tenant,
        &principal,
        "catalog.write",
        ProductCommand::RegisterImeiUnit(RegisterImeiUnit {
            tenant_id: tenant.tenant_id(),
            product_id,
            parent_variant_id,
            variant_id,
            imei: body.imei,
            cost_price: body.cost_price,
            selling_price: body.selling_price,
            occurred_at: Utc::now(),
        }),
    )?;
    ensure_product_visible(&services, &tenant, &branch, product_id)?;

    let events = dispatch(&services, tenant.tenant_id(), product_id, cmd)?;
    Ok(created(variant_id, events))
}

pub async fn adjust_stock(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path((id, vid)): Path<(String, String)>,
    Json(body): Json<dto::AdjustStockRequest>,
) -> ApiResult {
    let product_id = ProductId::new(parse_id(&id, "product id")?);
    let variant_id = VariantId::new(parse_id(&vid, "variant id")?);
    let cmd = authorized(
        &tenant,
        &principal,
        "catalog.write",
        ProductCommand::AdjustVariantStock(AdjustVariantStock {
            tenant_id: tenant.tenant_id(),
            product_id,
            variant_id,
            delta: body.delta,
            reason: body.reason,
            occurred_at: Utc::now(),
        }),
    )?;
    ensure_product_visible(&services, &tenant, &branch, product_id)?;

    let events = dispatch(&services, tenant.tenant_id(), product_id, cmd)?;
    Ok(committed(variant_id, events))
}

pub async fn change_sharing(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ChangeSharingRequest>,
) -> ApiResult {
    let product_id = ProductId::new(parse_id(&id, "product id")?);
    let cmd = authorized(
        &tenant,
        &principal,
        "catalog.write",
        ProductCommand::ChangeSharing(ChangeSharing {
            tenant_id: tenant.tenant_id(),
            product_id,
            is_shared: body.is_shared,
            occurred_at: Utc::now(),
        }),
    )?;
    ensure_product_visible(&services, &tenant, &branch, product_id)?;

    let events = dispatch(&services, tenant.tenant_id(), product_id, cmd)?;
    Ok(committed(product_id, events))
}

/// Only products the acting branch can see may be modified.
fn ensure_product_visible(
    services: &AppServices,
    tenant: &TenantContext,
    branch: &BranchContext,
    product_id: ProductId,
) -> Result<(), Response> {
    let product: Product = services
        .load(tenant.tenant_id(), product_id.0, |_, _| Product::empty(product_id))
        .map_err(errors::dispatch_error_to_response)?;
    let ownership = product.tenant_id().map(|_| product.ownership());
    ensure_visible(services, tenant, branch, EntityKind::Products, ownership, "product")
}

fn dispatch(
    services: &AppServices,
    tenant_id: TenantId,
    product_id: ProductId,
    cmd: ProductCommand,
) -> Result<usize, Response> {
    services
        .dispatch::<Product>(tenant_id, product_id.0, AGGREGATE_TYPE, cmd, |_, _| {
            Product::empty(product_id)
        })
        .map(|events| events.len())
        .map_err(errors::dispatch_error_to_response)
}
