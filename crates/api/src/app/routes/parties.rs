//! Customers and suppliers share one aggregate; the routers differ only in
//! the party kind they serve.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    routing::{get, post},
};
use chrono::Utc;

use branchpos_branches::EntityKind;
use branchpos_core::AggregateId;
use branchpos_infra::projections::parties::AGGREGATE_TYPE;
use branchpos_parties::{Party, PartyCommand, PartyId, PartyKind, RegisterParty};

use crate::app::dto;
use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{authorized, created, items, one, parse_id, require};
use crate::app::services::AppServices;
use crate::context::{BranchContext, PrincipalContext, TenantContext};

pub fn customers_router() -> Router {
    Router::new()
        .route("/", post(register_customer).get(list_customers))
        .route("/:id", get(get_customer))
}

pub fn suppliers_router() -> Router {
    Router::new()
        .route("/", post(register_supplier).get(list_suppliers))
        .route("/:id", get(get_supplier))
}

pub async fn register_customer(
    services: Extension<Arc<AppServices>>,
    tenant: Extension<TenantContext>,
    principal: Extension<PrincipalContext>,
    branch: Extension<BranchContext>,
    Json(body): Json<dto::RegisterPartyRequest>,
) -> ApiResult {
    register_party(services, tenant, principal, branch, PartyKind::Customer, body)
}

pub async fn register_supplier(
    services: Extension<Arc<AppServices>>,
    tenant: Extension<TenantContext>,
    principal: Extension<PrincipalContext>,
    branch: Extension<BranchContext>,
    Json(body): Json<dto::RegisterPartyRequest>,
) -> ApiResult {
    register_party(services, tenant, principal, branch, PartyKind::Supplier, body)
}

pub async fn list_customers(
    services: Extension<Arc<AppServices>>,
    tenant: Extension<TenantContext>,
    principal: Extension<PrincipalContext>,
    branch: Extension<BranchContext>,
    Query(query): Query<dto::SearchQuery>,
) -> ApiResult {
    list_parties(services, tenant, principal, branch, PartyKind::Customer, query)
}

pub async fn list_suppliers(
    services: Extension<Arc<AppServices>>,
    tenant: Extension<TenantContext>,
    principal: Extension<PrincipalContext>,
    branch: Extension<BranchContext>,
    Query(query): Query<dto::SearchQuery>,
) -> ApiResult {
    list_parties(services, tenant, principal, branch, PartyKind::Supplier, query)
}

pub async fn get_customer(
    services: Extension<Arc<AppServices>>,
    tenant: Extension<TenantContext>,
    principal: Extension<PrincipalContext>,
    branch: Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    get_party(services, tenant, principal, branch, PartyKind::Customer, &id)
}

pub async fn get_supplier(
    services: Extension<Arc<AppServices>>,
    tenant: Extension<TenantContext>,
    principal: Extension<PrincipalContext>,
    branch: Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    get_party(services, tenant, principal, branch, PartyKind::Supplier, &id)
}

fn entity_kind(kind: PartyKind) -> EntityKind {
    match kind {
        PartyKind::Customer => EntityKind::Customers,
        PartyKind::Supplier => EntityKind::Suppliers,
    }
}

fn register_party(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    kind: PartyKind,
    body: dto::RegisterPartyRequest,
) -> ApiResult {
    let party_id = PartyId::new(AggregateId::new());
    let ownership = services.ownership_for_new_record(tenant.tenant_id(), branch.branch_id(), entity_kind(kind));
    let cmd = authorized(
        &tenant,
        &principal,
        "parties.write",
        PartyCommand::RegisterParty(RegisterParty {
            tenant_id: tenant.tenant_id(),
            party_id,
            kind,
            name: body.name,
            contact: body.contact,
            ownership,
            occurred_at: Utc::now(),
        }),
    )?;

    let committed = services
        .dispatch::<Party>(tenant.tenant_id(), party_id.0, AGGREGATE_TYPE, cmd, |_, _| {
            Party::empty(party_id)
        })
        .map_err(errors::dispatch_error_to_response)?;
    Ok(created(party_id, committed.len()))
}

fn list_parties(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    kind: PartyKind,
    query: dto::SearchQuery,
) -> ApiResult {
    require(&tenant, &principal, "parties.read")?;
    let directory = &services.projections().parties;
    let rows = if let Some(phone) = query.phone.as_deref() {
        directory.find_by_phone(tenant.tenant_id(), phone).into_iter().collect()
    } else if let Some(q) = query.q.as_deref() {
        directory.search_by_name(tenant.tenant_id(), q)
    } else {
        directory.list_kind(tenant.tenant_id(), kind)
    };
    let rows = rows.into_iter().filter(|p| p.kind == kind);
    Ok(items(services.scoped(tenant.tenant_id(), branch.branch_id()).filter(rows)))
}

fn get_party(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    kind: PartyKind,
    raw_id: &str,
) -> ApiResult {
    require(&tenant, &principal, "parties.read")?;
    let party_id = PartyId::new(parse_id(raw_id, "party id")?);
    let row = services
        .projections()
        .parties
        .get(tenant.tenant_id(), &party_id)
        .filter(|p| p.kind == kind);
    services
        .scoped(tenant.tenant_id(), branch.branch_id())
        .get(row)
        .map(one)
        .ok_or_else(|| errors::not_found(kind_name(kind)))
}

fn kind_name(kind: PartyKind) -> &'static str {
    match kind {
        PartyKind::Customer => "customer",
        PartyKind::Supplier => "supplier",
    }
}
