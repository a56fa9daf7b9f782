use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use uuid::Uuid;

use branchpos_branches::EntityKind;
use branchpos_core::{AggregateId, BASE_CURRENCY, Money, TenantId};
use branchpos_finance::{
    AccountCommand, AccountId, Deposit, FinanceAccount, OpenAccount, RecordExpense,
};
use branchpos_infra::projections::finance::AGGREGATE_TYPE;
use branchpos_infra::transfers::TransferNote;

use crate::app::dto;
use crate::app::errors::{self, ApiResult};
use crate::app::routes::common::{
    authorized, committed, created, ensure_visible, items, one, parse_id, require,
};
use crate::app::services::AppServices;
use crate::context::{BranchContext, PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(open_account).get(list_accounts))
        .route("/transfers", post(transfer_between_accounts))
        .route("/:id", get(get_account))
        .route("/:id/deposit", post(deposit))
        .route("/:id/expenses", post(record_expense))
}

pub async fn open_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Json(body): Json<dto::OpenAccountRequest>,
) -> ApiResult {
    let account_id = AccountId::new(AggregateId::new());
    let ownership =
        services.ownership_for_new_record(tenant.tenant_id(), branch.branch_id(), EntityKind::Accounts);
    let cmd = authorized(
        &tenant,
        &principal,
        "finance.write",
        AccountCommand::OpenAccount(OpenAccount {
            tenant_id: tenant.tenant_id(),
            account_id,
            name: body.name,
            kind: body.kind,
            ownership,
            opening_balance: Money::new(body.opening_balance, BASE_CURRENCY),
            allow_negative: body.allow_negative,
            occurred_at: Utc::now(),
        }),
    )?;

    let events = dispatch(&services, tenant.tenant_id(), account_id, cmd)?;
    Ok(created(account_id, events))
}

pub async fn list_accounts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
) -> ApiResult {
    require(&tenant, &principal, "finance.read")?;
    let rows = services.projections().accounts.list(tenant.tenant_id());
    Ok(items(services.scoped(tenant.tenant_id(), branch.branch_id()).filter(rows)))
}

pub async fn get_account(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
) -> ApiResult {
    require(&tenant, &principal, "finance.read")?;
    let account_id = AccountId::new(parse_id(&id, "account id")?);
    services
        .scoped(tenant.tenant_id(), branch.branch_id())
        .get(services.projections().accounts.get(tenant.tenant_id(), &account_id))
        .map(one)
        .ok_or_else(|| errors::not_found("account"))
}

pub async fn deposit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::DepositRequest>,
) -> ApiResult {
    let account_id = AccountId::new(parse_id(&id, "account id")?);
    let transaction_id = Uuid::now_v7();
    let cmd = authorized(
        &tenant,
        &principal,
        "finance.write",
        AccountCommand::Deposit(Deposit {
            tenant_id: tenant.tenant_id(),
            account_id,
            transaction_id,
            amount: Money::new(body.amount, BASE_CURRENCY),
            description: body.description,
            reference: body.reference,
            related: None,
            occurred_at: Utc::now(),
        }),
    )?;
    ensure_account_visible(&services, &tenant, &branch, account_id)?;

    let events = dispatch(&services, tenant.tenant_id(), account_id, cmd)?;
    Ok(committed(transaction_id, events))
}

pub async fn record_expense(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::RecordExpenseRequest>,
) -> ApiResult {
    let account_id = AccountId::new(parse_id(&id, "account id")?);
    let expense_id = Uuid::now_v7();
    let cmd = authorized(
        &tenant,
        &principal,
        "finance.write",
        AccountCommand::RecordExpense(RecordExpense {
            tenant_id: tenant.tenant_id(),
            account_id,
            expense_id,
            transaction_id: Uuid::now_v7(),
            amount: Money::new(body.amount, BASE_CURRENCY),
            category: body.category,
            description: body.description,
            occurred_at: Utc::now(),
        }),
    )?;
    ensure_account_visible(&services, &tenant, &branch, account_id)?;

    let events = dispatch(&services, tenant.tenant_id(), account_id, cmd)?;
    Ok(created(expense_id, events))
}

/// Move money from one account to another as a paired out/in transaction.
pub async fn transfer_between_accounts(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Extension(branch): Extension<BranchContext>,
    Json(body): Json<dto::AccountTransferRequest>,
) -> ApiResult {
    require(&tenant, &principal, "finance.write")?;
    let from = AccountId::new(parse_id(&body.from_account_id, "from_account_id")?);
    let to = AccountId::new(parse_id(&body.to_account_id, "to_account_id")?);
    ensure_account_visible(&services, &tenant, &branch, from)?;
    ensure_account_visible(&services, &tenant, &branch, to)?;

    let done = services
        .transfers()
        .transfer(
            tenant.tenant_id(),
            from,
            to,
            Money::new(body.amount, BASE_CURRENCY),
            TransferNote {
                description: body.description,
                reference: body.reference,
            },
            Some(principal.user_id()),
        )
        .map_err(errors::transfer_error_to_response)?;
    Ok((StatusCode::CREATED, Json(done)).into_response())
}

fn ensure_account_visible(
    services: &AppServices,
    tenant: &TenantContext,
    branch: &BranchContext,
    account_id: AccountId,
) -> Result<(), Response> {
    let account: FinanceAccount = services
        .load(tenant.tenant_id(), account_id.0, |_, _| FinanceAccount::empty(account_id))
        .map_err(errors::dispatch_error_to_response)?;
    let ownership = account.tenant_id().map(|_| account.ownership());
    ensure_visible(services, tenant, branch, EntityKind::Accounts, ownership, "account")
}

fn dispatch(
    services: &AppServices,
    tenant_id: TenantId,
    account_id: AccountId,
    cmd: AccountCommand,
) -> Result<usize, Response> {
    services
        .dispatch::<FinanceAccount>(tenant_id, account_id.0, AGGREGATE_TYPE, cmd, |_, _| {
            FinanceAccount::empty(account_id)
        })
        .map(|events| events.len())
        .map_err(errors::dispatch_error_to_response)
}
