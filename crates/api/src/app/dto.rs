use serde::Deserialize;

use branchpos_branches::{EntityKind, IsolationMode};
use branchpos_core::CurrencyCode;
use branchpos_finance::AccountKind;
use branchpos_parties::ContactInfo;
use branchpos_infra::inventory::ReceiptLine;
use branchpos_purchasing::PaymentMethod;

// -------------------------
// Branches
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub name: String,
    pub code: String,
    pub mode: IsolationMode,
    /// Kinds shared in hybrid mode; omitted means the default set.
    pub shared: Option<Vec<EntityKind>>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeModeRequest {
    pub mode: IsolationMode,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSharingRequest {
    pub shared: Vec<EntityKind>,
}

// -------------------------
// Catalog
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateProductRequest {
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddVariantRequest {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub is_parent: bool,
    pub cost_price: i64,
    pub selling_price: i64,
    #[serde(default)]
    pub initial_quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegisterImeiRequest {
    pub imei: String,
    pub cost_price: Option<i64>,
    pub selling_price: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustStockRequest {
    pub delta: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeSharingRequest {
    pub is_shared: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    /// Case-insensitive name (and SKU, for products) search.
    pub q: Option<String>,
    /// Customer/supplier phone or WhatsApp number, any common format.
    pub phone: Option<String>,
}

// -------------------------
// Parties
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterPartyRequest {
    pub name: String,
    pub contact: Option<ContactInfo>,
}

// -------------------------
// Finance
// -------------------------

#[derive(Debug, Deserialize)]
pub struct OpenAccountRequest {
    pub name: String,
    pub kind: AccountKind,
    /// Base currency minor units.
    #[serde(default)]
    pub opening_balance: i64,
    #[serde(default)]
    pub allow_negative: bool,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: i64,
    pub description: Option<String>,
    pub reference: Option<String>,
}

/// Move money between two accounts of the tenant.
#[derive(Debug, Deserialize)]
pub struct AccountTransferRequest {
    pub from_account_id: String,
    pub to_account_id: String,
    /// Minor units of the accounts' shared currency.
    pub amount: i64,
    pub description: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordExpenseRequest {
    pub amount: i64,
    pub category: String,
    pub description: Option<String>,
}

// -------------------------
// Purchasing
// -------------------------

#[derive(Debug, Deserialize)]
pub struct PurchaseOrderLineRequest {
    pub product_id: String,
    pub variant_id: String,
    pub quantity: i64,
    /// Order currency minor units.
    pub unit_cost: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseOrderRequest {
    pub supplier_id: String,
    /// Defaults to the base currency.
    pub currency: Option<CurrencyCode>,
    /// Order currency → base, scaled by 1_000_000. Required for foreign currencies.
    pub exchange_rate: Option<i64>,
    #[serde(default)]
    pub lines: Vec<PurchaseOrderLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct ReceiveGoodsRequest {
    pub receipts: Vec<ReceiptLine>,
}

#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub account_id: String,
    /// Base currency minor units.
    pub amount: i64,
    pub method: PaymentMethod,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReversePaymentRequest {
    pub reason: String,
}

// -------------------------
// Stock transfers
// -------------------------

#[derive(Debug, Deserialize)]
pub struct StockLocationRequest {
    pub product_id: String,
    pub variant_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateStockTransferRequest {
    /// Defaults to the acting branch.
    pub from_branch_id: Option<String>,
    pub to_branch_id: String,
    pub source: StockLocationRequest,
    pub destination: StockLocationRequest,
    pub quantity: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectTransferRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelTransferRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TransferListQuery {
    /// `pending`, `approved`, `in_transit`, `completed`, `rejected` or `cancelled`.
    pub status: Option<String>,
}
