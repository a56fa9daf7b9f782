use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use branchpos_branches::Ownership;
use branchpos_catalog::{ProductId, VariantId};
use branchpos_core::{
    Aggregate, AggregateId, AggregateRoot, BASE_CURRENCY, CurrencyCode, DomainError, Money,
    TenantId,
};
use branchpos_events::Event;
use branchpos_finance::AccountId;
use branchpos_parties::PartyId;

use crate::payment::{
    EXCHANGE_RATE_SCALE, PAYMENT_ROUNDING_TOLERANCE, PaymentMethod, PaymentRecordStatus,
    PaymentStatus, PurchaseOrderPayment, convert_to_base, derive_payment_status,
};

/// Purchase order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Sent,
    PartiallyReceived,
    Received,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: i64,
    /// Order-currency minor units.
    pub unit_cost: i64,
    pub received_quantity: i64,
}

impl LineItem {
    pub fn outstanding(&self) -> i64 {
        self.quantity - self.received_quantity
    }
}

/// A line supplied together with `CreatePurchaseOrder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: i64,
    /// Order-currency minor units.
    pub unit_cost: i64,
}

/// Quantity and cost checks shared by order creation and `AddLine`.
pub fn validate_line(quantity: i64, unit_cost: i64) -> Result<(), DomainError> {
    if quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive"));
    }
    if unit_cost < 0 {
        return Err(DomainError::validation("unit cost cannot be negative"));
    }
    if quantity.checked_mul(unit_cost).is_none() {
        return Err(DomainError::validation("line total overflows"));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReceipt {
    pub line_no: u32,
    pub quantity: i64,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: Option<TenantId>,
    supplier_id: Option<PartyId>,
    ownership: Ownership,
    currency: CurrencyCode,
    exchange_rate: i64,
    status: PurchaseOrderStatus,
    lines: Vec<LineItem>,
    payments: Vec<PurchaseOrderPayment>,
    total_paid: i64,
    payment_status: PaymentStatus,
    version: u64,
    created: bool,
}

impl PurchaseOrder {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            supplier_id: None,
            ownership: Ownership::unassigned(),
            currency: BASE_CURRENCY,
            exchange_rate: EXCHANGE_RATE_SCALE,
            status: PurchaseOrderStatus::Draft,
            lines: Vec::new(),
            payments: Vec::new(),
            total_paid: 0,
            payment_status: PaymentStatus::Unpaid,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn supplier_id(&self) -> Option<PartyId> {
        self.supplier_id
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn currency(&self) -> CurrencyCode {
        self.currency
    }

    pub fn exchange_rate(&self) -> i64 {
        self.exchange_rate
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn payments(&self) -> &[PurchaseOrderPayment] {
        &self.payments
    }

    pub fn payment(&self, payment_id: Uuid) -> Option<&PurchaseOrderPayment> {
        self.payments.iter().find(|p| p.payment_id == payment_id)
    }

    pub fn total_paid(&self) -> i64 {
        self.total_paid
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    /// Order total in order currency.
    pub fn total(&self) -> i64 {
        self.lines
            .iter()
            .map(|l| l.quantity.saturating_mul(l.unit_cost))
            .fold(0i64, i64::saturating_add)
    }

    /// Order total converted to base currency.
    pub fn total_base(&self) -> i64 {
        convert_to_base(self.total(), self.exchange_rate).unwrap_or(i64::MAX)
    }

    /// Base-currency amount still owed (never negative).
    pub fn remaining(&self) -> i64 {
        (self.total_base() - self.total_paid).max(0)
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: PartyId,
    pub ownership: Ownership,
    pub currency: CurrencyCode,
    /// Order currency → base currency, scaled by `EXCHANGE_RATE_SCALE`.
    /// Required when `currency` is not the base currency.
    pub exchange_rate: Option<i64>,
    /// Initial lines; all are validated before any event is emitted.
    #[serde(default)]
    pub lines: Vec<NewLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_cost: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveGoods {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub receipts: Vec<LineReceipt>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub payment_id: Uuid,
    pub account_id: AccountId,
    /// Must be in base currency.
    pub amount: Money,
    pub method: PaymentMethod,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversePayment {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub payment_id: Uuid,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    AddLine(AddLine),
    SendOrder(SendOrder),
    ReceiveGoods(ReceiveGoods),
    CancelOrder(CancelOrder),
    RecordPayment(RecordPayment),
    ReversePayment(ReversePayment),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: PartyId,
    pub ownership: Ownership,
    pub currency: CurrencyCode,
    pub exchange_rate: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLineAdded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub line: LineItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderSent {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub total: i64,
    pub total_base: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub supplier_id: PartyId,
    pub receipts: Vec<LineReceipt>,
    pub status: PurchaseOrderStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub payment: PurchaseOrderPayment,
    pub total_paid: i64,
    pub payment_status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReversed {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub payment_id: Uuid,
    pub account_id: AccountId,
    pub amount: i64,
    pub reason: String,
    pub total_paid: i64,
    pub payment_status: PaymentStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    PurchaseOrderLineAdded(PurchaseOrderLineAdded),
    PurchaseOrderSent(PurchaseOrderSent),
    GoodsReceived(GoodsReceived),
    PurchaseOrderCancelled(PurchaseOrderCancelled),
    PaymentRecorded(PaymentRecorded),
    PaymentReversed(PaymentReversed),
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => "purchasing.order.created",
            PurchaseOrderEvent::PurchaseOrderLineAdded(_) => "purchasing.order.line_added",
            PurchaseOrderEvent::PurchaseOrderSent(_) => "purchasing.order.sent",
            PurchaseOrderEvent::GoodsReceived(_) => "purchasing.order.goods_received",
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => "purchasing.order.cancelled",
            PurchaseOrderEvent::PaymentRecorded(_) => "purchasing.order.payment_recorded",
            PurchaseOrderEvent::PaymentReversed(_) => "purchasing.order.payment_reversed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderSent(e) => e.occurred_at,
            PurchaseOrderEvent::GoodsReceived(e) => e.occurred_at,
            PurchaseOrderEvent::PurchaseOrderCancelled(e) => e.occurred_at,
            PurchaseOrderEvent::PaymentRecorded(e) => e.occurred_at,
            PurchaseOrderEvent::PaymentReversed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.supplier_id = Some(e.supplier_id);
                self.ownership = e.ownership;
                self.currency = e.currency;
                self.exchange_rate = e.exchange_rate;
                self.status = PurchaseOrderStatus::Draft;
                self.lines.clear();
                self.created = true;
            }
            PurchaseOrderEvent::PurchaseOrderLineAdded(e) => {
                self.lines.push(e.line.clone());
            }
            PurchaseOrderEvent::PurchaseOrderSent(_) => {
                self.status = PurchaseOrderStatus::Sent;
            }
            PurchaseOrderEvent::GoodsReceived(e) => {
                for receipt in &e.receipts {
                    if let Some(line) = self.lines.iter_mut().find(|l| l.line_no == receipt.line_no) {
                        line.received_quantity += receipt.quantity;
                    }
                }
                self.status = e.status;
            }
            PurchaseOrderEvent::PurchaseOrderCancelled(_) => {
                self.status = PurchaseOrderStatus::Cancelled;
            }
            PurchaseOrderEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
                self.total_paid = e.total_paid;
                self.payment_status = e.payment_status;
            }
            PurchaseOrderEvent::PaymentReversed(e) => {
                if let Some(p) = self.payments.iter_mut().find(|p| p.payment_id == e.payment_id) {
                    p.status = PaymentRecordStatus::Reversed;
                    p.reversed_at = Some(e.occurred_at);
                    p.reversal_reason = Some(e.reason.clone());
                }
                self.total_paid = e.total_paid;
                self.payment_status = e.payment_status;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            PurchaseOrderCommand::SendOrder(cmd) => self.handle_send(cmd),
            PurchaseOrderCommand::ReceiveGoods(cmd) => self.handle_receive(cmd),
            PurchaseOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            PurchaseOrderCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            PurchaseOrderCommand::ReversePayment(cmd) => self.handle_reverse_payment(cmd),
        }
    }
}

impl PurchaseOrder {
    fn ensure_exists(&self, tenant_id: TenantId, order_id: PurchaseOrderId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreatePurchaseOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }

        let exchange_rate = match cmd.exchange_rate {
            Some(rate) if rate <= 0 => {
                return Err(DomainError::validation("exchange rate must be positive"));
            }
            Some(rate) => rate,
            None if cmd.currency == BASE_CURRENCY => EXCHANGE_RATE_SCALE,
            None => {
                return Err(DomainError::validation(format!(
                    "exchange rate required for {} orders",
                    cmd.currency
                )));
            }
        };
        if cmd.currency == BASE_CURRENCY && exchange_rate != EXCHANGE_RATE_SCALE {
            return Err(DomainError::validation("base-currency orders use an exchange rate of 1"));
        }
        for line in &cmd.lines {
            validate_line(line.quantity, line.unit_cost)?;
        }

        let mut events = Vec::with_capacity(cmd.lines.len() + 1);
        events.push(PurchaseOrderEvent::PurchaseOrderCreated(PurchaseOrderCreated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            supplier_id: cmd.supplier_id,
            ownership: cmd.ownership,
            currency: cmd.currency,
            exchange_rate,
            occurred_at: cmd.occurred_at,
        }));
        events.extend(cmd.lines.iter().zip(1u32..).map(|(line, line_no)| {
            PurchaseOrderEvent::PurchaseOrderLineAdded(PurchaseOrderLineAdded {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                line: LineItem {
                    line_no,
                    product_id: line.product_id,
                    variant_id: line.variant_id,
                    quantity: line.quantity,
                    unit_cost: line.unit_cost,
                    received_quantity: 0,
                },
                occurred_at: cmd.occurred_at,
            })
        }));
        Ok(events)
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invariant("only draft purchase orders can be modified"));
        }
        validate_line(cmd.quantity, cmd.unit_cost)?;

        let line_no = (self.lines.len() as u32) + 1;
        Ok(vec![PurchaseOrderEvent::PurchaseOrderLineAdded(PurchaseOrderLineAdded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            line: LineItem {
                line_no,
                product_id: cmd.product_id,
                variant_id: cmd.variant_id,
                quantity: cmd.quantity,
                unit_cost: cmd.unit_cost,
                received_quantity: 0,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_send(&self, cmd: &SendOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invariant("only draft purchase orders can be sent"));
        }
        if self.lines.is_empty() {
            return Err(DomainError::validation("cannot send purchase order without lines"));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderSent(PurchaseOrderSent {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            total: self.total(),
            total_base: self.total_base(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReceiveGoods) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if !matches!(
            self.status,
            PurchaseOrderStatus::Sent | PurchaseOrderStatus::PartiallyReceived
        ) {
            return Err(DomainError::invariant(
                "goods can only be received on sent purchase orders",
            ));
        }
        if cmd.receipts.is_empty() {
            return Err(DomainError::validation("receipt must list at least one line"));
        }
        let supplier_id = self
            .supplier_id
            .ok_or_else(|| DomainError::invariant("supplier must be set"))?;

        let mut lines = self.lines.clone();
        for receipt in &cmd.receipts {
            if receipt.quantity <= 0 {
                return Err(DomainError::validation("received quantity must be positive"));
            }
            let line = lines
                .iter_mut()
                .find(|l| l.line_no == receipt.line_no)
                .ok_or_else(|| DomainError::validation(format!("unknown line {}", receipt.line_no)))?;
            if receipt.quantity > line.outstanding() {
                return Err(DomainError::invariant(format!(
                    "line {} would exceed ordered quantity ({} outstanding)",
                    line.line_no,
                    line.outstanding()
                )));
            }
            line.received_quantity += receipt.quantity;
        }

        let status = if lines.iter().all(|l| l.outstanding() == 0) {
            PurchaseOrderStatus::Received
        } else {
            PurchaseOrderStatus::PartiallyReceived
        };

        Ok(vec![PurchaseOrderEvent::GoodsReceived(GoodsReceived {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            supplier_id,
            receipts: cmd.receipts.clone(),
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if !matches!(self.status, PurchaseOrderStatus::Draft | PurchaseOrderStatus::Sent) {
            return Err(DomainError::invariant(
                "purchase orders with received goods cannot be cancelled",
            ));
        }
        if self.payments.iter().any(PurchaseOrderPayment::is_completed) {
            return Err(DomainError::invariant(
                "reverse all payments before cancelling the purchase order",
            ));
        }

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCancelled(PurchaseOrderCancelled {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        if cmd.amount.currency != BASE_CURRENCY {
            return Err(DomainError::validation(format!(
                "payments are made in {BASE_CURRENCY}, got {}",
                cmd.amount.currency
            )));
        }
        if !cmd.amount.is_positive() {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        match self.status {
            PurchaseOrderStatus::Draft => {
                return Err(DomainError::invariant("draft purchase orders cannot be paid"));
            }
            PurchaseOrderStatus::Cancelled => {
                return Err(DomainError::invariant("cancelled purchase orders cannot be paid"));
            }
            _ => {}
        }
        if self.payment_status == PaymentStatus::Paid {
            return Err(DomainError::conflict("purchase order is already fully paid"));
        }
        if self.payment(cmd.payment_id).is_some() {
            return Err(DomainError::conflict("payment already recorded"));
        }

        let amount = cmd.amount.amount_minor;
        let remaining = self.remaining();
        if amount > remaining.saturating_add(PAYMENT_ROUNDING_TOLERANCE) {
            return Err(DomainError::validation(format!(
                "payment of {amount} exceeds remaining balance of {remaining}"
            )));
        }

        let total_paid = self
            .total_paid
            .checked_add(amount)
            .ok_or_else(|| DomainError::invariant("total paid overflow"))?;

        Ok(vec![PurchaseOrderEvent::PaymentRecorded(PaymentRecorded {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            payment: PurchaseOrderPayment {
                payment_id: cmd.payment_id,
                account_id: cmd.account_id,
                amount,
                method: cmd.method,
                reference: cmd.reference.clone(),
                status: PaymentRecordStatus::Completed,
                paid_at: cmd.occurred_at,
                reversed_at: None,
                reversal_reason: None,
            },
            total_paid,
            payment_status: derive_payment_status(self.total_base(), total_paid),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse_payment(&self, cmd: &ReversePayment) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.order_id)?;

        let payment = self.payment(cmd.payment_id).ok_or_else(DomainError::not_found)?;
        if !payment.is_completed() {
            return Err(DomainError::conflict("payment already reversed"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("reversal reason cannot be empty"));
        }

        let total_paid = self.total_paid - payment.amount;

        Ok(vec![PurchaseOrderEvent::PaymentReversed(PaymentReversed {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            payment_id: payment.payment_id,
            account_id: payment.account_id,
            amount: payment.amount,
            reason: cmd.reason.trim().to_string(),
            total_paid,
            payment_status: derive_payment_status(self.total_base(), total_paid),
            occurred_at: cmd.occurred_at,
        })])
    }
}
