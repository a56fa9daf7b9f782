//! Stock movements that follow a purchasing or transfer document.
//!
//! The document and the products it touches live in separate streams. Each
//! movement is rehearsed against in-memory copies first, then committed as a
//! saga whose stock steps are undone newest-first if a later step fails:
//!
//! ```text
//! receive:  AdjustVariantStock(+q) | RegisterImeiUnit × q  (per line) → ReceiveGoods (order)
//! transfer: AdjustVariantStock(-q, source) → AdjustVariantStock(+q, destination) → CompleteTransfer
//!            └─ any step fails → undo the stock steps already committed
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use branchpos_catalog::{
    AdjustVariantStock, Product, ProductCommand, ProductId, RegisterImeiUnit, RetireImeiUnit,
    VariantId, VariantKind,
};
use branchpos_core::{AggregateId, TenantId, UserId};
use branchpos_events::{EventBus, EventEnvelope, execute};
use branchpos_inventory::{
    CompleteTransfer, StockTransfer, StockTransferCommand, StockTransferId, StockTransferStatus,
};
use branchpos_purchasing::{
    LineReceipt, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderId, PurchaseOrderStatus,
    ReceiveGoods,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{catalog, inventory, purchasing};

#[derive(Debug, Error)]
pub enum StockError {
    /// The purchase order or transfer refused the operation.
    #[error("document rejected the operation: {0}")]
    Document(DispatchError),

    #[error("catalog rejected the stock movement: {0}")]
    Catalog(DispatchError),

    /// A step failed and so did undoing the stock already moved.
    #[error("{step} failed ({cause}) and compensation failed ({compensation})")]
    CompensationFailed {
        step: &'static str,
        cause: DispatchError,
        compensation: DispatchError,
    },
}

impl StockError {
    pub fn dispatch_error(&self) -> &DispatchError {
        match self {
            StockError::Document(e) | StockError::Catalog(e) => e,
            StockError::CompensationFailed { cause, .. } => cause,
        }
    }
}

/// One received line of a purchase order. Parent (IMEI-tracked) variants
/// need exactly one IMEI per received unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub line_no: u32,
    pub quantity: i64,
    #[serde(default)]
    pub imeis: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredUnit {
    pub line_no: u32,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub imei: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedGoods {
    pub order_id: PurchaseOrderId,
    pub status: PurchaseOrderStatus,
    /// Units added to standard variants.
    pub stocked_units: i64,
    pub registered_units: Vec<RegisteredUnit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedStockTransfer {
    pub transfer_id: StockTransferId,
    pub quantity: i64,
    pub status: StockTransferStatus,
}

/// A single change to one product stream.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StockStep {
    Adjust {
        product_id: ProductId,
        variant_id: VariantId,
        delta: i64,
    },
    Register {
        product_id: ProductId,
        parent_variant_id: VariantId,
        variant_id: VariantId,
        imei: String,
    },
}

impl StockStep {
    fn product_id(&self) -> ProductId {
        match self {
            StockStep::Adjust { product_id, .. } | StockStep::Register { product_id, .. } => *product_id,
        }
    }

    fn command(&self, tenant_id: TenantId, reason: &str) -> ProductCommand {
        match self {
            StockStep::Adjust {
                product_id,
                variant_id,
                delta,
            } => ProductCommand::AdjustVariantStock(AdjustVariantStock {
                tenant_id,
                product_id: *product_id,
                variant_id: *variant_id,
                delta: *delta,
                reason: Some(reason.to_string()),
                occurred_at: Utc::now(),
            }),
            StockStep::Register {
                product_id,
                parent_variant_id,
                variant_id,
                imei,
            } => ProductCommand::RegisterImeiUnit(RegisterImeiUnit {
                tenant_id,
                product_id: *product_id,
                parent_variant_id: *parent_variant_id,
                variant_id: *variant_id,
                imei: imei.clone(),
                cost_price: None,
                selling_price: None,
                occurred_at: Utc::now(),
            }),
        }
    }

    fn undo(&self, tenant_id: TenantId, reason: &str) -> ProductCommand {
        match self {
            StockStep::Adjust {
                product_id,
                variant_id,
                delta,
            } => StockStep::Adjust {
                product_id: *product_id,
                variant_id: *variant_id,
                delta: -delta,
            }
            .command(tenant_id, reason),
            StockStep::Register {
                product_id,
                variant_id,
                ..
            } => ProductCommand::RetireImeiUnit(RetireImeiUnit {
                tenant_id,
                product_id: *product_id,
                variant_id: *variant_id,
                occurred_at: Utc::now(),
            }),
        }
    }
}

#[derive(Debug)]
pub struct InventoryMovements<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
}

impl<S, B> Clone for InventoryMovements<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<S, B> InventoryMovements<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self { dispatcher }
    }

    /// Book received goods on the order and put them on the shelf.
    pub fn receive_goods(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        receipts: Vec<ReceiptLine>,
    ) -> Result<ReceivedGoods, StockError> {
        let order: PurchaseOrder = self
            .dispatcher
            .load(tenant_id, order_id.0, |_, _| PurchaseOrder::empty(order_id))
            .map_err(StockError::Document)?;
        if order.tenant_id() != Some(tenant_id) {
            return Err(StockError::Document(DispatchError::NotFound));
        }

        let receive = PurchaseOrderCommand::ReceiveGoods(ReceiveGoods {
            tenant_id,
            order_id,
            receipts: receipts
                .iter()
                .map(|r| LineReceipt {
                    line_no: r.line_no,
                    quantity: r.quantity,
                })
                .collect(),
            occurred_at: Utc::now(),
        });
        let mut rehearsal = order.clone();
        execute(&mut rehearsal, &receive)
            .map_err(|e| StockError::Document(DispatchError::from(e)))?;

        let mut products = HashMap::new();
        let mut steps = Vec::new();
        let mut registered_units = Vec::new();
        let mut stocked_units = 0i64;
        for receipt in &receipts {
            let line = order
                .lines()
                .iter()
                .find(|l| l.line_no == receipt.line_no)
                .ok_or_else(|| {
                    StockError::Document(DispatchError::Validation(format!("unknown line {}", receipt.line_no)))
                })?;
            let product = self
                .product_entry(&mut products, tenant_id, line.product_id)
                .map_err(StockError::Catalog)?;
            let variant = product.variant(line.variant_id).ok_or_else(|| {
                StockError::Catalog(DispatchError::InvariantViolation(format!(
                    "line {} refers to a variant its product does not have",
                    line.line_no
                )))
            })?;

            match &variant.kind {
                VariantKind::Standard => {
                    if !receipt.imeis.is_empty() {
                        return Err(StockError::Catalog(DispatchError::Validation(format!(
                            "line {} is not IMEI-tracked",
                            line.line_no
                        ))));
                    }
                    stocked_units += receipt.quantity;
                    steps.push(StockStep::Adjust {
                        product_id: line.product_id,
                        variant_id: line.variant_id,
                        delta: receipt.quantity,
                    });
                }
                VariantKind::Parent => {
                    if receipt.imeis.len() as i64 != receipt.quantity {
                        return Err(StockError::Catalog(DispatchError::Validation(format!(
                            "line {} needs one IMEI per received unit (expected {}, got {})",
                            line.line_no,
                            receipt.quantity,
                            receipt.imeis.len()
                        ))));
                    }
                    for imei in &receipt.imeis {
                        let variant_id = VariantId::new(AggregateId::new());
                        let imei = imei.trim().to_string();
                        steps.push(StockStep::Register {
                            product_id: line.product_id,
                            parent_variant_id: line.variant_id,
                            variant_id,
                            imei: imei.clone(),
                        });
                        registered_units.push(RegisteredUnit {
                            line_no: line.line_no,
                            product_id: line.product_id,
                            variant_id,
                            imei,
                        });
                    }
                }
                VariantKind::ImeiChild { .. } => {
                    return Err(StockError::Catalog(DispatchError::InvariantViolation(format!(
                        "line {} targets a single IMEI unit",
                        line.line_no
                    ))));
                }
            }
        }

        let reason = format!("Received on purchase order {order_id}");
        rehearse(&mut products, tenant_id, &steps, &reason).map_err(StockError::Catalog)?;

        let span = tracing::info_span!(
            "receive_goods",
            tenant_id = %tenant_id,
            order_id = %order_id,
            steps = steps.len(),
        );
        let _guard = span.enter();

        self.commit_steps(tenant_id, &steps, &reason)?;
        tracing::info!(stocked_units, registered = registered_units.len(), "stock booked");

        if let Err(cause) = self.dispatch_order(tenant_id, order_id, receive) {
            tracing::warn!(error = %cause, "order rejected the receipt, taking stock back");
            return Err(self.compensate("goods receipt", tenant_id, &steps, &reason, cause));
        }
        tracing::info!(status = ?rehearsal.status(), "goods received on purchase order");

        Ok(ReceivedGoods {
            order_id,
            status: rehearsal.status(),
            stocked_units,
            registered_units,
        })
    }

    /// Move the goods of an in-transit transfer into the receiving branch.
    pub fn complete_transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: StockTransferId,
        actor: Option<UserId>,
    ) -> Result<CompletedStockTransfer, StockError> {
        let transfer: StockTransfer = self
            .dispatcher
            .load(tenant_id, transfer_id.0, |_, _| StockTransfer::empty(transfer_id))
            .map_err(StockError::Document)?;
        if transfer.tenant_id() != Some(tenant_id) {
            return Err(StockError::Document(DispatchError::NotFound));
        }

        let complete = StockTransferCommand::CompleteTransfer(CompleteTransfer {
            tenant_id,
            transfer_id,
            completed_by: actor,
            occurred_at: Utc::now(),
        });
        let mut rehearsal = transfer.clone();
        execute(&mut rehearsal, &complete)
            .map_err(|e| StockError::Document(DispatchError::from(e)))?;

        let (Some(source), Some(destination)) = (transfer.source(), transfer.destination()) else {
            return Err(StockError::Document(DispatchError::InvariantViolation(
                "transfer has no stock locations".to_string(),
            )));
        };
        let steps = [
            StockStep::Adjust {
                product_id: source.product_id,
                variant_id: source.variant_id,
                delta: -transfer.quantity(),
            },
            StockStep::Adjust {
                product_id: destination.product_id,
                variant_id: destination.variant_id,
                delta: transfer.quantity(),
            },
        ];

        let reason = format!("Stock transfer {transfer_id}");
        let mut products = HashMap::new();
        for step in &steps {
            self.product_entry(&mut products, tenant_id, step.product_id())
                .map_err(StockError::Catalog)?;
        }
        rehearse(&mut products, tenant_id, &steps, &reason).map_err(StockError::Catalog)?;

        let span = tracing::info_span!(
            "complete_transfer",
            tenant_id = %tenant_id,
            transfer_id = %transfer_id,
            quantity = transfer.quantity(),
            actor = ?actor,
        );
        let _guard = span.enter();

        self.commit_steps(tenant_id, &steps, &reason)?;
        tracing::info!("stock moved between branches");

        if let Err(cause) = self.dispatch_transfer(tenant_id, transfer_id, complete) {
            tracing::warn!(error = %cause, "transfer refused completion, moving stock back");
            return Err(self.compensate("transfer completion", tenant_id, &steps, &reason, cause));
        }
        tracing::info!("stock transfer completed");

        Ok(CompletedStockTransfer {
            transfer_id,
            quantity: transfer.quantity(),
            status: rehearsal.status(),
        })
    }

    /// Commit `steps` in order; a failure undoes the ones already committed.
    fn commit_steps(&self, tenant_id: TenantId, steps: &[StockStep], reason: &str) -> Result<(), StockError> {
        for (done, step) in steps.iter().enumerate() {
            if let Err(cause) = self.dispatch_product(tenant_id, step.product_id(), step.command(tenant_id, reason)) {
                tracing::warn!(error = %cause, step = done, "stock step failed, undoing earlier steps");
                return Err(match self.undo(tenant_id, &steps[..done], reason) {
                    Ok(()) => StockError::Catalog(cause),
                    Err(compensation) => StockError::CompensationFailed {
                        step: "stock movement",
                        cause,
                        compensation,
                    },
                });
            }
        }
        Ok(())
    }

    fn compensate(
        &self,
        step: &'static str,
        tenant_id: TenantId,
        steps: &[StockStep],
        reason: &str,
        cause: DispatchError,
    ) -> StockError {
        match self.undo(tenant_id, steps, reason) {
            Ok(()) => StockError::Document(cause),
            Err(compensation) => {
                tracing::error!(error = %compensation, "undoing stock movement failed");
                StockError::CompensationFailed {
                    step,
                    cause,
                    compensation,
                }
            }
        }
    }

    fn undo(&self, tenant_id: TenantId, done: &[StockStep], reason: &str) -> Result<(), DispatchError> {
        let reason = format!("Reverted: {reason}");
        for step in done.iter().rev() {
            self.dispatch_product(tenant_id, step.product_id(), step.undo(tenant_id, &reason))?;
        }
        Ok(())
    }

    fn product_entry<'a>(
        &self,
        products: &'a mut HashMap<ProductId, Product>,
        tenant_id: TenantId,
        product_id: ProductId,
    ) -> Result<&'a Product, DispatchError> {
        if !products.contains_key(&product_id) {
            let product: Product = self
                .dispatcher
                .load(tenant_id, product_id.0, |_, _| Product::empty(product_id))?;
            if product.tenant_id() != Some(tenant_id) {
                return Err(DispatchError::NotFound);
            }
            products.insert(product_id, product);
        }
        products.get(&product_id).ok_or(DispatchError::NotFound)
    }

    fn dispatch_product(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        command: ProductCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch::<Product>(
            tenant_id,
            product_id.0,
            catalog::AGGREGATE_TYPE,
            command,
            |_, _| Product::empty(product_id),
        )
    }

    fn dispatch_order(
        &self,
        tenant_id: TenantId,
        order_id: PurchaseOrderId,
        command: PurchaseOrderCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch::<PurchaseOrder>(
            tenant_id,
            order_id.0,
            purchasing::AGGREGATE_TYPE,
            command,
            |_, _| PurchaseOrder::empty(order_id),
        )
    }

    fn dispatch_transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: StockTransferId,
        command: StockTransferCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch::<StockTransfer>(
            tenant_id,
            transfer_id.0,
            inventory::AGGREGATE_TYPE,
            command,
            |_, _| StockTransfer::empty(transfer_id),
        )
    }
}

/// Run every step against the loaded copies; nothing is persisted.
fn rehearse(
    products: &mut HashMap<ProductId, Product>,
    tenant_id: TenantId,
    steps: &[StockStep],
    reason: &str,
) -> Result<(), DispatchError> {
    for step in steps {
        let product = products.get_mut(&step.product_id()).ok_or(DispatchError::NotFound)?;
        execute(product, &step.command(tenant_id, reason)).map_err(DispatchError::from)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use branchpos_branches::Ownership;
    use branchpos_catalog::{ActivateProduct, AddVariant, CreateProduct};
    use branchpos_core::{BASE_CURRENCY, BranchId};
    use branchpos_events::InMemoryEventBus;
    use branchpos_inventory::{ApproveTransfer, DispatchTransfer, RequestTransfer, StockLocation};
    use branchpos_parties::PartyId;
    use branchpos_purchasing::{CreatePurchaseOrder, NewLine, SendOrder};

    use crate::event_store::InMemoryEventStore;

    type Store = Arc<InMemoryEventStore>;
    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

    const IMEIS: [&str; 3] = ["356938035643809", "356938035643817", "356938035643825"];

    struct Fixture {
        movements: InventoryMovements<Store, Bus>,
        dispatcher: Arc<CommandDispatcher<Store, Bus>>,
        tenant_id: TenantId,
    }

    fn fixture() -> Fixture {
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(InMemoryEventBus::new()),
        ));
        Fixture {
            movements: InventoryMovements::new(dispatcher.clone()),
            dispatcher,
            tenant_id: TenantId::new(),
        }
    }

    impl Fixture {
        fn product(&self, sku: &str, is_parent: bool, initial_quantity: i64) -> StockLocation {
            let product_id = ProductId::new(AggregateId::new());
            let variant_id = VariantId::new(AggregateId::new());
            for cmd in [
                ProductCommand::CreateProduct(CreateProduct {
                    tenant_id: self.tenant_id,
                    product_id,
                    sku: sku.to_string(),
                    name: sku.to_string(),
                    category: None,
                    ownership: Ownership::unassigned(),
                    occurred_at: Utc::now(),
                }),
                ProductCommand::AddVariant(AddVariant {
                    tenant_id: self.tenant_id,
                    product_id,
                    variant_id,
                    sku: format!("{sku}-DEFAULT"),
                    name: "Default".to_string(),
                    is_parent,
                    cost_price: 10_000,
                    selling_price: 15_000,
                    initial_quantity,
                    occurred_at: Utc::now(),
                }),
                ProductCommand::ActivateProduct(ActivateProduct {
                    tenant_id: self.tenant_id,
                    product_id,
                    occurred_at: Utc::now(),
                }),
            ] {
                self.movements.dispatch_product(self.tenant_id, product_id, cmd).unwrap();
            }
            StockLocation {
                product_id,
                variant_id,
            }
        }

        fn sent_order(&self, lines: &[(StockLocation, i64)]) -> PurchaseOrderId {
            let order_id = PurchaseOrderId::new(AggregateId::new());
            for cmd in [
                PurchaseOrderCommand::CreatePurchaseOrder(CreatePurchaseOrder {
                    tenant_id: self.tenant_id,
                    order_id,
                    supplier_id: PartyId::new(AggregateId::new()),
                    ownership: Ownership::unassigned(),
                    currency: BASE_CURRENCY,
                    exchange_rate: None,
                    lines: lines
                        .iter()
                        .map(|(at, quantity)| NewLine {
                            product_id: at.product_id,
                            variant_id: at.variant_id,
                            quantity: *quantity,
                            unit_cost: 10_000,
                        })
                        .collect(),
                    occurred_at: Utc::now(),
                }),
                PurchaseOrderCommand::SendOrder(SendOrder {
                    tenant_id: self.tenant_id,
                    order_id,
                    occurred_at: Utc::now(),
                }),
            ] {
                self.movements.dispatch_order(self.tenant_id, order_id, cmd).unwrap();
            }
            order_id
        }

        fn in_transit(&self, source: StockLocation, destination: StockLocation, quantity: i64) -> StockTransferId {
            let transfer_id = StockTransferId::new(AggregateId::new());
            for cmd in [
                StockTransferCommand::RequestTransfer(RequestTransfer {
                    tenant_id: self.tenant_id,
                    transfer_id,
                    from_branch: BranchId::new(),
                    to_branch: BranchId::new(),
                    source,
                    destination,
                    quantity,
                    notes: None,
                    requested_by: None,
                    occurred_at: Utc::now(),
                }),
                StockTransferCommand::ApproveTransfer(ApproveTransfer {
                    tenant_id: self.tenant_id,
                    transfer_id,
                    approved_by: None,
                    occurred_at: Utc::now(),
                }),
                StockTransferCommand::DispatchTransfer(DispatchTransfer {
                    tenant_id: self.tenant_id,
                    transfer_id,
                    occurred_at: Utc::now(),
                }),
            ] {
                self.movements.dispatch_transfer(self.tenant_id, transfer_id, cmd).unwrap();
            }
            transfer_id
        }

        fn load_product(&self, at: StockLocation) -> Product {
            self.dispatcher
                .load(self.tenant_id, at.product_id.0, |_, _| Product::empty(at.product_id))
                .unwrap()
        }

        fn stock(&self, at: StockLocation) -> i64 {
            self.load_product(at).display_stock(at.variant_id).unwrap()
        }

        fn order(&self, order_id: PurchaseOrderId) -> PurchaseOrder {
            self.dispatcher
                .load(self.tenant_id, order_id.0, |_, _| PurchaseOrder::empty(order_id))
                .unwrap()
        }
    }

    fn receipt(line_no: u32, quantity: i64, imeis: &[&str]) -> ReceiptLine {
        ReceiptLine {
            line_no,
            quantity,
            imeis: imeis.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn receiving_adds_stock_and_registers_units() {
        let f = fixture();
        let cable = f.product("CABLE", false, 2);
        let phone = f.product("PHONE", true, 0);
        let order_id = f.sent_order(&[(cable, 5), (phone, 3)]);

        let first = f
            .movements
            .receive_goods(f.tenant_id, order_id, vec![receipt(1, 5, &[]), receipt(2, 2, &IMEIS[..2])])
            .unwrap();
        assert_eq!(first.status, PurchaseOrderStatus::PartiallyReceived);
        assert_eq!(first.stocked_units, 5);
        assert_eq!(first.registered_units.len(), 2);
        assert_eq!(f.stock(cable), 7);
        assert_eq!(f.stock(phone), 2);

        let second = f
            .movements
            .receive_goods(f.tenant_id, order_id, vec![receipt(2, 1, &IMEIS[2..])])
            .unwrap();
        assert_eq!(second.status, PurchaseOrderStatus::Received);
        assert_eq!(f.stock(phone), 3);
        let product = f.load_product(phone);
        assert!(IMEIS.iter().all(|imei| product.variants().iter().any(|v| v.imei() == Some(imei))));
    }

    #[test]
    fn imei_count_must_match_the_received_quantity() {
        let f = fixture();
        let phone = f.product("PHONE", true, 0);
        let order_id = f.sent_order(&[(phone, 3)]);

        let err = f
            .movements
            .receive_goods(f.tenant_id, order_id, vec![receipt(1, 2, &IMEIS[..1])])
            .unwrap_err();
        assert!(matches!(err, StockError::Catalog(DispatchError::Validation(_))));
        assert_eq!(f.stock(phone), 0);
        assert_eq!(f.order(order_id).status(), PurchaseOrderStatus::Sent);
    }

    #[test]
    fn over_receipt_moves_no_stock() {
        let f = fixture();
        let cable = f.product("CABLE", false, 0);
        let order_id = f.sent_order(&[(cable, 2)]);

        let err = f
            .movements
            .receive_goods(f.tenant_id, order_id, vec![receipt(1, 3, &[])])
            .unwrap_err();
        assert!(matches!(err, StockError::Document(DispatchError::InvariantViolation(_))));
        assert_eq!(f.stock(cable), 0);
    }

    #[test]
    fn duplicate_imei_in_one_receipt_is_rejected_up_front() {
        let f = fixture();
        let phone = f.product("PHONE", true, 0);
        let order_id = f.sent_order(&[(phone, 2)]);

        let err = f
            .movements
            .receive_goods(f.tenant_id, order_id, vec![receipt(1, 2, &[IMEIS[0], IMEIS[0]])])
            .unwrap_err();
        assert!(matches!(err, StockError::Catalog(DispatchError::Concurrency(_))));
        assert_eq!(f.stock(phone), 0);
    }

    #[test]
    fn completed_transfer_moves_stock_once() {
        let f = fixture();
        let source = f.product("CABLE-A", false, 10);
        let destination = f.product("CABLE-B", false, 1);
        let transfer_id = f.in_transit(source, destination, 4);

        let done = f.movements.complete_transfer(f.tenant_id, transfer_id, None).unwrap();
        assert_eq!(done.status, StockTransferStatus::Completed);
        assert_eq!(f.stock(source), 6);
        assert_eq!(f.stock(destination), 5);

        let again = f.movements.complete_transfer(f.tenant_id, transfer_id, None).unwrap_err();
        assert!(matches!(again, StockError::Document(DispatchError::Concurrency(_))));
        assert_eq!(f.stock(source), 6);
    }

    #[test]
    fn short_source_stock_blocks_completion() {
        let f = fixture();
        let source = f.product("CABLE-A", false, 2);
        let destination = f.product("CABLE-B", false, 0);
        let transfer_id = f.in_transit(source, destination, 3);

        let err = f.movements.complete_transfer(f.tenant_id, transfer_id, None).unwrap_err();
        assert!(matches!(err, StockError::Catalog(DispatchError::InvariantViolation(_))));
        assert_eq!(f.stock(source), 2);
        assert_eq!(f.stock(destination), 0);
    }

    #[test]
    fn failed_step_is_undone() {
        let f = fixture();
        let cable = f.product("CABLE", false, 5);
        let phone = f.product("PHONE", true, 0);
        let steps = [
            StockStep::Adjust {
                product_id: cable.product_id,
                variant_id: cable.variant_id,
                delta: -3,
            },
            // Parent stock cannot be adjusted directly.
            StockStep::Adjust {
                product_id: phone.product_id,
                variant_id: phone.variant_id,
                delta: 3,
            },
        ];

        let err = f.movements.commit_steps(f.tenant_id, &steps, "test").unwrap_err();
        assert!(matches!(err, StockError::Catalog(DispatchError::InvariantViolation(_))));
        assert_eq!(f.stock(cable), 5);
    }
}
