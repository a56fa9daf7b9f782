//! Purchasing domain module (purchase orders and their payments, event-sourced).
//!
//! Pure domain logic: no IO, no HTTP, no storage. Moving money out of a finance
//! account for a payment is coordinated by the infra payment reconciler.

pub mod order;
pub mod payment;

pub use order::{
    AddLine, CancelOrder, CreatePurchaseOrder, GoodsReceived, LineItem, LineReceipt, NewLine,
    PaymentRecorded, PaymentReversed, PurchaseOrder, PurchaseOrderCancelled,
    PurchaseOrderCommand, PurchaseOrderCreated, PurchaseOrderEvent, PurchaseOrderId,
    PurchaseOrderLineAdded, PurchaseOrderSent, PurchaseOrderStatus, ReceiveGoods, RecordPayment,
    ReversePayment, SendOrder, validate_line,
};
pub use payment::{
    EXCHANGE_RATE_SCALE, PAYMENT_ROUNDING_TOLERANCE, PaymentMethod, PaymentRecordStatus,
    PaymentStatus, PurchaseOrderPayment, convert_to_base, derive_payment_status,
};
