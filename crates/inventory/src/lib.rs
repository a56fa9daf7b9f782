//! Inventory domain module (event-sourced).
//!
//! Stock transfers between branches. The transfer aggregate only tracks the
//! request and its approval workflow; moving the stock itself happens on the
//! catalog variants and is coordinated by the infra inventory service.

pub mod transfer;

pub use transfer::{
    ApproveTransfer, CancelTransfer, CompleteTransfer, DispatchTransfer, RejectTransfer,
    RequestTransfer, StockLocation, StockTransfer, StockTransferCommand, StockTransferEvent,
    StockTransferId, StockTransferStatus, TransferApproved, TransferCancelled, TransferCompleted,
    TransferDispatched, TransferRejected, TransferRequested,
};
