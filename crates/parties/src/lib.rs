//! Parties domain module (customers and suppliers, event-sourced).
//!
//! Pure domain logic: no IO, no HTTP, no storage.

pub mod party;

pub use party::{
    ChangeSharing, ContactInfo, CustomerTotals, Party, PartyCommand, PartyEvent, PartyId,
    PartyKind, PartyRegistered, PartySharingChanged, PartyStatus, PartySuspended, PartyUpdated,
    PurchaseRecorded, RecalculateTotals, RecordPurchase, RegisterParty, SuspendParty,
    TotalsRecalculated, UpdateDetails, normalize_phone,
};
