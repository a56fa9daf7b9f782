use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchpos_branches::Ownership;
use branchpos_catalog::{ProductId, VariantId};
use branchpos_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, TenantId, UserId};
use branchpos_events::Event;

/// Stock transfer identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StockTransferId(pub AggregateId);

impl StockTransferId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StockTransferId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// ```text
/// pending ──approve──▶ approved ──dispatch──▶ in_transit ──complete──▶ completed
///    │                    │                       │
///    └─reject─▶ rejected  └───────cancel──────────┴──▶ cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockTransferStatus {
    Pending,
    Approved,
    InTransit,
    Completed,
    Rejected,
    Cancelled,
}

impl StockTransferStatus {
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            StockTransferStatus::Pending | StockTransferStatus::Approved | StockTransferStatus::InTransit
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StockTransferStatus::Pending => "pending",
            StockTransferStatus::Approved => "approved",
            StockTransferStatus::InTransit => "in_transit",
            StockTransferStatus::Completed => "completed",
            StockTransferStatus::Rejected => "rejected",
            StockTransferStatus::Cancelled => "cancelled",
        }
    }
}

/// A catalog variant stock is taken from or added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockLocation {
    pub product_id: ProductId,
    pub variant_id: VariantId,
}

/// Aggregate root: StockTransfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockTransfer {
    id: StockTransferId,
    tenant_id: Option<TenantId>,
    from_branch: Option<BranchId>,
    to_branch: Option<BranchId>,
    source: Option<StockLocation>,
    destination: Option<StockLocation>,
    quantity: i64,
    status: StockTransferStatus,
    notes: Option<String>,
    requested_by: Option<UserId>,
    approved_by: Option<UserId>,
    completed_by: Option<UserId>,
    rejection_reason: Option<String>,
    cancellation_reason: Option<String>,
    version: u64,
    created: bool,
}

impl StockTransfer {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockTransferId) -> Self {
        Self {
            id,
            tenant_id: None,
            from_branch: None,
            to_branch: None,
            source: None,
            destination: None,
            quantity: 0,
            status: StockTransferStatus::Pending,
            notes: None,
            requested_by: None,
            approved_by: None,
            completed_by: None,
            rejection_reason: None,
            cancellation_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn from_branch(&self) -> Option<BranchId> {
        self.from_branch
    }

    pub fn to_branch(&self) -> Option<BranchId> {
        self.to_branch
    }

    pub fn source(&self) -> Option<StockLocation> {
        self.source
    }

    pub fn destination(&self) -> Option<StockLocation> {
        self.destination
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn status(&self) -> StockTransferStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn requested_by(&self) -> Option<UserId> {
        self.requested_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn completed_by(&self) -> Option<UserId> {
        self.completed_by
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    /// The sending branch owns the transfer record.
    pub fn ownership(&self) -> Ownership {
        match self.from_branch {
            Some(branch_id) => Ownership::owned_by(branch_id),
            None => Ownership::unassigned(),
        }
    }

    /// Whether `branch_id` sends or receives this transfer.
    pub fn involves(&self, branch_id: BranchId) -> bool {
        self.from_branch == Some(branch_id) || self.to_branch == Some(branch_id)
    }
}

impl AggregateRoot for StockTransfer {
    type Id = StockTransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub from_branch: BranchId,
    pub to_branch: BranchId,
    pub source: StockLocation,
    pub destination: StockLocation,
    pub quantity: i64,
    pub notes: Option<String>,
    pub requested_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub approved_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DispatchTransfer (goods leave the sending branch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub completed_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockTransferCommand {
    RequestTransfer(RequestTransfer),
    ApproveTransfer(ApproveTransfer),
    RejectTransfer(RejectTransfer),
    DispatchTransfer(DispatchTransfer),
    CompleteTransfer(CompleteTransfer),
    CancelTransfer(CancelTransfer),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequested {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub from_branch: BranchId,
    pub to_branch: BranchId,
    pub source: StockLocation,
    pub destination: StockLocation,
    pub quantity: i64,
    pub notes: Option<String>,
    pub requested_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferApproved {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub approved_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRejected {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDispatched {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCompleted {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub completed_by: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCancelled {
    pub tenant_id: TenantId,
    pub transfer_id: StockTransferId,
    pub previous: StockTransferStatus,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockTransferEvent {
    TransferRequested(TransferRequested),
    TransferApproved(TransferApproved),
    TransferRejected(TransferRejected),
    TransferDispatched(TransferDispatched),
    TransferCompleted(TransferCompleted),
    TransferCancelled(TransferCancelled),
}

impl Event for StockTransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockTransferEvent::TransferRequested(_) => "inventory.transfer.requested",
            StockTransferEvent::TransferApproved(_) => "inventory.transfer.approved",
            StockTransferEvent::TransferRejected(_) => "inventory.transfer.rejected",
            StockTransferEvent::TransferDispatched(_) => "inventory.transfer.dispatched",
            StockTransferEvent::TransferCompleted(_) => "inventory.transfer.completed",
            StockTransferEvent::TransferCancelled(_) => "inventory.transfer.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockTransferEvent::TransferRequested(e) => e.occurred_at,
            StockTransferEvent::TransferApproved(e) => e.occurred_at,
            StockTransferEvent::TransferRejected(e) => e.occurred_at,
            StockTransferEvent::TransferDispatched(e) => e.occurred_at,
            StockTransferEvent::TransferCompleted(e) => e.occurred_at,
            StockTransferEvent::TransferCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockTransfer {
    type Command = StockTransferCommand;
    type Event = StockTransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockTransferEvent::TransferRequested(e) => {
                self.id = e.transfer_id;
                self.tenant_id = Some(e.tenant_id);
                self.from_branch = Some(e.from_branch);
                self.to_branch = Some(e.to_branch);
                self.source = Some(e.source);
                self.destination = Some(e.destination);
                self.quantity = e.quantity;
                self.notes = e.notes.clone();
                self.requested_by = e.requested_by;
                self.status = StockTransferStatus::Pending;
                self.created = true;
            }
            StockTransferEvent::TransferApproved(e) => {
                self.approved_by = e.approved_by;
                self.status = StockTransferStatus::Approved;
            }
            StockTransferEvent::TransferRejected(e) => {
                self.rejection_reason = Some(e.reason.clone());
                self.status = StockTransferStatus::Rejected;
            }
            StockTransferEvent::TransferDispatched(_) => {
                self.status = StockTransferStatus::InTransit;
            }
            StockTransferEvent::TransferCompleted(e) => {
                self.completed_by = e.completed_by;
                self.status = StockTransferStatus::Completed;
            }
            StockTransferEvent::TransferCancelled(e) => {
                self.cancellation_reason = e.reason.clone();
                self.status = StockTransferStatus::Cancelled;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockTransferCommand::RequestTransfer(cmd) => self.handle_request(cmd),
            StockTransferCommand::ApproveTransfer(cmd) => self.handle_approve(cmd),
            StockTransferCommand::RejectTransfer(cmd) => self.handle_reject(cmd),
            StockTransferCommand::DispatchTransfer(cmd) => self.handle_dispatch(cmd),
            StockTransferCommand::CompleteTransfer(cmd) => self.handle_complete(cmd),
            StockTransferCommand::CancelTransfer(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl StockTransfer {
    fn ensure_exists(&self, tenant_id: TenantId, transfer_id: StockTransferId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != transfer_id {
            return Err(DomainError::invariant("transfer_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, expected: StockTransferStatus, action: &str) -> Result<(), DomainError> {
        if self.status != expected {
            return Err(DomainError::invariant(format!(
                "cannot {action} a transfer that is {}",
                self.status.as_str()
            )));
        }
        Ok(())
    }

    fn handle_request(&self, cmd: &RequestTransfer) -> Result<Vec<StockTransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock transfer already exists"));
        }
        if cmd.from_branch == cmd.to_branch {
            return Err(DomainError::validation("cannot transfer stock to the same branch"));
        }
        if cmd.source == cmd.destination {
            return Err(DomainError::validation("source and destination variants must differ"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("transfer quantity must be positive"));
        }

        Ok(vec![StockTransferEvent::TransferRequested(TransferRequested {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            from_branch: cmd.from_branch,
            to_branch: cmd.to_branch,
            source: cmd.source,
            destination: cmd.destination,
            quantity: cmd.quantity,
            notes: cmd
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            requested_by: cmd.requested_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveTransfer) -> Result<Vec<StockTransferEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.transfer_id)?;
        self.ensure_status(StockTransferStatus::Pending, "approve")?;

        Ok(vec![StockTransferEvent::TransferApproved(TransferApproved {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectTransfer) -> Result<Vec<StockTransferEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.transfer_id)?;
        self.ensure_status(StockTransferStatus::Pending, "reject")?;

        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("rejection reason cannot be empty"));
        }

        Ok(vec![StockTransferEvent::TransferRejected(TransferRejected {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            reason: reason.to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_dispatch(&self, cmd: &DispatchTransfer) -> Result<Vec<StockTransferEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.transfer_id)?;
        self.ensure_status(StockTransferStatus::Approved, "dispatch")?;

        Ok(vec![StockTransferEvent::TransferDispatched(TransferDispatched {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteTransfer) -> Result<Vec<StockTransferEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.transfer_id)?;
        if self.status == StockTransferStatus::Completed {
            return Err(DomainError::conflict("transfer is already completed"));
        }
        self.ensure_status(StockTransferStatus::InTransit, "complete")?;

        Ok(vec![StockTransferEvent::TransferCompleted(TransferCompleted {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            completed_by: cmd.completed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelTransfer) -> Result<Vec<StockTransferEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.transfer_id)?;
        if !self.status.is_open() {
            return Err(DomainError::invariant(format!(
                "cannot cancel a transfer that is {}",
                self.status.as_str()
            )));
        }

        Ok(vec![StockTransferEvent::TransferCancelled(TransferCancelled {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            previous: self.status,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchpos_events::execute;
    use proptest::prelude::*;

    struct Fixture {
        transfer: StockTransfer,
        tenant_id: TenantId,
        transfer_id: StockTransferId,
        from: BranchId,
        to: BranchId,
    }

    fn location() -> StockLocation {
        StockLocation {
            product_id: ProductId::new(AggregateId::new()),
            variant_id: VariantId::new(AggregateId::new()),
        }
    }

    fn request(tenant_id: TenantId, transfer_id: StockTransferId, from: BranchId, to: BranchId, quantity: i64) -> StockTransferCommand {
        StockTransferCommand::RequestTransfer(RequestTransfer {
            tenant_id,
            transfer_id,
            from_branch: from,
            to_branch: to,
            source: location(),
            destination: location(),
            quantity,
            notes: Some("  weekend restock ".to_string()),
            requested_by: Some(UserId::new()),
            occurred_at: Utc::now(),
        })
    }

    impl Fixture {
        fn pending() -> Self {
            let tenant_id = TenantId::new();
            let transfer_id = StockTransferId::new(AggregateId::new());
            let (from, to) = (BranchId::new(), BranchId::new());
            let mut transfer = StockTransfer::empty(transfer_id);
            execute(&mut transfer, &request(tenant_id, transfer_id, from, to, 4)).unwrap();
            Self {
                transfer,
                tenant_id,
                transfer_id,
                from,
                to,
            }
        }

        fn run(&mut self, cmd: StockTransferCommand) -> Result<Vec<StockTransferEvent>, DomainError> {
            execute(&mut self.transfer, &cmd)
        }

        fn approve(&mut self) -> Result<Vec<StockTransferEvent>, DomainError> {
            self.run(StockTransferCommand::ApproveTransfer(ApproveTransfer {
                tenant_id: self.tenant_id,
                transfer_id: self.transfer_id,
                approved_by: Some(UserId::new()),
                occurred_at: Utc::now(),
            }))
        }

        fn reject(&mut self, reason: &str) -> Result<Vec<StockTransferEvent>, DomainError> {
            self.run(StockTransferCommand::RejectTransfer(RejectTransfer {
                tenant_id: self.tenant_id,
                transfer_id: self.transfer_id,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }))
        }

        fn dispatch(&mut self) -> Result<Vec<StockTransferEvent>, DomainError> {
            self.run(StockTransferCommand::DispatchTransfer(DispatchTransfer {
                tenant_id: self.tenant_id,
                transfer_id: self.transfer_id,
                occurred_at: Utc::now(),
            }))
        }

        fn complete(&mut self) -> Result<Vec<StockTransferEvent>, DomainError> {
            self.run(StockTransferCommand::CompleteTransfer(CompleteTransfer {
                tenant_id: self.tenant_id,
                transfer_id: self.transfer_id,
                completed_by: None,
                occurred_at: Utc::now(),
            }))
        }

        fn cancel(&mut self) -> Result<Vec<StockTransferEvent>, DomainError> {
            self.run(StockTransferCommand::CancelTransfer(CancelTransfer {
                tenant_id: self.tenant_id,
                transfer_id: self.transfer_id,
                reason: Some("no longer needed".to_string()),
                occurred_at: Utc::now(),
            }))
        }
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut f = Fixture::pending();
        assert_eq!(f.transfer.notes(), Some("weekend restock"));
        assert_eq!(f.transfer.ownership(), Ownership::owned_by(f.from));
        assert!(f.transfer.involves(f.to));

        f.approve().unwrap();
        f.dispatch().unwrap();
        assert_eq!(f.transfer.status(), StockTransferStatus::InTransit);
        f.complete().unwrap();
        assert_eq!(f.transfer.status(), StockTransferStatus::Completed);
        assert!(matches!(f.complete(), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn completion_requires_the_goods_to_be_in_transit() {
        let mut f = Fixture::pending();
        assert!(matches!(f.complete(), Err(DomainError::InvariantViolation(_))));
        f.approve().unwrap();
        assert!(matches!(f.complete(), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn only_pending_transfers_can_be_rejected() {
        let mut f = Fixture::pending();
        assert!(matches!(f.reject("  "), Err(DomainError::Validation(_))));
        f.approve().unwrap();
        assert!(matches!(f.reject("wrong stock"), Err(DomainError::InvariantViolation(_))));

        let mut g = Fixture::pending();
        g.reject("wrong stock").unwrap();
        assert_eq!(g.transfer.status(), StockTransferStatus::Rejected);
        assert_eq!(g.transfer.rejection_reason(), Some("wrong stock"));
        assert!(matches!(g.approve(), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn cancel_is_allowed_until_completion() {
        let mut f = Fixture::pending();
        f.approve().unwrap();
        f.dispatch().unwrap();
        f.cancel().unwrap();
        assert_eq!(f.transfer.status(), StockTransferStatus::Cancelled);
        assert!(matches!(f.cancel(), Err(DomainError::InvariantViolation(_))));

        let mut g = Fixture::pending();
        g.approve().unwrap();
        g.dispatch().unwrap();
        g.complete().unwrap();
        assert!(matches!(g.cancel(), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn request_validation() {
        let (t, id, b) = (TenantId::new(), StockTransferId::new(AggregateId::new()), BranchId::new());
        let empty = StockTransfer::empty(id);

        let same_branch = empty.handle(&request(t, id, b, b, 1)).unwrap_err();
        assert!(matches!(same_branch, DomainError::Validation(_)));

        let zero = empty.handle(&request(t, id, b, BranchId::new(), 0)).unwrap_err();
        assert!(matches!(zero, DomainError::Validation(_)));

        let spot = location();
        let same_variant = empty
            .handle(&StockTransferCommand::RequestTransfer(RequestTransfer {
                tenant_id: t,
                transfer_id: id,
                from_branch: b,
                to_branch: BranchId::new(),
                source: spot,
                destination: spot,
                quantity: 1,
                notes: None,
                requested_by: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(same_variant, DomainError::Validation(_)));
    }

    #[test]
    fn unknown_transfer_is_not_found() {
        let id = StockTransferId::new(AggregateId::new());
        let err = StockTransfer::empty(id)
            .handle(&StockTransferCommand::ApproveTransfer(ApproveTransfer {
                tenant_id: TenantId::new(),
                transfer_id: id,
                approved_by: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Approve,
        Reject,
        Dispatch,
        Complete,
        Cancel,
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            Just(Step::Approve),
            Just(Step::Reject),
            Just(Step::Dispatch),
            Just(Step::Complete),
            Just(Step::Cancel),
        ]
    }

    proptest! {
        #[test]
        fn terminal_states_never_change(steps in prop::collection::vec(step(), 1..20)) {
            let mut f = Fixture::pending();
            let mut terminal: Option<StockTransferStatus> = None;
            for s in steps {
                let result = match s {
                    Step::Approve => f.approve(),
                    Step::Reject => f.reject("no"),
                    Step::Dispatch => f.dispatch(),
                    Step::Complete => f.complete(),
                    Step::Cancel => f.cancel(),
                };
                if let Some(status) = terminal {
                    prop_assert!(result.is_err());
                    prop_assert_eq!(f.transfer.status(), status);
                } else if !f.transfer.status().is_open() {
                    terminal = Some(f.transfer.status());
                }
            }
        }
    }
}
