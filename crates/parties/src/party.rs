use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchpos_branches::Ownership;
use branchpos_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use branchpos_events::Event;

/// Party identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartyId(pub AggregateId);

impl PartyId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PartyId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyKind {
    Customer,
    Supplier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub whatsapp: Option<String>,
    pub city: Option<String>,
}

impl ContactInfo {
    /// Phone-like fields normalized to international format, blanks dropped.
    pub fn normalized(&self) -> Self {
        fn text(v: &Option<String>) -> Option<String> {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }

        Self {
            phone: self.phone.as_deref().and_then(normalize_phone),
            email: text(&self.email).map(|e| e.to_ascii_lowercase()),
            whatsapp: self.whatsapp.as_deref().and_then(normalize_phone),
            city: text(&self.city),
        }
    }
}

/// Normalize a phone number to `+<country><number>`.
///
/// Local Tanzanian formats (`0712…` or a bare 9-digit `712…`) get the `255`
/// country code. Returns `None` when the input holds no digits.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    let normalized = if digits.starts_with("255") {
        format!("+{digits}")
    } else if digits.starts_with('0') && digits.len() == 10 {
        format!("+255{}", &digits[1..])
    } else if digits.len() == 9 {
        format!("+255{digits}")
    } else {
        format!("+{digits}")
    };
    Some(normalized)
}

/// Running purchase totals of a customer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerTotals {
    /// Minor units.
    pub total_spent: i64,
    pub total_purchases: u32,
    pub last_purchase_at: Option<DateTime<Utc>>,
}

/// Aggregate root: Party (customer or supplier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    id: PartyId,
    tenant_id: Option<TenantId>,
    kind: PartyKind,
    name: String,
    contact: ContactInfo,
    ownership: Ownership,
    status: PartyStatus,
    totals: CustomerTotals,
    version: u64,
    created: bool,
}

impl Party {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PartyId) -> Self {
        Self {
            id,
            tenant_id: None,
            kind: PartyKind::Customer,
            name: String::new(),
            contact: ContactInfo::default(),
            ownership: Ownership::unassigned(),
            status: PartyStatus::Active,
            totals: CustomerTotals::default(),
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn kind(&self) -> PartyKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contact(&self) -> &ContactInfo {
        &self.contact
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn status(&self) -> PartyStatus {
        self.status
    }

    pub fn totals(&self) -> CustomerTotals {
        self.totals
    }

    /// Suspended parties cannot transact.
    pub fn can_transact(&self) -> bool {
        self.created && self.status == PartyStatus::Active
    }
}

impl AggregateRoot for Party {
    type Id = PartyId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterParty {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub kind: PartyKind,
    pub name: String,
    pub contact: Option<ContactInfo>,
    pub ownership: Ownership,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDetails {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    /// `None` keeps the existing value.
    pub name: Option<String>,
    pub contact: Option<ContactInfo>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendParty {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSharing {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub is_shared: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPurchase {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    /// Minor units.
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecalculateTotals (overwrite totals rebuilt from sales history).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalculateTotals {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub total_spent: i64,
    pub total_purchases: u32,
    pub last_purchase_at: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyCommand {
    RegisterParty(RegisterParty),
    UpdateDetails(UpdateDetails),
    SuspendParty(SuspendParty),
    ChangeSharing(ChangeSharing),
    RecordPurchase(RecordPurchase),
    RecalculateTotals(RecalculateTotals),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyRegistered {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub kind: PartyKind,
    pub name: String,
    pub contact: ContactInfo,
    pub ownership: Ownership,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyUpdated {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub name: String,
    pub contact: ContactInfo,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySuspended {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySharingChanged {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub is_shared: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecorded {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub amount: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsRecalculated {
    pub tenant_id: TenantId,
    pub party_id: PartyId,
    pub totals: CustomerTotals,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartyEvent {
    PartyRegistered(PartyRegistered),
    PartyUpdated(PartyUpdated),
    PartySuspended(PartySuspended),
    PartySharingChanged(PartySharingChanged),
    PurchaseRecorded(PurchaseRecorded),
    TotalsRecalculated(TotalsRecalculated),
}

impl Event for PartyEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PartyEvent::PartyRegistered(_) => "parties.party.registered",
            PartyEvent::PartyUpdated(_) => "parties.party.updated",
            PartyEvent::PartySuspended(_) => "parties.party.suspended",
            PartyEvent::PartySharingChanged(_) => "parties.party.sharing_changed",
            PartyEvent::PurchaseRecorded(_) => "parties.party.purchase_recorded",
            PartyEvent::TotalsRecalculated(_) => "parties.party.totals_recalculated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PartyEvent::PartyRegistered(e) => e.occurred_at,
            PartyEvent::PartyUpdated(e) => e.occurred_at,
            PartyEvent::PartySuspended(e) => e.occurred_at,
            PartyEvent::PartySharingChanged(e) => e.occurred_at,
            PartyEvent::PurchaseRecorded(e) => e.occurred_at,
            PartyEvent::TotalsRecalculated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Party {
    type Command = PartyCommand;
    type Event = PartyEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PartyEvent::PartyRegistered(e) => {
                self.id = e.party_id;
                self.tenant_id = Some(e.tenant_id);
                self.kind = e.kind;
                self.name = e.name.clone();
                self.contact = e.contact.clone();
                self.ownership = e.ownership;
                self.status = PartyStatus::Active;
                self.created = true;
            }
            PartyEvent::PartyUpdated(e) => {
                self.name = e.name.clone();
                self.contact = e.contact.clone();
            }
            PartyEvent::PartySuspended(_) => {
                self.status = PartyStatus::Suspended;
            }
            PartyEvent::PartySharingChanged(e) => {
                self.ownership.is_shared = e.is_shared;
            }
            PartyEvent::PurchaseRecorded(e) => {
                self.totals.total_spent += e.amount;
                self.totals.total_purchases += 1;
                self.totals.last_purchase_at = Some(e.occurred_at);
            }
            PartyEvent::TotalsRecalculated(e) => {
                self.totals = e.totals;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PartyCommand::RegisterParty(cmd) => self.handle_register(cmd),
            PartyCommand::UpdateDetails(cmd) => self.handle_update(cmd),
            PartyCommand::SuspendParty(cmd) => self.handle_suspend(cmd),
            PartyCommand::ChangeSharing(cmd) => self.handle_change_sharing(cmd),
            PartyCommand::RecordPurchase(cmd) => self.handle_record_purchase(cmd),
            PartyCommand::RecalculateTotals(cmd) => self.handle_recalculate(cmd),
        }
    }
}

impl Party {
    fn ensure_exists(&self, tenant_id: TenantId, party_id: PartyId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != party_id {
            return Err(DomainError::invariant("party_id mismatch"));
        }
        Ok(())
    }

    fn ensure_customer(&self) -> Result<(), DomainError> {
        if self.kind != PartyKind::Customer {
            return Err(DomainError::invariant("purchase totals are tracked for customers only"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterParty) -> Result<Vec<PartyEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("party already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        Ok(vec![PartyEvent::PartyRegistered(PartyRegistered {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            kind: cmd.kind,
            name: cmd.name.trim().to_string(),
            contact: cmd.contact.clone().unwrap_or_default().normalized(),
            ownership: cmd.ownership,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateDetails) -> Result<Vec<PartyEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.party_id)?;

        let name = cmd.name.clone().unwrap_or_else(|| self.name.clone());
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        let contact = cmd
            .contact
            .as_ref()
            .map(ContactInfo::normalized)
            .unwrap_or_else(|| self.contact.clone());

        Ok(vec![PartyEvent::PartyUpdated(PartyUpdated {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            name: name.trim().to_string(),
            contact,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_suspend(&self, cmd: &SuspendParty) -> Result<Vec<PartyEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.party_id)?;

        if self.status == PartyStatus::Suspended {
            return Err(DomainError::conflict("party is already suspended"));
        }

        Ok(vec![PartyEvent::PartySuspended(PartySuspended {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_sharing(&self, cmd: &ChangeSharing) -> Result<Vec<PartyEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.party_id)?;

        if self.ownership.is_shared == cmd.is_shared {
            return Err(DomainError::conflict("sharing flag unchanged"));
        }

        Ok(vec![PartyEvent::PartySharingChanged(PartySharingChanged {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            is_shared: cmd.is_shared,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record_purchase(&self, cmd: &RecordPurchase) -> Result<Vec<PartyEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.party_id)?;
        self.ensure_customer()?;

        if !self.can_transact() {
            return Err(DomainError::invariant("suspended parties cannot transact"));
        }
        if cmd.amount <= 0 {
            return Err(DomainError::validation("purchase amount must be positive"));
        }
        if self.totals.total_spent.checked_add(cmd.amount).is_none() {
            return Err(DomainError::invariant("total spent overflow"));
        }

        Ok(vec![PartyEvent::PurchaseRecorded(PurchaseRecorded {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            amount: cmd.amount,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_recalculate(&self, cmd: &RecalculateTotals) -> Result<Vec<PartyEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.party_id)?;
        self.ensure_customer()?;

        if cmd.total_spent < 0 {
            return Err(DomainError::validation("total spent cannot be negative"));
        }
        if (cmd.total_spent == 0) != (cmd.total_purchases == 0) {
            return Err(DomainError::validation(
                "total spent and purchase count must both be zero or both be positive",
            ));
        }

        Ok(vec![PartyEvent::TotalsRecalculated(TotalsRecalculated {
            tenant_id: cmd.tenant_id,
            party_id: cmd.party_id,
            totals: CustomerTotals {
                total_spent: cmd.total_spent,
                total_purchases: cmd.total_purchases,
                last_purchase_at: cmd.last_purchase_at,
            },
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchpos_core::BranchId;
    use branchpos_events::execute;
    use proptest::prelude::*;

    fn registered(kind: PartyKind) -> (Party, TenantId, PartyId) {
        let tenant_id = TenantId::new();
        let party_id = PartyId::new(AggregateId::new());
        let mut party = Party::empty(party_id);
        execute(
            &mut party,
            &PartyCommand::RegisterParty(RegisterParty {
                tenant_id,
                party_id,
                kind,
                name: "  Amina Juma ".to_string(),
                contact: Some(ContactInfo {
                    phone: Some("0712 345 678".to_string()),
                    email: Some("Amina@Example.com".to_string()),
                    whatsapp: None,
                    city: Some("Dar es Salaam".to_string()),
                }),
                ownership: Ownership::owned_by(BranchId::new()),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        (party, tenant_id, party_id)
    }

    #[test]
    fn register_normalizes_name_and_contact() {
        let (party, _, _) = registered(PartyKind::Customer);
        assert_eq!(party.name(), "Amina Juma");
        assert_eq!(party.contact().phone.as_deref(), Some("+255712345678"));
        assert_eq!(party.contact().email.as_deref(), Some("amina@example.com"));
        assert!(party.can_transact());
    }

    #[test]
    fn phone_normalization_handles_local_formats() {
        assert_eq!(normalize_phone("+255 712 345 678").as_deref(), Some("+255712345678"));
        assert_eq!(normalize_phone("0712345678").as_deref(), Some("+255712345678"));
        assert_eq!(normalize_phone("712345678").as_deref(), Some("+255712345678"));
        assert_eq!(normalize_phone("+1 415 555 0100").as_deref(), Some("+14155550100"));
        assert_eq!(normalize_phone("n/a"), None);
    }

    #[test]
    fn purchases_accumulate_totals() {
        let (mut party, tenant_id, party_id) = registered(PartyKind::Customer);
        for amount in [15_000, 27_500] {
            execute(
                &mut party,
                &PartyCommand::RecordPurchase(RecordPurchase {
                    tenant_id,
                    party_id,
                    amount,
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
        }

        let totals = party.totals();
        assert_eq!(totals.total_spent, 42_500);
        assert_eq!(totals.total_purchases, 2);
        assert!(totals.last_purchase_at.is_some());
    }

    #[test]
    fn suppliers_do_not_track_purchases() {
        let (party, tenant_id, party_id) = registered(PartyKind::Supplier);
        let err = party
            .handle(&PartyCommand::RecordPurchase(RecordPurchase {
                tenant_id,
                party_id,
                amount: 100,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn suspended_customer_cannot_purchase() {
        let (mut party, tenant_id, party_id) = registered(PartyKind::Customer);
        execute(
            &mut party,
            &PartyCommand::SuspendParty(SuspendParty {
                tenant_id,
                party_id,
                reason: Some("fraud check".to_string()),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let err = party
            .handle(&PartyCommand::RecordPurchase(RecordPurchase {
                tenant_id,
                party_id,
                amount: 100,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn recalculate_rejects_inconsistent_totals() {
        let (party, tenant_id, party_id) = registered(PartyKind::Customer);
        let err = party
            .handle(&PartyCommand::RecalculateTotals(RecalculateTotals {
                tenant_id,
                party_id,
                total_spent: 50_000,
                total_purchases: 0,
                last_purchase_at: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn recalculate_overwrites_corrupt_totals() {
        let (mut party, tenant_id, party_id) = registered(PartyKind::Customer);
        execute(
            &mut party,
            &PartyCommand::RecalculateTotals(RecalculateTotals {
                tenant_id,
                party_id,
                total_spent: 0,
                total_purchases: 0,
                last_purchase_at: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(party.totals(), CustomerTotals::default());
    }

    #[test]
    fn sharing_flag_toggles_once() {
        let (mut party, tenant_id, party_id) = registered(PartyKind::Customer);
        let cmd = PartyCommand::ChangeSharing(ChangeSharing {
            tenant_id,
            party_id,
            is_shared: true,
            occurred_at: Utc::now(),
        });
        execute(&mut party, &cmd).unwrap();
        assert!(party.ownership().is_shared);
        assert!(matches!(party.handle(&cmd), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let (party, tenant_id, party_id) = registered(PartyKind::Customer);
        let before = party.clone();
        let _ = party.handle(&PartyCommand::UpdateDetails(UpdateDetails {
            tenant_id,
            party_id,
            name: Some("New Name".to_string()),
            contact: None,
            occurred_at: Utc::now(),
        }));
        assert_eq!(party, before);
    }

    proptest! {
        #[test]
        fn phone_normalization_is_idempotent(raw in "[0-9 +()-]{0,16}") {
            let once = normalize_phone(&raw);
            if let Some(phone) = &once {
                prop_assert!(phone.starts_with('+'));
                prop_assert!(phone[1..].chars().all(|c| c.is_ascii_digit()));
            }
            prop_assert_eq!(once.as_deref().and_then(normalize_phone), once);
        }
    }
}
