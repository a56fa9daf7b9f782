use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchpos_core::{Aggregate, AggregateRoot, BranchId, DomainError, TenantId};
use branchpos_events::Event;

use crate::visibility::{BranchSettings, IsolationMode, SharingSettings};

const MAX_CODE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BranchStatus {
    Active,
    Inactive,
}

/// Aggregate root: Branch (a store location with its data isolation settings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    id: BranchId,
    tenant_id: Option<TenantId>,
    name: String,
    code: String,
    mode: IsolationMode,
    sharing: SharingSettings,
    status: BranchStatus,
    version: u64,
    created: bool,
}

impl Branch {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: BranchId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            code: String::new(),
            mode: IsolationMode::Isolated,
            sharing: SharingSettings::default(),
            status: BranchStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn mode(&self) -> IsolationMode {
        self.mode
    }

    pub fn sharing(&self) -> &SharingSettings {
        &self.sharing
    }

    pub fn status(&self) -> BranchStatus {
        self.status
    }

    pub fn settings(&self) -> BranchSettings {
        BranchSettings {
            branch_id: self.id,
            mode: self.mode,
            sharing: self.sharing.clone(),
        }
    }
}

impl AggregateRoot for Branch {
    type Id = BranchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBranch {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub name: String,
    pub code: String,
    pub mode: IsolationMode,
    /// Hybrid-mode sharing; `None` uses the default (accounts + gift cards).
    pub sharing: Option<SharingSettings>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeIsolationMode {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub mode: IsolationMode,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSharing {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub sharing: SharingSettings,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateBranch {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchCommand {
    CreateBranch(CreateBranch),
    ChangeIsolationMode(ChangeIsolationMode),
    UpdateSharing(UpdateSharing),
    DeactivateBranch(DeactivateBranch),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchCreated {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub name: String,
    pub code: String,
    pub mode: IsolationMode,
    pub sharing: SharingSettings,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationModeChanged {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub previous: IsolationMode,
    pub mode: IsolationMode,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingUpdated {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub sharing: SharingSettings,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDeactivated {
    pub tenant_id: TenantId,
    pub branch_id: BranchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchEvent {
    BranchCreated(BranchCreated),
    IsolationModeChanged(IsolationModeChanged),
    SharingUpdated(SharingUpdated),
    BranchDeactivated(BranchDeactivated),
}

impl Event for BranchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BranchEvent::BranchCreated(_) => "branches.branch.created",
            BranchEvent::IsolationModeChanged(_) => "branches.branch.isolation_mode_changed",
            BranchEvent::SharingUpdated(_) => "branches.branch.sharing_updated",
            BranchEvent::BranchDeactivated(_) => "branches.branch.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BranchEvent::BranchCreated(e) => e.occurred_at,
            BranchEvent::IsolationModeChanged(e) => e.occurred_at,
            BranchEvent::SharingUpdated(e) => e.occurred_at,
            BranchEvent::BranchDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Branch {
    type Command = BranchCommand;
    type Event = BranchEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BranchEvent::BranchCreated(e) => {
                self.id = e.branch_id;
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.code = e.code.clone();
                self.mode = e.mode;
                self.sharing = e.sharing.clone();
                self.status = BranchStatus::Active;
                self.created = true;
            }
            BranchEvent::IsolationModeChanged(e) => {
                self.mode = e.mode;
            }
            BranchEvent::SharingUpdated(e) => {
                self.sharing = e.sharing.clone();
            }
            BranchEvent::BranchDeactivated(_) => {
                self.status = BranchStatus::Inactive;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BranchCommand::CreateBranch(cmd) => self.handle_create(cmd),
            BranchCommand::ChangeIsolationMode(cmd) => self.handle_change_mode(cmd),
            BranchCommand::UpdateSharing(cmd) => self.handle_update_sharing(cmd),
            BranchCommand::DeactivateBranch(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl Branch {
    fn ensure_exists(&self, tenant_id: TenantId, branch_id: BranchId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != branch_id {
            return Err(DomainError::invariant("branch_id mismatch"));
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if self.status == BranchStatus::Inactive {
            return Err(DomainError::invariant("branch is deactivated"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateBranch) -> Result<Vec<BranchEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("branch already exists"));
        }

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }

        let code = cmd.code.trim().to_ascii_uppercase();
        if code.is_empty() {
            return Err(DomainError::validation("code cannot be empty"));
        }
        if code.chars().count() > MAX_CODE_LEN {
            return Err(DomainError::validation(format!(
                "code must be at most {MAX_CODE_LEN} characters"
            )));
        }

        Ok(vec![BranchEvent::BranchCreated(BranchCreated {
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            name: name.to_string(),
            code,
            mode: cmd.mode,
            sharing: cmd.sharing.clone().unwrap_or_default(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_mode(&self, cmd: &ChangeIsolationMode) -> Result<Vec<BranchEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.branch_id)?;
        self.ensure_active()?;

        if self.mode == cmd.mode {
            return Err(DomainError::validation(format!(
                "branch is already in {} mode",
                cmd.mode
            )));
        }

        Ok(vec![BranchEvent::IsolationModeChanged(IsolationModeChanged {
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            previous: self.mode,
            mode: cmd.mode,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_sharing(&self, cmd: &UpdateSharing) -> Result<Vec<BranchEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.branch_id)?;
        self.ensure_active()?;

        Ok(vec![BranchEvent::SharingUpdated(SharingUpdated {
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            sharing: cmd.sharing.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateBranch) -> Result<Vec<BranchEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.branch_id)?;

        if self.status == BranchStatus::Inactive {
            return Err(DomainError::conflict("branch is already deactivated"));
        }

        Ok(vec![BranchEvent::BranchDeactivated(BranchDeactivated {
            tenant_id: cmd.tenant_id,
            branch_id: cmd.branch_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::{EntityKind, VisibilityPolicy};
    use branchpos_events::execute;

    fn created(mode: IsolationMode) -> (Branch, TenantId, BranchId) {
        let tenant_id = TenantId::new();
        let branch_id = BranchId::new();
        let mut branch = Branch::empty(branch_id);
        execute(
            &mut branch,
            &BranchCommand::CreateBranch(CreateBranch {
                tenant_id,
                branch_id,
                name: "Kariakoo".to_string(),
                code: "kko-01".to_string(),
                mode,
                sharing: None,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        (branch, tenant_id, branch_id)
    }

    #[test]
    fn create_branch_uppercases_code_and_uses_default_sharing() {
        let (branch, _, _) = created(IsolationMode::Hybrid);
        assert_eq!(branch.code(), "KKO-01");
        assert_eq!(branch.sharing(), &SharingSettings::default());
        assert_eq!(branch.version(), 1);
    }

    #[test]
    fn create_branch_rejects_overlong_code() {
        let branch = Branch::empty(BranchId::new());
        let err = branch
            .handle(&BranchCommand::CreateBranch(CreateBranch {
                tenant_id: TenantId::new(),
                branch_id: *branch.id(),
                name: "Main".to_string(),
                code: "ABCDEFGHIJKLMNOPQ".to_string(),
                mode: IsolationMode::Isolated,
                sharing: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn changing_to_the_current_mode_is_rejected() {
        let (branch, tenant_id, branch_id) = created(IsolationMode::Isolated);
        let err = branch
            .handle(&BranchCommand::ChangeIsolationMode(ChangeIsolationMode {
                tenant_id,
                branch_id,
                mode: IsolationMode::Isolated,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn mode_change_alters_the_policy() {
        let (mut branch, tenant_id, branch_id) = created(IsolationMode::Isolated);
        let before = VisibilityPolicy::for_branch(&branch);
        assert!(!before.filter(EntityKind::Products).matches(&crate::Ownership::owned_by(BranchId::new())));

        execute(
            &mut branch,
            &BranchCommand::ChangeIsolationMode(ChangeIsolationMode {
                tenant_id,
                branch_id,
                mode: IsolationMode::Shared,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let after = VisibilityPolicy::for_branch(&branch);
        assert_eq!(after.filter(EntityKind::Products), crate::VisibilityFilter::All);
    }

    #[test]
    fn deactivated_branch_rejects_changes() {
        let (mut branch, tenant_id, branch_id) = created(IsolationMode::Hybrid);
        execute(
            &mut branch,
            &BranchCommand::DeactivateBranch(DeactivateBranch {
                tenant_id,
                branch_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let err = branch
            .handle(&BranchCommand::UpdateSharing(UpdateSharing {
                tenant_id,
                branch_id,
                sharing: SharingSettings::all(),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn commands_from_another_tenant_are_rejected() {
        let (branch, _, branch_id) = created(IsolationMode::Hybrid);
        let err = branch
            .handle(&BranchCommand::DeactivateBranch(DeactivateBranch {
                tenant_id: TenantId::new(),
                branch_id,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }
}
