use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use branchpos_branches::Ownership;
use branchpos_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, TenantId};
use branchpos_events::Event;

const IMEI_LEN: usize = 15;

/// Product identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Variant identifier (unique within its product).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(pub AggregateId);

impl VariantId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for VariantId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Draft,
    Active,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariantKind {
    Standard,
    /// Device model whose units are tracked one by one as IMEI children.
    Parent,
    ImeiChild {
        parent_variant_id: VariantId,
        imei: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: VariantId,
    pub sku: String,
    pub name: String,
    pub kind: VariantKind,
    /// Minor units.
    pub cost_price: i64,
    /// Minor units.
    pub selling_price: i64,
    pub quantity: i64,
    pub active: bool,
}

impl Variant {
    pub fn is_parent(&self) -> bool {
        matches!(self.kind, VariantKind::Parent)
    }

    pub fn parent_variant_id(&self) -> Option<VariantId> {
        match &self.kind {
            VariantKind::ImeiChild {
                parent_variant_id, ..
            } => Some(*parent_variant_id),
            _ => None,
        }
    }

    pub fn imei(&self) -> Option<&str> {
        match &self.kind {
            VariantKind::ImeiChild { imei, .. } => Some(imei),
            _ => None,
        }
    }
}

/// Displayed stock of a parent variant.
///
/// The sum of its active children when that is positive, otherwise the
/// parent's own quantity (stock entered before unit tracking started).
pub fn parent_display_stock(own_quantity: i64, active_child_quantities: impl IntoIterator<Item = i64>) -> i64 {
    let children: i64 = active_child_quantities.into_iter().sum();
    if children > 0 { children } else { own_quantity }
}

/// An IMEI is exactly 15 ASCII digits.
pub fn validate_imei(imei: &str) -> Result<(), DomainError> {
    if imei.len() != IMEI_LEN || !imei.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DomainError::validation(format!(
            "IMEI must be {IMEI_LEN} digits, got '{imei}'"
        )));
    }
    Ok(())
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    tenant_id: Option<TenantId>,
    sku: String,
    name: String,
    category: Option<String>,
    ownership: Ownership,
    status: ProductStatus,
    variants: Vec<Variant>,
    version: u64,
    created: bool,
}

impl Product {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            tenant_id: None,
            sku: String::new(),
            name: String::new(),
            category: None,
            ownership: Ownership::unassigned(),
            status: ProductStatus::Draft,
            variants: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant(&self, variant_id: VariantId) -> Option<&Variant> {
        self.variants.iter().find(|v| v.variant_id == variant_id)
    }

    pub fn children_of(&self, parent: VariantId) -> impl Iterator<Item = &Variant> {
        self.variants
            .iter()
            .filter(move |v| v.parent_variant_id() == Some(parent))
    }

    /// Stock shown for a variant (parents roll up their IMEI units).
    pub fn display_stock(&self, variant_id: VariantId) -> Option<i64> {
        let variant = self.variant(variant_id)?;
        if variant.is_parent() {
            let children = self
                .children_of(variant_id)
                .filter(|c| c.active)
                .map(|c| c.quantity);
            Some(parent_display_stock(variant.quantity, children))
        } else {
            Some(variant.quantity)
        }
    }

    /// Sum of the displayed stock of all top-level variants.
    pub fn total_stock(&self) -> i64 {
        self.variants
            .iter()
            .filter(|v| v.parent_variant_id().is_none())
            .filter_map(|v| self.display_stock(v.variant_id))
            .sum()
    }

    pub fn can_be_sold(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub ownership: Ownership,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddVariant (standard or parent; IMEI children use `RegisterImeiUnit`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVariant {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub sku: String,
    pub name: String,
    pub is_parent: bool,
    pub cost_price: i64,
    pub selling_price: i64,
    pub initial_quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterImeiUnit {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub parent_variant_id: VariantId,
    pub variant_id: VariantId,
    pub imei: String,
    /// Falls back to the parent's prices when absent.
    pub cost_price: Option<i64>,
    pub selling_price: Option<i64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetireImeiUnit {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustVariantStock {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub delta: i64,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSharing {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub is_shared: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignBranch {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub branch_id: BranchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    CreateProduct(CreateProduct),
    ActivateProduct(ActivateProduct),
    ArchiveProduct(ArchiveProduct),
    AddVariant(AddVariant),
    RegisterImeiUnit(RegisterImeiUnit),
    RetireImeiUnit(RetireImeiUnit),
    AdjustVariantStock(AdjustVariantStock),
    ChangeSharing(ChangeSharing),
    AssignBranch(AssignBranch),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCreated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub ownership: Ownership,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductActivated {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductArchived {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantAdded {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant: Variant,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImeiUnitRegistered {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub unit: Variant,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImeiUnitRetired {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantStockAdjusted {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: VariantId,
    pub delta: i64,
    pub quantity_after: i64,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSharingChanged {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub is_shared: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductBranchAssigned {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub branch_id: BranchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated(ProductCreated),
    ProductActivated(ProductActivated),
    ProductArchived(ProductArchived),
    VariantAdded(VariantAdded),
    ImeiUnitRegistered(ImeiUnitRegistered),
    ImeiUnitRetired(ImeiUnitRetired),
    VariantStockAdjusted(VariantStockAdjusted),
    ProductSharingChanged(ProductSharingChanged),
    ProductBranchAssigned(ProductBranchAssigned),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated(_) => "catalog.product.created",
            ProductEvent::ProductActivated(_) => "catalog.product.activated",
            ProductEvent::ProductArchived(_) => "catalog.product.archived",
            ProductEvent::VariantAdded(_) => "catalog.product.variant_added",
            ProductEvent::ImeiUnitRegistered(_) => "catalog.product.imei_unit_registered",
            ProductEvent::ImeiUnitRetired(_) => "catalog.product.imei_unit_retired",
            ProductEvent::VariantStockAdjusted(_) => "catalog.product.variant_stock_adjusted",
            ProductEvent::ProductSharingChanged(_) => "catalog.product.sharing_changed",
            ProductEvent::ProductBranchAssigned(_) => "catalog.product.branch_assigned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductCreated(e) => e.occurred_at,
            ProductEvent::ProductActivated(e) => e.occurred_at,
            ProductEvent::ProductArchived(e) => e.occurred_at,
            ProductEvent::VariantAdded(e) => e.occurred_at,
            ProductEvent::ImeiUnitRegistered(e) => e.occurred_at,
            ProductEvent::ImeiUnitRetired(e) => e.occurred_at,
            ProductEvent::VariantStockAdjusted(e) => e.occurred_at,
            ProductEvent::ProductSharingChanged(e) => e.occurred_at,
            ProductEvent::ProductBranchAssigned(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated(e) => {
                self.id = e.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.sku = e.sku.clone();
                self.name = e.name.clone();
                self.category = e.category.clone();
                self.ownership = e.ownership;
                self.status = ProductStatus::Draft;
                self.created = true;
            }
            ProductEvent::ProductActivated(_) => {
                self.status = ProductStatus::Active;
            }
            ProductEvent::ProductArchived(_) => {
                self.status = ProductStatus::Archived;
            }
            ProductEvent::VariantAdded(e) => {
                self.variants.push(e.variant.clone());
            }
            ProductEvent::ImeiUnitRegistered(e) => {
                self.variants.push(e.unit.clone());
            }
            ProductEvent::ImeiUnitRetired(e) => {
                if let Some(v) = self.variants.iter_mut().find(|v| v.variant_id == e.variant_id) {
                    v.quantity = 0;
                    v.active = false;
                }
            }
            ProductEvent::VariantStockAdjusted(e) => {
                if let Some(v) = self.variants.iter_mut().find(|v| v.variant_id == e.variant_id) {
                    v.quantity = e.quantity_after;
                }
            }
            ProductEvent::ProductSharingChanged(e) => {
                self.ownership.is_shared = e.is_shared;
            }
            ProductEvent::ProductBranchAssigned(e) => {
                self.ownership.branch_id = Some(e.branch_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::CreateProduct(cmd) => self.handle_create(cmd),
            ProductCommand::ActivateProduct(cmd) => self.handle_activate(cmd),
            ProductCommand::ArchiveProduct(cmd) => self.handle_archive(cmd),
            ProductCommand::AddVariant(cmd) => self.handle_add_variant(cmd),
            ProductCommand::RegisterImeiUnit(cmd) => self.handle_register_imei(cmd),
            ProductCommand::RetireImeiUnit(cmd) => self.handle_retire_imei(cmd),
            ProductCommand::AdjustVariantStock(cmd) => self.handle_adjust_stock(cmd),
            ProductCommand::ChangeSharing(cmd) => self.handle_change_sharing(cmd),
            ProductCommand::AssignBranch(cmd) => self.handle_assign_branch(cmd),
        }
    }
}

impl Product {
    fn ensure_exists(&self, tenant_id: TenantId, product_id: ProductId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn ensure_not_archived(&self) -> Result<(), DomainError> {
        if self.status == ProductStatus::Archived {
            return Err(DomainError::invariant("archived products cannot be modified"));
        }
        Ok(())
    }

    fn ensure_new_variant(&self, variant_id: VariantId, sku: &str) -> Result<(), DomainError> {
        if self.variant(variant_id).is_some() {
            return Err(DomainError::conflict("variant already exists"));
        }
        if self.variants.iter().any(|v| v.sku.eq_ignore_ascii_case(sku)) {
            return Err(DomainError::conflict(format!("variant SKU '{sku}' already used")));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if cmd.sku.trim().is_empty() {
            return Err(DomainError::validation("SKU cannot be empty"));
        }

        Ok(vec![ProductEvent::ProductCreated(ProductCreated {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            sku: cmd.sku.trim().to_string(),
            name: cmd.name.trim().to_string(),
            category: cmd.category.clone(),
            ownership: cmd.ownership,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_activate(&self, cmd: &ActivateProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.product_id)?;

        match self.status {
            ProductStatus::Active => Err(DomainError::conflict("product is already active")),
            ProductStatus::Archived => Err(DomainError::invariant("archived products cannot be activated")),
            ProductStatus::Draft => Ok(vec![ProductEvent::ProductActivated(ProductActivated {
                tenant_id: cmd.tenant_id,
                product_id: cmd.product_id,
                occurred_at: cmd.occurred_at,
            })]),
        }
    }

    fn handle_archive(&self, cmd: &ArchiveProduct) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.product_id)?;

        if self.status == ProductStatus::Archived {
            return Err(DomainError::conflict("product is already archived"));
        }

        Ok(vec![ProductEvent::ProductArchived(ProductArchived {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_variant(&self, cmd: &AddVariant) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.product_id)?;
        self.ensure_not_archived()?;

        let sku = cmd.sku.trim();
        if sku.is_empty() {
            return Err(DomainError::validation("variant SKU cannot be empty"));
        }
        if cmd.cost_price < 0 || cmd.selling_price < 0 {
            return Err(DomainError::validation("prices cannot be negative"));
        }
        if cmd.initial_quantity < 0 {
            return Err(DomainError::validation("initial quantity cannot be negative"));
        }
        self.ensure_new_variant(cmd.variant_id, sku)?;

        let name = if cmd.name.trim().is_empty() {
            self.name.clone()
        } else {
            cmd.name.trim().to_string()
        };

        Ok(vec![ProductEvent::VariantAdded(VariantAdded {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            variant: Variant {
                variant_id: cmd.variant_id,
                sku: sku.to_string(),
                name,
                kind: if cmd.is_parent {
                    VariantKind::Parent
                } else {
                    VariantKind::Standard
                },
                cost_price: cmd.cost_price,
                selling_price: cmd.selling_price,
                quantity: cmd.initial_quantity,
                active: true,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_register_imei(&self, cmd: &RegisterImeiUnit) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.product_id)?;
        self.ensure_not_archived()?;

        let imei = cmd.imei.trim();
        validate_imei(imei)?;

        let parent = self
            .variant(cmd.parent_variant_id)
            .ok_or_else(|| DomainError::validation("parent variant not found"))?;
        if !parent.is_parent() {
            return Err(DomainError::invariant("IMEI units can only be registered under a parent variant"));
        }
        if self.variants.iter().any(|v| v.imei() == Some(imei)) {
            return Err(DomainError::conflict(format!("IMEI {imei} already registered")));
        }

        let sku = format!("{}-{imei}", parent.sku);
        self.ensure_new_variant(cmd.variant_id, &sku)?;

        Ok(vec![ProductEvent::ImeiUnitRegistered(ImeiUnitRegistered {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            unit: Variant {
                variant_id: cmd.variant_id,
                sku,
                name: format!("{} ({imei})", parent.name),
                kind: VariantKind::ImeiChild {
                    parent_variant_id: parent.variant_id,
                    imei: imei.to_string(),
                },
                cost_price: cmd.cost_price.unwrap_or(parent.cost_price),
                selling_price: cmd.selling_price.unwrap_or(parent.selling_price),
                quantity: 1,
                active: true,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_retire_imei(&self, cmd: &RetireImeiUnit) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.product_id)?;
        self.ensure_not_archived()?;

        let unit = self
            .variant(cmd.variant_id)
            .ok_or_else(DomainError::not_found)?;
        if unit.imei().is_none() {
            return Err(DomainError::invariant("variant is not an IMEI unit"));
        }
        if !unit.active {
            return Err(DomainError::conflict("IMEI unit already retired"));
        }

        Ok(vec![ProductEvent::ImeiUnitRetired(ImeiUnitRetired {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust_stock(&self, cmd: &AdjustVariantStock) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.product_id)?;
        self.ensure_not_archived()?;

        if cmd.delta == 0 {
            return Err(DomainError::validation("stock delta cannot be zero"));
        }

        let variant = self
            .variant(cmd.variant_id)
            .ok_or_else(DomainError::not_found)?;
        if variant.is_parent() {
            return Err(DomainError::invariant(
                "parent variant stock is derived from its IMEI units",
            ));
        }
        if !variant.active {
            return Err(DomainError::invariant("variant is inactive"));
        }

        let quantity_after = variant
            .quantity
            .checked_add(cmd.delta)
            .ok_or_else(|| DomainError::invariant("stock overflow"))?;
        if quantity_after < 0 {
            return Err(DomainError::invariant(format!(
                "insufficient stock: have {}, delta {}",
                variant.quantity, cmd.delta
            )));
        }
        if variant.imei().is_some() && quantity_after > 1 {
            return Err(DomainError::invariant("an IMEI unit holds at most one item"));
        }

        Ok(vec![ProductEvent::VariantStockAdjusted(VariantStockAdjusted {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            variant_id: cmd.variant_id,
            delta: cmd.delta,
            quantity_after,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_change_sharing(&self, cmd: &ChangeSharing) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.product_id)?;

        if self.ownership.is_shared == cmd.is_shared {
            return Err(DomainError::conflict("sharing flag unchanged"));
        }

        Ok(vec![ProductEvent::ProductSharingChanged(ProductSharingChanged {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            is_shared: cmd.is_shared,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_branch(&self, cmd: &AssignBranch) -> Result<Vec<ProductEvent>, DomainError> {
        self.ensure_exists(cmd.tenant_id, cmd.product_id)?;
        self.ensure_not_archived()?;

        if self.ownership.branch_id == Some(cmd.branch_id) {
            return Err(DomainError::conflict("product already belongs to this branch"));
        }

        Ok(vec![ProductEvent::ProductBranchAssigned(ProductBranchAssigned {
            tenant_id: cmd.tenant_id,
            product_id: cmd.product_id,
            branch_id: cmd.branch_id,
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
        product: Product,
        tenant_id: TenantId,
        product_id: ProductId,
    }

    impl Fixture {
        fn new() -> Self {
            let tenant_id = TenantId::new();
            let product_id = ProductId::new(AggregateId::new());
            let mut product = Product::empty(product_id);
            execute(
                &mut product,
                &ProductCommand::CreateProduct(CreateProduct {
                    tenant_id,
                    product_id,
                    sku: "IPH-15".to_string(),
                    name: "iPhone 15".to_string(),
                    category: Some("Phones".to_string()),
                    ownership: Ownership::owned_by(BranchId::new()),
                    occurred_at: Utc::now(),
                }),
            )
            .unwrap();
            Self {
                product,
                tenant_id,
                product_id,
            }
        }

        fn run(&mut self, cmd: ProductCommand) -> Result<Vec<ProductEvent>, DomainError> {
            execute(&mut self.product, &cmd)
        }

        fn add_variant(&mut self, sku: &str, is_parent: bool, quantity: i64) -> VariantId {
            let variant_id = VariantId::new(AggregateId::new());
            self.run(ProductCommand::AddVariant(AddVariant {
                tenant_id: self.tenant_id,
                product_id: self.product_id,
                variant_id,
                sku: sku.to_string(),
                name: String::new(),
                is_parent,
                cost_price: 1_800_000,
                selling_price: 2_100_000,
                initial_quantity: quantity,
                occurred_at: Utc::now(),
            }))
            .unwrap();
            variant_id
        }

        fn register(&mut self, parent: VariantId, imei: &str) -> Result<VariantId, DomainError> {
            let variant_id = VariantId::new(AggregateId::new());
            self.run(ProductCommand::RegisterImeiUnit(RegisterImeiUnit {
                tenant_id: self.tenant_id,
                product_id: self.product_id,
                parent_variant_id: parent,
                variant_id,
                imei: imei.to_string(),
                cost_price: None,
                selling_price: None,
                occurred_at: Utc::now(),
            }))?;
            Ok(variant_id)
        }

        fn adjust(&mut self, variant_id: VariantId, delta: i64) -> Result<Vec<ProductEvent>, DomainError> {
            self.run(ProductCommand::AdjustVariantStock(AdjustVariantStock {
                tenant_id: self.tenant_id,
                product_id: self.product_id,
                variant_id,
                delta,
                reason: None,
                occurred_at: Utc::now(),
            }))
        }
    }

    #[test]
    fn parent_stock_uses_own_quantity_until_units_exist() {
        let mut f = Fixture::new();
        let parent = f.add_variant("IPH-15-128", true, 4);
        assert_eq!(f.product.display_stock(parent), Some(4));

        f.register(parent, "356938035643809").unwrap();
        f.register(parent, "356938035643817").unwrap();
        assert_eq!(f.product.display_stock(parent), Some(2));
    }

    #[test]
    fn retiring_every_unit_falls_back_to_parent_quantity() {
        let mut f = Fixture::new();
        let parent = f.add_variant("IPH-15-256", true, 3);
        let unit = f.register(parent, "490154203237518").unwrap();

        f.run(ProductCommand::RetireImeiUnit(RetireImeiUnit {
            tenant_id: f.tenant_id,
            product_id: f.product_id,
            variant_id: unit,
            occurred_at: Utc::now(),
        }))
        .unwrap();

        let retired = f.product.variant(unit).unwrap();
        assert_eq!(retired.quantity, 0);
        assert!(!retired.active);
        assert_eq!(f.product.display_stock(parent), Some(3));
    }

    #[test]
    fn total_stock_counts_top_level_variants_once() {
        let mut f = Fixture::new();
        let parent = f.add_variant("IPH-15-128", true, 0);
        f.add_variant("CASE-CLEAR", false, 10);
        f.register(parent, "356938035643809").unwrap();

        assert_eq!(f.product.total_stock(), 11);
    }

    #[test]
    fn imei_must_be_fifteen_digits_and_unique() {
        let mut f = Fixture::new();
        let parent = f.add_variant("IPH-15-128", true, 0);

        assert!(matches!(f.register(parent, "12345"), Err(DomainError::Validation(_))));
        assert!(matches!(
            f.register(parent, "35693803564380X"),
            Err(DomainError::Validation(_))
        ));

        f.register(parent, "356938035643809").unwrap();
        assert!(matches!(
            f.register(parent, "356938035643809"),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn imei_units_need_a_parent_variant() {
        let mut f = Fixture::new();
        let standard = f.add_variant("CHARGER", false, 5);
        let err = f.register(standard, "356938035643809").unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn parent_stock_cannot_be_adjusted_directly() {
        let mut f = Fixture::new();
        let parent = f.add_variant("IPH-15-128", true, 2);
        let err = f.adjust(parent, 1).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn stock_never_goes_negative() {
        let mut f = Fixture::new();
        let variant = f.add_variant("CHARGER", false, 2);
        f.adjust(variant, -2).unwrap();
        let err = f.adjust(variant, -1).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(f.product.display_stock(variant), Some(0));
    }

    #[test]
    fn duplicate_variant_sku_is_rejected() {
        let mut f = Fixture::new();
        f.add_variant("CHARGER", false, 1);
        let err = f
            .run(ProductCommand::AddVariant(AddVariant {
                tenant_id: f.tenant_id,
                product_id: f.product_id,
                variant_id: VariantId::new(AggregateId::new()),
                sku: "charger".to_string(),
                name: String::new(),
                is_parent: false,
                cost_price: 0,
                selling_price: 0,
                initial_quantity: 0,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn archived_product_only_accepts_resharing() {
        let mut f = Fixture::new();
        let variant = f.add_variant("CHARGER", false, 1);
        f.run(ProductCommand::ArchiveProduct(ArchiveProduct {
            tenant_id: f.tenant_id,
            product_id: f.product_id,
            occurred_at: Utc::now(),
        }))
        .unwrap();

        assert!(matches!(f.adjust(variant, 1), Err(DomainError::InvariantViolation(_))));

        f.run(ProductCommand::ChangeSharing(ChangeSharing {
            tenant_id: f.tenant_id,
            product_id: f.product_id,
            is_shared: true,
            occurred_at: Utc::now(),
        }))
        .unwrap();
        assert!(f.product.ownership().is_shared);
    }

    #[test]
    fn activate_then_archive_lifecycle() {
        let mut f = Fixture::new();
        assert_eq!(f.product.status(), ProductStatus::Draft);

        f.run(ProductCommand::ActivateProduct(ActivateProduct {
            tenant_id: f.tenant_id,
            product_id: f.product_id,
            occurred_at: Utc::now(),
        }))
        .unwrap();
        assert!(f.product.can_be_sold());

        f.run(ProductCommand::ArchiveProduct(ArchiveProduct {
            tenant_id: f.tenant_id,
            product_id: f.product_id,
            occurred_at: Utc::now(),
        }))
        .unwrap();

        let err = f
            .run(ProductCommand::ActivateProduct(ActivateProduct {
                tenant_id: f.tenant_id,
                product_id: f.product_id,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    proptest! {
        #[test]
        fn parent_display_stock_is_children_sum_or_own(
            own in 0i64..1_000,
            children in proptest::collection::vec(0i64..=1, 0..20),
        ) {
            let sum: i64 = children.iter().sum();
            let shown = parent_display_stock(own, children);
            if sum > 0 {
                prop_assert_eq!(shown, sum);
            } else {
                prop_assert_eq!(shown, own);
            }
        }
    }
}
