use serde::Serialize;
use serde_json::Value as JsonValue;

use branchpos_branches::Ownership;
use branchpos_catalog::{ProductEvent, ProductId, ProductStatus, Variant, VariantId, parent_display_stock};
use branchpos_core::TenantId;
use branchpos_events::EventEnvelope;

use crate::read_model::TenantStore;

use super::{Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};

pub const AGGREGATE_TYPE: &str = "catalog.product";

/// One variant as listed to cashiers, with its displayed stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantStock {
    #[serde(flatten)]
    pub variant: Variant,
    /// Parents roll up their active IMEI units; others show their own count.
    pub display_stock: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub ownership: Ownership,
    pub status: ProductStatus,
    pub variants: Vec<VariantStock>,
    pub total_stock: i64,
}

impl ProductReadModel {
    pub fn variant(&self, variant_id: VariantId) -> Option<&VariantStock> {
        self.variants.iter().find(|v| v.variant.variant_id == variant_id)
    }

    pub fn find_imei(&self, imei: &str) -> Option<&VariantStock> {
        self.variants.iter().find(|v| v.variant.imei() == Some(imei))
    }

    fn variant_mut(&mut self, variant_id: VariantId) -> Option<&mut Variant> {
        self.variants
            .iter_mut()
            .map(|v| &mut v.variant)
            .find(|v| v.variant_id == variant_id)
    }

    fn push(&mut self, variant: Variant) {
        self.variants.push(VariantStock {
            display_stock: variant.quantity,
            variant,
        });
    }

    /// Recompute parent roll-ups and the product total after any stock change.
    fn refresh_stock(&mut self) {
        let snapshot: Vec<Variant> = self.variants.iter().map(|v| v.variant.clone()).collect();
        for entry in &mut self.variants {
            entry.display_stock = if entry.variant.is_parent() {
                let parent = entry.variant.variant_id;
                let children = snapshot
                    .iter()
                    .filter(|c| c.active && c.parent_variant_id() == Some(parent))
                    .map(|c| c.quantity);
                parent_display_stock(entry.variant.quantity, children)
            } else {
                entry.variant.quantity
            };
        }
        self.total_stock = self
            .variants
            .iter()
            .filter(|v| v.variant.parent_variant_id().is_none())
            .map(|v| v.display_stock)
            .sum();
    }
}

#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(tenant_id, product_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.sku.cmp(&b.sku));
        rows
    }

    /// Case-insensitive match on name or SKU.
    pub fn search(&self, tenant_id: TenantId, query: &str) -> Vec<ProductReadModel> {
        let q = query.to_lowercase();
        self.list(tenant_id)
            .into_iter()
            .filter(|rm| rm.name.to_lowercase().contains(&q) || rm.sku.to_lowercase().contains(&q))
            .collect()
    }

    fn existing(&self, tenant_id: TenantId, product_id: ProductId) -> Result<ProductReadModel, ProjectionError> {
        self.store
            .get(tenant_id, &product_id)
            .ok_or(ProjectionError::MissingReadModel(product_id.0))
    }
}

impl<S> Projection for ProductCatalogProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    fn aggregate_type(&self) -> &'static str {
        AGGREGATE_TYPE
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != AGGREGATE_TYPE || !self.cursors.admit(envelope)? {
            return Ok(());
        }

        let event: ProductEvent = decode(AGGREGATE_TYPE, envelope)?;
        let (event_tenant, product_id) = match &event {
            ProductEvent::ProductCreated(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductActivated(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductArchived(e) => (e.tenant_id, e.product_id),
            ProductEvent::VariantAdded(e) => (e.tenant_id, e.product_id),
            ProductEvent::ImeiUnitRegistered(e) => (e.tenant_id, e.product_id),
            ProductEvent::ImeiUnitRetired(e) => (e.tenant_id, e.product_id),
            ProductEvent::VariantStockAdjusted(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductSharingChanged(e) => (e.tenant_id, e.product_id),
            ProductEvent::ProductBranchAssigned(e) => (e.tenant_id, e.product_id),
        };
        ensure_same_stream(envelope, event_tenant, product_id.0)?;
        let tenant_id = envelope.tenant_id();

        let mut rm = match &event {
            ProductEvent::ProductCreated(e) => ProductReadModel {
                product_id: e.product_id,
                sku: e.sku.clone(),
                name: e.name.clone(),
                category: e.category.clone(),
                ownership: e.ownership,
                status: ProductStatus::Draft,
                variants: Vec::new(),
                total_stock: 0,
            },
            _ => self.existing(tenant_id, product_id)?,
        };

        match event {
            ProductEvent::ProductCreated(_) => {}
            ProductEvent::ProductActivated(_) => rm.status = ProductStatus::Active,
            ProductEvent::ProductArchived(_) => rm.status = ProductStatus::Archived,
            ProductEvent::VariantAdded(e) => rm.push(e.variant),
            ProductEvent::ImeiUnitRegistered(e) => rm.push(e.unit),
            ProductEvent::ImeiUnitRetired(e) => {
                if let Some(v) = rm.variant_mut(e.variant_id) {
                    v.quantity = 0;
                    v.active = false;
                }
            }
            ProductEvent::VariantStockAdjusted(e) => {
                if let Some(v) = rm.variant_mut(e.variant_id) {
                    v.quantity = e.quantity_after;
                }
            }
            ProductEvent::ProductSharingChanged(e) => rm.ownership.is_shared = e.is_shared,
            ProductEvent::ProductBranchAssigned(e) => rm.ownership.branch_id = Some(e.branch_id),
        }
        rm.refresh_stock();
        self.store.upsert(tenant_id, product_id, rm);

        self.cursors.advance(envelope);
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use branchpos_catalog::{ImeiUnitRegistered, ImeiUnitRetired, ProductCreated, VariantAdded, VariantKind};
    use branchpos_core::{AggregateId, BranchId};
    use chrono::Utc;
    use uuid::Uuid;

    use crate::read_model::InMemoryTenantStore;

    type Catalog = ProductCatalogProjection<Arc<InMemoryTenantStore<ProductId, ProductReadModel>>>;

    struct Feed {
        tenant_id: TenantId,
        product_id: ProductId,
        seq: u64,
    }

    impl Feed {
        fn new() -> Self {
            Self {
                tenant_id: TenantId::new(),
                product_id: ProductId::new(AggregateId::new()),
                seq: 0,
            }
        }

        fn next(&mut self, event: ProductEvent) -> EventEnvelope<JsonValue> {
            self.seq += 1;
            EventEnvelope::new(
                Uuid::now_v7(),
                self.tenant_id,
                self.product_id.0,
                AGGREGATE_TYPE,
                self.seq,
                serde_json::to_value(event).unwrap(),
            )
        }
    }

    fn variant(kind: VariantKind, quantity: i64) -> Variant {
        Variant {
            variant_id: VariantId::new(AggregateId::new()),
            sku: "SM-A15".to_string(),
            name: "Galaxy A15".to_string(),
            kind,
            cost_price: 350_000,
            selling_price: 420_000,
            quantity,
            active: true,
        }
    }

    #[test]
    fn parent_stock_rolls_up_active_imei_units() {
        let catalog = Catalog::new(Arc::new(InMemoryTenantStore::new()));
        let mut feed = Feed::new();
        let (t, p) = (feed.tenant_id, feed.product_id);
        let now = Utc::now();

        let parent = variant(VariantKind::Parent, 4);
        let parent_id = parent.variant_id;
        let child = |imei: &str| {
            variant(
                VariantKind::ImeiChild {
                    parent_variant_id: parent_id,
                    imei: imei.to_string(),
                },
                1,
            )
        };
        let (u1, u2) = (child("356938035643809"), child("356938035643817"));
        let u1_id = u1.variant_id;

        let events = vec![
            ProductEvent::ProductCreated(ProductCreated {
                tenant_id: t,
                product_id: p,
                sku: "SM-A15".to_string(),
                name: "Galaxy A15".to_string(),
                category: Some("phones".to_string()),
                ownership: Ownership::owned_by(BranchId::new()),
                occurred_at: now,
            }),
            ProductEvent::VariantAdded(VariantAdded {
                tenant_id: t,
                product_id: p,
                variant: parent,
                occurred_at: now,
            }),
        ];
        for ev in events {
            catalog.apply_envelope(&feed.next(ev)).unwrap();
        }
        // No units yet: the parent shows its own count.
        assert_eq!(catalog.get(t, &p).unwrap().variant(parent_id).unwrap().display_stock, 4);

        for unit in [u1, u2] {
            let env = feed.next(ProductEvent::ImeiUnitRegistered(ImeiUnitRegistered {
                tenant_id: t,
                product_id: p,
                unit,
                occurred_at: now,
            }));
            catalog.apply_envelope(&env).unwrap();
        }
        let rm = catalog.get(t, &p).unwrap();
        assert_eq!(rm.variant(parent_id).unwrap().display_stock, 2);
        assert_eq!(rm.total_stock, 2);
        assert!(rm.find_imei("356938035643817").is_some());

        let env = feed.next(ProductEvent::ImeiUnitRetired(ImeiUnitRetired {
            tenant_id: t,
            product_id: p,
            variant_id: u1_id,
            occurred_at: now,
        }));
        catalog.apply_envelope(&env).unwrap();
        assert_eq!(catalog.get(t, &p).unwrap().total_stock, 1);
    }

    #[test]
    fn replayed_envelope_is_ignored() {
        let catalog = Catalog::new(Arc::new(InMemoryTenantStore::new()));
        let mut feed = Feed::new();
        let (t, p) = (feed.tenant_id, feed.product_id);

        let created = feed.next(ProductEvent::ProductCreated(ProductCreated {
            tenant_id: t,
            product_id: p,
            sku: "CHG-20W".to_string(),
            name: "Charger".to_string(),
            category: None,
            ownership: Ownership::unassigned(),
            occurred_at: Utc::now(),
        }));
        let added = feed.next(ProductEvent::VariantAdded(VariantAdded {
            tenant_id: t,
            product_id: p,
            variant: variant(VariantKind::Standard, 10),
            occurred_at: Utc::now(),
        }));

        for env in [&created, &added, &added, &created] {
            catalog.apply_envelope(env).unwrap();
        }
        let rm = catalog.get(t, &p).unwrap();
        assert_eq!(rm.variants.len(), 1);
        assert_eq!(rm.total_stock, 10);
    }
}
