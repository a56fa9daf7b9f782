//! Catalog domain module (event-sourced).
//!
//! Products, their variants, and IMEI-tracked child units. Pure domain logic:
//! no IO, no HTTP, no storage.

pub mod product;

pub use product::{
    ActivateProduct, AddVariant, AdjustVariantStock, ArchiveProduct, AssignBranch, ChangeSharing,
    CreateProduct, ImeiUnitRegistered, ImeiUnitRetired, Product, ProductActivated,
    ProductArchived, ProductBranchAssigned, ProductCommand, ProductCreated, ProductEvent,
    ProductId, ProductSharingChanged, ProductStatus, RegisterImeiUnit, RetireImeiUnit, Variant,
    VariantAdded, VariantId, VariantKind, VariantStockAdjusted, parent_display_stock,
    validate_imei,
};
