pub mod approval_service;
pub mod document_service;
pub mod inventory_service;
pub mod movement_service;
pub mod numbering_service;
pub mod pricing_service;
pub mod validation_service;

pub use approval_service::ApprovalService;
pub use document_service::DocumentService;
pub use inventory_service::InventoryService;
pub use movement_service::MovementService;
pub use numbering_service::NumberingService;
pub use pricing_service::PricingService;
pub use validation_service::{ProductValidation, ProductValidationService};
