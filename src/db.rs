pub mod documents_repo;
pub mod inventory_repo;
pub mod nomenclatures_repo;
pub mod partners_repo;
pub mod pricing_repo;

pub use documents_repo::DocumentsRepository;
pub use inventory_repo::InventoryRepository;
pub use nomenclatures_repo::NomenclaturesRepository;
pub use partners_repo::PartnersRepository;
pub use pricing_repo::PricingRepository;
