pub mod audit_repo;
pub mod catalog_repo;
pub mod invoice_repo;
pub mod order_repo;
pub mod rbac_repo;
pub mod report_repo;
pub mod tenancy_repo;
pub mod user_repo;

pub use audit_repo::AuditRepository;
pub use catalog_repo::CatalogRepository;
pub use invoice_repo::InvoiceRepository;
pub use order_repo::OrderRepository;
pub use rbac_repo::RbacRepository;
pub use report_repo::ReportRepository;
pub use tenancy_repo::TenantRepository;
pub use user_repo::UserRepository;
