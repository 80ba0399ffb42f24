pub mod auth;
pub mod catalog_service;
pub mod document_service;
pub mod invoice_service;
pub mod order_service;
pub mod rbac_service;
pub mod realtime;
pub mod report_service;
pub mod tenancy_service;
pub mod user_service;
