pub mod auth;
pub mod catalog;
pub mod invoices;
pub mod orders;
pub mod rbac;
pub mod reports;
pub mod tenancy;
pub mod users;
