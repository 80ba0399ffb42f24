pub mod auth;
pub mod catalog;
pub mod documents;
pub mod invoices;
pub mod orders;
pub mod rbac;
pub mod realtime;
pub mod reports;
pub mod tenancy;
pub mod users;
