//! Camada de autorização: identidade resolvida, escopo de tenant e o motor de políticas.

pub mod identity;
pub mod policy;
pub mod scope;

pub use identity::Identity;
pub use policy::{Action, PolicyEngine, Resource, ResourceKind};
pub use scope::TenantScope;
