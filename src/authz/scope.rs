// src/authz/scope.rs

use std::collections::BTreeSet;

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::authz::identity::{Identity, CHAIN_WIDE_LEVEL};

/// Alcance de um usuário comum: afiliação própria somada aos cargos ativos.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reach {
    /// Redes alcançadas por inteiro (todas as lojas e linhas da rede).
    pub chains: Vec<Uuid>,
    /// Lojas avulsas.
    pub stores: Vec<Uuid>,
    /// Redes cujas linhas sem loja (catálogo da rede, a própria rede) são visíveis.
    pub visible_chains: Vec<Uuid>,
    /// Afiliação do usuário: dona das linhas novas criadas sem rede/loja explícita.
    pub home_chain: Option<Uuid>,
    pub home_store: Option<Uuid>,
}

/// Predicado de acesso a dados derivado da identidade.
/// Todo serviço que lê ou escreve linhas com rede/loja passa por aqui.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    /// super_admin: sem restrição
    Unrestricted,
    Reach(Reach),
    /// Sem afiliação e sem cargo com escopo: não enxerga nada
    Nothing,
}

impl TenantScope {
    /// Mesmas regras de `Identity::can_access_chain` / `can_access_store`, em forma de conjuntos.
    pub fn for_identity(identity: &Identity) -> Self {
        if identity.is_super_admin() {
            return TenantScope::Unrestricted;
        }

        let mut chains = BTreeSet::new();
        let mut stores = BTreeSet::new();
        let mut visible = BTreeSet::new();

        if let Some(chain_id) = identity.chain_id {
            visible.insert(chain_id);
            if identity.store_id.is_none() {
                chains.insert(chain_id);
            }
        }
        if let Some(store_id) = identity.store_id {
            stores.insert(store_id);
        }

        for grant in &identity.roles {
            if let Some(chain_id) = grant.chain_id {
                visible.insert(chain_id);
                if grant.store_id.is_none() {
                    chains.insert(chain_id);
                }
            }
            if let Some(store_id) = grant.store_id {
                stores.insert(store_id);
            }
            if grant.level <= CHAIN_WIDE_LEVEL {
                if let Some(chain_id) = grant.chain_id.or(identity.chain_id) {
                    chains.insert(chain_id);
                }
            }
        }

        if chains.is_empty() && stores.is_empty() && visible.is_empty() {
            return TenantScope::Nothing;
        }

        TenantScope::Reach(Reach {
            chains: chains.into_iter().collect(),
            stores: stores.into_iter().collect(),
            visible_chains: visible.into_iter().collect(),
            home_chain: identity.chain_id,
            home_store: identity.store_id,
        })
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, TenantScope::Unrestricted)
    }

    /// Rede à qual novas linhas criadas por este escopo ficam presas.
    pub fn pinned_chain(&self) -> Option<Uuid> {
        match self {
            TenantScope::Reach(reach) => reach.home_chain,
            _ => None,
        }
    }

    pub fn pinned_store(&self) -> Option<Uuid> {
        match self {
            TenantScope::Reach(reach) => reach.home_store,
            _ => None,
        }
    }

    /// Versão em memória do predicado de `push_filter`, para a mesma linha (rede, loja).
    pub fn admits(&self, chain_id: Option<Uuid>, store_id: Option<Uuid>, include_global: bool) -> bool {
        match self {
            TenantScope::Unrestricted => true,
            TenantScope::Nothing => include_global && chain_id.is_none(),
            TenantScope::Reach(reach) => match (chain_id, store_id) {
                (None, _) => include_global,
                (Some(chain), None) => reach.chains.contains(&chain) || reach.visible_chains.contains(&chain),
                (Some(chain), Some(store)) => reach.chains.contains(&chain) || reach.stores.contains(&store),
            },
        }
    }

    /// Anexa o predicado como ` AND (...)` a uma consulta que já tem `WHERE`.
    /// `alias` é o prefixo da tabela (ex.: "p."). Com `include_global`, linhas sem rede
    /// (catálogo compartilhado) também passam.
    pub fn push_filter(&self, qb: &mut QueryBuilder<'_, Postgres>, alias: &str, include_global: bool) {
        match self {
            TenantScope::Unrestricted => {}
            TenantScope::Nothing => {
                if include_global {
                    qb.push(format!(" AND {alias}chain_id IS NULL"));
                } else {
                    qb.push(" AND FALSE");
                }
            }
            TenantScope::Reach(reach) => {
                qb.push(format!(" AND ({alias}chain_id = ANY("));
                qb.push_bind(reach.chains.clone());
                qb.push(format!(") OR {alias}store_id = ANY("));
                qb.push_bind(reach.stores.clone());
                qb.push(format!(") OR ({alias}store_id IS NULL AND {alias}chain_id = ANY("));
                qb.push_bind(reach.visible_chains.clone());
                qb.push("))");
                if include_global {
                    qb.push(format!(" OR {alias}chain_id IS NULL"));
                }
                qb.push(")");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::identity::fixtures::{grant, identity};
    use crate::authz::identity::SUPER_ADMIN;

    fn render(scope: &TenantScope, include_global: bool) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM products p WHERE TRUE");
        scope.push_filter(&mut qb, "p.", include_global);
        qb.sql().to_string()
    }

    #[test]
    fn only_super_admin_is_unrestricted() {
        let chain = Uuid::new_v4();
        let admin = identity(None, None, vec![grant(SUPER_ADMIN, 1, None, None)]);
        assert_eq!(TenantScope::for_identity(&admin), TenantScope::Unrestricted);

        // Nenhuma combinação de afiliação/cargos sem super_admin gera escopo irrestrito
        let cases = [
            identity(None, None, vec![]),
            identity(Some(chain), None, vec![grant("chain_admin", 1, Some(chain), None)]),
            identity(None, Some(Uuid::new_v4()), vec![grant("admin", 0, None, None)]),
            identity(Some(chain), Some(Uuid::new_v4()), vec![]),
        ];
        for id in cases.iter() {
            assert!(!TenantScope::for_identity(id).is_unrestricted());
        }
    }

    #[test]
    fn store_affiliation_narrows_chain() {
        let chain = Uuid::new_v4();
        let store = Uuid::new_v4();
        let scope = TenantScope::for_identity(&identity(Some(chain), Some(store), vec![]));
        assert_eq!(scope.pinned_chain(), Some(chain));
        assert_eq!(scope.pinned_store(), Some(store));
        assert!(scope.admits(Some(chain), Some(store), false));
        assert!(scope.admits(Some(chain), None, false));
        assert!(!scope.admits(Some(chain), Some(Uuid::new_v4()), false));

        let scope = TenantScope::for_identity(&identity(Some(chain), None, vec![]));
        assert!(scope.admits(Some(chain), Some(Uuid::new_v4()), false));
    }

    #[test]
    fn grant_without_affiliation_still_reaches_its_chain() {
        let chain_b = Uuid::new_v4();
        let viewer = identity(None, None, vec![grant("viewer", 5, Some(chain_b), None)]);
        let scope = TenantScope::for_identity(&viewer);

        assert_ne!(scope, TenantScope::Nothing);
        assert!(scope.admits(Some(chain_b), Some(Uuid::new_v4()), false));
        assert!(!scope.admits(Some(Uuid::new_v4()), None, false));
        assert!(!render(&scope, false).ends_with(" AND FALSE"));
    }

    #[test]
    fn list_predicate_agrees_with_row_checks() {
        let chain_a = Uuid::new_v4();
        let chain_b = Uuid::new_v4();
        let store_a1 = Uuid::new_v4();
        let store_a2 = Uuid::new_v4();
        let store_b1 = Uuid::new_v4();

        let identities = [
            identity(None, None, vec![]),
            identity(Some(chain_a), None, vec![]),
            identity(Some(chain_a), Some(store_a1), vec![grant("waiter", 5, Some(chain_a), Some(store_a1))]),
            identity(None, None, vec![grant("viewer", 5, Some(chain_b), None)]),
            identity(Some(chain_a), Some(store_a1), vec![grant("viewer", 5, Some(chain_b), Some(store_b1))]),
            identity(None, None, vec![grant("chain_admin", 2, Some(chain_b), Some(store_b1))]),
            identity(Some(chain_a), Some(store_a2), vec![grant("chain_admin", 2, None, None)]),
        ];
        let rows = [
            (chain_a, None),
            (chain_a, Some(store_a1)),
            (chain_a, Some(store_a2)),
            (chain_b, None),
            (chain_b, Some(store_b1)),
            (Uuid::new_v4(), Some(Uuid::new_v4())),
        ];

        for id in identities.iter() {
            let scope = TenantScope::for_identity(id);
            for (chain, store) in rows {
                assert_eq!(
                    scope.admits(Some(chain), store, false),
                    id.can_access_row(Some(chain), store, false),
                    "identity {:?} row ({chain}, {store:?})",
                    id.roles
                );
            }
        }
    }

    #[test]
    fn renders_sql_predicates() {
        assert_eq!(render(&TenantScope::Unrestricted, true), "SELECT * FROM products p WHERE TRUE");
        assert!(render(&TenantScope::Nothing, false).ends_with(" AND FALSE"));
        assert!(render(&TenantScope::Nothing, true).ends_with(" AND p.chain_id IS NULL"));

        let scope = TenantScope::for_identity(&identity(Some(Uuid::new_v4()), None, vec![]));
        assert!(render(&scope, true).ends_with(
            " AND (p.chain_id = ANY($1) OR p.store_id = ANY($2) OR (p.store_id IS NULL AND p.chain_id = ANY($3)) OR p.chain_id IS NULL)"
        ));
    }
}
