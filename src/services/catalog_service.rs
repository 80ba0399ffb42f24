// src/services/catalog_service.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    authz::{Action, Identity, PolicyEngine, Resource, ResourceKind, TenantScope},
    common::{
        db_utils::{PageParams, Paginated},
        error::AppError,
    },
    db::{catalog_repo::ProductWrite, CatalogRepository, TenantRepository},
    models::catalog::{
        CatalogListQuery, Category, CategoryNode, CategoryWithCount, CreateCategoryPayload, CreateModifierPayload,
        CreateProductPayload, Modifier, Product, ProductDetail, ProductListQuery, UpdateCategoryPayload,
        UpdateModifierPayload, UpdateProductPayload, MAX_CATEGORY_DEPTH,
    },
};

// ---
// Árvore de categorias (funções puras)
// ---

/// Profundidade de um nó (raiz = 1) subindo pelos pais. `None` é a raiz virtual (0).
/// Um ciclo já gravado no banco é reportado em vez de travar a requisição.
pub fn depth_of(links: &HashMap<Uuid, Option<Uuid>>, node: Option<Uuid>) -> Result<usize, AppError> {
    let mut visited = HashSet::new();
    let mut depth = 0;
    let mut current = node;

    while let Some(id) = current {
        if !visited.insert(id) {
            return Err(AppError::BadRequest("category.cycle"));
        }
        depth += 1;
        current = links.get(&id).copied().flatten();
    }
    Ok(depth)
}

/// Altura da subárvore enraizada em `root` (folha = 1).
pub fn subtree_height(links: &HashMap<Uuid, Option<Uuid>>, root: Uuid) -> usize {
    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (id, parent) in links {
        if let Some(parent) = parent {
            children.entry(*parent).or_default().push(*id);
        }
    }

    let mut visited = HashSet::from([root]);
    let mut frontier = vec![root];
    let mut height = 0;
    while !frontier.is_empty() {
        height += 1;
        let mut next = Vec::new();
        for id in frontier {
            for child in children.get(&id).into_iter().flatten() {
                if visited.insert(*child) {
                    next.push(*child);
                }
            }
        }
        frontier = next;
    }
    height
}

/// Valida colocar `category` (ou uma nova, quando `None`) sob `new_parent`.
pub fn check_placement(
    links: &HashMap<Uuid, Option<Uuid>>,
    category: Option<Uuid>,
    new_parent: Option<Uuid>,
) -> Result<(), AppError> {
    let Some(parent) = new_parent else {
        // Na raiz só a própria subárvore conta
        let height = category.map_or(1, |id| subtree_height(links, id));
        return if height > MAX_CATEGORY_DEPTH {
            Err(AppError::BadRequest("category.max_depth"))
        } else {
            Ok(())
        };
    };

    if let Some(id) = category {
        // O novo pai não pode ser a própria categoria nem um descendente dela
        let mut visited = HashSet::new();
        let mut current = Some(parent);
        while let Some(ancestor) = current {
            if ancestor == id || !visited.insert(ancestor) {
                return Err(AppError::BadRequest("category.cycle"));
            }
            current = links.get(&ancestor).copied().flatten();
        }
    }

    let parent_depth = depth_of(links, Some(parent))?;
    let height = category.map_or(1, |id| subtree_height(links, id));
    if parent_depth + height > MAX_CATEGORY_DEPTH {
        return Err(AppError::BadRequest("category.max_depth"));
    }
    Ok(())
}

/// Categoria só sai vazia: sem produtos e sem subcategorias.
pub fn ensure_category_deletable(products: i64, children: i64) -> Result<(), AppError> {
    if products > 0 {
        return Err(AppError::BadRequest("category.has_products"));
    }
    if children > 0 {
        return Err(AppError::BadRequest("category.has_children"));
    }
    Ok(())
}

/// Monta a árvore; categorias cujo pai não está visível viram raízes.
pub fn build_tree(categories: Vec<Category>) -> Vec<CategoryNode> {
    let ids: HashSet<Uuid> = categories.iter().map(|c| c.id).collect();
    let mut children: HashMap<Uuid, Vec<Category>> = HashMap::new();
    let mut roots = Vec::new();

    for category in categories {
        match category.parent_id {
            Some(parent) if ids.contains(&parent) && parent != category.id => {
                children.entry(parent).or_default().push(category)
            }
            _ => roots.push(category),
        }
    }

    fn attach(category: Category, children: &mut HashMap<Uuid, Vec<Category>>, depth: usize) -> CategoryNode {
        let kids = if depth < MAX_CATEGORY_DEPTH {
            children.remove(&category.id).unwrap_or_default()
        } else {
            Vec::new()
        };
        CategoryNode {
            children: kids.into_iter().map(|c| attach(c, children, depth + 1)).collect(),
            category,
        }
    }

    roots.into_iter().map(|c| attach(c, &mut children, 1)).collect()
}

#[derive(Clone)]
pub struct CatalogService {
    catalog_repo: CatalogRepository,
    tenant_repo: TenantRepository,
    policy: Arc<PolicyEngine>,
    pool: PgPool,
}

impl CatalogService {
    pub fn new(
        catalog_repo: CatalogRepository,
        tenant_repo: TenantRepository,
        policy: Arc<PolicyEngine>,
        pool: PgPool,
    ) -> Self {
        Self { catalog_repo, tenant_repo, policy, pool }
    }

    // =========================================================================
    //  CATEGORIAS
    // =========================================================================

    pub async fn list_categories(
        &self,
        identity: &Identity,
        filter: &CatalogListQuery,
        page: PageParams,
    ) -> Result<Paginated<CategoryWithCount>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Category), Action::Read)?;

        let window = page.window();
        let scope = TenantScope::for_identity(identity);
        let (categories, total) = self.catalog_repo.list_categories(&scope, filter, window).await?;
        Ok(Paginated::new(categories, total, window))
    }

    pub async fn category_tree(&self, identity: &Identity) -> Result<Vec<CategoryNode>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Category), Action::Read)?;

        let scope = TenantScope::for_identity(identity);
        let categories = self.catalog_repo.all_categories(&scope).await?;
        Ok(build_tree(categories))
    }

    pub async fn get_category(&self, identity: &Identity, id: Uuid) -> Result<Category, AppError> {
        let category = self.find_category(id).await?;
        self.policy.authorize(identity, &category_resource(&category), Action::Read)?;
        Ok(category)
    }

    pub async fn create_category(&self, identity: &Identity, payload: CreateCategoryPayload) -> Result<Category, AppError> {
        let (chain_id, store_id) = self.owner_for(identity, payload.chain_id, payload.store_id).await?;
        self.policy.authorize(
            identity,
            &Resource::row(ResourceKind::Category, chain_id, store_id),
            Action::Create,
        )?;

        if let Some(parent_id) = payload.parent_id {
            let parent = self.find_category(parent_id).await?;
            self.policy.authorize(identity, &category_resource(&parent), Action::Read)?;
        }
        // Checagem e gravação na mesma transação, com a árvore travada
        let mut tx = self.pool.begin().await?;
        self.catalog_repo.lock_category_tree(&mut *tx).await?;
        let links = self.category_links(&mut *tx, payload.parent_id, None).await?;
        check_placement(&links, None, payload.parent_id)?;

        let category = self
            .catalog_repo
            .create_category(
                &mut *tx,
                chain_id,
                store_id,
                payload.parent_id,
                &payload.name,
                payload.description.as_deref(),
                payload.sort_order,
            )
            .await?;
        tx.commit().await?;
        Ok(category)
    }

    pub async fn update_category(
        &self,
        identity: &Identity,
        id: Uuid,
        payload: UpdateCategoryPayload,
    ) -> Result<Category, AppError> {
        let category = self.find_category(id).await?;
        self.policy.authorize(identity, &category_resource(&category), Action::Update)?;

        let mut tx = self.pool.begin().await?;
        if let Some(new_parent) = payload.parent_id {
            if let Some(parent_id) = new_parent {
                let parent = self.find_category(parent_id).await?;
                self.policy.authorize(identity, &category_resource(&parent), Action::Read)?;
            }
            self.catalog_repo.lock_category_tree(&mut *tx).await?;
            let links = self.category_links(&mut *tx, new_parent, Some(id)).await?;
            check_placement(&links, Some(id), new_parent)?;
        }

        let updated = self
            .catalog_repo
            .update_category(
                &mut *tx,
                id,
                payload.parent_id,
                payload.name.as_deref(),
                payload.description.as_deref(),
                payload.sort_order,
                payload.is_active,
            )
            .await?;
        tx.commit().await?;
        Ok(updated)
    }

    pub async fn delete_category(&self, identity: &Identity, id: Uuid) -> Result<(), AppError> {
        let category = self.find_category(id).await?;
        self.policy.authorize(identity, &category_resource(&category), Action::Delete)?;

        let (products, children) = self.catalog_repo.category_usage(id).await?;
        ensure_category_deletable(products, children)?;
        self.catalog_repo.delete_category(id).await
    }

    // =========================================================================
    //  PRODUTOS
    // =========================================================================

    pub async fn list_products(
        &self,
        identity: &Identity,
        filter: &ProductListQuery,
        page: PageParams,
    ) -> Result<Paginated<Product>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Product), Action::Read)?;

        let window = page.window();
        let scope = TenantScope::for_identity(identity);
        let (products, total) = self.catalog_repo.list_products(&scope, filter, window).await?;
        Ok(Paginated::new(products, total, window))
    }

    pub async fn get_product(&self, identity: &Identity, id: Uuid) -> Result<ProductDetail, AppError> {
        let product = self.find_product(id).await?;
        self.policy.authorize(identity, &product_resource(&product), Action::Read)?;

        let modifiers = self.catalog_repo.modifiers_for_product(product.id).await?;
        Ok(ProductDetail { product, modifiers })
    }

    pub async fn create_product(&self, identity: &Identity, payload: CreateProductPayload) -> Result<ProductDetail, AppError> {
        let (chain_id, store_id) = self.owner_for(identity, payload.chain_id, payload.store_id).await?;
        self.policy.authorize(
            identity,
            &Resource::row(ResourceKind::Product, chain_id, store_id),
            Action::Create,
        )?;
        if let Some(category_id) = payload.category_id {
            let category = self.find_category(category_id).await?;
            self.policy.authorize(identity, &category_resource(&category), Action::Read)?;
        }
        let modifiers = self.visible_modifiers(identity, &payload.modifier_ids).await?;

        let mut tx = self.pool.begin().await?;
        let product = self
            .catalog_repo
            .create_product(
                &mut *tx,
                ProductWrite {
                    chain_id,
                    store_id,
                    category_id: payload.category_id,
                    sku: payload.sku.as_deref(),
                    name: &payload.name,
                    description: payload.description.as_deref(),
                    price: payload.price,
                    image_url: payload.image_url.as_deref(),
                    is_available: payload.is_available,
                    track_stock: payload.track_stock,
                    stock_quantity: payload.stock_quantity,
                },
            )
            .await?;
        if !modifiers.is_empty() {
            let ids: Vec<Uuid> = modifiers.iter().map(|m| m.id).collect();
            self.catalog_repo.attach_modifiers(&mut *tx, product.id, &ids).await?;
        }
        tx.commit().await?;

        Ok(ProductDetail { product, modifiers })
    }

    pub async fn update_product(&self, identity: &Identity, id: Uuid, payload: UpdateProductPayload) -> Result<Product, AppError> {
        let current = self.find_product(id).await?;
        self.policy.authorize(identity, &product_resource(&current), Action::Update)?;

        if let Some(category_id) = payload.category_id {
            let category = self.find_category(category_id).await?;
            self.policy.authorize(identity, &category_resource(&category), Action::Read)?;
        }

        // Mescla o payload parcial com a linha atual
        let sku = payload.sku.as_deref().or(current.sku.as_deref());
        let name = payload.name.as_deref().unwrap_or(&current.name);
        let description = payload.description.as_deref().or(current.description.as_deref());
        let image_url = payload.image_url.as_deref().or(current.image_url.as_deref());

        self.catalog_repo
            .update_product(
                &self.pool,
                id,
                ProductWrite {
                    chain_id: current.chain_id,
                    store_id: current.store_id,
                    category_id: payload.category_id.or(current.category_id),
                    sku,
                    name,
                    description,
                    price: payload.price.unwrap_or(current.price),
                    image_url,
                    is_available: payload.is_available.unwrap_or(current.is_available),
                    track_stock: payload.track_stock.unwrap_or(current.track_stock),
                    stock_quantity: payload.stock_quantity.unwrap_or(current.stock_quantity),
                },
            )
            .await
    }

    pub async fn set_availability(&self, identity: &Identity, id: Uuid, is_available: bool) -> Result<Product, AppError> {
        let product = self.find_product(id).await?;
        self.policy.authorize(identity, &product_resource(&product), Action::Update)?;
        self.catalog_repo.set_availability(id, is_available).await
    }

    /// Troca o conjunto de modificadores do produto (apaga e recria na mesma transação).
    pub async fn replace_modifiers(
        &self,
        identity: &Identity,
        id: Uuid,
        modifier_ids: Vec<Uuid>,
    ) -> Result<ProductDetail, AppError> {
        let product = self.find_product(id).await?;
        self.policy.authorize(identity, &product_resource(&product), Action::Update)?;
        let modifiers = self.visible_modifiers(identity, &modifier_ids).await?;

        let mut tx = self.pool.begin().await?;
        self.catalog_repo.clear_product_modifiers(&mut *tx, product.id).await?;
        if !modifiers.is_empty() {
            let ids: Vec<Uuid> = modifiers.iter().map(|m| m.id).collect();
            self.catalog_repo.attach_modifiers(&mut *tx, product.id, &ids).await?;
        }
        tx.commit().await?;

        Ok(ProductDetail { product, modifiers })
    }

    pub async fn delete_product(&self, identity: &Identity, id: Uuid) -> Result<(), AppError> {
        let product = self.find_product(id).await?;
        self.policy.authorize(identity, &product_resource(&product), Action::Delete)?;
        self.catalog_repo.delete_product(id).await
    }

    // =========================================================================
    //  MODIFICADORES
    // =========================================================================

    pub async fn list_modifiers(
        &self,
        identity: &Identity,
        filter: &CatalogListQuery,
        page: PageParams,
    ) -> Result<Paginated<Modifier>, AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Modifier), Action::Read)?;

        let window = page.window();
        let scope = TenantScope::for_identity(identity);
        let (modifiers, total) = self.catalog_repo.list_modifiers(&scope, filter, window).await?;
        Ok(Paginated::new(modifiers, total, window))
    }

    pub async fn get_modifier(&self, identity: &Identity, id: Uuid) -> Result<Modifier, AppError> {
        let modifier = self.find_modifier(id).await?;
        self.policy.authorize(identity, &modifier_resource(&modifier), Action::Read)?;
        Ok(modifier)
    }

    pub async fn create_modifier(&self, identity: &Identity, payload: CreateModifierPayload) -> Result<Modifier, AppError> {
        let (chain_id, store_id) = self.owner_for(identity, payload.chain_id, payload.store_id).await?;
        self.policy.authorize(
            identity,
            &Resource::row(ResourceKind::Modifier, chain_id, store_id),
            Action::Create,
        )?;
        self.catalog_repo
            .create_modifier(chain_id, store_id, &payload.name, payload.price)
            .await
    }

    pub async fn update_modifier(
        &self,
        identity: &Identity,
        id: Uuid,
        payload: UpdateModifierPayload,
    ) -> Result<Modifier, AppError> {
        let modifier = self.find_modifier(id).await?;
        self.policy.authorize(identity, &modifier_resource(&modifier), Action::Update)?;
        self.catalog_repo
            .update_modifier(id, payload.name.as_deref(), payload.price, payload.is_active)
            .await
    }

    pub async fn delete_modifier(&self, identity: &Identity, id: Uuid) -> Result<(), AppError> {
        let modifier = self.find_modifier(id).await?;
        self.policy.authorize(identity, &modifier_resource(&modifier), Action::Delete)?;

        if self.catalog_repo.modifier_in_use(id).await? {
            return Err(AppError::Conflict("modifier.in_use"));
        }
        self.catalog_repo.delete_modifier(id).await
    }

    // ---
    // Auxiliares
    // ---

    /// Dono de uma linha nova de catálogo. Fora do super_admin, o escopo do chamador
    /// preenche rede/loja; loja informada sempre define a rede.
    async fn owner_for(
        &self,
        identity: &Identity,
        chain_id: Option<Uuid>,
        store_id: Option<Uuid>,
    ) -> Result<(Option<Uuid>, Option<Uuid>), AppError> {
        let scope = TenantScope::for_identity(identity);
        let (chain_id, store_id) = if scope.is_unrestricted() {
            (chain_id, store_id)
        } else {
            (chain_id.or(scope.pinned_chain()), store_id.or(scope.pinned_store()))
        };

        match store_id {
            Some(store_id) => {
                let store = self
                    .tenant_repo
                    .find_store(store_id)
                    .await?
                    .ok_or(AppError::NotFound("store"))?;
                if chain_id.is_some_and(|c| c != store.chain_id) {
                    return Err(AppError::BadRequest("store.chain_mismatch"));
                }
                Ok((Some(store.chain_id), Some(store.id)))
            }
            None => Ok((chain_id, None)),
        }
    }

    async fn visible_modifiers(&self, identity: &Identity, ids: &[Uuid]) -> Result<Vec<Modifier>, AppError> {
        let unique: Vec<Uuid> = ids.iter().copied().collect::<HashSet<_>>().into_iter().collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let modifiers = self.catalog_repo.find_modifiers_by_ids(&self.pool, &unique).await?;
        if modifiers.len() != unique.len() {
            return Err(AppError::NotFound("modifier"));
        }
        for modifier in &modifiers {
            self.policy.authorize(identity, &modifier_resource(modifier), Action::Read)?;
        }
        Ok(modifiers)
    }

    async fn category_links(
        &self,
        conn: &mut PgConnection,
        parent: Option<Uuid>,
        root: Option<Uuid>,
    ) -> Result<HashMap<Uuid, Option<Uuid>>, AppError> {
        Ok(self.catalog_repo.category_links(conn, parent, root).await?.into_iter().collect())
    }

    async fn find_category(&self, id: Uuid) -> Result<Category, AppError> {
        self.catalog_repo.find_category(id).await?.ok_or(AppError::NotFound("category"))
    }

    async fn find_product(&self, id: Uuid) -> Result<Product, AppError> {
        self.catalog_repo.find_product(id).await?.ok_or(AppError::NotFound("product"))
    }

    async fn find_modifier(&self, id: Uuid) -> Result<Modifier, AppError> {
        self.catalog_repo.find_modifier(id).await?.ok_or(AppError::NotFound("modifier"))
    }
}

fn category_resource(category: &Category) -> Resource {
    Resource::row(ResourceKind::Category, category.chain_id, category.store_id)
}

fn product_resource(product: &Product) -> Resource {
    Resource::row(ResourceKind::Product, product.chain_id, product.store_id)
}

fn modifier_resource(modifier: &Modifier) -> Resource {
    Resource::row(ResourceKind::Modifier, modifier.chain_id, modifier.store_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chain_of(ids: &[Uuid]) -> HashMap<Uuid, Option<Uuid>> {
        let mut links = HashMap::new();
        let mut parent = None;
        for id in ids {
            links.insert(*id, parent);
            parent = Some(*id);
        }
        links
    }

    fn category(id: Uuid, parent: Option<Uuid>, name: &str) -> Category {
        Category {
            id,
            chain_id: None,
            store_id: None,
            parent_id: parent,
            name: name.into(),
            description: None,
            sort_order: 0,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn allows_three_levels_and_rejects_a_fourth() {
        let (root, child, grandchild) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let links = chain_of(&[root, child, grandchild]);

        assert_eq!(depth_of(&links, Some(grandchild)).unwrap(), 3);
        assert!(check_placement(&links, None, Some(child)).is_ok());
        assert!(matches!(
            check_placement(&links, None, Some(grandchild)),
            Err(AppError::BadRequest("category.max_depth"))
        ));
    }

    #[test]
    fn moving_a_subtree_counts_its_height() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        let mut links = chain_of(&[a, b]);
        links.extend(chain_of(&[x, y]));

        // x (altura 2) sob a (profundidade 1): 3 níveis, ok
        assert!(check_placement(&links, Some(x), Some(a)).is_ok());
        // x sob b (profundidade 2): 4 níveis
        assert!(matches!(
            check_placement(&links, Some(x), Some(b)),
            Err(AppError::BadRequest("category.max_depth"))
        ));
    }

    #[test]
    fn rejects_self_and_descendant_parents() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let links = chain_of(&[a, b, c]);

        assert!(matches!(check_placement(&links, Some(a), Some(a)), Err(AppError::BadRequest("category.cycle"))));
        assert!(matches!(check_placement(&links, Some(a), Some(c)), Err(AppError::BadRequest("category.cycle"))));
        assert!(check_placement(&links, Some(c), None).is_ok());
    }

    #[test]
    fn stored_cycle_does_not_loop_forever() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let links = HashMap::from([(a, Some(b)), (b, Some(a))]);
        assert!(matches!(depth_of(&links, Some(a)), Err(AppError::BadRequest("category.cycle"))));
    }

    #[test]
    fn placement_needs_only_ancestors_and_the_moved_subtree() {
        // Árvore a -> b ; subárvore x -> y ; o resto do catálogo não é carregado
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        let links = HashMap::from([(a, None), (b, Some(a)), (x, Some(Uuid::new_v4())), (y, Some(x))]);

        assert!(check_placement(&links, Some(x), Some(a)).is_ok());
        assert!(matches!(
            check_placement(&links, Some(x), Some(b)),
            Err(AppError::BadRequest("category.max_depth"))
        ));
    }

    #[test]
    fn only_empty_categories_can_be_deleted() {
        assert!(ensure_category_deletable(0, 0).is_ok());
        assert!(matches!(
            ensure_category_deletable(3, 0),
            Err(AppError::BadRequest("category.has_products"))
        ));
        assert!(matches!(
            ensure_category_deletable(0, 1),
            Err(AppError::BadRequest("category.has_children"))
        ));
        assert!(matches!(
            ensure_category_deletable(2, 2),
            Err(AppError::BadRequest("category.has_products"))
        ));
    }

    #[test]
    fn builds_tree_and_promotes_orphans() {
        let (root, child, orphan) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let tree = build_tree(vec![
            category(root, None, "Bebidas"),
            category(child, Some(root), "Sucos"),
            category(orphan, Some(Uuid::new_v4()), "Sobremesas"),
        ]);

        assert_eq!(tree.len(), 2);
        let bebidas = tree.iter().find(|n| n.category.id == root).unwrap();
        assert_eq!(bebidas.children.len(), 1);
        assert_eq!(bebidas.children[0].category.name, "Sucos");
    }
}
