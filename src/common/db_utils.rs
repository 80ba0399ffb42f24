// src/common/db_utils.rs

use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::common::error::AppError;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Paginação aceita em dois formatos: `page`/`pageSize` (painel) ou `skip`/`take`.
#[derive(Debug, Clone, Copy, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PageParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub skip: Option<i64>,
    pub take: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: i64,
    pub offset: i64,
    pub page: i64,
    pub page_size: i64,
}

impl PageParams {
    pub fn window(&self) -> PageWindow {
        // skip/take tem precedência quando presente
        if self.skip.is_some() || self.take.is_some() {
            let limit = self.take.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
            let offset = self.skip.unwrap_or(0).max(0);
            return PageWindow {
                limit,
                offset,
                page: offset / limit + 1,
                page_size: limit,
            };
        }

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let page = self.page.unwrap_or(1).max(1);
        PageWindow {
            limit: page_size,
            offset: (page - 1) * page_size,
            page,
            page_size,
        }
    }
}

/// Chave da numeração diária (`<loja>:<prefixo>`); o prefixo já carrega o tipo e o dia.
pub fn sequence_lock_key(store_id: Uuid, prefix: &str) -> String {
    format!("{store_id}:{prefix}")
}

/// Serializa a emissão de números da loja no dia até o fim da transação corrente.
/// Precisa rodar numa instrução separada, antes do `MAX(...)`, para que a leitura
/// seguinte já enxergue o que a transação concorrente gravou.
pub async fn lock_sequence(conn: &mut PgConnection, store_id: Uuid, prefix: &str) -> Result<(), AppError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(sequence_lock_key(store_id, prefix))
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: i64, window: PageWindow) -> Self {
        Self {
            data,
            total,
            page: window.page,
            page_size: window.page_size,
        }
    }
}

/// Monta o padrão do ILIKE, escapando os curingas digitados pelo usuário.
pub fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Termo de busca não vazio, já aparado.
pub fn search_term(search: &Option<String>) -> Option<&str> {
    search.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbering_lock_is_per_store_kind_and_day() {
        let store = Uuid::new_v4();
        let key = sequence_lock_key(store, "ORD-20250301-");
        assert_eq!(key, format!("{store}:ORD-20250301-"));
        assert_ne!(key, sequence_lock_key(store, "INV-20250301-"));
        assert_ne!(key, sequence_lock_key(store, "ORD-20250302-"));
        assert_ne!(key, sequence_lock_key(Uuid::new_v4(), "ORD-20250301-"));
    }

    #[test]
    fn page_defaults_and_clamps() {
        let w = PageParams::default().window();
        assert_eq!(w, PageWindow { limit: 20, offset: 0, page: 1, page_size: 20 });

        let w = PageParams { page: Some(3), page_size: Some(500), ..Default::default() }.window();
        assert_eq!(w.limit, 100);
        assert_eq!(w.offset, 200);

        let w = PageParams { page: Some(0), ..Default::default() }.window();
        assert_eq!(w.page, 1);
    }

    #[test]
    fn skip_take_wins_over_page() {
        let w = PageParams { page: Some(5), skip: Some(30), take: Some(10), ..Default::default() }.window();
        assert_eq!(w.offset, 30);
        assert_eq!(w.limit, 10);
        assert_eq!(w.page, 4);
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" café "), "%café%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(search_term(&Some("   ".into())), None);
    }
}
