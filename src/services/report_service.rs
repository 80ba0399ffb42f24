// src/services/report_service.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::{
    authz::{Action, Identity, PolicyEngine, Resource, ResourceKind, TenantScope},
    common::error::AppError,
    db::{ReportRepository, TenantRepository},
    models::reports::{
        DailySummary, Granularity, ReportQuery, RevenueBucket, RevenueReport, RevenueRow, TopProductEntry,
    },
};

const DEFAULT_RANGE_DAYS: i64 = 30;
const DEFAULT_TOP_LIMIT: i64 = 10;
const MAX_TOP_LIMIT: i64 = 100;

/// Chave do período: `2025-01-14`, `2025-W03` (semana ISO) ou `2025-01`.
pub fn period_key(at: DateTime<Utc>, granularity: Granularity) -> String {
    match granularity {
        Granularity::Day => at.format("%Y-%m-%d").to_string(),
        Granularity::Week => {
            let week = at.iso_week();
            format!("{}-W{:02}", week.year(), week.week())
        }
        Granularity::Month => at.format("%Y-%m").to_string(),
    }
}

/// Agrupa as faturas em memória; os períodos saem em ordem crescente.
pub fn bucket_revenue(rows: &[RevenueRow], granularity: Granularity) -> Vec<RevenueBucket> {
    let mut buckets: BTreeMap<String, (Decimal, i64)> = BTreeMap::new();
    for row in rows {
        let entry = buckets.entry(period_key(row.created_at, granularity)).or_default();
        entry.0 += row.total;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(period, (revenue, invoice_count))| RevenueBucket { period, revenue, invoice_count })
        .collect()
}

pub fn resolve_range(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), AppError> {
    let to = to.unwrap_or(now);
    let from = from.unwrap_or(to - Duration::days(DEFAULT_RANGE_DAYS));
    if from >= to {
        return Err(AppError::BadRequest("report.invalid_range"));
    }
    Ok((from, to))
}

pub fn average_ticket(revenue: Decimal, invoices: i64) -> Decimal {
    if invoices == 0 {
        return Decimal::ZERO;
    }
    (revenue / Decimal::from(invoices)).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[derive(Clone)]
pub struct ReportService {
    report_repo: ReportRepository,
    tenant_repo: TenantRepository,
    policy: Arc<PolicyEngine>,
}

impl ReportService {
    pub fn new(report_repo: ReportRepository, tenant_repo: TenantRepository, policy: Arc<PolicyEngine>) -> Self {
        Self { report_repo, tenant_repo, policy }
    }

    pub async fn revenue(&self, identity: &Identity, query: &ReportQuery) -> Result<RevenueReport, AppError> {
        self.authorize(identity, query.store_id).await?;
        let (from, to) = resolve_range(query.from, query.to, Utc::now())?;

        let scope = TenantScope::for_identity(identity);
        let rows = self.report_repo.revenue_rows(&scope, query.store_id, from, to).await?;

        let total_revenue = rows.iter().map(|r| r.total).sum();
        let buckets = bucket_revenue(&rows, query.group_by.unwrap_or_default());
        Ok(RevenueReport { from, to, total_revenue, buckets })
    }

    pub async fn top_products(&self, identity: &Identity, query: &ReportQuery) -> Result<Vec<TopProductEntry>, AppError> {
        self.authorize(identity, query.store_id).await?;
        let (from, to) = resolve_range(query.from, query.to, Utc::now())?;
        let limit = query.limit.unwrap_or(DEFAULT_TOP_LIMIT).clamp(1, MAX_TOP_LIMIT);

        let scope = TenantScope::for_identity(identity);
        self.report_repo
            .top_products(&scope, query.store_id, from, to, limit)
            .await
    }

    /// Cards do dia corrente (UTC).
    pub async fn summary(&self, identity: &Identity, store_id: Option<Uuid>) -> Result<DailySummary, AppError> {
        self.authorize(identity, store_id).await?;

        let day_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc())
            .ok_or_else(|| AppError::InternalServerError(anyhow::anyhow!("meia-noite inválida")))?;
        let day_end = day_start + Duration::days(1);

        let scope = TenantScope::for_identity(identity);
        let counters = self
            .report_repo
            .summary_counters(&scope, store_id, day_start, day_end)
            .await?;

        Ok(DailySummary {
            revenue_today: counters.revenue,
            invoices_today: counters.invoices,
            open_orders: counters.open_orders,
            average_ticket: average_ticket(counters.revenue, counters.invoices),
        })
    }

    // Relatórios são agregados: a permissão vale para a coleção e a loja pedida precisa estar no alcance
    async fn authorize(&self, identity: &Identity, store_id: Option<Uuid>) -> Result<(), AppError> {
        self.policy
            .authorize(identity, &Resource::collection(ResourceKind::Report), Action::Read)?;

        if let Some(store_id) = store_id {
            let store = self
                .tenant_repo
                .find_store(store_id)
                .await?
                .ok_or(AppError::NotFound("store"))?;
            self.policy.authorize(
                identity,
                &Resource::row(ResourceKind::Report, Some(store.chain_id), Some(store.id)),
                Action::Read,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::str::FromStr;

    fn row(y: i32, m: u32, d: u32, total: &str) -> RevenueRow {
        RevenueRow {
            created_at: Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap(),
            total: Decimal::from_str(total).unwrap(),
        }
    }

    #[test]
    fn buckets_by_day_in_ascending_order() {
        let rows = vec![row(2025, 1, 15, "10.00"), row(2025, 1, 14, "5.50"), row(2025, 1, 15, "2.25")];
        let buckets = bucket_revenue(&rows, Granularity::Day);

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].period, "2025-01-14");
        assert_eq!(buckets[1].revenue, Decimal::from_str("12.25").unwrap());
        assert_eq!(buckets[1].invoice_count, 2);
    }

    #[test]
    fn iso_weeks_cross_year_boundaries() {
        // 2024-12-30 é segunda-feira da semana 1 de 2025
        assert_eq!(period_key(row(2024, 12, 30, "0").created_at, Granularity::Week), "2025-W01");
        assert_eq!(period_key(row(2025, 1, 14, "0").created_at, Granularity::Week), "2025-W03");
    }

    #[test]
    fn buckets_by_month() {
        let rows = vec![row(2025, 2, 1, "1"), row(2025, 1, 31, "2"), row(2025, 1, 2, "3")];
        let buckets = bucket_revenue(&rows, Granularity::Month);
        assert_eq!(buckets.iter().map(|b| b.period.as_str()).collect::<Vec<_>>(), vec!["2025-01", "2025-02"]);
        assert_eq!(buckets[0].revenue, Decimal::from(5));
    }

    #[test]
    fn default_range_is_last_thirty_days() {
        let now = Utc.with_ymd_and_hms(2025, 3, 31, 0, 0, 0).unwrap();
        let (from, to) = resolve_range(None, None, now).unwrap();
        assert_eq!(to, now);
        assert_eq!(from, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());

        assert!(matches!(resolve_range(Some(now), Some(now), now), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn average_ticket_handles_empty_days() {
        assert_eq!(average_ticket(Decimal::ZERO, 0), Decimal::ZERO);
        assert_eq!(average_ticket(Decimal::from(100), 3), Decimal::from_str("33.33").unwrap());
    }
}
