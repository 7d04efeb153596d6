//! Sales statistics derived from orders.
//!
//! Only delivered orders count as realized sales. A period of N days compares the current window `[now - N, now]`
//! with the preceding one `[now - 2N, now - N)`. Top products are ranked over every visible order.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use crate::{
    config::StoreConfig,
    error::{Result, StoreError},
    model::{money, timestamp, Order, OrderStatus},
    traits::DocumentStore,
    types::{Direction, Document},
};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde::Serialize;
use std::{collections::HashMap, sync::{Arc, Weak}};
use strum::{AsRefStr, Display as StrumDisplay, EnumIter, EnumString};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::instrument;

/// Document id of the precomputed summary in the stats collection.
pub const SUMMARY_DOCUMENT: &str = "summary";

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Period {
    #[default]
    Week,
    Month,
    Year,
}

impl Period {
    pub fn days(&self) -> i64 {
        match self {
            Self::Week => 7,
            Self::Month => 30,
            Self::Year => 365,
        }
    }

    pub fn span(&self) -> Duration {
        Duration::days(self.days())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    #[serde(with = "money")]
    pub total_sales:         Decimal,
    pub total_orders:        u64,
    /// Zero when there are no orders.
    #[serde(with = "money")]
    pub average_order_value: Decimal,
    /// Change against the previous window, in whole percent.
    pub sales_growth:        i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopProduct {
    #[serde(rename = "id")]
    pub product_id: String,
    pub name:       String,
    pub total_sold: u64,
    #[serde(with = "money")]
    pub revenue:    Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image:      Option<String>,
}

/// One bucket of the sales chart: a day, or the first day of a month for yearly charts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesPoint {
    pub date:   NaiveDate,
    #[serde(with = "money")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsReport {
    pub period:       Period,
    pub summary:      SalesSummary,
    pub top_products: Vec<TopProduct>,
    pub sales:        Vec<SalesPoint>,
    pub computed_at:  DateTime<Utc>,
}

impl StatsReport {
    pub fn compute(orders: &[Order], period: Period, now: DateTime<Utc>, top_limit: usize) -> Self {
        Self {
            period,
            summary: compute_summary(orders, period, now),
            top_products: top_products(orders, top_limit),
            sales: sales_series(orders, period, now),
            computed_at: now,
        }
    }
}

fn delivered(orders: &[Order]) -> impl Iterator<Item = &Order> {
    orders.iter().filter(|o| o.status == OrderStatus::Delivered)
}

/// Summary of the delivered orders created in the current window of `period`, with growth against the previous
/// window.
pub fn compute_summary(orders: &[Order], period: Period, now: DateTime<Utc>) -> SalesSummary {
    let current_start = now - period.span();
    let previous_start = current_start - period.span();

    let mut total_sales = Decimal::ZERO;
    let mut total_orders = 0u64;
    let mut previous_total = Decimal::ZERO;

    for order in delivered(orders) {
        let created = order.created_at;
        if created >= current_start && created <= now {
            total_sales = total_sales.saturating_add(order.total_amount);
            total_orders += 1;
        }
        else if created >= previous_start && created < current_start {
            previous_total = previous_total.saturating_add(order.total_amount);
        }
    }

    let average_order_value = if total_orders == 0 {
        Decimal::ZERO
    }
    else {
        total_sales.checked_div(Decimal::from(total_orders)).unwrap_or(Decimal::ZERO)
    };

    SalesSummary {
        total_sales,
        total_orders,
        average_order_value,
        sales_growth: growth(total_sales, previous_total),
    }
}

/// Percentage change from `previous` to `current`, rounded half up. Growth from nothing is 100 if there are sales now
/// and 0 otherwise. Changes beyond the `i64` range saturate.
pub fn growth(current: Decimal, previous: Decimal) -> i64 {
    if previous > Decimal::ZERO {
        let saturated = if current >= previous {
            i64::MAX
        }
        else {
            i64::MIN
        };
        current
            .checked_sub(previous)
            .and_then(|change| change.checked_div(previous))
            .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
            .and_then(|percent| percent.checked_add(Decimal::new(5, 1)))
            .and_then(|percent| percent.floor().to_i64())
            .unwrap_or(saturated)
    }
    else if current > Decimal::ZERO {
        100
    }
    else {
        0
    }
}

/// Products ranked by units sold, then by revenue. Products with equal units and revenue keep the order in which they
/// were first seen.
pub fn top_products(orders: &[Order], limit: usize) -> Vec<TopProduct> {
    let mut ranking: Vec<TopProduct> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for item in orders.iter().flat_map(|o| o.items.iter()) {
        match index.get(item.product_id.as_str()) {
            Some(&pos) => {
                let entry = &mut ranking[pos];
                entry.total_sold = entry.total_sold.saturating_add(u64::from(item.quantity));
                entry.revenue = entry.revenue.saturating_add(item.total_price);
                if entry.image.is_none() {
                    entry.image = item.image.clone();
                }
            }
            None => {
                index.insert(item.product_id.as_str(), ranking.len());
                ranking.push(TopProduct {
                    product_id: item.product_id.clone(),
                    name:       item.product_name.clone(),
                    total_sold: u64::from(item.quantity),
                    revenue:    item.total_price,
                    image:      item.image.clone(),
                });
            }
        }
    }

    ranking.sort_by(|a, b| {
        b.total_sold
            .cmp(&a.total_sold)
            .then_with(|| b.revenue.cmp(&a.revenue))
    });
    ranking.truncate(limit);
    ranking
}

/// Delivered sales per day over the period's days ending today, or per month over the last twelve months for
/// [`Period::Year`]. Buckets are in chronological order and include empty ones.
pub fn sales_series(orders: &[Order], period: Period, now: DateTime<Utc>) -> Vec<SalesPoint> {
    let today = now.date_naive();

    let buckets: Vec<NaiveDate> = match period {
        Period::Week | Period::Month => (0..period.days())
            .rev()
            .map(|back| today - Duration::days(back))
            .collect(),
        Period::Year => {
            let current = today.year() * 12 + today.month0() as i32;
            (0..12)
                .rev()
                .filter_map(|back| {
                    let month = current - back;
                    NaiveDate::from_ymd_opt(month.div_euclid(12), month.rem_euclid(12) as u32 + 1, 1)
                })
                .collect()
        }
    };

    let bucket_of = |date: NaiveDate| match period {
        Period::Week | Period::Month => Some(date),
        Period::Year => date.with_day(1),
    };

    let mut points: Vec<SalesPoint> = buckets
        .into_iter()
        .map(|date| SalesPoint {
            date,
            amount: Decimal::ZERO,
        })
        .collect();

    for order in delivered(orders) {
        let Some(bucket) = bucket_of(order.created_at.date_naive())
        else {
            continue;
        };
        if let Some(point) = points.iter_mut().find(|p| p.date == bucket) {
            point.amount = point.amount.saturating_add(order.total_amount);
        }
    }

    points
}

/// Read the summary a deployment maintains in the stats collection, if there is one.
#[instrument(level = "debug", skip(remote, config))]
pub async fn fetch_precomputed_summary<S>(remote: &S, config: &StoreConfig) -> Result<Option<SalesSummary>>
where
    S: DocumentStore,
{
    let Some(data) = remote
        .get_one(&config.stats(), SUMMARY_DOCUMENT)
        .await
        .map_err(StoreError::RemoteRead)?
    else {
        return Ok(None);
    };

    let summary = serde_json::from_value(data).map_err(|e| StoreError::MalformedDocument {
        id:      SUMMARY_DOCUMENT.to_string(),
        message: e.to_string(),
    })?;
    Ok(Some(summary))
}

/// Read the precomputed daily sales points in chronological order.
#[instrument(level = "debug", skip(remote, config))]
pub async fn fetch_precomputed_sales<S>(remote: &S, config: &StoreConfig) -> Result<Vec<SalesPoint>>
where
    S: DocumentStore,
{
    let query = config.sales().query().order_by("date", Direction::Ascending);
    let docs = remote.get_all(&query).await.map_err(StoreError::RemoteRead)?;
    docs.iter().map(sales_point).collect()
}

fn sales_point(doc: &Document) -> Result<SalesPoint> {
    serde_json::from_value(doc.data.clone()).map_err(|e| StoreError::MalformedDocument {
        id:      doc.id.clone(),
        message: e.to_string(),
    })
}

struct AggregatorInner {
    orders:    watch::Receiver<Arc<Vec<Order>>>,
    period:    watch::Sender<Period>,
    report:    watch::Sender<Arc<StatsReport>>,
    top_limit: usize,
    task:      Mutex<Option<JoinHandle<()>>>,
}

impl AggregatorInner {
    fn recompute(&self) -> Arc<StatsReport> {
        let orders = Arc::clone(&self.orders.borrow());
        let period = *self.period.borrow();
        let report = Arc::new(StatsReport::compute(
            &orders,
            period,
            timestamp::now(),
            self.top_limit,
        ));
        debug!(%period, orders = orders.len(), total = %report.summary.total_sales, "statistics recomputed");
        self.report.send_replace(Arc::clone(&report));
        report
    }
}

impl Drop for AggregatorInner {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

/// Keeps a [`StatsReport`] current for an order snapshot and a selected period.
#[derive(Clone)]
pub struct StatisticsAggregator {
    inner: Arc<AggregatorInner>,
}

impl StatisticsAggregator {
    /// `orders` is usually [`OrderStore::watch`](crate::orders::OrderStore::watch).
    pub fn new(orders: watch::Receiver<Arc<Vec<Order>>>, config: &StoreConfig, period: Period) -> Self {
        let (period, _) = watch::channel(period);
        let (report, _) = watch::channel(Arc::new(StatsReport::compute(
            &[],
            *period.borrow(),
            timestamp::now(),
            config.top_products_limit,
        )));
        let aggregator = Self {
            inner: Arc::new(AggregatorInner {
                orders,
                period,
                report,
                top_limit: config.top_products_limit,
                task: Mutex::new(None),
            }),
        };
        aggregator.inner.recompute();
        aggregator
    }

    /// Recompute whenever the orders or the period change.
    pub fn start(&self) {
        let mut orders = self.inner.orders.clone();
        let mut period = self.inner.period.subscribe();
        let weak: Weak<AggregatorInner> = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = orders.changed() => if changed.is_err() { break; },
                    changed = period.changed() => if changed.is_err() { break; },
                }
                let Some(inner) = weak.upgrade()
                else {
                    break;
                };
                orders.borrow_and_update();
                period.borrow_and_update();
                inner.recompute();
            }
        });

        if let Some(previous) = self.inner.task.lock().replace(handle) {
            previous.abort();
        }
    }

    pub async fn close(&self) {
        let task = self.inner.task.lock().take();
        if let Some(handle) = task {
            handle.abort();
            let _ = handle.await;
        }
    }

    pub fn period(&self) -> Period {
        *self.inner.period.borrow()
    }

    /// Select another period; the report is recomputed right away.
    pub fn set_period(&self, period: Period) -> Arc<StatsReport> {
        self.inner.period.send_replace(period);
        self.inner.recompute()
    }

    /// Recompute against the current time.
    pub fn refresh(&self) -> Arc<StatsReport> {
        self.inner.recompute()
    }

    pub fn report(&self) -> Arc<StatsReport> {
        Arc::clone(&self.inner.report.borrow())
    }

    pub fn watch(&self) -> watch::Receiver<Arc<StatsReport>> {
        self.inner.report.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use crate::test::fixtures;
    use rust_decimal_macros::dec;
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        timestamp::parse(s).unwrap()
    }

    #[test]
    fn test_growth_rounding() {
        assert_eq!(growth(dec!(60), dec!(10)), 500);
        assert_eq!(growth(dec!(0), dec!(0)), 0);
        assert_eq!(growth(dec!(50), dec!(0)), 100);
        assert_eq!(growth(dec!(5), dec!(10)), -50);
        // Halves round up, also for negative changes.
        assert_eq!(growth(dec!(10.125), dec!(10)), 1);
        assert_eq!(growth(dec!(9.95), dec!(10)), 0);
        assert_eq!(growth(dec!(9.85), dec!(10)), -1);
    }

    #[test]
    fn test_growth_saturates() {
        assert_eq!(growth(Decimal::MAX, dec!(1)), i64::MAX);
        assert_eq!(growth(Decimal::MAX, dec!(0.0001)), i64::MAX);
        assert_eq!(growth(dec!(1000000000000000000), dec!(1)), i64::MAX);
        assert_eq!(growth(dec!(0), Decimal::MAX), -100);
    }

    #[test]
    fn test_window_edges() {
        let now = at("2024-06-15T12:00:00Z");
        let orders = vec![
            fixtures::order_at("edge", OrderStatus::Delivered, 10, now - Duration::days(7)),
            fixtures::order_at("prev", OrderStatus::Delivered, 5, now - Duration::days(7) - Duration::seconds(1)),
            fixtures::order_at("old", OrderStatus::Delivered, 100, now - Duration::days(15)),
            fixtures::order_at("future", OrderStatus::Delivered, 100, now + Duration::seconds(1)),
        ];
        let summary = compute_summary(&orders, Period::Week, now);
        assert_eq!(summary.total_sales, dec!(10));
        assert_eq!(summary.total_orders, 1);
        assert_eq!(summary.sales_growth, 100);
    }

    #[test]
    fn test_top_product_ties() {
        let orders = vec![
            fixtures::order_with_items("o1", &[("prod_a", 2, dec!(1)), ("prod_b", 2, dec!(1))]),
            fixtures::order_with_items("o2", &[("prod_c", 2, dec!(3)), ("prod_d", 5, dec!(1))]),
        ];
        let ranked: Vec<_> = top_products(&orders, 3).into_iter().map(|t| t.product_id).collect();
        assert_eq!(ranked, vec!["prod_d", "prod_c", "prod_a"]);
    }

    #[test]
    fn test_weekly_series() {
        let now = at("2024-06-15T12:00:00Z");
        let orders = vec![
            fixtures::order_at("a", OrderStatus::Delivered, 10, now - Duration::hours(1)),
            fixtures::order_at("b", OrderStatus::Delivered, 20, now - Duration::days(2)),
            fixtures::order_at("c", OrderStatus::Pending, 40, now - Duration::days(2)),
        ];
        let series = sales_series(&orders, Period::Week, now);
        assert_eq!(series.len(), 7);
        assert_eq!(series[6].date, now.date_naive());
        assert_eq!(series[6].amount, dec!(10));
        assert_eq!(series[4].amount, dec!(20));
        assert_eq!(series[0].amount, Decimal::ZERO);
    }

    #[test]
    fn test_yearly_series() {
        let now = at("2024-02-10T00:00:00Z");
        let orders = vec![
            fixtures::order_at("a", OrderStatus::Delivered, 10, at("2024-02-01T08:00:00Z")),
            fixtures::order_at("b", OrderStatus::Delivered, 15, at("2023-03-31T08:00:00Z")),
            fixtures::order_at("c", OrderStatus::Delivered, 99, at("2023-02-28T08:00:00Z")),
        ];
        let series = sales_series(&orders, Period::Year, now);
        assert_eq!(series.len(), 12);
        assert_eq!(series[0].date, NaiveDate::from_ymd_opt(2023, 3, 1).unwrap());
        assert_eq!(series[0].amount, dec!(15));
        assert_eq!(series[11].date, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(series[11].amount, dec!(10));
    }

    #[tokio::test]
    async fn test_aggregator_follows_orders() {
        let (orders_tx, orders_rx) = watch::channel(Arc::new(Vec::new()));
        let config = StoreConfig::builder().build().unwrap();
        let stats = StatisticsAggregator::new(orders_rx, &config, Period::Week);
        stats.start();
        assert_eq!(stats.report().summary.total_orders, 0);

        let mut reports = stats.watch();
        reports.borrow_and_update();
        let now = timestamp::now();
        orders_tx.send_replace(Arc::new(vec![fixtures::order_at(
            "a",
            OrderStatus::Delivered,
            25,
            now - Duration::hours(1),
        )]));
        reports.changed().await.unwrap();
        assert_eq!(reports.borrow().summary.total_sales, dec!(25));

        let report = stats.set_period(Period::Year);
        assert_eq!(report.period, Period::Year);
        assert_eq!(report.sales.len(), 12);
        stats.close().await;
    }

    #[tokio::test]
    async fn test_precomputed_documents() {
        use crate::test::MemoryDocumentStore;
        use serde_json::json;

        let remote = MemoryDocumentStore::new();
        let config = StoreConfig::builder().build().unwrap();
        assert_eq!(fetch_precomputed_summary(&remote, &config).await.unwrap(), None);

        remote
            .set_document(
                &config.stats(),
                SUMMARY_DOCUMENT,
                json!({"totalSales": 1250, "totalOrders": 42, "averageOrderValue": "29.76", "salesGrowth": 12}),
                false,
            )
            .await
            .unwrap();
        for (id, date, amount) in [("d2", "2024-06-02", 150), ("d1", "2024-06-01", 120)] {
            remote
                .set_document(&config.sales(), id, json!({"date": date, "amount": amount}), false)
                .await
                .unwrap();
        }

        let summary = fetch_precomputed_summary(&remote, &config).await.unwrap().unwrap();
        assert_eq!(summary.total_orders, 42);
        assert_eq!(summary.average_order_value, dec!(29.76));

        let sales = fetch_precomputed_sales(&remote, &config).await.unwrap();
        assert_eq!(sales.len(), 2);
        assert_eq!(sales[0].date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
        assert_eq!(sales[1].amount, dec!(150));
    }
}
