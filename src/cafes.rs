use axum::{
    extract::{Extension, Query},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Row};
use tracing::error;

use crate::billing::LedgerService;
use crate::error::{AppError, AppResult};
use crate::extractor::{AuthUser, OptionalAuthUser};

/// Placeholder revenue model used by the dashboard until real sales data is
/// wired in (만원 per store per month).
const MONTHLY_SALES_PER_STORE: i64 = 2800;
const ROI_BASE: f64 = 15.2;
const ROI_GROWTH_WEIGHT: f64 = 0.3;

pub fn routes() -> Router {
    Router::new()
        .route("/api/cafes", get(list_cafes))
        .route("/api/cafes/map-markers", get(map_markers))
        .route("/api/cafes/filtered", get(filtered_data))
        .route("/api/cafes/franchise-analysis", get(franchise_analysis))
        .route("/api/cafes/:id", get(cafe_detail))
        .route("/api/summary", get(dashboard_summary))
}

/// Map filters as the frontend sends them, sentinel values included
/// ("서울시 전체", "type_all", "전체" all mean "no filter").
#[derive(Debug, Default, Deserialize)]
pub struct CafeFilter {
    pub region: Option<String>,
    pub major_category: Option<String>,
    pub mid_category: Option<String>,
    pub franchise: Option<String>,
}

impl CafeFilter {
    pub(crate) fn region_filter(&self) -> Option<&str> {
        self.region
            .as_deref()
            .filter(|region| !region.is_empty() && *region != "서울시 전체")
    }

    pub(crate) fn franchise_filter(&self) -> Option<bool> {
        match self.major_category.as_deref() {
            Some("franchise") => Some(true),
            Some("individual") => Some(false),
            _ => None,
        }
    }

    pub(crate) fn category_filter(&self) -> Option<&str> {
        self.mid_category
            .as_deref()
            .filter(|category| !category.is_empty() && *category != "전체")
    }

    pub(crate) fn name_filter(&self) -> Option<&str> {
        self.franchise.as_deref().filter(|name| !name.is_empty())
    }
}

/// Marker condition from the area's AI trend row: any risk flag wins, a
/// non-trendy area with a weak recommendation is a warning, everything else
/// reads stable.
pub fn derive_status(
    risk: Option<bool>,
    trendy: Option<bool>,
    avg_recommendation: Option<f64>,
) -> &'static str {
    if risk.unwrap_or(false) {
        "risk"
    } else if !trendy.unwrap_or(false) && avg_recommendation.unwrap_or(3.0) < 2.5 {
        "warning"
    } else {
        "stable"
    }
}

#[derive(Debug, FromRow, Serialize)]
pub struct CafeRecord {
    pub id: i32,
    pub name: String,
    pub address: String,
    pub detail_address: String,
    pub district: String,
    pub biz_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub franchise: bool,
    pub franchise_type: Option<String>,
    pub rp_id: i32,
}

#[derive(Debug, FromRow)]
struct MarkerRow {
    id: i32,
    name: String,
    detail_address: String,
    district: String,
    biz_code: String,
    latitude: f64,
    longitude: f64,
    franchise: bool,
    risk: Option<bool>,
    trendy: Option<bool>,
    avg_recommendation: Option<f64>,
    total_population: i32,
    traffic_level: String,
}

const MARKER_QUERY: &str = r#"
SELECT
    c.id,
    c.name,
    c.detail_address,
    c.district,
    c.biz_code,
    c.latitude,
    c.longitude,
    c.franchise,
    t.risk,
    t.trendy,
    t.avg_recommendation,
    rp.total_population,
    rp.traffic_level
FROM cafes c
JOIN resident_populations rp ON rp.id = c.rp_id
LEFT JOIN (
    SELECT rp_id,
           BOOL_OR(is_risk_area) AS risk,
           BOOL_OR(is_trendy) AS trendy,
           AVG(recommendation_level)::float8 AS avg_recommendation
    FROM cafe_trends
    GROUP BY rp_id
) t ON t.rp_id = c.rp_id
WHERE ($1::text IS NULL OR c.district = $1)
  AND ($2::boolean IS NULL OR c.franchise = $2)
  AND ($3::text IS NULL OR c.franchise_type ILIKE '%' || $3 || '%')
  AND ($4::text IS NULL OR c.name ILIKE '%' || $4 || '%')
ORDER BY c.name
"#;

async fn marker_rows(pool: &PgPool, filter: &CafeFilter) -> Result<Vec<MarkerRow>, AppError> {
    sqlx::query_as::<_, MarkerRow>(MARKER_QUERY)
        .bind(filter.region_filter())
        .bind(filter.franchise_filter())
        .bind(filter.category_filter())
        .bind(filter.name_filter())
        .fetch_all(pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error fetching cafe markers");
            AppError::Db(e)
        })
}

#[derive(Debug, FromRow, Serialize)]
pub struct TrendStats {
    pub avg_growth_rate: f64,
    pub risk_areas: i64,
    pub trendy_count: i64,
    pub growth_expectation_count: i64,
    pub investment_opportunities: i64,
    pub total_trends: i64,
}

/// Trend aggregates over the population areas of the cafés matching the
/// filter.
async fn trend_stats(pool: &PgPool, filter: &CafeFilter) -> Result<TrendStats, AppError> {
    sqlx::query_as::<_, TrendStats>(
        r#"
        SELECT
            COALESCE(AVG(predicted_growth_rate), 0)::float8 AS avg_growth_rate,
            COUNT(*) FILTER (WHERE is_risk_area) AS risk_areas,
            COUNT(*) FILTER (WHERE is_trendy) AS trendy_count,
            COUNT(*) FILTER (WHERE is_growth_expectation) AS growth_expectation_count,
            COUNT(*) FILTER (WHERE investment_opportunity) AS investment_opportunities,
            COUNT(*) AS total_trends
        FROM cafe_trends
        WHERE rp_id IN (
            SELECT DISTINCT c.rp_id FROM cafes c
            WHERE ($1::text IS NULL OR c.district = $1)
              AND ($2::boolean IS NULL OR c.franchise = $2)
              AND ($3::text IS NULL OR c.franchise_type ILIKE '%' || $3 || '%')
              AND ($4::text IS NULL OR c.name ILIKE '%' || $4 || '%')
        )
        "#,
    )
    .bind(filter.region_filter())
    .bind(filter.franchise_filter())
    .bind(filter.category_filter())
    .bind(filter.name_filter())
    .fetch_one(pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error aggregating trends");
        AppError::Db(e)
    })
}

pub async fn list_cafes(
    Extension(pool): Extension<PgPool>,
    Query(filter): Query<CafeFilter>,
) -> AppResult<Json<Vec<CafeRecord>>> {
    let cafes = sqlx::query_as::<_, CafeRecord>(
        r#"
        SELECT id, name, address, detail_address, district, biz_code,
               latitude, longitude, franchise, franchise_type, rp_id
        FROM cafes c
        WHERE ($1::text IS NULL OR c.district = $1)
          AND ($2::boolean IS NULL OR c.franchise = $2)
          AND ($3::text IS NULL OR c.franchise_type ILIKE '%' || $3 || '%')
          AND ($4::text IS NULL OR c.name ILIKE '%' || $4 || '%')
        ORDER BY c.name
        "#,
    )
    .bind(filter.region_filter())
    .bind(filter.franchise_filter())
    .bind(filter.category_filter())
    .bind(filter.name_filter())
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error listing cafes");
        AppError::Db(e)
    })?;
    Ok(Json(cafes))
}

#[derive(Debug, Serialize)]
pub struct CafeMarker {
    pub id: i32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: &'static str,
    pub franchise: bool,
    pub district: String,
    pub detail_address: String,
}

#[derive(Debug, Serialize)]
pub struct MarkersResponse {
    pub success: bool,
    pub markers: Vec<CafeMarker>,
    pub total_count: usize,
}

/// Minimal marker payload for the public map. No authentication required.
pub async fn map_markers(
    Extension(pool): Extension<PgPool>,
    Query(filter): Query<CafeFilter>,
) -> AppResult<Json<MarkersResponse>> {
    let rows = marker_rows(&pool, &filter).await?;
    let markers: Vec<CafeMarker> = rows
        .into_iter()
        .map(|row| CafeMarker {
            id: row.id,
            name: row.name,
            latitude: row.latitude,
            longitude: row.longitude,
            status: derive_status(row.risk, row.trendy, row.avg_recommendation),
            franchise: row.franchise,
            district: row.district,
            detail_address: row.detail_address,
        })
        .collect();
    let total_count = markers.len();
    Ok(Json(MarkersResponse {
        success: true,
        markers,
        total_count,
    }))
}

#[derive(Debug, Serialize)]
pub struct MapEntry {
    pub id: i32,
    pub name: String,
    pub detail_address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: &'static str,
    pub business_code: String,
    pub population_data: PopulationData,
}

#[derive(Debug, Serialize)]
pub struct PopulationData {
    pub total_population: i32,
    pub traffic_level: String,
}

#[derive(Debug, Serialize)]
pub struct FilteredStatistics {
    pub total_cafes: usize,
    pub total_businesses: usize,
    pub risk_areas: usize,
    pub avg_growth_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct FilteredResponse {
    pub success: bool,
    pub map_data: Vec<MapEntry>,
    pub statistics: FilteredStatistics,
    pub daily_usage: i32,
    pub is_premium: bool,
}

/// Full map dataset with statistics. Consumes one daily use for free-tier
/// accounts; premium passes through untouched.
pub async fn filtered_data(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Query(filter): Query<CafeFilter>,
) -> AppResult<Json<FilteredResponse>> {
    let ledger = LedgerService::new(pool.clone());
    let decision = ledger.try_consume(user_id, Utc::now()).await?;
    if !decision.allowed {
        return Err(AppError::QuotaExceeded);
    }

    let rows = marker_rows(&pool, &filter).await?;
    let stats = trend_stats(&pool, &filter).await?;

    let mut risk_areas = 0usize;
    let mut total_businesses = 0usize;
    let map_data: Vec<MapEntry> = rows
        .into_iter()
        .map(|row| {
            let status = derive_status(row.risk, row.trendy, row.avg_recommendation);
            if status == "risk" {
                risk_areas += 1;
            }
            if !row.biz_code.is_empty() {
                total_businesses += 1;
            }
            MapEntry {
                id: row.id,
                name: row.name,
                detail_address: row.detail_address,
                latitude: row.latitude,
                longitude: row.longitude,
                status,
                business_code: row.biz_code,
                population_data: PopulationData {
                    total_population: row.total_population,
                    traffic_level: row.traffic_level,
                },
            }
        })
        .collect();

    Ok(Json(FilteredResponse {
        success: true,
        statistics: FilteredStatistics {
            total_cafes: map_data.len(),
            total_businesses,
            risk_areas,
            avg_growth_rate: round1(stats.avg_growth_rate),
        },
        map_data,
        daily_usage: decision.daily_usage,
        is_premium: decision.premium,
    }))
}

#[derive(Debug, FromRow, Serialize)]
pub struct SalesSummary {
    pub total_sales: i64,
    pub total_visitors: i64,
    pub avg_order_value: f64,
}

#[derive(Debug, FromRow, Serialize)]
pub struct ReviewSummary {
    pub avg_score: f64,
    pub review_count: i64,
}

#[derive(Debug, Serialize)]
pub struct CafeDetail {
    pub cafe: CafeRecord,
    pub status: &'static str,
    pub sales: SalesSummary,
    pub reviews: ReviewSummary,
}

/// Single-café drill-down: the record plus its sales and review aggregates
/// and the derived area status.
pub async fn cafe_detail(
    Extension(pool): Extension<PgPool>,
    axum::extract::Path(cafe_id): axum::extract::Path<i32>,
) -> AppResult<Json<CafeDetail>> {
    let cafe = sqlx::query_as::<_, CafeRecord>(
        r#"
        SELECT id, name, address, detail_address, district, biz_code,
               latitude, longitude, franchise, franchise_type, rp_id
        FROM cafes WHERE id = $1
        "#,
    )
    .bind(cafe_id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;

    let trend = sqlx::query(
        r#"
        SELECT BOOL_OR(is_risk_area) AS risk,
               BOOL_OR(is_trendy) AS trendy,
               AVG(recommendation_level)::float8 AS avg_recommendation
        FROM cafe_trends WHERE rp_id = $1
        "#,
    )
    .bind(cafe.rp_id)
    .fetch_one(&pool)
    .await?;
    let status = derive_status(
        trend.get("risk"),
        trend.get("trendy"),
        trend.get("avg_recommendation"),
    );

    let sales = sqlx::query_as::<_, SalesSummary>(
        r#"
        SELECT COALESCE(SUM(sales), 0) AS total_sales,
               COALESCE(SUM(visitor_count), 0) AS total_visitors,
               COALESCE(AVG(aov), 0)::float8 AS avg_order_value
        FROM cafe_sales WHERE cafe_id = $1
        "#,
    )
    .bind(cafe_id)
    .fetch_one(&pool)
    .await?;

    let reviews = sqlx::query_as::<_, ReviewSummary>(
        r#"
        SELECT COALESCE(AVG(review_score), 0)::float8 AS avg_score,
               COALESCE(SUM(review_count), 0) AS review_count
        FROM cafe_reviews WHERE cafe_id = $1
        "#,
    )
    .bind(cafe_id)
    .fetch_one(&pool)
    .await?;

    Ok(Json(CafeDetail {
        cafe,
        status,
        sales,
        reviews,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FranchiseQuery {
    pub franchise_type: String,
}

#[derive(Debug, Serialize)]
pub struct DistrictCount {
    pub district: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct FranchiseAnalysis {
    pub franchise_type: String,
    pub total_count: i64,
    pub avg_growth_rate: f64,
    pub investment_opportunities: i64,
    pub risk_areas: i64,
    pub trendy_count: i64,
    pub location_distribution: Vec<DistrictCount>,
    pub market_share: f64,
    pub estimated_monthly_sales: i64,
    pub roi_prediction: f64,
}

/// Per-franchise breakdown for the summary feed: store footprint, district
/// spread, trend posture and the projected revenue/ROI figures.
pub async fn franchise_analysis(
    Extension(pool): Extension<PgPool>,
    Query(query): Query<FranchiseQuery>,
) -> AppResult<Json<FranchiseAnalysis>> {
    let franchise_type = query.franchise_type.trim();
    if franchise_type.is_empty() {
        return Err(AppError::MissingParameters("franchise_type"));
    }

    let total_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM cafes WHERE franchise_type = $1")
            .bind(franchise_type)
            .fetch_one(&pool)
            .await?;
    if total_count == 0 {
        return Err(AppError::NotFound);
    }
    let all_cafes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cafes")
        .fetch_one(&pool)
        .await?;

    let distribution = sqlx::query(
        r#"
        SELECT district, COUNT(*) AS count
        FROM cafes
        WHERE franchise_type = $1
        GROUP BY district
        ORDER BY count DESC
        LIMIT 5
        "#,
    )
    .bind(franchise_type)
    .fetch_all(&pool)
    .await?
    .into_iter()
    .map(|row| DistrictCount {
        district: row.get("district"),
        count: row.get("count"),
    })
    .collect();

    let stats = trend_stats(
        &pool,
        &CafeFilter {
            mid_category: Some(franchise_type.to_string()),
            ..CafeFilter::default()
        },
    )
    .await?;

    let market_share = if all_cafes > 0 {
        round1(total_count as f64 / all_cafes as f64 * 100.0)
    } else {
        0.0
    };
    Ok(Json(FranchiseAnalysis {
        franchise_type: franchise_type.to_string(),
        total_count,
        avg_growth_rate: round1(stats.avg_growth_rate),
        investment_opportunities: stats.investment_opportunities,
        risk_areas: stats.risk_areas,
        trendy_count: stats.trendy_count,
        location_distribution: distribution,
        market_share,
        estimated_monthly_sales: total_count * MONTHLY_SALES_PER_STORE,
        roi_prediction: round1(ROI_BASE + stats.avg_growth_rate * ROI_GROWTH_WEIGHT),
    }))
}

#[derive(Debug, Serialize)]
pub struct DashboardSummary {
    pub total_cafes: i64,
    pub avg_growth_rate: f64,
    pub risk_areas: i64,
    pub new_businesses: i64,
    pub has_premium_access: bool,
    pub is_authenticated: bool,
}

/// Headline numbers for the summary feed. Investment-opportunity areas stand
/// in for the new-business indicator.
pub async fn dashboard_summary(
    Extension(pool): Extension<PgPool>,
    OptionalAuthUser(user): OptionalAuthUser,
) -> AppResult<Json<DashboardSummary>> {
    let total_cafes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cafes")
        .fetch_one(&pool)
        .await?;
    let stats = trend_stats(&pool, &CafeFilter::default()).await?;

    let (is_authenticated, has_premium_access) = match user {
        Some(user) => {
            let premium = if user.is_staff() {
                true
            } else {
                let ledger = LedgerService::new(pool);
                let profile = ledger.profile_for_user(user.user_id).await?;
                profile.is_premium(Utc::now())
            };
            (true, premium)
        }
        None => (false, false),
    };

    Ok(Json(DashboardSummary {
        total_cafes,
        avg_growth_rate: round1(stats.avg_growth_rate),
        risk_areas: stats.risk_areas,
        new_businesses: stats.investment_opportunities,
        has_premium_access,
        is_authenticated,
    }))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
