use axum::{
    extract::{Extension, Query},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Row};
use tracing::error;

use crate::cafes::CafeFilter;
use crate::error::{AppError, AppResult};

/// Recommendation levels run 1-5; the dashboard scales them onto a 25-125
/// sales index.
const SALES_INDEX_PER_LEVEL: f64 = 25.0;

pub fn routes() -> Router {
    Router::new().route("/api/trends/summary", get(trend_summary))
}

#[derive(Debug, FromRow)]
struct TrendAggregates {
    avg_growth_rate: f64,
    avg_recommendation: f64,
    trendy_count: i64,
    growth_expectation_count: i64,
    investment_opportunity_count: i64,
    risk_area_count: i64,
    total_trends: i64,
}

#[derive(Debug, Serialize)]
pub struct RecommendationBucket {
    pub recommendation_level: i16,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct TrendCategory {
    pub name: &'static str,
    pub growth_rate: i32,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct TrendSummary {
    pub total_trends: i64,
    pub three_year_growth: f64,
    pub new_businesses: i64,
    pub survival_rate: f64,
    pub sales_index: i32,
    pub trendy_count: i64,
    pub growth_expectation_count: i64,
    pub investment_opportunity_count: i64,
    pub risk_area_count: i64,
    pub trend_categories: Vec<TrendCategory>,
    pub recommendation_stats: Vec<RecommendationBucket>,
}

/// AI trend pane aggregates over the population areas matched by the café
/// filter. Survival rate is the non-risk share of analyzed areas.
pub async fn trend_summary(
    Extension(pool): Extension<PgPool>,
    Query(filter): Query<CafeFilter>,
) -> AppResult<Json<TrendSummary>> {
    let aggregates = sqlx::query_as::<_, TrendAggregates>(
        r#"
        SELECT
            COALESCE(AVG(predicted_growth_rate), 0)::float8 AS avg_growth_rate,
            COALESCE(AVG(recommendation_level), 3)::float8 AS avg_recommendation,
            COUNT(*) FILTER (WHERE is_trendy) AS trendy_count,
            COUNT(*) FILTER (WHERE is_growth_expectation) AS growth_expectation_count,
            COUNT(*) FILTER (WHERE investment_opportunity) AS investment_opportunity_count,
            COUNT(*) FILTER (WHERE is_risk_area) AS risk_area_count,
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
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error aggregating trend summary");
        AppError::Db(e)
    })?;

    let recommendation_stats = sqlx::query(
        r#"
        SELECT recommendation_level, COUNT(*) AS count
        FROM cafe_trends
        WHERE rp_id IN (
            SELECT DISTINCT c.rp_id FROM cafes c
            WHERE ($1::text IS NULL OR c.district = $1)
              AND ($2::boolean IS NULL OR c.franchise = $2)
              AND ($3::text IS NULL OR c.franchise_type ILIKE '%' || $3 || '%')
              AND ($4::text IS NULL OR c.name ILIKE '%' || $4 || '%')
        )
        GROUP BY recommendation_level
        ORDER BY recommendation_level DESC
        "#,
    )
    .bind(filter.region_filter())
    .bind(filter.franchise_filter())
    .bind(filter.category_filter())
    .bind(filter.name_filter())
    .fetch_all(&pool)
    .await?
    .into_iter()
    .map(|row| RecommendationBucket {
        recommendation_level: row.get("recommendation_level"),
        count: row.get("count"),
    })
    .collect();

    let mut trend_categories = Vec::new();
    if aggregates.trendy_count > 0 {
        trend_categories.push(TrendCategory {
            name: "트렌디 지역",
            growth_rate: 150,
            count: aggregates.trendy_count,
        });
    }
    if aggregates.growth_expectation_count > 0 {
        trend_categories.push(TrendCategory {
            name: "성장 기대",
            growth_rate: 120,
            count: aggregates.growth_expectation_count,
        });
    }
    if aggregates.investment_opportunity_count > 0 {
        trend_categories.push(TrendCategory {
            name: "투자 기회",
            growth_rate: 95,
            count: aggregates.investment_opportunity_count,
        });
    }

    let analyzed = if aggregates.total_trends > 0 {
        aggregates.total_trends
    } else {
        1
    };
    let survival_rate =
        (aggregates.total_trends - aggregates.risk_area_count) as f64 / analyzed as f64 * 100.0;

    Ok(Json(TrendSummary {
        total_trends: aggregates.total_trends,
        three_year_growth: round1(aggregates.avg_growth_rate),
        new_businesses: aggregates.growth_expectation_count,
        survival_rate: round1(survival_rate),
        sales_index: (aggregates.avg_recommendation * SALES_INDEX_PER_LEVEL) as i32,
        trendy_count: aggregates.trendy_count,
        growth_expectation_count: aggregates.growth_expectation_count,
        investment_opportunity_count: aggregates.investment_opportunity_count,
        risk_area_count: aggregates.risk_area_count,
        trend_categories,
        recommendation_stats,
    }))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
