use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockview_core::analysis::AnalyticalRow;
use stockview_core::config::Settings;
use stockview_core::domain::ticker::TickerMetadata;
use stockview_core::storage::analysis::{self, AnalysisFilter};
use stockview_core::storage::runs::{self, RefreshRunRecord};
use stockview_core::storage::{self, metadata};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool: Option<PgPool> = match settings.pg_connect_options() {
        Ok(opts) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_with(opts)
            .await
        {
            Ok(pool) => match storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "database settings missing; starting API in degraded mode");
            None
        }
    };

    let app = router(AppState { pool });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/tickers", get(list_tickers))
        .route("/analysis", get(get_analysis))
        .route("/analysis/:ticker/latest", get(get_latest_for_ticker))
        .route("/runs/latest", get(get_latest_run))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
}

impl AppState {
    fn pool(&self) -> Result<&PgPool, StatusCode> {
        self.pool.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %format!("{e:#}"), "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn list_tickers(
    State(state): State<AppState>,
) -> Result<Json<Vec<TickerMetadata>>, StatusCode> {
    let pool = state.pool()?;
    let items = metadata::list_metadata(pool).await.map_err(internal)?;
    Ok(Json(items))
}

async fn get_analysis(
    State(state): State<AppState>,
    Query(filter): Query<AnalysisFilter>,
) -> Result<Json<Vec<AnalyticalRow>>, StatusCode> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    let pool = state.pool()?;

    let rows = analysis::query_analysis(pool, &filter)
        .await
        .map_err(internal)?;
    Ok(Json(rows))
}

async fn get_latest_for_ticker(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
) -> Result<Json<AnalyticalRow>, StatusCode> {
    let pool = state.pool()?;

    let row = analysis::latest_for_ticker(pool, &ticker)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(row))
}

async fn get_latest_run(
    State(state): State<AppState>,
) -> Result<Json<RefreshRunRecord>, StatusCode> {
    let pool = state.pool()?;

    let run = runs::latest_run(pool)
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(run))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn degraded() -> AppState {
        AppState { pool: None }
    }

    #[tokio::test]
    async fn data_routes_are_unavailable_without_a_database() {
        let err = list_tickers(State(degraded())).await.unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);

        let err = get_latest_for_ticker(State(degraded()), Path("AAPL".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);

        let err = get_latest_run(State(degraded())).await.unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn inverted_date_range_is_a_bad_request() {
        let filter = AnalysisFilter {
            from: NaiveDate::from_ymd_opt(2025, 2, 1),
            to: NaiveDate::from_ymd_opt(2025, 1, 1),
            ..AnalysisFilter::default()
        };
        let err = get_analysis(State(degraded()), Query(filter))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn healthz_is_ok_in_degraded_mode() {
        assert_eq!(healthz().await, "ok");
        let _ = router(degraded());
    }
}
