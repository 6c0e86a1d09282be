use crate::config::AppConfig;
use crate::data::Dataset;
use crate::export::boundaries_geojson;
use crate::features::{current_year, training_rows, validate_prediction_input, FeatureSchema, InputError, PredictionInput};
use crate::names::{build_neighbourhood_maps, display_name};
use crate::pipeline::{run_pipeline, PipelineError, PipelineOutput};
use crate::render::{Basemap, RenderOptions};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use geo::{Contains, Coord, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinError;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

/// Read-only state shared by every request. Each request recomputes its own
/// boundaries from the snapshot.
pub struct AppState {
    pub dataset: Dataset,
    pub basemap: Basemap,
    pub options: RenderOptions,
    pub default_max_z_score: f64,
    pub schema: FeatureSchema,
    pub neighbourhoods: BTreeMap<String, u32>,
}

#[derive(Deserialize)]
pub struct ThresholdParams {
    max_z_score: Option<f64>,
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
    max_z_score: Option<f64>,
}

#[derive(Serialize)]
pub struct QueryResponse {
    code: u32,
    name: String,
}

#[derive(Debug, Serialize)]
pub struct FeatureResponse {
    columns: Vec<String>,
    features: Vec<f64>,
}

pub enum ApiError {
    Pipeline(PipelineError),
    Input(InputError),
    Task(JoinError),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Pipeline(e)
    }
}

impl From<InputError> for ApiError {
    fn from(e: InputError) -> Self {
        ApiError::Input(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Pipeline(e) if e.is_invalid_input() => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Pipeline(e) => {
                error!("Pipeline failure: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            ApiError::Input(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            ApiError::Task(e) => {
                error!("Pipeline task failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Pipeline task failed".to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl AppState {
    /// Fits the feature schema and name lookup once from the loaded records.
    pub fn new(dataset: Dataset, basemap: Basemap, options: RenderOptions, default_max_z_score: f64) -> Self {
        let schema = FeatureSchema::fit(&training_rows(&dataset.records));
        let (neighbourhoods, _) = build_neighbourhood_maps(dataset.records.iter().map(|r| r.neighbourhood_code));
        info!(
            "Feature schema has {} columns, {} neighbourhoods named",
            schema.columns().len(),
            neighbourhoods.len()
        );
        Self {
            dataset,
            basemap,
            options,
            default_max_z_score,
            schema,
            neighbourhoods,
        }
    }

    fn run(&self, max_z_score: Option<f64>) -> Result<PipelineOutput, PipelineError> {
        run_pipeline(
            &self.dataset,
            max_z_score.unwrap_or(self.default_max_z_score),
            &self.basemap,
            &self.options,
        )
    }

    fn feature_vector(&self, input: &PredictionInput, current_year: i32) -> Result<FeatureResponse, InputError> {
        let valid = validate_prediction_input(input, current_year)?;
        Ok(FeatureResponse {
            columns: self.schema.columns().to_vec(),
            features: self.schema.encode(&valid),
        })
    }
}

/// Runs CPU-bound pipeline work on the blocking pool.
async fn run_blocking<T, F>(state: Arc<AppState>, job: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> Result<T, PipelineError> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(move || job(state.as_ref()))
        .await
        .map_err(ApiError::Task)?;
    Ok(result?)
}

pub fn router(state: Arc<AppState>, static_dir: &std::path::Path) -> Router {
    Router::new()
        .route("/api/summary", get(summary_handler))
        .route("/api/scene", get(scene_handler))
        .route("/api/boundaries", get(boundaries_handler))
        .route("/api/render.png", get(png_handler))
        .route("/api/query", get(query_handler))
        .route("/api/neighbourhoods", get(neighbourhoods_handler))
        .route("/api/features", get(features_handler))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, dataset: Dataset, basemap: Basemap) -> Result<()> {
    let options = RenderOptions::from_config(&config)?;
    let state = Arc::new(AppState::new(dataset, basemap, options, config.filter.max_z_score));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);

    let app = router(state, &config.server.static_dir);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn summary_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ThresholdParams>,
) -> Result<Response, ApiError> {
    let max_z_score = params.max_z_score;
    let summaries = run_blocking(state, move |s| Ok(s.run(max_z_score)?.summaries)).await?;
    Ok(Json(summaries).into_response())
}

async fn scene_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ThresholdParams>,
) -> Result<Response, ApiError> {
    let max_z_score = params.max_z_score;
    let scene = run_blocking(state, move |s| Ok(s.run(max_z_score)?.scene)).await?;
    Ok(Json(scene).into_response())
}

async fn boundaries_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ThresholdParams>,
) -> Result<Response, ApiError> {
    let max_z_score = params.max_z_score;
    let collection = run_blocking(state, move |s| {
        let output = s.run(max_z_score)?;
        Ok(boundaries_geojson(&output.scene, &output.summaries))
    })
    .await?;
    Ok((
        [(header::CONTENT_TYPE, "application/geo+json")],
        Json(collection),
    )
        .into_response())
}

async fn png_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ThresholdParams>,
) -> Result<Response, ApiError> {
    let max_z_score = params.max_z_score;
    let png = run_blocking(state, move |s| s.run(max_z_score)?.render_png()).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<Json<Option<QueryResponse>>, ApiError> {
    let QueryParams { lat, lon, max_z_score } = params;
    let hit = run_blocking(state, move |s| Ok(locate(&s.run(max_z_score)?, lon, lat))).await?;
    Ok(Json(hit))
}

async fn neighbourhoods_handler(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, u32>> {
    Json(state.neighbourhoods.clone())
}

/// Model input vector for one form submission.
async fn features_handler(
    State(state): State<Arc<AppState>>,
    Query(input): Query<PredictionInput>,
) -> Result<Json<FeatureResponse>, ApiError> {
    Ok(Json(state.feature_vector(&input, current_year())?))
}

/// First neighbourhood (by code) whose boundary contains the point.
fn locate(output: &PipelineOutput, lon: f64, lat: f64) -> Option<QueryResponse> {
    let point = Point::new(lon, lat);
    output
        .hulls
        .iter()
        .find(|hull| {
            let ring: Vec<Coord<f64>> = hull.vertices.iter().map(|v| Coord { x: v.lon, y: v.lat }).collect();
            Polygon::new(LineString::from(ring), vec![]).contains(&point)
        })
        .map(|hull| QueryResponse {
            code: hull.code,
            name: display_name(hull.code),
        })
}
