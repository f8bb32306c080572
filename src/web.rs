use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, Multipart, Path, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::json;
use tokio::signal;

use crate::{
    assets::{self, AssetStore},
    audit::AuditLog,
    config::Config,
    embedding::{self, snapshot, Decision, EmbeddingStore, MatchError},
    extractor::{ExtractError, FaceExtractor, HttpExtractor},
    gallery::{Gallery, GalleryLookup},
    images,
    records::{RecordDraft, RecordError, RecordQuery, RecordStore},
    rid::Rid,
    storage::{BackendLocal, StorageManager},
};

static ALLOWED_EXTENSIONS: Lazy<Vec<&'static str>> = Lazy::new(|| vec!["png", "jpg", "jpeg"]);

/// Everything a request handler needs. Built once at startup; the embedding
/// store is read-only, so requests scan it concurrently without locks.
pub struct AppState {
    pub config: Config,
    pub store: EmbeddingStore,
    pub extractor: Arc<dyn FaceExtractor>,
    pub gallery: Gallery,
    pub records: RecordStore,
    pub assets: Arc<dyn AssetStore>,
    pub audit: AuditLog,
    pub uploads: BackendLocal,
}

impl AppState {
    /// Wire up the state from config: load the snapshot, build the extractor
    /// client and the stores.
    pub fn build(config: Config) -> anyhow::Result<Arc<Self>> {
        let base = PathBuf::from(config.base_path());

        let model_id = snapshot::model_id_hash(&config.extractor.model);
        let store = EmbeddingStore::load(
            &base.join(&config.matching.snapshot),
            &model_id,
            config.extractor.dimensions,
        )?;

        let extractor = Arc::new(HttpExtractor::new(&config.extractor)?);

        let dataset_root = {
            let path = PathBuf::from(&config.matching.dataset_root);
            if path.is_absolute() {
                path
            } else {
                base.join(path)
            }
        };

        let uploads_dir = base.join("uploads");
        let uploads = BackendLocal::new(
            uploads_dir
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("base path is not valid utf8"))?,
        )?;

        let records_dir = base.join("records");
        let records = RecordStore::new(Box::new(BackendLocal::new(
            records_dir
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("base path is not valid utf8"))?,
        )?));

        let assets = assets::from_config(&config.assets, uploads_dir)?;
        let audit = AuditLog::new(base.join("operations.log"));

        Ok(Arc::new(Self {
            config,
            store,
            extractor,
            gallery: Gallery::new(dataset_root),
            records,
            assets,
            audit,
            uploads,
        }))
    }
}

async fn start_app(state: Arc<AppState>) {
    async fn shutdown_signal() {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    let bind = state.config.server.bind.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await.unwrap();
    log::info!("listening on {bind}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap();
}

pub fn router(state: Arc<AppState>) -> Router {
    let uploads_dir = state.uploads.base_dir.clone();

    Router::new()
        .route("/", get(home))
        .route("/image/recognize", post(recognize))
        .route("/criminals/add", post(add_criminal))
        .route("/criminals", get(list_criminals))
        .route("/criminals/:id", delete(delete_criminal))
        .nest_service("/files", tower_http::services::ServeDir::new(uploads_dir))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

pub fn start_daemon(state: Arc<AppState>) {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async { start_app(state).await });
}

/// Request failure, mapped onto a status code and a json `{"error": ...}`
/// body at the boundary.
#[derive(Debug)]
pub enum ApiError {
    /// Bad upload, bad form, bad id: rejected before any processing
    InvalidInput(String),
    /// The extractor ran fine and found no face
    NoFaceDetected,
    MissingUsername,
    NotFound(String),
    /// Extractor infrastructure failure
    Extraction(String),
    /// Store/extractor version skew; fatal for the request
    DimensionSkew(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::InvalidInput(message) => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": message}).to_string(),
            ),
            ApiError::NoFaceDetected => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": "No face detected in the image."}).to_string(),
            ),
            ApiError::MissingUsername => (
                axum::http::StatusCode::BAD_REQUEST,
                json!({"error": "Missing required header: username"}).to_string(),
            ),
            ApiError::NotFound(message) => (
                axum::http::StatusCode::NOT_FOUND,
                json!({"error": message}).to_string(),
            ),
            ApiError::Extraction(message) => {
                log::error!("extractor failure: {message}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Embedding extraction failed"}).to_string(),
                )
            }
            ApiError::DimensionSkew(message) => {
                log::error!("dimension skew: {message}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal server error"}).to_string(),
                )
            }
            ApiError::Internal(err) => {
                log::error!("{err:?}");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": "Internal server error"}).to_string(),
                )
            }
        }
        .into_response()
    }
}

impl From<ExtractError> for ApiError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::NoFaceDetected => ApiError::NoFaceDetected,
            ExtractError::DimensionMismatch { .. } => ApiError::DimensionSkew(err.to_string()),
            ExtractError::Backend(message) => ApiError::Extraction(message),
        }
    }
}

impl From<MatchError> for ApiError {
    fn from(err: MatchError) -> Self {
        ApiError::DimensionSkew(err.to_string())
    }
}

impl From<RecordError> for ApiError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::NotFound => ApiError::NotFound("Criminal record not found".to_string()),
            RecordError::InvalidId => ApiError::InvalidInput("Invalid ID format".to_string()),
            RecordError::Io(err) => ApiError::Internal(err.into()),
            RecordError::Malformed(err) => ApiError::Internal(err.into()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(err: axum::extract::multipart::MultipartError) -> Self {
        ApiError::InvalidInput(format!("malformed multipart body: {err}"))
    }
}

async fn home() -> impl IntoResponse {
    Json(json!({"message": "facematch API is running"}))
}

async fn not_found() -> impl IntoResponse {
    (
        axum::http::StatusCode::NOT_FOUND,
        json!({"error": "Endpoint not found"}).to_string(),
    )
}

fn allowed_file(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn require_username(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("username")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingUsername)
}

fn client_ip(headers: &HeaderMap, addr: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
        .or_else(|| addr.map(|a| a.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Debug, Serialize)]
struct RecognizeResponse {
    person: String,
    confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_base64: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

async fn recognize(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::InvalidInput("upload carries no filename".to_string()))?;
        let bytes = field.bytes().await?.to_vec();
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::InvalidInput("missing upload field 'image'".to_string()))?;

    // extension allow-list first, before touching the bytes
    if !allowed_file(&filename) {
        return Err(ApiError::InvalidInput(
            "Invalid file format. Only JPG, JPEG, PNG allowed.".to_string(),
        ));
    }

    // the extension lies easily; sniff the content too
    match infer::get(&bytes).map(|t| t.mime_type()) {
        Some("image/png") | Some("image/jpeg") => {}
        _ => {
            return Err(ApiError::InvalidInput(
                "upload is not a PNG or JPEG image".to_string(),
            ))
        }
    }

    let state = state.clone();
    tokio::task::block_in_place(move || {
        // keep the upload on disk for later inspection
        let safe_name = filename.replace(['/', '\\'], "_");
        state
            .uploads
            .write(&format!("{}-{safe_name}", Rid::new()), &bytes)?;

        let vector = state.extractor.extract(&bytes)?;
        let result = embedding::find_best_match(&vector, &state.store)?;
        let decision = embedding::classify(&result, state.config.matching.threshold);

        let response = match decision {
            Decision::Unknown { score } => {
                log::debug!("no identification (best score {score:.4})");
                RecognizeResponse {
                    person: "unknown".to_string(),
                    confidence: score,
                    image_base64: None,
                    warning: None,
                }
            }
            Decision::Identified {
                category,
                file_id,
                score,
            } => {
                log::info!("identified '{category}' with score {score:.4}");
                match state.gallery.resolve(&category, &file_id) {
                    GalleryLookup::Found(image) => RecognizeResponse {
                        person: category,
                        confidence: score,
                        image_base64: Some(Some(STANDARD.encode(image))),
                        warning: None,
                    },
                    GalleryLookup::Missing(path) => RecognizeResponse {
                        person: category,
                        confidence: score,
                        image_base64: Some(None),
                        warning: Some(format!("Matched file not found on disk: {path}")),
                    },
                }
            }
        };

        Ok(Json(response))
    })
}

#[derive(Debug, Serialize)]
struct AddCriminalResponse {
    message: String,
    id: String,
    image_urls: Vec<String>,
}

const REQUIRED_FIELDS: &[&str] = &[
    "family_name",
    "forename",
    "folder_name",
    "gender",
    "date_of_birth",
    "place_of_birth",
    "nationality",
    "distinguishing_marks",
    "charges",
];

async fn add_criminal(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<AddCriminalResponse>, ApiError> {
    let username = require_username(&headers)?;
    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    let mut fields = std::collections::HashMap::new();
    let mut image_payloads: Vec<Vec<u8>> = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "images" {
            image_payloads.push(field.bytes().await?.to_vec());
        } else if !name.is_empty() {
            fields.insert(name, field.text().await?);
        }
    }

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .filter(|name| {
            fields
                .get(**name)
                .map(|value| value.trim().is_empty())
                .unwrap_or(true)
        })
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::InvalidInput(format!(
            "Missing required fields: {}",
            missing.join(", ")
        )));
    }

    let draft = RecordDraft {
        family_name: fields.remove("family_name").unwrap_or_default(),
        forename: fields.remove("forename").unwrap_or_default(),
        folder_name: fields.remove("folder_name").unwrap_or_default(),
        gender: fields.remove("gender").unwrap_or_default(),
        date_of_birth: fields.remove("date_of_birth").unwrap_or_default(),
        place_of_birth: fields.remove("place_of_birth").unwrap_or_default(),
        nationality: fields.remove("nationality").unwrap_or_default(),
        distinguishing_marks: fields.remove("distinguishing_marks").unwrap_or_default(),
        charges: fields.remove("charges").unwrap_or_default(),
    };

    let state = state.clone();
    tokio::task::block_in_place(move || {
        let mut image_urls = Vec::with_capacity(image_payloads.len());
        for payload in image_payloads {
            let compressed = images::compress_portrait(&payload)
                .map_err(|err| ApiError::InvalidInput(format!("Image upload failed: {err}")))?;
            let url = state.assets.upload(&draft.folder_name, &compressed.data)?;
            image_urls.push(url);
        }

        let record = state.records.create(draft, image_urls.clone())?;
        state
            .audit
            .record("Criminal record added", &ip, &username);

        Ok(Json(AddCriminalResponse {
            message: "Criminal record added successfully".to_string(),
            id: record.id.to_string(),
            image_urls,
        }))
    })
}

async fn list_criminals(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<RecordQuery>,
) -> Result<Json<Vec<crate::records::CriminalRecord>>, ApiError> {
    let username = require_username(&headers)?;
    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    let state = state.clone();
    tokio::task::block_in_place(move || {
        let records = state.records.search(&query)?;
        state
            .audit
            .record("Retrieved list of criminals", &ip, &username);
        Ok(Json(records))
    })
}

async fn delete_criminal(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let username = require_username(&headers)?;
    let ip = client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr));

    let state = state.clone();
    tokio::task::block_in_place(move || {
        let rid = RecordStore::parse_id(&id)?;
        state.records.delete(&rid)?;
        state
            .audit
            .record(&format!("Deleted criminal record with ID {id}"), &ip, &username);
        Ok(Json(
            json!({"message": "Criminal record deleted successfully"}),
        ))
    })
}
