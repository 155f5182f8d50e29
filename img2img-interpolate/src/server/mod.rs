use {
    std::{collections::HashMap, sync::Arc},
    tracing::{error, info},
    tokio::{net::TcpListener, sync::Mutex},
    axum::{
        Router,
        body::Body,
        extract::{DefaultBodyLimit, Multipart, State},
        http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
        response::{Html, IntoResponse, Response},
        routing::{get, post},
    },
    crate::{
        context::Context,
        error::Error,
        pipeline::generate,
        request::GenerationRequest,
        settings::ServerSettings,
    },
};

const UPLOAD_LIMIT: usize = 64 * 1024 * 1024;
const INDEX: &str = include_str!("index.html");

#[derive(Clone)]
pub struct AppState {
    context: Arc<Mutex<Context>>,
}

impl AppState {
    pub fn new(context: Context) -> Self {
        Self {
            context: Arc::new(Mutex::new(context)),
        }
    }
}

pub async fn run_server(settings: &ServerSettings, context: Context) -> std::io::Result<()> {
    let addr = format!("{}:{}", settings.host, settings.port);
    info!("starting img2img interpolation server on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router(AppState::new(context))).await
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/generate", post(generate_video))
        .route("/health", get(health))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(UPLOAD_LIMIT))
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX)
}

async fn health() -> &'static str {
    "ok"
}

async fn not_found_handler() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

async fn generate_video(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, ApiError> {
    let mut fields = HashMap::new();
    let mut image = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| ApiError::BadRequest(err.to_string()))? {
        let name = field.name().unwrap_or_default().to_owned();
        if name == "image" {
            image = Some(field.bytes().await.map_err(|err| ApiError::BadRequest(err.to_string()))?.to_vec());
        } else {
            fields.insert(name, field.text().await.map_err(|err| ApiError::BadRequest(err.to_string()))?);
        }
    }

    let image = image.ok_or_else(|| ApiError::BadRequest("no image was uploaded".to_owned()))?;
    let request = GenerationRequest::from_form(image, &fields)?;

    let context = state.context.clone();
    let (output, video) = tokio::task::spawn_blocking(move || {
        let context = context.blocking_lock();
        let output = generate(&context, &request)?;
        let video = std::fs::read(&output.video_path)?;
        Ok::<_, Error>((output, video))
    }).await.map_err(|err| {
        error!("generation task failed: {}", err);
        ApiError::Internal
    })??;

    let mut response = Response::new(Body::from(video));
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("video/mp4"));
    response.headers_mut().insert("x-seed", HeaderValue::from(output.seed));
    Ok(response)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal,
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_invalid_request() {
            ApiError::BadRequest(err.to_string())
        } else {
            error!("generation failed: {}", err);
            ApiError::Internal
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "generation failed, see server logs").into_response(),
        }
    }
}
