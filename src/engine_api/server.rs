use super::events::{EventHub, spawn_poller};
use super::handlers;
use super::types::ErrorResponse;
use crate::error::{ApiError, Result, TransportError};
use crate::world::WorldModel;
use regex::Regex;
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::net::UnixListener;
use tokio::sync::watch;
use tokio_stream::wrappers::UnixListenerStream;
use tracing::{error, info, warn};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

impl warp::reject::Reject for ApiError {}

static VERSION_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v\d+\.\d+$").unwrap_or_else(|e| panic!("version pattern: {}", e))
});

/// Largest control-endpoint body accepted.
const CONTROL_BODY_LIMIT: u64 = 64 * 1024;

/// Tunables of a server instance.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub api_version: String,
    pub follow_interval: Duration,
    pub stats_interval: Duration,
    pub poll_interval: Duration,
    pub subscriber_buffer: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            api_version: "1.43".to_string(),
            follow_interval: Duration::from_millis(1000),
            stats_interval: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(1000),
            subscriber_buffer: 256,
        }
    }
}

/// Everything a handler needs; owned by one server instance.
pub struct ServerContext {
    pub world: Arc<WorldModel>,
    pub events: Arc<EventHub>,
    pub api_version: String,
    pub follow_interval: Duration,
    pub stats_interval: Duration,
}

/// The synthetic engine, served over a Unix socket.
pub struct EngineServer {
    ctx: Arc<ServerContext>,
    poll_interval: Duration,
}

impl EngineServer {
    pub fn new(world: Arc<WorldModel>, settings: ServerSettings) -> Self {
        let events = Arc::new(EventHub::new(&world, settings.subscriber_buffer));
        Self {
            ctx: Arc::new(ServerContext {
                world,
                events,
                api_version: settings.api_version,
                follow_interval: settings.follow_interval,
                stats_interval: settings.stats_interval,
            }),
            poll_interval: settings.poll_interval,
        }
    }

    pub fn context(&self) -> Arc<ServerContext> {
        self.ctx.clone()
    }

    /// Serves until `shutdown` resolves. A stale socket file is replaced; the
    /// socket is removed again on the way out.
    pub async fn serve<F>(&self, socket_path: &Path, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = bind_socket(socket_path)?;
        info!("🐳 Engine API listening on unix://{}", socket_path.display());

        let (stop_poller, poller_signal) = watch::channel(false);
        let poller = spawn_poller(
            self.ctx.world.clone(),
            self.ctx.events.clone(),
            self.poll_interval,
            poller_signal,
        );

        warp::serve(routes(self.ctx.clone()))
            .serve_incoming_with_graceful_shutdown(UnixListenerStream::new(listener), shutdown)
            .await;

        let _ = stop_poller.send(true);
        if let Err(e) = poller.await {
            warn!("Event poller ended abnormally: {}", e);
        }
        remove_socket(socket_path);
        info!("🛑 Engine API stopped");
        Ok(())
    }
}

fn bind_socket(path: &Path) -> Result<UnixListener> {
    let bind_error = |reason: String| TransportError::Bind {
        path: path.display().to_string(),
        reason,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| bind_error(e.to_string()))?;
    }
    if path.exists() {
        warn!("Removing stale socket {}", path.display());
        std::fs::remove_file(path).map_err(|e| bind_error(e.to_string()))?;
    }
    Ok(UnixListener::bind(path).map_err(|e| bind_error(e.to_string()))?)
}

fn remove_socket(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove socket {}: {}", path.display(), e);
        }
    }
}

/// Default socket location under a data directory.
pub fn default_socket_path(data_dir: &Path) -> PathBuf {
    data_dir.join("docker.sock")
}

fn with_ctx(
    ctx: Arc<ServerContext>,
) -> impl Filter<Extract = (Arc<ServerContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn query() -> impl Filter<Extract = (HashMap<String, String>,), Error = Infallible> + Clone {
    warp::query::<HashMap<String, String>>()
        .or(warp::any().map(HashMap::new))
        .unify()
}

fn tail_string() -> impl Filter<Extract = (String,), Error = Infallible> + Clone {
    warp::path::tail().map(|tail: warp::path::Tail| tail.as_str().to_string())
}

fn control_body() -> impl Filter<Extract = (bytes::Bytes,), Error = Rejection> + Clone {
    warp::body::content_length_limit(CONTROL_BODY_LIMIT).and(warp::body::bytes())
}

/// Engine endpoints without the version prefix.
fn api(ctx: Arc<ServerContext>) -> BoxedFilter<(Response,)> {
    let c = || with_ctx(ctx.clone());

    let routes: Vec<BoxedFilter<(Response,)>> = vec![
        // system
        warp::path!("_ping")
            .and(warp::get())
            .and(c())
            .and_then(|ctx| handlers::ping(ctx, false))
            .boxed(),
        warp::path!("_ping")
            .and(warp::head())
            .and(c())
            .and_then(|ctx| handlers::ping(ctx, true))
            .boxed(),
        warp::path!("version")
            .and(warp::get())
            .and(c())
            .and_then(handlers::version)
            .boxed(),
        warp::path!("info")
            .and(warp::get())
            .and(c())
            .and_then(handlers::info)
            .boxed(),
        // containers
        warp::path!("containers" / "json")
            .and(warp::get())
            .and(c())
            .and(query())
            .and_then(handlers::list_containers)
            .boxed(),
        warp::path!("containers" / String / "json")
            .and(warp::get())
            .and(c())
            .and_then(|id, ctx| handlers::inspect_container(ctx, id))
            .boxed(),
        warp::path!("containers" / String / "stats")
            .and(warp::get())
            .and(c())
            .and(query())
            .and_then(|id, ctx, q| handlers::stats(ctx, id, q))
            .boxed(),
        warp::path!("containers" / String / "top")
            .and(warp::get())
            .and(c())
            .and_then(|id, ctx| handlers::top(ctx, id))
            .boxed(),
        warp::path!("containers" / String / "logs")
            .and(warp::get())
            .and(c())
            .and(query())
            .and_then(|id, ctx, q| handlers::logs(ctx, id, q))
            .boxed(),
        // images
        warp::path!("images" / "json")
            .and(warp::get())
            .and(c())
            .and(query())
            .and_then(handlers::list_images)
            .boxed(),
        warp::path!("images" / "prune")
            .and(warp::post())
            .and(c())
            .and_then(handlers::prune_images)
            .boxed(),
        warp::path("images")
            .and(warp::get())
            .and(tail_string())
            .and(c())
            .and_then(|tail, ctx| handlers::image_detail(ctx, tail))
            .boxed(),
        warp::path("distribution")
            .and(warp::get())
            .and(tail_string())
            .and(c())
            .and_then(|tail, ctx| handlers::distribution(ctx, tail))
            .boxed(),
        // networks and volumes
        warp::path!("networks")
            .and(warp::get())
            .and(c())
            .and(query())
            .and_then(handlers::list_networks)
            .boxed(),
        warp::path!("networks" / String)
            .and(warp::get())
            .and(c())
            .and_then(|id, ctx| handlers::inspect_network(ctx, id))
            .boxed(),
        warp::path!("volumes")
            .and(warp::get())
            .and(c())
            .and(query())
            .and_then(handlers::list_volumes)
            .boxed(),
        warp::path!("volumes" / String)
            .and(warp::get())
            .and(c())
            .and_then(|name, ctx| handlers::inspect_volume(ctx, name))
            .boxed(),
        warp::path!("events")
            .and(warp::get())
            .and(c())
            .and(query())
            .and_then(handlers::events)
            .boxed(),
        // control surface
        warp::path!("_mock" / "state" / String)
            .and(warp::post())
            .and(c())
            .and(control_body())
            .and_then(|stack, ctx, body| handlers::set_stack_status(ctx, stack, body))
            .boxed(),
        warp::path!("_mock" / "state" / String / String)
            .and(warp::post())
            .and(c())
            .and(control_body())
            .and_then(|stack, service, ctx, body| {
                handlers::set_service_status(ctx, stack, service, body)
            })
            .boxed(),
        warp::path!("_mock" / "state" / String)
            .and(warp::delete())
            .and(c())
            .and_then(|stack, ctx| handlers::clear_stack_status(ctx, stack))
            .boxed(),
        warp::path!("_mock" / "state" / String / String)
            .and(warp::delete())
            .and(c())
            .and_then(|stack, service, ctx| handlers::clear_service_status(ctx, stack, service))
            .boxed(),
        warp::path!("_mock" / "reset")
            .and(warp::post())
            .and(c())
            .and_then(handlers::reset)
            .boxed(),
    ];

    routes
        .into_iter()
        .reduce(|all, route| all.or(route).unify().boxed())
        .unwrap_or_else(|| {
            warp::any()
                .and_then(|| async { Err::<Response, Rejection>(warp::reject::not_found()) })
                .boxed()
        })
}

/// Accepts `/vX.YY/...` as well as unprefixed paths.
pub fn routes(
    ctx: Arc<ServerContext>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + Send + Sync + 'static {
    let api = api(ctx);
    let version_prefix = warp::path::param::<String>()
        .and_then(|segment: String| async move {
            if VERSION_SEGMENT.is_match(&segment) {
                Ok(())
            } else {
                Err(warp::reject::not_found())
            }
        })
        .untuple_one();

    version_prefix
        .and(api.clone())
        .or(api)
        .unify()
        .recover(handle_rejection)
        .unify()
        .with(warp::log("stackmock::engine_api"))
}

fn envelope(status: StatusCode, message: String) -> Response {
    warp::reply::with_status(warp::reply::json(&ErrorResponse { message }), status).into_response()
}

/// Maps every rejection onto the engine's `{"message": ...}` envelope.
pub async fn handle_rejection(err: Rejection) -> std::result::Result<Response, Infallible> {
    if let Some(api) = err.find::<ApiError>() {
        let status = match api {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal { reason } => {
                error!("Request failed: {}", reason);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        return Ok(envelope(status, api.engine_message()));
    }
    if err.is_not_found() || err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(envelope(StatusCode::NOT_FOUND, "page not found".to_string()));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(envelope(
            StatusCode::PAYLOAD_TOO_LARGE,
            "request body too large".to_string(),
        ));
    }
    if err.find::<warp::reject::LengthRequired>().is_some()
        || err.find::<warp::reject::InvalidQuery>().is_some()
    {
        return Ok(envelope(StatusCode::BAD_REQUEST, "bad request".to_string()));
    }
    error!("Unhandled rejection: {:?}", err);
    Ok(envelope(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal server error".to_string(),
    ))
}
