//! Request handlers. Every handler takes a fresh world view, so each
//! response is computed against one consistent graph and state snapshot.

use super::events::event_matches;
use super::filters::{Filters, query_flag, query_flag_or};
use super::framing::{self, RAW_STREAM_CONTENT_TYPE, StreamKind};
use super::server::ServerContext;
use super::shapes;
use super::synth::{self, LogLine, TOP_TITLES};
use super::types::{DeletedImage, ImagePruneResponse, VolumeList};
use crate::error::ApiError;
use crate::types::{ProcessList, StackStatus};
use crate::world::ContainerView;
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info};
use warp::http::{StatusCode, header};
use warp::hyper::Body;
use warp::reply::{Reply, Response};
use warp::{Rejection, reject};

type QueryMap = HashMap<String, String>;

fn reject_with(err: ApiError) -> Rejection {
    reject::custom(err)
}

fn json<T: Serialize>(value: &T) -> Response {
    warp::reply::json(value).into_response()
}

fn streaming<S>(content_type: &'static str, body: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut response = Response::new(Body::wrap_stream(body));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static(content_type));
    response
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ---------------------------------------------------------------------------
// system

pub async fn ping(ctx: Arc<ServerContext>, head: bool) -> Result<Response, Rejection> {
    let body = if head { "" } else { "OK" };
    let mut response = warp::reply::with_header(body, "API-Version", ctx.api_version.clone())
        .into_response();
    let headers = response.headers_mut();
    headers.insert("Ostype", header::HeaderValue::from_static("linux"));
    headers.insert("Docker-Experimental", header::HeaderValue::from_static("false"));
    headers.insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-cache, no-store, must-revalidate"));
    Ok(response)
}

pub async fn version(ctx: Arc<ServerContext>) -> Result<Response, Rejection> {
    Ok(json(&shapes::version(&ctx.api_version)))
}

pub async fn info(ctx: Arc<ServerContext>) -> Result<Response, Rejection> {
    let view = ctx.world.view();
    Ok(json(&shapes::info(
        &view,
        now(),
        ctx.events.broker.listener_count(),
    )))
}

// ---------------------------------------------------------------------------
// containers

fn container_matches(view: &ContainerView, filters: &Filters) -> bool {
    filters.matches_labels(&view.labels)
        && filters.any_of("status", |s| s == view.state.as_str())
        && filters.any_of("name", |n| view.name.contains(n.trim_start_matches('/')))
        && filters.any_of("id", |id| view.id.starts_with(id))
        && filters.any_of("ancestor", |image| view.image == image || view.declared_image == image)
}

pub async fn list_containers(ctx: Arc<ServerContext>, query: QueryMap) -> Result<Response, Rejection> {
    let filters = Filters::from_query(&query).map_err(reject_with)?;
    // a status filter implies all
    let all = query_flag(&query, "all") || !filters.get("status").is_empty();
    let summaries: Vec<_> = ctx
        .world
        .view()
        .list_containers(all, filters.project())
        .iter()
        .filter(|view| container_matches(view, &filters))
        .map(shapes::container_summary)
        .collect();
    Ok(json(&summaries))
}

pub async fn inspect_container(ctx: Arc<ServerContext>, id: String) -> Result<Response, Rejection> {
    let view = ctx.world.inspect_container(&id).map_err(reject_with)?;
    Ok(json(&shapes::container_inspect(&view)))
}

pub async fn top(ctx: Arc<ServerContext>, id: String) -> Result<Response, Rejection> {
    let view = ctx.world.inspect_container(&id).map_err(reject_with)?;
    if !view.is_up() {
        return Err(reject_with(ApiError::Conflict {
            reason: format!("Container {} is not running", view.id),
        }));
    }
    Ok(json(&ProcessList {
        titles: TOP_TITLES.iter().map(|t| t.to_string()).collect(),
        processes: synth::top_rows(&view),
    }))
}

pub async fn stats(ctx: Arc<ServerContext>, id: String, query: QueryMap) -> Result<Response, Rejection> {
    let view = ctx.world.inspect_container(&id).map_err(reject_with)?;
    let streaming_requested =
        query_flag_or(&query, "stream", true) && !query_flag(&query, "one-shot");
    if !streaming_requested {
        return Ok(json(&shapes::stats_response(&view, 0, now())));
    }

    let id = view.id.clone();
    let interval = ctx.stats_interval;
    let samples = stream::unfold((ctx, id, 0u64), move |(ctx, id, tick)| async move {
        if tick > 0 {
            tokio::time::sleep(interval).await;
        }
        // the stream ends once the container leaves the world
        let view = ctx.world.inspect_container(&id).ok()?;
        let mut line = serde_json::to_vec(&shapes::stats_response(&view, tick, now())).ok()?;
        line.push(b'\n');
        Some((Ok(Bytes::from(line)), (ctx, id, tick + 1)))
    });
    Ok(streaming("application/json", samples))
}

#[derive(Debug, Clone, Copy)]
struct LogSelection {
    stdout: bool,
    stderr: bool,
    timestamps: bool,
    tty: bool,
}

impl LogSelection {
    fn wants(&self, line: &LogLine) -> bool {
        if line.stderr { self.stderr } else { self.stdout }
    }

    fn render(&self, line: &LogLine) -> Result<Bytes, framing::FrameError> {
        let text = line.render(self.timestamps);
        if self.tty {
            return Ok(Bytes::from(text));
        }
        let stream = if line.stderr {
            StreamKind::Stderr
        } else {
            StreamKind::Stdout
        };
        framing::encode(stream, text.as_bytes())
    }
}

fn parse_tail(query: &QueryMap) -> Option<usize> {
    query
        .get("tail")
        .filter(|t| *t != "all")
        .and_then(|t| t.parse().ok())
}

pub async fn logs(ctx: Arc<ServerContext>, id: String, query: QueryMap) -> Result<Response, Rejection> {
    let view = ctx.world.inspect_container(&id).map_err(reject_with)?;
    let selection = LogSelection {
        stdout: query_flag(&query, "stdout"),
        stderr: query_flag(&query, "stderr"),
        timestamps: query_flag(&query, "timestamps"),
        tty: view.tty,
    };
    if !selection.stdout && !selection.stderr {
        return Err(reject_with(ApiError::bad_request(
            "Bad parameter: you must choose at least one stream",
        )));
    }

    let backlog = synth::log_backlog(&view);
    let lines: Vec<LogLine> = (0..backlog)
        .map(|i| synth::log_line(&view, i))
        .filter(|line| selection.wants(line))
        .collect();
    let skip = parse_tail(&query).map_or(0, |tail| lines.len().saturating_sub(tail));
    let mut head = Vec::new();
    for line in &lines[skip..] {
        let chunk = selection.render(line).map_err(|e| {
            reject_with(ApiError::Internal {
                reason: e.to_string(),
            })
        })?;
        head.extend_from_slice(&chunk);
    }
    let head = stream::once(async move { Ok::<_, Infallible>(Bytes::from(head)) });

    if !query_flag(&query, "follow") || !view.is_up() {
        return Ok(streaming(RAW_STREAM_CONTENT_TYPE, head));
    }

    debug!("Following logs of {}", view.name);
    let interval = ctx.follow_interval;
    let id = view.id.clone();
    let follow = stream::unfold((ctx, id, backlog), move |(ctx, id, mut index)| async move {
        loop {
            tokio::time::sleep(interval).await;
            // following stops when the container stops or disappears
            let view = ctx.world.inspect_container(&id).ok().filter(|v| v.is_up())?;
            let line = synth::log_line(&view, index);
            index += 1;
            if !selection.wants(&line) {
                continue;
            }
            let chunk = selection.render(&line).ok()?;
            return Some((Ok(chunk), (ctx, id, index)));
        }
    });
    Ok(streaming(RAW_STREAM_CONTENT_TYPE, head.chain(follow)))
}

// ---------------------------------------------------------------------------
// images

pub async fn list_images(ctx: Arc<ServerContext>, query: QueryMap) -> Result<Response, Rejection> {
    let filters = Filters::from_query(&query).map_err(reject_with)?;
    let view = ctx.world.view();
    let dangling_only = filters.get("dangling").iter().any(|d| d == "true" || d == "1");
    let summaries: Vec<_> = view
        .list_images()
        .into_iter()
        .filter(|_| !dangling_only)
        .filter(|image| {
            filters.any_of("reference", |r| image.reference == r || image.repository() == r)
        })
        .map(|image| shapes::image_summary(image, view.image_users(&image.id)))
        .collect();
    Ok(json(&summaries))
}

/// `GET /images/{name}/json` and `/history`; names may contain slashes.
pub async fn image_detail(ctx: Arc<ServerContext>, tail: String) -> Result<Response, Rejection> {
    let view = ctx.world.view();
    if let Some(name) = tail.strip_suffix("/json") {
        let image = view.inspect_image(name).map_err(reject_with)?;
        return Ok(json(&shapes::image_inspect(image)));
    }
    if let Some(name) = tail.strip_suffix("/history") {
        let image = view.inspect_image(name).map_err(reject_with)?;
        return Ok(json(&shapes::image_history(image)));
    }
    Err(reject::not_found())
}

/// Reports unreferenced images as deleted. Nothing is removed: the image set
/// is derived from the catalog.
pub async fn prune_images(ctx: Arc<ServerContext>) -> Result<Response, Rejection> {
    let view = ctx.world.view();
    let mut deleted = Vec::new();
    let mut reclaimed = 0;
    for image in view.unused_images() {
        deleted.push(DeletedImage {
            untagged: Some(image.reference.clone()),
            deleted: None,
        });
        deleted.push(DeletedImage {
            untagged: None,
            deleted: Some(image.id.clone()),
        });
        reclaimed += image.size;
    }
    Ok(json(&ImagePruneResponse {
        images_deleted: Some(deleted),
        space_reclaimed: reclaimed,
    }))
}

pub async fn distribution(ctx: Arc<ServerContext>, tail: String) -> Result<Response, Rejection> {
    let name = tail.strip_suffix("/json").ok_or_else(reject::not_found)?;
    let view = ctx.world.view();
    Ok(json(&shapes::distribution(view.inspect_image(name).ok())))
}

// ---------------------------------------------------------------------------
// networks and volumes

pub async fn list_networks(ctx: Arc<ServerContext>, query: QueryMap) -> Result<Response, Rejection> {
    let filters = Filters::from_query(&query).map_err(reject_with)?;
    let view = ctx.world.view();
    let networks: Vec<_> = view
        .list_networks()
        .into_iter()
        .filter(|n| filters.matches_labels(&n.labels))
        .filter(|n| filters.any_of("name", |name| n.name.contains(name)))
        .filter(|n| filters.any_of("id", |id| n.id.starts_with(id)))
        .filter(|n| filters.any_of("driver", |driver| n.driver == driver))
        .map(|n| shapes::network_resource(n, false))
        .collect();
    Ok(json(&networks))
}

pub async fn inspect_network(ctx: Arc<ServerContext>, id: String) -> Result<Response, Rejection> {
    let view = ctx.world.view();
    let network = view.inspect_network(&id).map_err(reject_with)?;
    Ok(json(&shapes::network_resource(network, true)))
}

pub async fn list_volumes(ctx: Arc<ServerContext>, query: QueryMap) -> Result<Response, Rejection> {
    let filters = Filters::from_query(&query).map_err(reject_with)?;
    let view = ctx.world.view();
    let volumes = view
        .list_volumes()
        .into_iter()
        .filter(|v| filters.matches_labels(&v.labels))
        .filter(|v| filters.any_of("name", |name| v.name.contains(name)))
        .filter(|v| filters.any_of("driver", |driver| v.driver == driver))
        .map(shapes::volume_resource)
        .collect();
    Ok(json(&VolumeList {
        volumes,
        warnings: Vec::new(),
    }))
}

pub async fn inspect_volume(ctx: Arc<ServerContext>, name: String) -> Result<Response, Rejection> {
    let view = ctx.world.view();
    let volume = view.inspect_volume(&name).map_err(reject_with)?;
    Ok(json(&shapes::volume_resource(volume)))
}

// ---------------------------------------------------------------------------
// events

fn parse_unix_time(value: Option<&String>) -> Result<Option<f64>, ApiError> {
    let Some(raw) = value.map(|v| v.trim()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    match raw.parse::<f64>() {
        Ok(secs) if secs.is_finite() => Ok(Some(secs)),
        _ => Err(ApiError::bad_request(format!(
            "invalid timestamp: {}",
            raw
        ))),
    }
}

pub async fn events(ctx: Arc<ServerContext>, query: QueryMap) -> Result<Response, Rejection> {
    let filters = Filters::from_query(&query).map_err(reject_with)?;
    let until = parse_unix_time(query.get("until")).map_err(reject_with)?;
    let now_secs = chrono::Utc::now().timestamp_millis() as f64 / 1_000.0;
    if until.is_some_and(|u| u <= now_secs) {
        // nothing is replayed, so a window in the past is empty
        return Ok(streaming("application/json", stream::empty()));
    }
    // a deadline too far out to represent means no deadline at all
    let deadline = until
        .and_then(|u| std::time::Duration::try_from_secs_f64(u - now_secs).ok())
        .and_then(|wait| tokio::time::Instant::now().checked_add(wait));

    let subscription = ctx.events.broker.subscribe();
    let events = stream::unfold(
        (subscription, filters, deadline),
        |(mut subscription, filters, deadline)| async move {
            loop {
                let next = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, subscription.receiver.recv())
                        .await
                        .ok()
                        .flatten(),
                    None => subscription.receiver.recv().await,
                };
                let event = next?;
                if !event_matches(&event, &filters) {
                    continue;
                }
                let mut line = serde_json::to_vec(&event).ok()?;
                line.push(b'\n');
                return Some((Ok(Bytes::from(line)), (subscription, filters, deadline)));
            }
        },
    );
    Ok(streaming("application/json", events))
}

// ---------------------------------------------------------------------------
// control surface

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

fn parse_status(body: &[u8]) -> Result<StackStatus, ApiError> {
    let body: StatusBody = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))?;
    body.status.parse().map_err(ApiError::bad_request)
}

fn ok() -> Response {
    warp::reply::with_status("ok", StatusCode::OK).into_response()
}

pub async fn set_stack_status(
    ctx: Arc<ServerContext>,
    stack: String,
    body: Bytes,
) -> Result<Response, Rejection> {
    let status = parse_status(&body).map_err(reject_with)?;
    ctx.world.state().set(&stack, status);
    info!("🎛️  Stack {} set to {}", stack, status);
    ctx.events.sync(&ctx.world);
    Ok(ok())
}

pub async fn set_service_status(
    ctx: Arc<ServerContext>,
    stack: String,
    service: String,
    body: Bytes,
) -> Result<Response, Rejection> {
    let status = parse_status(&body).map_err(reject_with)?;
    ctx.world.state().set_service(&stack, &service, status);
    info!("🎛️  Service {}/{} set to {}", stack, service, status);
    ctx.events.sync(&ctx.world);
    Ok(ok())
}

pub async fn clear_stack_status(ctx: Arc<ServerContext>, stack: String) -> Result<Response, Rejection> {
    ctx.world.state().remove(&stack);
    info!("🎛️  Stack {} cleared", stack);
    ctx.events.sync(&ctx.world);
    Ok(ok())
}

pub async fn clear_service_status(
    ctx: Arc<ServerContext>,
    stack: String,
    service: String,
) -> Result<Response, Rejection> {
    ctx.world.state().clear_service(&stack, &service);
    info!("🎛️  Service {}/{} override cleared", stack, service);
    ctx.events.sync(&ctx.world);
    Ok(ok())
}

pub async fn reset(ctx: Arc<ServerContext>) -> Result<Response, Rejection> {
    ctx.world.state().reset();
    info!("🔄 Runtime state reset");
    ctx.events.sync(&ctx.world);
    Ok(ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_body() {
        assert_eq!(parse_status(br#"{"status":"exited"}"#), Ok(StackStatus::Exited));
        assert!(matches!(
            parse_status(br#"{"status":"bogus"}"#),
            Err(ApiError::BadRequest { .. })
        ));
        assert!(matches!(parse_status(b"nope"), Err(ApiError::BadRequest { .. })));
        assert!(matches!(parse_status(b"{}"), Err(ApiError::BadRequest { .. })));
    }

    #[test]
    fn test_tail_parsing() {
        let query = HashMap::from([("tail".to_string(), "5".to_string())]);
        assert_eq!(parse_tail(&query), Some(5));
        let query = HashMap::from([("tail".to_string(), "all".to_string())]);
        assert_eq!(parse_tail(&query), None);
        assert_eq!(parse_tail(&HashMap::new()), None);
    }
}
