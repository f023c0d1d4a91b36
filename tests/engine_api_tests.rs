use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use stackmock::WorldBuilder;
use stackmock::engine_api::framing::{self, StreamKind};
use stackmock::engine_api::events::spawn_poller;
use stackmock::engine_api::{EngineServer, ServerSettings, routes};
use stackmock::types::StackStatus;
use stackmock::world::WorldModel;
use std::sync::Arc;
use std::time::Duration;
use warp::Filter;
use warp::http::StatusCode;
use warp::hyper::Body;
use warp::hyper::body::HttpBody;
use warp::reply::Reply;

const TEST_APP: &str = r#"
services:
  web:
    image: nginx:latest
    ports: ["8080:80"]
    networks: [frontend]
  db:
    image: postgres:16
    volumes:
      - pgdata:/var/lib/postgresql/data
    networks: [backend]
volumes:
  pgdata:
"#;

const OTHER: &str = r#"
services:
  cache:
    image: redis:7
"#;

fn settings() -> ServerSettings {
    ServerSettings {
        follow_interval: Duration::from_millis(20),
        stats_interval: Duration::from_millis(20),
        poll_interval: Duration::from_millis(50),
        ..ServerSettings::default()
    }
}

fn world() -> WorldModel {
    WorldBuilder::new()
        .stack("test-app", TEST_APP)
        .stack("other", OTHER)
        .build()
        .unwrap()
}

fn server() -> EngineServer {
    EngineServer::new(Arc::new(world()), settings())
}

/// Percent-encodes a query value.
fn encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            other => format!("%{:02X}", other),
        })
        .collect()
}

async fn request<F>(api: &F, method: &str, path: &str, body: &str) -> (StatusCode, Vec<u8>)
where
    F: Filter + 'static,
    F::Extract: Reply + Send,
{
    let response = warp::test::request()
        .method(method)
        .path(path)
        .body(body.to_string())
        .reply(api)
        .await;
    (response.status(), response.body().to_vec())
}

async fn get<F>(api: &F, path: &str) -> (StatusCode, Value)
where
    F: Filter + 'static,
    F::Extract: Reply + Send,
{
    let (status, body) = request(api, "GET", path, "").await;
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

/// Runs a GET through the routes without draining the body, for endless
/// streams.
macro_rules! open_stream {
    ($api:expr, $path:expr) => {
        warp::test::request()
            .path($path)
            .filter(&$api)
            .await
            .unwrap()
            .into_response()
    };
}

/// Reads from a streaming body until `done` holds for everything received.
async fn read_until(body: &mut Body, done: impl Fn(&[u8]) -> bool) -> Vec<u8> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&received) {
            match body.data().await {
                Some(Ok(chunk)) => received.extend_from_slice(&chunk),
                _ => break,
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("stream stalled after {} bytes", received.len()));
    received
}

fn json_lines(body: &[u8]) -> Vec<Value> {
    body.split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect()
}

fn names(containers: &Value) -> Vec<String> {
    containers
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["Names"][0].as_str().unwrap().trim_start_matches('/').to_string())
        .collect()
}

#[tokio::test]
async fn test_app_end_to_end() {
    let server = server();
    let api = routes(server.context());

    let project = encode(r#"{"label":["com.docker.compose.project=test-app"]}"#);
    let (status, containers) =
        get(&api, &format!("/v1.43/containers/json?filters={}", project)).await;
    assert_eq!(status, StatusCode::OK);
    let mut listed = names(&containers);
    listed.sort();
    assert_eq!(listed, vec!["mock-test-app-db-1", "mock-test-app-web-1"]);
    for container in containers.as_array().unwrap() {
        assert_eq!(container["Labels"]["com.docker.compose.project"], "test-app");
        assert_eq!(container["State"], "running");
    }

    let (status, db) = get(&api, "/v1.43/containers/mock-test-app-db-1/json").await;
    assert_eq!(status, StatusCode::OK);
    let mount = &db["Mounts"][0];
    assert_eq!(mount["Type"], "volume");
    assert_eq!(mount["Name"], "test-app_pgdata");
    assert_eq!(mount["Destination"], "/var/lib/postgresql/data");
    assert_eq!(mount["Mode"], "rw");
    assert_eq!(mount["RW"], true);
}

#[tokio::test]
async fn test_label_filter_accepts_both_shapes() {
    let server = server();
    let api = routes(server.context());

    let array = encode(r#"{"label":["com.docker.compose.project=other"]}"#);
    let map = encode(r#"{"label":{"com.docker.compose.project=other":true}}"#);
    let (_, by_array) = get(&api, &format!("/containers/json?filters={}", array)).await;
    let (_, by_map) = get(&api, &format!("/containers/json?filters={}", map)).await;
    assert_eq!(names(&by_array), vec!["mock-other-cache-1"]);
    assert_eq!(by_array, by_map);

    let (status, _) = get(&api, "/containers/json?filters=not-json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_listing_is_deterministic() {
    let server = server();
    let api = routes(server.context());
    let (_, first) = request(&api, "GET", "/containers/json?all=1", "").await;
    let (_, second) = request(&api, "GET", "/containers/json?all=1", "").await;
    assert_eq!(first, second);

    let listed: Vec<Value> = serde_json::from_slice(&first).unwrap();
    let ids: Vec<&str> = listed.iter().map(|c| c["Id"].as_str().unwrap()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[tokio::test]
async fn test_version_prefix_and_error_envelopes() {
    let server = server();
    let api = routes(server.context());

    let (status, body) = request(&api, "GET", "/v1.41/_ping", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
    let response = warp::test::request()
        .method("HEAD")
        .path("/_ping")
        .reply(&api)
        .await;
    assert_eq!(response.headers()["API-Version"], "1.43");

    let (status, body) = get(&api, "/v1.43/containers/ghost/json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"message": "No such container: ghost"}));

    let (status, body) = get(&api, "/networks/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"message": "network ghost not found"}));

    let (status, body) = get(&api, "/volumes/ghost").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"message": "get ghost: no such volume"}));

    let (status, body) = get(&api, "/plugins").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"message": "page not found"}));

    // only MAJOR.MINOR segments count as a version prefix
    let (status, _) = get(&api, "/latest/containers/json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_control_endpoints_publish_events() {
    let server = server();
    let ctx = server.context();
    let api = routes(ctx.clone());
    let mut subscription = ctx.events.broker.subscribe();

    let (status, body) =
        request(&api, "POST", "/_mock/state/test-app", r#"{"status":"exited"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");

    let mut actions = Vec::new();
    while let Ok(event) = subscription.receiver.try_recv() {
        assert_eq!(event.project(), Some("test-app"));
        actions.push(event.action);
    }
    assert_eq!(actions, vec!["die", "die"]);

    let (_, running) = get(&api, "/containers/json").await;
    assert_eq!(names(&running), vec!["mock-other-cache-1"]);

    let (status, body) = get(&api, "/containers/json?filters=%7B%22status%22%3A%5B%22exited%22%5D%7D").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);

    let (status, _) = request(&api, "POST", "/_mock/reset", "").await;
    assert_eq!(status, StatusCode::OK);
    let mut actions = Vec::new();
    while let Ok(event) = subscription.receiver.try_recv() {
        actions.push(event.action);
    }
    assert_eq!(actions, vec!["start", "start"]);
    let (_, running) = get(&api, "/containers/json").await;
    assert_eq!(names(&running).len(), 3);
}

#[tokio::test]
async fn test_control_rejects_bad_bodies() {
    let server = server();
    let api = routes(server.context());

    let (status, body) = request(&api, "POST", "/_mock/state/test-app", "not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(body["message"].as_str().unwrap().contains("invalid request body"));

    let (status, _) =
        request(&api, "POST", "/_mock/state/test-app/web", r#"{"status":"sleeping"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // nothing changed
    let (_, running) = get(&api, "/containers/json").await;
    assert_eq!(names(&running).len(), 3);
}

#[tokio::test]
async fn test_service_override_and_inactive_precedence() {
    let server = server();
    let api = routes(server.context());

    request(&api, "POST", "/_mock/state/test-app/web", r#"{"status":"exited"}"#).await;
    let (_, web) = get(&api, "/containers/mock-test-app-web-1/json").await;
    assert_eq!(web["State"]["Status"], "exited");
    let (_, db) = get(&api, "/containers/mock-test-app-db-1/json").await;
    assert_eq!(db["State"]["Status"], "running");

    request(&api, "DELETE", "/_mock/state/test-app/web", "").await;
    let (_, web) = get(&api, "/containers/mock-test-app-web-1/json").await;
    assert_eq!(web["State"]["Status"], "running");

    // an inactive stack wins over a per-service running override
    request(&api, "POST", "/_mock/state/test-app", r#"{"status":"inactive"}"#).await;
    request(&api, "POST", "/_mock/state/test-app/web", r#"{"status":"running"}"#).await;
    let (_, web) = get(&api, "/containers/mock-test-app-web-1/json").await;
    assert_eq!(web["State"]["Status"], "exited");
    assert_eq!(web["State"]["Running"], false);

    request(&api, "DELETE", "/_mock/state/test-app", "").await;
    let (_, running) = get(&api, "/containers/json").await;
    assert_eq!(names(&running), vec!["mock-other-cache-1"]);
}

#[tokio::test]
async fn test_reset_is_idempotent() {
    let server = server();
    let api = routes(server.context());
    let (_, before) = request(&api, "GET", "/containers/json?all=1", "").await;

    request(&api, "POST", "/_mock/state/other", r#"{"status":"paused"}"#).await;
    request(&api, "POST", "/_mock/state/test-app/db", r#"{"status":"exited"}"#).await;
    request(&api, "POST", "/_mock/reset", "").await;
    let (_, once) = request(&api, "GET", "/containers/json?all=1", "").await;
    request(&api, "POST", "/_mock/reset", "").await;
    let (_, twice) = request(&api, "GET", "/containers/json?all=1", "").await;

    assert_eq!(before, once);
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_namespaced_networks() {
    let world = WorldBuilder::new()
        .stack(
            "my-stack",
            "services:\n  app:\n    image: node:20\n    networks: [frontend]\n",
        )
        .stack("plain", "services:\n  app:\n    image: node:20\n")
        .build()
        .unwrap();
    let server = EngineServer::new(Arc::new(world), settings());
    let api = routes(server.context());

    let (_, networks) = get(&api, "/networks").await;
    let names: Vec<&str> = networks
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["Name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"my-stack_frontend"));
    assert!(!names.contains(&"my-stack_default"));
    assert!(names.contains(&"plain_default"));
    // listings never carry endpoint maps
    assert!(networks
        .as_array()
        .unwrap()
        .iter()
        .all(|n| n["Containers"].as_object().unwrap().is_empty()));
}

#[tokio::test]
async fn test_addresses_agree_across_endpoints() {
    let server = server();
    let api = routes(server.context());
    let (_, containers) = get(&api, "/containers/json?all=1").await;

    for summary in containers.as_array().unwrap() {
        let id = summary["Id"].as_str().unwrap();
        let (_, inspect) = get(&api, &format!("/containers/{}/json", id)).await;
        let networks = inspect["NetworkSettings"]["Networks"].as_object().unwrap();
        assert!(!networks.is_empty());
        for (name, endpoint) in networks {
            let (status, network) = get(&api, &format!("/networks/{}", name)).await;
            assert_eq!(status, StatusCode::OK);
            let member = &network["Containers"][id];
            let ip = member["IPv4Address"].as_str().unwrap();
            assert_eq!(ip.split('/').next().unwrap(), endpoint["IPAddress"]);
            assert_eq!(member["MacAddress"], endpoint["MacAddress"]);
        }
    }
}

#[tokio::test]
async fn test_logs_are_framed() {
    let server = server();
    let api = routes(server.context());

    let response = warp::test::request()
        .path("/containers/mock-test-app-db-1/logs?stdout=1&stderr=1&tail=5")
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        framing::RAW_STREAM_CONTENT_TYPE
    );
    let frames = framing::decode_all(response.body()).unwrap();
    assert_eq!(frames.len(), 5);
    // postgres writes its log to stderr
    assert!(frames.iter().all(|f| f.stream == StreamKind::Stderr));
    assert!(frames.iter().all(|f| f.payload.ends_with(b"\n")));

    let (status, body) = get(&api, "/containers/mock-test-app-db-1/logs").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "Bad parameter: you must choose at least one stream"
    );
}

#[tokio::test]
async fn test_stats_and_top() {
    let server = server();
    let api = routes(server.context());

    let (status, stats) = get(&api, "/containers/mock-test-app-web-1/stats?stream=false").await;
    assert_eq!(status, StatusCode::OK);
    assert!(stats["cpu_stats"]["cpu_usage"]["total_usage"].as_u64().unwrap() > 0);
    assert!(stats["memory_stats"]["limit"].as_u64().unwrap() > 0);
    let (_, again) = get(&api, "/containers/mock-test-app-web-1/stats?stream=false").await;
    assert_eq!(stats["cpu_stats"], again["cpu_stats"]);

    let (status, top) = get(&api, "/containers/mock-test-app-web-1/top").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(top["Titles"][0], "UID");
    assert!(!top["Processes"].as_array().unwrap().is_empty());

    request(&api, "POST", "/_mock/state/test-app", r#"{"status":"exited"}"#).await;
    let (status, _) = get(&api, "/containers/mock-test-app-web-1/top").await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (_, stopped) = get(&api, "/containers/mock-test-app-web-1/stats?stream=false").await;
    assert_eq!(stopped["cpu_stats"]["cpu_usage"]["total_usage"], 0);
}

#[tokio::test]
async fn test_images_and_distribution() {
    let server = server();
    let api = routes(server.context());

    let (_, images) = get(&api, "/images/json").await;
    let tags: Vec<&str> = images
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|i| i["RepoTags"].as_array().unwrap())
        .map(|t| t.as_str().unwrap())
        .collect();
    assert!(tags.contains(&"nginx:latest"));
    assert!(tags.contains(&"postgres:16"));

    let (status, nginx) = get(&api, "/images/nginx:latest/json").await;
    assert_eq!(status, StatusCode::OK);
    let (_, history) = get(&api, "/images/nginx:latest/history").await;
    assert_eq!(history[0]["Id"], nginx["Id"]);

    let (status, remote) = get(&api, "/distribution/nginx:latest/json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(remote["Descriptor"]["digest"].as_str().unwrap().starts_with("sha256:"));

    // unknown references degrade to an empty answer
    let (status, unknown) = get(&api, "/distribution/ghost:1/json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unknown["Descriptor"]["digest"], "");

    // every catalog image is in use
    let (status, body) = request(&api, "POST", "/images/prune", "").await;
    assert_eq!(status, StatusCode::OK);
    let pruned: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(pruned, json!({"ImagesDeleted": [], "SpaceReclaimed": 0}));
}

#[tokio::test]
async fn test_events_window_in_the_past_is_empty() {
    let server = server();
    let api = routes(server.context());
    let (status, body) = request(&api, "GET", "/events?until=1", "").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_events_stream_until_deadline() {
    let server = server();
    let ctx = server.context();
    let api = routes(ctx.clone());

    let until = chrono::Utc::now().timestamp() + 2;
    let filters = encode(r#"{"type":["container"],"event":["die"]}"#);
    let path = format!("/events?until={}&filters={}", until, filters);
    let flip = async {
        // let the stream subscribe first
        while ctx.events.broker.listener_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        request(&api, "POST", "/_mock/state/other", r#"{"status":"exited"}"#).await;
    };
    let ((status, body), _) = tokio::join!(request(&api, "GET", &path, ""), flip);
    assert_eq!(status, StatusCode::OK);

    let events: Vec<Value> = body
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["Type"], "container");
    assert_eq!(events[0]["Action"], "die");
    assert_eq!(events[0]["Actor"]["Attributes"]["com.docker.compose.service"], "cache");
}

#[tokio::test]
async fn test_version_and_info() {
    let server = server();
    let api = routes(server.context());
    let (_, version) = get(&api, "/version").await;
    assert_eq!(version["ApiVersion"], "1.43");
    let (_, info) = get(&api, "/info").await;
    assert_eq!(info["Containers"], 3);
    assert_eq!(info["ContainersRunning"], 3);
}

#[tokio::test]
async fn test_follow_logs_keep_streaming() {
    let server = server();
    let api = routes(server.context());

    let response = open_stream!(
        api,
        "/containers/mock-test-app-web-1/logs?stdout=1&stderr=1&tail=1&follow=1"
    );
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    // one backlog line, then lines appended on the follow timer
    let received = read_until(&mut body, |bytes| {
        framing::decode_all(bytes).is_ok_and(|frames| frames.len() >= 3)
    })
    .await;
    let frames = framing::decode_all(&received).unwrap();
    assert!(frames.len() >= 3);
    assert!(frames.iter().all(|f| f.payload.ends_with(b"\n")));
}

#[tokio::test]
async fn test_stats_stream_emits_samples() {
    let server = server();
    let api = routes(server.context());

    let response = open_stream!(api, "/containers/mock-test-app-web-1/stats?stream=true");
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    let received = read_until(&mut body, |bytes| {
        bytes.iter().filter(|b| **b == b'\n').count() >= 2
    })
    .await;
    let samples = json_lines(&received);
    assert!(samples.len() >= 2);
    for sample in &samples[..2] {
        assert_eq!(sample["name"], "/mock-test-app-web-1");
        assert!(sample["memory_stats"]["limit"].as_u64().unwrap() > 0);
    }
    // each sample's previous reading is the one before it
    assert_eq!(
        samples[1]["precpu_stats"]["cpu_usage"]["total_usage"],
        samples[0]["cpu_stats"]["cpu_usage"]["total_usage"]
    );
}

#[tokio::test]
async fn test_poller_announces_direct_state_changes() {
    let server = server();
    let ctx = server.context();
    let api = routes(ctx.clone());
    let (stop, signal) = tokio::sync::watch::channel(false);
    let poller = spawn_poller(
        ctx.world.clone(),
        ctx.events.clone(),
        Duration::from_millis(20),
        signal,
    );

    let filters = encode(r#"{"event":["die"]}"#);
    let response = open_stream!(api, &format!("/events?filters={}", filters));
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(ctx.events.broker.listener_count(), 1);

    // behind the server's back: no control endpoint involved
    ctx.world.state().set("other", StackStatus::Exited);
    let mut body = response.into_body();
    let received = read_until(&mut body, |bytes| bytes.contains(&b'\n')).await;
    let events = json_lines(&received);
    assert_eq!(events[0]["Action"], "die");
    assert_eq!(events[0]["Actor"]["Attributes"]["name"], "mock-other-cache-1");

    stop.send(true).unwrap();
    poller.await.unwrap();
}

#[tokio::test]
async fn test_events_reject_bad_timestamps() {
    let server = server();
    let api = routes(server.context());

    for until in ["NaN", "inf", "-inf", "tomorrow"] {
        let (status, body) = get(&api, &format!("/events?until={}", until)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "until={}", until);
        assert!(body["message"].as_str().unwrap().contains("invalid timestamp"));
    }

    // a deadline beyond what the clock can hold streams without one
    let response = open_stream!(api, "/events?until=1e300");
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    let pending = tokio::time::timeout(Duration::from_millis(100), body.data()).await;
    assert!(pending.is_err());
}
