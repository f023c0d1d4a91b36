use pretty_assertions::assert_eq;
use stackmock::client::{self, EngineClient};
use stackmock::config::{EngineMode, StackmockConfig};
use stackmock::types::{ContainerState, Health, LogOptions, StackStatus};
use stackmock::world::WorldModel;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const TEST_APP: &str = r#"
services:
  web:
    image: nginx:latest
    networks: [frontend]
  db:
    image: postgres:16
    volumes:
      - pgdata:/var/lib/postgresql/data
    networks: [backend]
volumes:
  pgdata:
"#;

const OVERRIDES: &str = r#"
stacks:
  test-app:
    services:
      web:
        health: unhealthy
      db:
        state: exited
standalone:
  - name: portainer
    image: portainer/portainer-ce:latest
    ports: ["9000:9000"]
"#;

fn write_stack(root: &Path, name: &str, file: &str, content: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), content).unwrap();
}

fn stacks_dir(overrides: Option<&str>) -> TempDir {
    let dir = TempDir::new().unwrap();
    write_stack(dir.path(), "test-app", "compose.yaml", TEST_APP);
    if let Some(overrides) = overrides {
        fs::write(dir.path().join("mock.yaml"), overrides).unwrap();
    }
    dir
}

#[test]
fn test_override_application() {
    let dir = stacks_dir(Some(OVERRIDES));
    let world = WorldModel::load(dir.path(), "mock.yaml").unwrap();

    let all = world.list_containers(true, Some("test-app"));
    let web = all.iter().find(|c| c.service == "web").unwrap();
    assert_eq!(web.state, ContainerState::Running);
    assert_eq!(web.health, Health::Unhealthy);
    let db = all.iter().find(|c| c.service == "db").unwrap();
    assert_eq!(db.state, ContainerState::Exited);

    let up: Vec<String> = world
        .list_containers(false, Some("test-app"))
        .iter()
        .map(|c| c.name.clone())
        .collect();
    assert_eq!(up, vec!["mock-test-app-web-1"]);

    // standalone containers ignore stack state
    let portainer = world.inspect_container("portainer").unwrap();
    assert!(portainer.stack.is_empty());
    assert_eq!(portainer.state, ContainerState::Running);
}

#[test]
fn test_broken_stacks_are_skipped() {
    let dir = stacks_dir(None);
    write_stack(dir.path(), "broken", "docker-compose.yml", "services: [not, a, map");
    write_stack(dir.path(), "notes", "README.md", "not a stack");
    let world = WorldModel::load(dir.path(), "mock.yaml").unwrap();

    let catalog = world.catalog();
    assert!(catalog.stacks.contains_key("test-app"));
    assert!(!catalog.stacks.contains_key("notes"));
    assert_eq!(world.list_containers(true, Some("test-app")).len(), 2);
}

#[test]
fn test_reload_picks_up_new_stacks() {
    let dir = stacks_dir(None);
    let world = WorldModel::load(dir.path(), "mock.yaml").unwrap();
    assert!(world.inspect_container("mock-later-app-1").is_err());

    write_stack(
        dir.path(),
        "later",
        "compose.yml",
        "services:\n  app:\n    image: redis:7\n",
    );
    world.reload().unwrap();
    assert_eq!(world.state().get("later"), StackStatus::Running);
    assert!(world.inspect_container("mock-later-app-1").is_ok());
}

#[tokio::test]
async fn test_facade_over_the_synthetic_world() {
    let dir = stacks_dir(Some(OVERRIDES));
    let mut config = StackmockConfig::default();
    config.engine.mode = EngineMode::Mock;
    config.stacks.dir = dir.path().to_path_buf();

    let engine = client::connect(&config).await.unwrap();
    let running = engine.list_containers(false, Some("test-app")).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].health, Health::Unhealthy);
    assert!(running[0].status.ends_with("(unhealthy)"));

    let stats = engine.stats("test-app").await.unwrap();
    assert_eq!(stats.len(), 1);
    assert!(stats[0].usage.is_some());

    let raw = engine.inspect_network("test-app_frontend").await.unwrap();
    assert_eq!(raw["Name"], "test-app_frontend");
    let err = engine.inspect_volume("nope").await.unwrap_err();
    assert!(err.is_not_found());

    let logs = engine
        .logs("mock-test-app-db-1", LogOptions::default())
        .await
        .unwrap();
    // exited containers still have a backlog, and the stream ends
    use futures::StreamExt;
    let chunks: Vec<_> = logs.collect().await;
    assert!(!chunks.is_empty());

    engine.close().await.unwrap();
}
