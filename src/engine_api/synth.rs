//! Deterministic synthesis of the figures a real engine would measure.
//!
//! Everything here is a pure function of stable keys (container key, image
//! reference) and, for streaming, a tick counter.

use crate::hash::{hex_id, pick, pick_range};
use crate::world::LiveContainer;
use crate::world::graph::split_reference;
use chrono::{DateTime, SecondsFormat, Utc};

/// Families of well-known images with recognisable defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Nginx,
    Postgres,
    Redis,
    Mysql,
    Node,
    Python,
    Alpine,
    Debian,
    Traefik,
    Mongo,
    Generic,
}

impl ImageKind {
    pub fn of(reference: &str) -> Self {
        let (repo, _) = split_reference(reference);
        let base = repo.rsplit('/').next().unwrap_or(repo);
        match base {
            b if b.contains("nginx") => ImageKind::Nginx,
            b if b.contains("postgres") => ImageKind::Postgres,
            b if b.contains("redis") || b.contains("valkey") => ImageKind::Redis,
            b if b.contains("mysql") || b.contains("mariadb") => ImageKind::Mysql,
            b if b.contains("node") => ImageKind::Node,
            b if b.contains("python") => ImageKind::Python,
            "alpine" | "busybox" => ImageKind::Alpine,
            "ubuntu" | "debian" => ImageKind::Debian,
            b if b.contains("traefik") => ImageKind::Traefik,
            b if b.contains("mongo") => ImageKind::Mongo,
            _ => ImageKind::Generic,
        }
    }
}

/// Image-level defaults for entrypoint, command and working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDefaults {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub working_dir: String,
    pub exposed: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn image_defaults(reference: &str) -> ImageDefaults {
    let (entrypoint, cmd, working_dir, exposed): (&[&str], &[&str], &str, &[&str]) =
        match ImageKind::of(reference) {
            ImageKind::Nginx => (
                &["/docker-entrypoint.sh"],
                &["nginx", "-g", "daemon off;"],
                "",
                &["80/tcp"],
            ),
            ImageKind::Postgres => (&["docker-entrypoint.sh"], &["postgres"], "", &["5432/tcp"]),
            ImageKind::Redis => (
                &["docker-entrypoint.sh"],
                &["redis-server"],
                "/data",
                &["6379/tcp"],
            ),
            ImageKind::Mysql => (&["docker-entrypoint.sh"], &["mysqld"], "", &["3306/tcp"]),
            ImageKind::Node => (&["docker-entrypoint.sh"], &["node"], "", &[]),
            ImageKind::Python => (&[], &["python3"], "", &[]),
            ImageKind::Alpine => (&[], &["/bin/sh"], "", &[]),
            ImageKind::Debian => (&[], &["/bin/bash"], "", &[]),
            ImageKind::Traefik => (
                &["/entrypoint.sh"],
                &["traefik"],
                "",
                &["80/tcp"],
            ),
            ImageKind::Mongo => (
                &["docker-entrypoint.sh"],
                &["mongod"],
                "",
                &["27017/tcp"],
            ),
            ImageKind::Generic => (&[], &["/app/start"], "/app", &[]),
        };
    ImageDefaults {
        entrypoint: strings(entrypoint),
        cmd: strings(cmd),
        working_dir: working_dir.to_string(),
        exposed: strings(exposed),
    }
}

/// Resolved `(Path, Args)` of a container's main process.
pub fn process(container: &LiveContainer) -> (String, Vec<String>) {
    if let Some((path, args)) = &container.process {
        return (path.clone(), args.clone());
    }
    let defaults = image_defaults(&container.image);
    let (entrypoint, cmd) = match (&container.entrypoint, &container.command) {
        (Some(ep), Some(cmd)) => (ep.clone(), cmd.clone()),
        // overriding the entrypoint drops the image's CMD
        (Some(ep), None) => (ep.clone(), Vec::new()),
        (None, Some(cmd)) => (defaults.entrypoint, cmd.clone()),
        (None, None) => (defaults.entrypoint, defaults.cmd),
    };
    let mut full = entrypoint.into_iter().chain(cmd);
    let path = full.next().unwrap_or_default();
    (path, full.collect())
}

/// The `Command` column of a container summary.
pub fn command_line(container: &LiveContainer) -> String {
    let (path, args) = process(container);
    std::iter::once(path)
        .chain(args.into_iter().map(|arg| {
            if arg.contains(' ') {
                format!("'{}'", arg)
            } else {
                arg
            }
        }))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats unix seconds the way the engine does in JSON timestamps.
pub fn rfc3339(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ---------------------------------------------------------------------------
// images

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    pub id: String,
    pub diff_id: String,
    pub created: i64,
    pub created_by: String,
    pub size: i64,
}

const RUN_STEPS: [&str; 8] = [
    "/bin/sh -c apt-get update && apt-get install -y --no-install-recommends ca-certificates && rm -rf /var/lib/apt/lists/*",
    "/bin/sh -c set -eux; groupadd -r app --gid=999; useradd -r -g app --uid=999 app",
    "/bin/sh -c apk add --no-cache tzdata curl",
    "/bin/sh -c mkdir -p /docker-entrypoint-initdb.d",
    "/bin/sh -c #(nop) ENV LANG=C.UTF-8",
    "/bin/sh -c set -eux; savedAptMark=\"$(apt-mark showmanual)\"; apt-get update",
    "/bin/sh -c #(nop) COPY file:entrypoint in /usr/local/bin/",
    "/bin/sh -c #(nop) VOLUME [/data]",
];

/// Layers of an image, oldest first; their sizes add up to `total_size`.
pub fn layers(reference: &str, total_size: i64, created: i64) -> Vec<Layer> {
    let count = pick_range(reference, "layers", 3, 9) as usize;
    let defaults = image_defaults(reference);

    // weights decide how the total is split
    let weights: Vec<i64> = (0..count)
        .map(|i| 1 + pick(reference, &format!("weight{}", i), 100) as i64)
        .collect();
    let weight_sum: i64 = weights.iter().sum();
    let mut remaining = total_size.max(0);

    (0..count)
        .map(|i| {
            let metadata_only = i > 0 && i + 1 == count;
            let size = if metadata_only {
                0
            } else if i + 2 >= count {
                remaining
            } else {
                let share = total_size.max(0) * weights[i] / weight_sum;
                remaining -= share;
                share
            };
            let created_by = if i == 0 {
                format!(
                    "/bin/sh -c #(nop) ADD file:{} in / ",
                    &hex_id(&format!("base:{}", reference))[..16]
                )
            } else if metadata_only {
                format!("/bin/sh -c #(nop)  CMD {:?}", defaults.cmd)
            } else {
                RUN_STEPS[pick(reference, &format!("step{}", i), RUN_STEPS.len() as u64) as usize]
                    .to_string()
            };
            Layer {
                id: format!("sha256:{}", hex_id(&format!("layer:{}:{}", reference, i))),
                diff_id: format!("sha256:{}", hex_id(&format!("diff:{}:{}", reference, i))),
                created: created - ((count - 1 - i) as i64) * 3_600,
                created_by,
                size,
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// stats

pub const ONLINE_CPUS: u64 = 4;
const SYSTEM_DELTA: u64 = 4_000_000_000;

/// Synthetic resource figures for a container at a given tick.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsFigures {
    pub cpu_percent: f64,
    pub cpu_total: u64,
    pub precpu_total: u64,
    pub system_total: u64,
    pub presystem_total: u64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_inactive_file: u64,
    pub net_rx: u64,
    pub net_tx: u64,
    pub block_read: u64,
    pub block_write: u64,
    pub pids: u64,
}

/// Builds counters whose deltas reproduce a hash-chosen CPU percentage
/// under `cpu_delta / system_delta * online_cpus * 100`.
pub fn stats_figures(key: &str, tick: u64) -> StatsFigures {
    let cpu_percent = pick_range(key, "cpu", 1, 600) as f64 / 10.0;
    let cpu_delta = (cpu_percent / 100.0 * SYSTEM_DELTA as f64 / ONLINE_CPUS as f64) as u64;
    let base_cpu = 1_000_000_000 + pick(key, "cpu-base", 50_000_000_000);
    let base_system = 9_000_000_000_000 + pick(key, "sys-base", 1_000_000_000_000);

    let memory_limit = match pick(key, "mem-limit", 3) {
        0 => 2 * 1024 * 1024 * 1024,
        1 => 4 * 1024 * 1024 * 1024,
        _ => 8 * 1024 * 1024 * 1024,
    };
    let memory_percent = pick_range(key, "mem", 5, 450) as f64 / 10.0;
    let working_set = (memory_limit as f64 * memory_percent / 100.0) as u64;
    let inactive_file = pick_range(key, "cache", 1, 64) * 1024 * 1024;

    let drift = tick * 1_024;
    StatsFigures {
        cpu_percent,
        precpu_total: base_cpu + tick * cpu_delta,
        cpu_total: base_cpu + (tick + 1) * cpu_delta,
        presystem_total: base_system + tick * SYSTEM_DELTA,
        system_total: base_system + (tick + 1) * SYSTEM_DELTA,
        memory_usage: working_set + inactive_file,
        memory_limit,
        memory_inactive_file: inactive_file,
        net_rx: pick_range(key, "rx", 10_000, 900_000_000) + drift,
        net_tx: pick_range(key, "tx", 10_000, 300_000_000) + drift / 2,
        block_read: pick_range(key, "blk-r", 0, 500_000_000),
        block_write: pick_range(key, "blk-w", 0, 200_000_000) + drift,
        pids: pick_range(key, "pids", 1, 40),
    }
}

// ---------------------------------------------------------------------------
// processes

pub const TOP_TITLES: [&str; 8] = ["UID", "PID", "PPID", "C", "STIME", "TTY", "TIME", "CMD"];

/// `ps -ef` style rows for a running container.
pub fn top_rows(container: &LiveContainer) -> Vec<Vec<String>> {
    let key = container.key();
    let (path, args) = process(container);
    let main_cmd = std::iter::once(path).chain(args).collect::<Vec<_>>().join(" ");
    let pid = 1_000 + pick(&key, "pid", 60_000);
    let stime = DateTime::<Utc>::from_timestamp(container.started, 0)
        .unwrap_or_default()
        .format("%H:%M")
        .to_string();
    let user = match container.user.as_str() {
        "" => "root".to_string(),
        user => user.to_string(),
    };

    let worker = match ImageKind::of(&container.image) {
        ImageKind::Nginx => Some(("101", "nginx: worker process")),
        ImageKind::Postgres => Some(("999", "postgres: background writer")),
        ImageKind::Mysql => Some(("999", "mysqld: worker")),
        _ => None,
    };
    let workers = worker.map(|_| pick_range(&key, "workers", 1, 4)).unwrap_or(0);

    let mut rows = vec![vec![
        user,
        pid.to_string(),
        (pid - 20).to_string(),
        "0".to_string(),
        stime.clone(),
        "?".to_string(),
        "00:00:01".to_string(),
        main_cmd,
    ]];
    if let Some((uid, cmd)) = worker {
        for i in 0..workers {
            rows.push(vec![
                uid.to_string(),
                (pid + 1 + i).to_string(),
                pid.to_string(),
                "0".to_string(),
                stime.clone(),
                "?".to_string(),
                "00:00:00".to_string(),
                cmd.to_string(),
            ]);
        }
    }
    rows
}

// ---------------------------------------------------------------------------
// logs

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stderr: bool,
    pub timestamp: i64,
    pub text: String,
}

impl LogLine {
    /// Line bytes as written to the stream, newline included.
    pub fn render(&self, timestamps: bool) -> String {
        if timestamps {
            format!("{} {}\n", rfc3339(self.timestamp), self.text)
        } else {
            format!("{}\n", self.text)
        }
    }
}

/// Number of lines the container has "written" since it started.
pub fn log_backlog(container: &LiveContainer) -> u64 {
    pick_range(&container.key(), "log-lines", 12, 48)
}

fn templates(kind: ImageKind) -> &'static [(&'static str, bool)] {
    match kind {
        ImageKind::Nginx => &[
            ("172.17.0.1 - - \"GET / HTTP/1.1\" 200 615 \"-\" \"curl/8.5.0\"", false),
            ("172.17.0.1 - - \"GET /healthz HTTP/1.1\" 200 2 \"-\" \"kube-probe/1.29\"", false),
            ("[notice] 1#1: signal process started", true),
            ("172.17.0.1 - - \"GET /favicon.ico HTTP/1.1\" 404 153 \"-\" \"Mozilla/5.0\"", false),
        ],
        ImageKind::Postgres => &[
            ("LOG:  checkpoint starting: time", true),
            ("LOG:  checkpoint complete: wrote 3 buffers (0.0%)", true),
            ("LOG:  database system is ready to accept connections", true),
        ],
        ImageKind::Redis => &[
            ("* 100 changes in 300 seconds. Saving...", false),
            ("* Background saving started", false),
            ("* Background saving terminated with success", false),
        ],
        ImageKind::Mysql => &[
            ("[Note] [MY-010914] [Server] Aborted connection (Got an error reading communication packets).", true),
            ("[System] [MY-010931] [Server] ready for connections.", true),
        ],
        ImageKind::Mongo => &[
            ("{\"s\":\"I\",\"c\":\"NETWORK\",\"msg\":\"Connection accepted\"}", false),
            ("{\"s\":\"I\",\"c\":\"STORAGE\",\"msg\":\"WiredTiger message\"}", false),
        ],
        ImageKind::Traefik => &[
            ("level=info msg=\"Configuration loaded from flags.\"", false),
            ("level=debug msg=\"Provider connection established with docker\"", false),
        ],
        ImageKind::Node | ImageKind::Python | ImageKind::Generic => &[
            ("INFO request handled path=/api/status status=200", false),
            ("INFO worker heartbeat ok", false),
            ("WARN slow request path=/api/report took=1.2s", true),
        ],
        ImageKind::Alpine | ImageKind::Debian => &[("tick", false)],
    }
}

/// The `index`-th line a container writes; stable for a given container.
pub fn log_line(container: &LiveContainer, index: u64) -> LogLine {
    let key = container.key();
    let templates = templates(ImageKind::of(&container.image));
    let (text, stderr) = templates[pick(&key, &format!("line{}", index), templates.len() as u64) as usize];
    let spacing = pick_range(&key, "log-spacing", 5, 90) as i64;
    LogLine {
        stderr,
        timestamp: container.started + 1 + index as i64 * spacing,
        text: text.to_string(),
    }
}
