use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use flightstream_core::log::StartPosition;
use std::path::PathBuf;

pub const DEFAULT_SERVER_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DATASET_PATH: &str = "data/flights.json";
pub const DEFAULT_REQUESTS_STREAM: &str = "flight.search.requested";
pub const DEFAULT_RESULTS_STREAM: &str = "flight.search.results";
pub const DEFAULT_CONSUMER_GROUP: &str = "flight_group";
pub const DEFAULT_INSTANCE_ID: &str = "flight_app";

/// Runtime configuration for the `flightstream-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is honored), with defaults suitable for running a single instance
/// locally.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "flightstream-server",
    version,
    about = "An HTTP/SSE flight search service backed by a shared log"
)]
pub struct CliArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from(DEFAULT_SERVER_ADDR))]
    pub server_addr: String,

    /// Path to the JSON flight catalog. The file may hold an array of flights
    /// or an object mapping flight ids to flights.
    ///
    /// Environment variable: `DATASET_PATH`
    #[arg(long, env = "DATASET_PATH", default_value = DEFAULT_DATASET_PATH)]
    pub dataset_path: PathBuf,

    /// Directory holding the log journal. When set, the log is journaled to
    /// disk and survives restarts, so unacknowledged requests are redelivered
    /// to their worker. When unset, the log lives in memory only.
    ///
    /// Environment variable: `LOG_DIR`
    #[arg(long, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log stream search requests are appended to.
    ///
    /// Environment variable: `REQUESTS_STREAM`
    #[arg(long, env = "REQUESTS_STREAM", default_value_t = String::from(DEFAULT_REQUESTS_STREAM))]
    pub requests_stream: String,

    /// Log stream search results are appended to.
    ///
    /// Environment variable: `RESULTS_STREAM`
    #[arg(long, env = "RESULTS_STREAM", default_value_t = String::from(DEFAULT_RESULTS_STREAM))]
    pub results_stream: String,

    /// Consumer group shared by every fulfillment worker.
    ///
    /// Environment variable: `CONSUMER_GROUP`
    #[arg(long, env = "CONSUMER_GROUP", default_value_t = String::from(DEFAULT_CONSUMER_GROUP))]
    pub consumer_group: String,

    /// Identity of this instance within the consumer group. With more than
    /// one worker, each consumer is named `<INSTANCE_ID>-<n>`.
    ///
    /// Environment variable: `INSTANCE_ID`
    #[arg(long, env = "INSTANCE_ID", default_value_t = String::from(DEFAULT_INSTANCE_ID))]
    pub instance_id: String,

    /// Number of fulfillment workers to run.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 1)]
    pub num_workers: usize,

    /// Where a newly created consumer group starts reading the requests log.
    /// Ignored when the group already exists.
    ///
    /// Environment variable: `GROUP_START`
    #[arg(long, env = "GROUP_START", value_enum, default_value_t = GroupStart::Latest)]
    pub group_start: GroupStart,

    /// Upper bound, in milliseconds, of every blocking log read. This is also
    /// the longest a worker or tailer takes to notice anything but a
    /// cancellation.
    ///
    /// Environment variable: `READ_BLOCK_MS`
    #[arg(long, env = "READ_BLOCK_MS", default_value_t = 5_000)]
    pub read_block_ms: u64,

    /// Capacity of the channel between a Result Tailer and its SSE stream.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Interval, in seconds, between SSE keep-alive comments.
    ///
    /// Environment variable: `KEEPALIVE_SECS`
    #[arg(long, env = "KEEPALIVE_SECS", default_value_t = 15)]
    pub keepalive_secs: u64,

    /// Seconds to wait for open streams to drain, and for each worker to
    /// stop, during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum GroupStart {
    Earliest,
    Latest,
}

impl From<GroupStart> for StartPosition {
    fn from(value: GroupStart) -> Self {
        match value {
            GroupStart::Earliest => Self::Earliest,
            GroupStart::Latest => Self::Latest,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub dataset_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub requests_stream: String,
    pub results_stream: String,
    pub consumer_group: String,
    pub instance_id: String,
    pub num_workers: usize,
    pub group_start: StartPosition,
    pub read_block: Duration,
    pub stream_buffer_size: usize,
    pub keepalive: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: DEFAULT_SERVER_ADDR.to_owned(),
            dataset_path: PathBuf::from(DEFAULT_DATASET_PATH),
            log_dir: None,
            requests_stream: DEFAULT_REQUESTS_STREAM.to_owned(),
            results_stream: DEFAULT_RESULTS_STREAM.to_owned(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_owned(),
            instance_id: DEFAULT_INSTANCE_ID.to_owned(),
            num_workers: 1,
            group_start: StartPosition::Latest,
            read_block: Duration::from_secs(5),
            stream_buffer_size: 8,
            keepalive: Duration::from_secs(15),
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }
        if args.read_block_ms == 0 {
            bail!("READ_BLOCK_MS must be greater than 0");
        }
        if args.keepalive_secs == 0 {
            bail!("KEEPALIVE_SECS must be greater than 0");
        }
        for (name, value) in [
            ("REQUESTS_STREAM", &args.requests_stream),
            ("RESULTS_STREAM", &args.results_stream),
            ("CONSUMER_GROUP", &args.consumer_group),
            ("INSTANCE_ID", &args.instance_id),
        ] {
            if value.trim().is_empty() {
                bail!("{name} must not be empty");
            }
        }
        if args.requests_stream == args.results_stream {
            bail!(
                "REQUESTS_STREAM and RESULTS_STREAM must differ (both are {:?})",
                args.requests_stream
            );
        }

        Ok(Self {
            server_addr: args.server_addr,
            dataset_path: args.dataset_path,
            log_dir: args.log_dir,
            requests_stream: args.requests_stream,
            results_stream: args.results_stream,
            consumer_group: args.consumer_group,
            instance_id: args.instance_id,
            num_workers: args.num_workers,
            group_start: args.group_start.into(),
            read_block: Duration::from_millis(args.read_block_ms),
            stream_buffer_size: args.stream_buffer_size,
            keepalive: Duration::from_secs(args.keepalive_secs),
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}

impl ServerConfig {
    /// Consumer identity of worker `index`. A single worker uses the bare
    /// instance id.
    pub fn consumer_name(&self, index: usize) -> String {
        if self.num_workers == 1 {
            self.instance_id.clone()
        } else {
            format!("{}-{index}", self.instance_id)
        }
    }

    /// One [`WorkerConfig`] per configured worker.
    pub fn worker_configs(&self) -> Vec<WorkerConfig> {
        (0..self.num_workers)
            .map(|index| WorkerConfig {
                requests_stream: self.requests_stream.clone(),
                results_stream: self.results_stream.clone(),
                group: self.consumer_group.clone(),
                consumer: self.consumer_name(index),
                start: self.group_start,
                read_block: self.read_block,
            })
            .collect()
    }
}

/// Everything a single Fulfillment Worker needs to join its consumer group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub requests_stream: String,
    pub results_stream: String,
    pub group: String,
    pub consumer: String,
    pub start: StartPosition,
    pub read_block: Duration,
}
