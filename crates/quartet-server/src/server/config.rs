use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `quartet-server` binary.
///
/// These settings control the listener, per-call buffering, the pacing of the
/// demonstration greetings and the storage collection used by the blog
/// service. All values are parsed from CLI arguments or environment variables
/// (a `.env` file is honored), with defaults matching the reference behavior
/// of each service.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "quartet-server",
    version,
    about = "A gRPC server exercising all four call shapes"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/quartet.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a
    /// file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Number of outbound messages a streaming call may have produced but not
    /// yet handed to the transport.
    ///
    /// The default of 1 means a producer never runs more than one message
    /// ahead of the caller.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 1)]
    pub stream_buffer_size: usize,

    /// Number of greetings sent by `GreetManyTimes`.
    ///
    /// Environment variable: `GREET_REPEAT`
    #[arg(long, env = "GREET_REPEAT", default_value_t = 10)]
    pub greet_repeat: u32,

    /// Delay between two `GreetManyTimes` greetings, in milliseconds.
    ///
    /// Environment variable: `GREET_INTERVAL_MS`
    #[arg(long, env = "GREET_INTERVAL_MS", default_value_t = 1000)]
    pub greet_interval_ms: u64,

    /// Number of probe intervals `GreetWithDeadline` waits through before
    /// answering.
    ///
    /// Environment variable: `DEADLINE_PROBES`
    #[arg(long, env = "DEADLINE_PROBES", default_value_t = 3)]
    pub deadline_probes: u32,

    /// Length of one `GreetWithDeadline` probe interval, in milliseconds.
    ///
    /// Environment variable: `DEADLINE_PROBE_MS`
    #[arg(long, env = "DEADLINE_PROBE_MS", default_value_t = 1000)]
    pub deadline_probe_ms: u64,

    /// Deadline applied to calls that arrive without a `grpc-timeout` header,
    /// in milliseconds. Unset means such calls never time out server-side.
    ///
    /// Environment variable: `DEFAULT_TIMEOUT_MS`
    #[arg(long, env = "DEFAULT_TIMEOUT_MS")]
    pub default_timeout_ms: Option<u64>,

    /// Storage collection holding blog documents.
    ///
    /// Environment variable: `BLOG_COLLECTION`
    #[arg(long, env = "BLOG_COLLECTION", default_value_t = String::from("blog"))]
    pub blog_collection: String,

    /// Seconds to wait for in-flight calls to drain on shutdown before they
    /// are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub stream_buffer_size: usize,
    pub greet_repeat: u32,
    pub greet_interval: Duration,
    pub deadline_probes: u32,
    pub deadline_probe: Duration,
    pub default_timeout: Option<Duration>,
    pub blog_collection: String,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:50051"),
            uds: false,
            stream_buffer_size: 1,
            greet_repeat: 10,
            greet_interval: Duration::from_secs(1),
            deadline_probes: 3,
            deadline_probe: Duration::from_secs(1),
            default_timeout: None,
            blog_collection: String::from("blog"),
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.blog_collection.trim().is_empty() {
            bail!("BLOG_COLLECTION must not be empty");
        }

        if args.default_timeout_ms == Some(0) {
            bail!("DEFAULT_TIMEOUT_MS must be greater than 0 when set");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            stream_buffer_size: args.stream_buffer_size,
            greet_repeat: args.greet_repeat,
            greet_interval: Duration::from_millis(args.greet_interval_ms),
            deadline_probes: args.deadline_probes,
            deadline_probe: Duration::from_millis(args.deadline_probe_ms),
            default_timeout: args.default_timeout_ms.map(Duration::from_millis),
            blog_collection: args.blog_collection,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
        })
    }
}
