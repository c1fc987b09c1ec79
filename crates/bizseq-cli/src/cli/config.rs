use anyhow::{Context, bail};
use bizseq::{BackendConfig, MAX_STEP, MongoConfig, PostgresConfig, SequencerConfig};
use clap::{Parser, Subcommand, ValueEnum};
use core::time::Duration;

/// Which store holds the high-water marks.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Postgres,
    Mongo,
}

/// Runtime configuration for the `bizseq` binary.
///
/// Every option can also be set through the environment variable named in
/// its help text; a `.env` file in the working directory is loaded first.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "bizseq",
    version,
    about = "Inspect, seed and draw from segment-cached business key sequences"
)]
pub struct CliArgs {
    /// Backing store for high-water marks.
    ///
    /// `memory` keeps nothing between runs and is only useful for trying
    /// the tool out or for `bench`.
    ///
    /// Environment variable: `BIZSEQ_BACKEND`
    #[arg(long, env = "BIZSEQ_BACKEND", value_enum, default_value_t = Backend::Memory)]
    pub backend: Backend,

    /// PostgreSQL connection string.
    ///
    /// Environment variable: `DATABASE_URL`
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Table holding one row per biz tag.
    ///
    /// Environment variable: `BIZSEQ_TABLE`
    #[arg(long, env = "BIZSEQ_TABLE", default_value_t = String::from("biz_alloc"))]
    pub table: String,

    /// Size of the PostgreSQL connection pool.
    ///
    /// Environment variable: `BIZSEQ_MAX_CONNECTIONS`
    #[arg(long, env = "BIZSEQ_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,

    /// Fail reservations for unregistered biz tags instead of creating them.
    ///
    /// Environment variable: `BIZSEQ_NO_AUTO_CREATE`
    #[arg(long, env = "BIZSEQ_NO_AUTO_CREATE", default_value_t = false)]
    pub no_auto_create: bool,

    /// MongoDB connection string. Transactions require a replica set.
    ///
    /// Environment variable: `MONGO_URI`
    #[arg(long, env = "MONGO_URI")]
    pub mongo_uri: Option<String>,

    /// Environment variable: `MONGO_DATABASE`
    #[arg(long, env = "MONGO_DATABASE", default_value_t = String::from("bizseq"))]
    pub mongo_database: String,

    /// Environment variable: `MONGO_COLLECTION`
    #[arg(long, env = "MONGO_COLLECTION", default_value_t = String::from("sequences"))]
    pub mongo_collection: String,

    /// Values reserved per store round trip.
    ///
    /// Environment variable: `BIZSEQ_STEP`
    #[arg(long, env = "BIZSEQ_STEP", default_value_t = bizseq::DEFAULT_STEP)]
    pub step: u32,

    /// How long a caller waits for a preload when both buffers are empty.
    ///
    /// Environment variable: `BIZSEQ_WAIT_TIMEOUT_MS`
    #[arg(long, env = "BIZSEQ_WAIT_TIMEOUT_MS", default_value_t = 500)]
    pub wait_timeout_ms: u64,

    /// Deadline for one preload, all attempts included.
    ///
    /// Environment variable: `BIZSEQ_PRELOAD_TIMEOUT_MS`
    #[arg(long, env = "BIZSEQ_PRELOAD_TIMEOUT_MS", default_value_t = 3000)]
    pub preload_timeout_ms: u64,

    /// Store attempts per preload.
    ///
    /// Environment variable: `BIZSEQ_PRELOAD_RETRIES`
    #[arg(long, env = "BIZSEQ_PRELOAD_RETRIES", default_value_t = 3)]
    pub preload_retries: u32,

    /// Number of background preload tasks.
    ///
    /// Environment variable: `BIZSEQ_PRELOAD_WORKERS`
    #[arg(long, env = "BIZSEQ_PRELOAD_WORKERS", default_value_t = 4)]
    pub preload_workers: usize,

    /// Startup guard as `tag=min` pairs: refuse to start unless the next
    /// value reserved for `tag` is at least `min`. Repeat or comma-separate.
    ///
    /// Environment variable: `BIZSEQ_BIGGER_THAN`
    #[arg(long, env = "BIZSEQ_BIGGER_THAN", value_delimiter = ',')]
    pub bigger_than: Vec<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Draw ids one at a time.
    Next {
        key: String,
        #[arg(short, long, default_value_t = 1)]
        count: u32,
    },
    /// Reserve a contiguous range in one round trip. A size of 0 only probes.
    Segment { key: String, size: u32 },
    /// Print the persisted row of a biz tag.
    Describe { key: String },
    /// Register a new biz tag.
    Create {
        key: String,
        #[arg(short, long)]
        description: String,
        #[arg(short, long, default_value_t = 0)]
        step: u32,
        /// First value the tag will hand out.
        #[arg(long, default_value_t = 1)]
        max_id: u64,
    },
    /// Raise a tag's high-water mark so ids continue from `start` or later.
    InitMaxId {
        key: String,
        start: u64,
        #[arg(short, long, default_value_t = 0)]
        step: u32,
    },
    /// Measure `next` throughput with concurrent tasks.
    Bench {
        #[arg(default_value_t = String::from("bench"))]
        key: String,
        #[arg(short, long, default_value_t = 8)]
        tasks: usize,
        /// Ids drawn by each task.
        #[arg(short, long, default_value_t = 100_000)]
        ids: usize,
    },
}

impl TryFrom<CliArgs> for SequencerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.step == 0 || args.step > MAX_STEP {
            bail!("BIZSEQ_STEP ({}) must be within 1..={MAX_STEP}", args.step);
        }
        if args.preload_workers == 0 {
            bail!("BIZSEQ_PRELOAD_WORKERS must be greater than 0");
        }

        let backend = match args.backend {
            Backend::Memory => BackendConfig::Memory,
            Backend::Postgres => {
                let Some(url) = args.database_url else {
                    bail!("DATABASE_URL is required for the postgres backend");
                };
                BackendConfig::Postgres(PostgresConfig {
                    table: args.table,
                    max_connections: args.max_connections,
                    auto_create: !args.no_auto_create,
                    ..PostgresConfig::new(url)
                })
            }
            Backend::Mongo => {
                let Some(uri) = args.mongo_uri else {
                    bail!("MONGO_URI is required for the mongo backend");
                };
                BackendConfig::Mongo(MongoConfig {
                    uri,
                    database: args.mongo_database,
                    collection: args.mongo_collection,
                })
            }
        };

        let mut config = SequencerConfig {
            default_step: args.step,
            wait_timeout: Duration::from_millis(args.wait_timeout_ms),
            preload_timeout: Duration::from_millis(args.preload_timeout_ms),
            preload_retries: args.preload_retries,
            preload_workers: args.preload_workers,
            ..SequencerConfig::new(backend)
        };

        for pair in args.bigger_than.iter().filter(|p| !p.trim().is_empty()) {
            let Some((key, min)) = pair.split_once('=') else {
                bail!("BIZSEQ_BIGGER_THAN entry `{pair}` is not `tag=min`");
            };
            let min = min
                .trim()
                .parse::<u64>()
                .with_context(|| format!("BIZSEQ_BIGGER_THAN entry `{pair}` has a bad minimum"))?;
            config.bigger_than.insert(key.trim().to_owned(), min);
        }

        config.validate()?;
        Ok(config)
    }
}
