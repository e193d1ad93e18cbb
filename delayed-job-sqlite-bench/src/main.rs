use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bincode::{Decode, Encode};
use clap::{Parser, Subcommand, ValueEnum};
use delayed_job::core::Utc;
use delayed_job::prelude::*;
use delayed_job_sqlite::{SqliteStore, MIGRATOR};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "delayed-job")]
#[command(version)]
#[command(about = "Run and benchmark delayed-job workers backed by SQLite")]
struct Args {
    /// SQLite database URL
    #[arg(long, short = 'd', default_value = "sqlite::memory:")]
    database: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Work off jobs until SIGTERM/SIGINT
    Work(WorkArgs),

    /// Enqueue bench jobs
    Enqueue {
        #[arg(long, default_value = "1")]
        count: usize,

        #[arg(long, default_value = "0")]
        priority: i32,

        /// Delay before the jobs become due, in seconds
        #[arg(long, default_value = "0")]
        delay: i64,
    },

    /// Enqueue jobs and process them with several in-process workers, then report latency
    Bench {
        #[arg(long, default_value = "10000")]
        count: usize,

        #[arg(long, default_value = "4")]
        workers: usize,

        /// Pause between enqueues, in microseconds
        #[arg(long, default_value = "700")]
        interval: u64,

        #[arg(long, value_enum, default_value = "batch")]
        strategy: Strategy,
    },

    /// Delete every job
    Clear,

    /// Release every lease held by a worker
    ClearLocks {
        #[arg(long)]
        worker: String,
    },
}

#[derive(Parser, Debug)]
struct WorkArgs {
    /// Worker name, overrides WORKER_NAME
    #[arg(long)]
    name: Option<String>,

    #[arg(long, value_enum)]
    strategy: Option<Strategy>,

    #[arg(long)]
    batch_size: Option<u32>,

    /// Run a single pass and exit instead of polling
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    Batch,
    Probe,
}

impl From<Strategy> for ClaimStrategy {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Batch => ClaimStrategy::Batch,
            Strategy::Probe => ClaimStrategy::Probe,
        }
    }
}

struct JobResult {
    pub latency_millis: i64,
    pub jid: JobId,
}

#[derive(Decode, Encode)]
struct BenchJobPayload {
    pub enqueued_at_millis: i64,
}

impl Default for BenchJobPayload {
    fn default() -> Self {
        Self {
            enqueued_at_millis: Utc::now().timestamp_millis(),
        }
    }
}

struct BenchJob {
    results: Option<UnboundedSender<JobResult>>,
}

#[async_trait]
impl JobProcessor for BenchJob {
    type Payload = BenchJobPayload;
    type Error = JobError;

    async fn handle(&self, jid: JobId, payload: Self::Payload) -> Result<(), Self::Error> {
        let latency_millis = Utc::now().timestamp_millis() - payload.enqueued_at_millis;
        match &self.results {
            Some(tx) => tx
                .unbounded_send(JobResult {
                    latency_millis,
                    jid,
                })
                .map_err(|_| anyhow!("Failed to send results"))?,
            None => tracing::info!("Bench job {} ran {}ms after being enqueued", jid, latency_millis),
        }
        Ok(())
    }

    fn name() -> &'static str
    where
        Self: Sized,
    {
        "bench_job"
    }
}

fn router(results: Option<UnboundedSender<JobResult>>) -> RunnerRouter {
    let mut r = RunnerRouter::default();
    r.add_job_handler(BenchJob { results });
    r
}

async fn make_pool(database: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database)
        .with_context(|| format!("Invalid database URL: {database}"))?
        .create_if_missing(true);
    // Every connection to an in-memory database would otherwise see its own copy.
    let max_connections = if database.contains(":memory:") { 1 } else { 8 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("Failed to open database")?;
    MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    Ok(pool)
}

async fn work(store: Arc<SqliteStore>, args: WorkArgs) -> anyhow::Result<()> {
    let mut config = WorkerConfig::from_env()?;
    if let Some(name) = args.name {
        config = config.with_worker_id(name);
    }
    if let Some(strategy) = args.strategy {
        config = config.with_strategy(strategy.into());
    }
    if let Some(batch_size) = args.batch_size {
        config = config.with_batch_size(batch_size);
    }

    let worker = Worker::new(store, router(None), config)?;
    let shutdown = shutdown_signal();
    let stats = if args.once {
        let config = worker.config();
        worker
            .work_off(config.work_off_total, config.batch_size, &shutdown)
            .await
    } else {
        worker.run(shutdown).await?
    };
    tracing::info!(
        "{} jobs processed: {} succeeded, {} failed",
        stats.total(),
        stats.success,
        stats.failure
    );
    Ok(())
}

async fn enqueue(store: &SqliteStore, count: usize, priority: i32, delay: i64) -> anyhow::Result<()> {
    let delay = Duration::try_seconds(delay).ok_or_else(|| anyhow!("--delay out of range: {delay}"))?;
    for _ in 0..count {
        let job = store
            .enqueue_in::<BenchJob>(BenchJobPayload::default(), delay, priority)
            .await?;
        println!("{}", job.id);
    }
    Ok(())
}

async fn schedule_tasks(count: usize, interval: std::time::Duration, store: Arc<SqliteStore>) {
    let mut delay = tokio::time::interval(interval);
    for _ in 0..count {
        delay.tick().await;
        if let Err(e) = store.enqueue::<BenchJob>(BenchJobPayload::default(), 0).await {
            tracing::error!("Failed to enqueue job: {}", e);
        }
    }
}

async fn bench(
    store: Arc<SqliteStore>,
    count: usize,
    workers: usize,
    interval: u64,
    strategy: Strategy,
) -> anyhow::Result<()> {
    if count == 0 {
        return Err(anyhow!("Nothing to benchmark with --count 0"));
    }
    let (tx, rx) = unbounded::<JobResult>();
    let shutdown = CancellationToken::new();

    let _task_maker = {
        let store = store.clone();
        let interval = std::time::Duration::from_micros(interval);
        tokio::spawn(async move {
            schedule_tasks(count, interval, store).await;
        })
    };

    let started = Instant::now();
    let mut runners = Vec::with_capacity(workers);
    for i in 0..workers.max(1) {
        let config = WorkerConfig::default()
            .with_worker_id(format!("bench-{i}"))
            .with_strategy(strategy.into())
            .with_poll_interval(Duration::milliseconds(10));
        let worker = Worker::new(store.clone(), router(Some(tx.clone())), config)?;
        let shutdown = shutdown.clone();
        runners.push(tokio::spawn(async move {
            if let Err(e) = worker.run(shutdown).await {
                tracing::error!("Worker crashed: {}", e);
            }
        }));
    }
    drop(tx);

    let mut results = rx.take(count).collect::<Vec<JobResult>>().await;
    let total_duration = started.elapsed();
    shutdown.cancel();
    for runner in runners {
        runner.await?;
    }

    let seen_ids = results.iter().map(|r| r.jid).collect::<HashSet<JobId>>();
    if seen_ids.len() < results.len() {
        eprintln!(
            "Found {} duplicate executions",
            results.len() - seen_ids.len()
        );
    }
    if results.is_empty() {
        return Err(anyhow!("No jobs were processed"));
    }

    let processed = results.len();
    results.sort_by_key(|r| r.latency_millis);
    let throughput = processed as f64 / total_duration.as_secs_f64();
    let (min, max, median, pct) = (
        results[0].latency_millis,
        results[processed - 1].latency_millis,
        results[processed / 2].latency_millis,
        results[(processed * 19) / 20].latency_millis,
    );

    println!("Processed: {} jobs", processed);
    println!("min: {}ms", min);
    println!("max: {}ms", max);
    println!("median: {}ms", median);
    println!("95th percentile: {}ms", pct);
    println!("throughput: {}/s", throughput);
    Ok(())
}


#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let store = Arc::new(SqliteStore::with_pool(make_pool(&args.database).await?));

    match args.command {
        Commands::Work(work_args) => work(store, work_args).await?,
        Commands::Enqueue {
            count,
            priority,
            delay,
        } => enqueue(&store, count, priority, delay).await?,
        Commands::Bench {
            count,
            workers,
            interval,
            strategy,
        } => bench(store, count, workers, interval, strategy).await?,
        Commands::Clear => {
            let deleted = store.flush().await?;
            println!("Deleted {} jobs", deleted);
        }
        Commands::ClearLocks { worker } => {
            let released = store.clear_all_locks_for(&WorkerId::new(worker)).await?;
            println!("Released {} locks", released);
        }
    }
    Ok(())
}
