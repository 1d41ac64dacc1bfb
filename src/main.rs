use std::fs::File;
use std::future::IntoFuture;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

use mongo_profiler::capture::{BoundedQueue, Dumper, SampleSink, Sampler};
use mongo_profiler::config::{AnalyzeConfig, RecordConfig};
use mongo_profiler::db::{AdminClient, MongoAdmin, SimulatedAdmin};
use mongo_profiler::metrics::LiveReport;
use mongo_profiler::recording::{RecordingReader, RecordingWriter};
use mongo_profiler::report::{self, text};
use mongo_profiler::{server, AppState, Sample};

/// Sampling profiler for MongoDB
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sample `currentOp` and write a recording
    Record(RecordArgs),
    /// Summarize a recording
    Analyze(AnalyzeArgs),
    /// Sample `currentOp` and serve a live report over HTTP
    Serve(ServeArgs),
    /// Print the version
    Version,
}

#[derive(Debug, Args)]
struct CaptureArgs {
    /// MongoDB URI or host[:port]
    #[arg(long = "db", default_value = "localhost:27017")]
    target: String,

    /// Milliseconds between two polls
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Capacity of the sampler → consumer queue
    #[arg(long, default_value_t = 100)]
    queue_size: usize,

    /// Namespace under which our own `currentOp` shows up (repeatable)
    #[arg(long = "own-ns", default_values_t = [String::from("admin.$cmd")])]
    own_namespaces: Vec<String>,

    /// Sample a built-in synthetic server instead of MongoDB
    #[arg(long)]
    simulate: bool,
}

#[derive(Debug, Args)]
struct RecordArgs {
    #[command(flatten)]
    capture: CaptureArgs,

    /// Seconds to record for
    #[arg(long, default_value_t = 3)]
    duration: u64,

    /// Stop after this many samples
    #[arg(long)]
    max_samples: Option<u64>,

    /// Recording file, `-` for stdout
    output: String,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Only show this aspect
    #[arg(long)]
    focus: Option<String>,

    /// Values shown per aspect (0 = all)
    #[arg(long)]
    limit: Option<usize>,

    /// Custom aspect as name=expression (repeatable)
    #[arg(long = "aspect")]
    aspects: Vec<String>,

    /// Only count ops whose aspects satisfy this expression
    #[arg(long)]
    filter: Option<String>,

    /// Skip ops the filter fails on instead of aborting
    #[arg(long)]
    skip_filter_errors: bool,

    /// JSON file with analysis settings; flags take precedence
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    #[command(flatten)]
    report: ReportArgs,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    /// Recording file, `-` for stdin
    input: String,
}

#[derive(Debug, Args)]
struct ServeArgs {
    #[command(flatten)]
    capture: CaptureArgs,

    #[command(flatten)]
    report: ReportArgs,

    /// Address the HTTP server listens on
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Record(args) => record(args),
        Command::Analyze(args) => analyze(args),
        Command::Serve(args) => serve(args),
        Command::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Logs go to stderr so a recording can stream to stdout.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

// ─── Settings ────────────────────────────────────────────────────

impl CaptureArgs {
    fn record_config(&self) -> RecordConfig {
        RecordConfig {
            target: self.target.clone(),
            interval_ms: self.interval_ms,
            queue_size: self.queue_size,
            own_namespaces: self.own_namespaces.clone(),
            ..RecordConfig::default()
        }
    }
}

impl ReportArgs {
    fn analyze_config(&self) -> Result<AnalyzeConfig> {
        let mut cfg = match &self.config {
            Some(path) => AnalyzeConfig::load(path)?,
            None => AnalyzeConfig::default(),
        };
        if self.focus.is_some() {
            cfg.focus = self.focus.clone();
        }
        if self.limit.is_some() {
            cfg.limit = self.limit;
        }
        if self.filter.is_some() {
            cfg.filter = self.filter.clone();
        }
        cfg.skip_filter_errors |= self.skip_filter_errors;
        for arg in &self.aspects {
            cfg.add_aspect_arg(arg)?;
        }
        Ok(cfg)
    }
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
}

/// Connects before anything else starts, so a bad address fails fast.
fn connect(cfg: &RecordConfig, simulate: bool, runtime: &Runtime) -> Result<Arc<dyn AdminClient>> {
    if simulate {
        tracing::info!("sampling the simulated server");
        return Ok(Arc::new(SimulatedAdmin::default()));
    }
    let admin = runtime.block_on(MongoAdmin::connect(&cfg.target, runtime.handle().clone()))?;
    Ok(Arc::new(admin))
}

/// Starts dumper then sampler; if the sampler cannot start the dumper is
/// stopped again.
fn start_pipeline<S: SampleSink + 'static>(
    admin: Arc<dyn AdminClient>,
    queue: Arc<BoundedQueue<Sample>>,
    sink: S,
    cfg: &RecordConfig,
) -> Result<(Sampler, Dumper<S>)> {
    let mut dumper = Dumper::new(queue.clone(), sink);
    dumper.start()?;

    let mut sampler = Sampler::new(admin, queue, cfg.sampler_config());
    if let Err(e) = sampler.start() {
        dumper.stop()?;
        return Err(e);
    }
    Ok((sampler, dumper))
}

/// Stops both workers, sampler first, and reports the first failure.
fn stop_pipeline<S: SampleSink + 'static>(sampler: &mut Sampler, dumper: &mut Dumper<S>) -> Result<()> {
    let sampled = sampler.stop();
    let dumped = dumper.stop();

    let dropped = sampler.num_dropped();
    if dropped > 0 {
        tracing::warn!(dropped, "queue overflowed, samples were dropped");
    }
    eprintln!(
        "samples: {}  ops: {}  dropped: {}  written: {}",
        sampler.num_samples(),
        sampler.num_ops(),
        dropped,
        dumper.num_written(),
    );
    let latency = sampler.stats().snapshot().poll_latency;
    if latency.has_data() {
        eprintln!(
            "currentOp µs  p50: {}  p99: {}  max: {}",
            latency.p50_us, latency.p99_us, latency.max_us,
        );
    }
    sampled.and(dumped)
}

// ─── record ──────────────────────────────────────────────────────

fn record(args: RecordArgs) -> Result<()> {
    let cfg = RecordConfig {
        duration_secs: args.duration,
        max_samples: args.max_samples,
        ..args.capture.record_config()
    };
    cfg.validate()?;

    let runtime = build_runtime()?;
    let admin = connect(&cfg, args.capture.simulate, &runtime)?;

    let out: Box<dyn Write + Send> = if args.output == "-" {
        Box::new(io::stdout())
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("cannot create {}", args.output))?;
        Box::new(file)
    };
    let sink = RecordingWriter::new(BufWriter::new(out));

    let queue = Arc::new(BoundedQueue::new(cfg.queue_size));
    let (mut sampler, mut dumper) = start_pipeline(admin, queue, sink, &cfg)?;
    tracing::info!(
        output = %args.output,
        interval_ms = cfg.interval_ms,
        duration_secs = cfg.duration_secs,
        "recording",
    );

    runtime.block_on(async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
            _ = tokio::time::sleep(cfg.duration()) => {}
            _ = wait_until(|| sampler.is_finished()) => {}
            _ = wait_until(|| dumper.is_finished()) => tracing::warn!("dumper exited early, stopping"),
        }
    });

    stop_pipeline(&mut sampler, &mut dumper)
}

/// Resolves once `done` holds, checked every 50 ms.
async fn wait_until(done: impl Fn() -> bool) {
    while !done() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

// ─── analyze ─────────────────────────────────────────────────────

fn analyze(args: AnalyzeArgs) -> Result<()> {
    let cfg = args.report.analyze_config()?;
    let mut profile = cfg.build_report()?;

    let input: Box<dyn Read> = if args.input == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file =
            File::open(&args.input).with_context(|| format!("cannot open {}", args.input))?;
        Box::new(file)
    };
    let reader = RecordingReader::new(BufReader::new(input));
    report::analyze(reader, &mut profile).with_context(|| format!("analyzing {}", args.input))?;

    let focus = cfg.focus.as_deref();
    let mut stdout = io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &profile.snapshot(focus, cfg.limit))?;
        writeln!(stdout)?;
    } else {
        let summary = profile.summary();
        let aspects = profile.top_by_aspect(focus, cfg.limit);
        stdout.write_all(text::render(&summary, &aspects).as_bytes())?;
    }
    Ok(())
}

// ─── serve ───────────────────────────────────────────────────────

fn serve(args: ServeArgs) -> Result<()> {
    let cfg = args.capture.record_config();
    cfg.validate()?;
    let live = Arc::new(LiveReport::new(args.report.analyze_config()?.build_report()?));

    let runtime = build_runtime()?;
    let admin = connect(&cfg, args.capture.simulate, &runtime)?;

    let queue = Arc::new(BoundedQueue::new(cfg.queue_size));
    let (mut sampler, mut dumper) = start_pipeline(admin, queue.clone(), live.clone(), &cfg)?;

    let state = Arc::new(AppState {
        stats: sampler.stats(),
        queue,
        report: live,
        interval_ms: cfg.interval_ms,
        started_at: Utc::now(),
    });
    let app = server::create_router(state);

    let served = runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(&args.bind)
            .await
            .with_context(|| format!("cannot bind {}", args.bind))?;

        eprintln!();
        eprintln!("Live report  → http://{}/api/report", args.bind);
        eprintln!("Report SSE   → http://{}/api/report/stream", args.bind);
        eprintln!("Sampler      → http://{}/api/stats", args.bind);
        eprintln!();

        let (shutdown, requested) = oneshot::channel::<()>();
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = requested.await;
            })
            .into_future();
        let mut server = pin!(server);

        tokio::select! {
            served = &mut server => return served.context("server exited with error"),
            _ = tokio::signal::ctrl_c() => tracing::info!("shutting down"),
            // Nothing updates the report once the aggregator is gone.
            _ = wait_until(|| dumper.is_finished()) => tracing::warn!("aggregator exited early, shutting down"),
        }
        let _ = shutdown.send(());
        server.await.context("server exited with error")
    });

    let stopped = stop_pipeline(&mut sampler, &mut dumper);
    served.and(stopped)
}
