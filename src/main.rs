//! shortpool - Key Allocation and Expiry Engine
//!
//! Small front end for running the engine by hand. It reads commands from
//! stdin, one per line:
//!
//! ```text
//! add <data>          allocate in the shortest tier with a free key
//! add <len> <data>    allocate in a specific tier
//! add! <data>         like add, limited to the default access count
//! get <key>           resolve a key (consumes one access)
//! stats               print per-tier statistics
//! quit                exit
//! ```

use shortpool::config::{parse_duration, EngineConfig, TierConfig};
use shortpool::storage::{LinkEngine, LinkKind, LinkRequest};
use shortpool::PoolError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tokio::time::Instant;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Command-line configuration
struct Args {
    engine: EngineConfig,
    log_level: Level,
}

impl Args {
    /// Parse configuration from command-line arguments
    fn from_args() -> Self {
        let mut engine = EngineConfig::default();
        let mut tiers: Vec<TierConfig> = Vec::new();
        let mut log_level = Level::INFO;
        let args: Vec<String> = std::env::args().collect();

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1);
            match (args[i].as_str(), value) {
                ("--alphabet" | "-a", Some(v)) => {
                    engine.alphabet = v.clone();
                    i += 2;
                }
                ("--tier" | "-t", Some(v)) => {
                    tiers.push(parse_tier(v).unwrap_or_else(|e| fail(&e)));
                    i += 2;
                }
                ("--max-accesses", Some(v)) => {
                    engine.default_max_accesses = v
                        .parse()
                        .unwrap_or_else(|_| fail("invalid access count"));
                    i += 2;
                }
                ("--safety-interval", Some(v)) => {
                    engine.safety_interval =
                        parse_duration(v).unwrap_or_else(|e| fail(&e.to_string()));
                    i += 2;
                }
                ("--log-level", Some(v)) => {
                    log_level = v.parse().unwrap_or_else(|_| fail("invalid log level"));
                    i += 2;
                }
                ("--help", _) => {
                    print_help();
                    std::process::exit(0);
                }
                ("--version" | "-v", _) => {
                    println!("shortpool version {}", shortpool::VERSION);
                    std::process::exit(0);
                }
                (flag, None) if flag.starts_with('-') => {
                    fail(&format!("{flag} requires a value"));
                }
                (other, _) => {
                    eprintln!("Unknown argument: {other}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        if !tiers.is_empty() {
            engine.tiers = tiers;
        }

        Self { engine, log_level }
    }
}

/// Parses `LEN=DURATION`, e.g. `2=24h`.
fn parse_tier(arg: &str) -> Result<TierConfig, String> {
    let (len, ttl) = arg
        .split_once('=')
        .ok_or_else(|| format!("invalid tier {arg:?}, expected LEN=DURATION"))?;
    let key_len = len
        .parse()
        .map_err(|_| format!("invalid key length {len:?}"))?;
    let ttl = parse_duration(ttl).map_err(|e| e.to_string())?;
    Ok(TierConfig::new(key_len, ttl))
}

fn fail(msg: &str) -> ! {
    eprintln!("Error: {msg}");
    std::process::exit(1);
}

fn print_help() {
    println!(
        r#"
shortpool - Key Allocation and Expiry Engine for Short Links

USAGE:
    shortpool [OPTIONS]

OPTIONS:
    -a, --alphabet <SYMBOLS>         Key alphabet (default: a-zA-Z0-9)
    -t, --tier <LEN=DURATION>        Tier key length and TTL, repeatable
                                     (default: 1=10m 2=24h 3=168h)
        --max-accesses <N>           Access limit for `add!` (default: 10)
        --safety-interval <DURATION> Eviction safety tick (default: 10s)
        --log-level <LEVEL>          trace, debug, info, warn, error (default: info)
    -v, --version                    Print version information
        --help                       Print this help message

COMMANDS (stdin):
    add <data>          Allocate in the shortest tier with a free key
    add <len> <data>    Allocate in a specific tier
    add! <data>         Like add, limited to --max-accesses resolutions
    get <key>           Resolve a key
    stats               Per-tier statistics
    quit                Exit
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let args = Args::from_args();

    // Set up logging
    FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // One pool and one scheduler per tier
    let engine = LinkEngine::start(args.engine)?;
    info!(tiers = ?engine.key_lengths(), "shortpool v{} ready", shortpool::VERSION);

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping...");
    };

    tokio::select! {
        result = command_loop(&engine) => result?,
        _ = shutdown => {}
    }

    engine.shutdown();
    info!("Shutdown complete");
    Ok(())
}

/// Reads commands from stdin until EOF or `quit`.
async fn command_loop(engine: &LinkEngine) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }

        let reply = execute(engine, line);
        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    Ok(())
}

fn execute(engine: &LinkEngine, line: &str) -> String {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match cmd {
        "add" | "add!" if !rest.is_empty() => {
            let max_accesses = if cmd == "add!" {
                engine.default_max_accesses()
            } else {
                0
            };
            let (len, data) = match rest.split_once(' ') {
                Some((len, data)) if len.parse::<usize>().is_ok() => (len.parse().ok(), data),
                _ => (None, rest),
            };
            let request = LinkRequest::new(LinkKind::Url, data.to_string()).max_accesses(max_accesses);

            let result = match len {
                Some(len) => engine.allocate_with_ttl(len, request),
                None => engine.allocate_shortest(request),
            };
            match result {
                Ok((key, expires_at)) => format!(
                    "{key} (expires in {}s)",
                    expires_at.saturating_duration_since(Instant::now()).as_secs()
                ),
                Err(e @ PoolError::Exhausted { .. }) => format!("ERR {e}"),
                Err(e) => {
                    // Already logged with detail by the pool.
                    warn!(reason = ?e.internal_reason(), "Allocation failed");
                    format!("ERR {e}")
                }
            }
        }
        "get" if !rest.is_empty() => match engine.resolve(rest) {
            Some(entry) => format!(
                "{} {} (ttl {}s, remaining {})",
                entry.kind(),
                String::from_utf8_lossy(entry.data()),
                entry.ttl().as_secs(),
                entry
                    .remaining_accesses()
                    .map_or_else(|| "unlimited".to_string(), |n| n.to_string())
            ),
            None => "(nil)".to_string(),
        },
        "stats" => engine
            .stats()
            .iter()
            .map(|s| {
                format!(
                    "len={} active={} free={} capacity={} ttl={}s allocated={} evicted={} violations={}",
                    s.key_len,
                    s.active,
                    s.free,
                    s.capacity,
                    s.ttl.as_secs(),
                    s.allocated,
                    s.evicted,
                    s.invariant_violations
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => format!("ERR unknown command {line:?}"),
    }
}
