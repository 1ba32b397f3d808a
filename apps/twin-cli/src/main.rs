#![deny(warnings)]

//! Headless CLI for the factory twin: batch ticks or an interactive command loop.

use anyhow::{bail, Context, Result};
use persistence::{default_sqlite_url, HistoryStore, MemoryHistory, SqliteHistory};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use twin_core::TwinConfig;
use twin_runtime::{FactoryTwin, SharedTwin};
use twin_tools::{FactoryTools, ToolCall, TOOL_NAMES};

#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    db: Option<String>,
    memory: bool,
    seed: Option<u64>,
    ticks: Option<u32>,
    json: bool,
    version: bool,
}

fn flag_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = value.with_context(|| format!("{flag} needs a value"))?;
    value
        .parse()
        .with_context(|| format!("invalid value {value:?} for {flag}"))
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut out = Args::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => out.config = it.next().map(PathBuf::from),
            "--db" => out.db = it.next(),
            "--memory" => out.memory = true,
            "--seed" => out.seed = Some(flag_value("--seed", it.next())?),
            "--ticks" => out.ticks = Some(flag_value("--ticks", it.next())?),
            "--json" => out.json = true,
            "--version" | "-V" => out.version = true,
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(out)
}

fn load_config(args: &Args) -> Result<TwinConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_yaml::from_str::<TwinConfig>(&text)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => TwinConfig::default(),
    };
    if let Some(seed) = args.seed {
        cfg.market.rng_seed = seed;
    }
    Ok(cfg)
}

fn open_store(args: &Args) -> Box<dyn HistoryStore> {
    if args.memory {
        return Box::new(MemoryHistory::new());
    }
    let url = args.db.as_deref().unwrap_or(default_sqlite_url());
    match SqliteHistory::open(url) {
        Ok(store) => Box::new(store),
        Err(e) => {
            warn!(url, error = %e, "history database unavailable, keeping history in memory");
            Box::new(MemoryHistory::new())
        }
    }
}

/// `tick` or `tick N`; `None` when the line is not a tick command.
fn parse_tick(line: &str) -> Option<Result<u32>> {
    let mut parts = line.split_whitespace();
    if parts.next()? != "tick" {
        return None;
    }
    Some(match parts.next() {
        None => Ok(1),
        Some(n) => n.parse().with_context(|| format!("tick count {n:?}")),
    })
}

fn print_help() {
    println!("Tools: {}", TOOL_NAMES.join(", "));
    println!("  e.g. start_job O1 10 | change_shift NIGHT | get_market_forecast 8");
    println!("  or JSON: {{\"tool\": \"cancel_job\", \"args\": {{\"order_id\": \"O1\"}}}}");
    println!("Other: tick [n], status, history, help, exit");
}

fn print_history(twin: &SharedTwin) {
    twin.read(|t| {
        match t.history().ticks() {
            Ok(ticks) => {
                for s in ticks {
                    println!(
                        "tick {} | cash ${} | inv {} | health {}% | jobs {} | {}",
                        s.tick, s.cash, s.inventory, s.health, s.active_job_count, s.shift
                    );
                }
            }
            Err(e) => println!("tick history unavailable: {e}"),
        }
        match t.history().jobs() {
            Ok(jobs) => {
                for j in jobs {
                    let end = j.end_tick.map(|e| e.to_string()).unwrap_or_else(|| "-".into());
                    println!(
                        "job {} | {} | start {} | end {} | cost ${} | revenue ${}",
                        j.job_id, j.status, j.start_tick, end, j.cost, j.revenue
                    );
                }
            }
            Err(e) => println!("job history unavailable: {e}"),
        }
        if t.history().failed_writes() > 0 {
            println!("({} history writes failed)", t.history().failed_writes());
        }
    });
}

fn run_ticks(twin: &SharedTwin, n: u32) {
    let reports = twin.write(|t| t.advance(n));
    for r in reports {
        for c in r.completed {
            println!(
                "tick {}: job {} completed, {} units @ ${} = ${}",
                r.tick, c.job_id, c.quantity, c.unit_price, c.revenue
            );
        }
    }
}

fn repl(tools: &FactoryTools, json: bool) -> Result<()> {
    println!("Type 'help' for commands, 'exit' to quit.");
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();
    loop {
        print!("\n> ");
        stdout.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        match input {
            "" => continue,
            "exit" | "quit" => break,
            "help" => print_help(),
            "status" => println!("{}", tools.get_status()),
            "history" => print_history(tools.twin()),
            _ => {
                if let Some(n) = parse_tick(input) {
                    match n {
                        Ok(n) => {
                            run_ticks(tools.twin(), n);
                            println!("{}", tools.get_status());
                        }
                        Err(e) => println!("error: {e:#}"),
                    }
                    continue;
                }
                match input.parse::<ToolCall>() {
                    Ok(call) => {
                        let out = tools.dispatch(call);
                        if json {
                            println!("{}", serde_json::to_string(&out)?);
                        } else {
                            println!("{out}");
                        }
                    }
                    Err(e) => println!("error: {e}"),
                }
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    // Logs go to stderr so command output stays clean.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.version {
        println!(
            "twin-cli {} ({} {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_SHA"),
            env!("BUILD_DATE")
        );
        return Ok(());
    }
    info!(?args, "starting CLI");

    let cfg = load_config(&args)?;
    let twin = FactoryTwin::new(cfg, open_store(&args)).context("invalid configuration")?;
    let shared = SharedTwin::new(twin);
    let tools = FactoryTools::new(shared.clone());

    match args.ticks {
        Some(n) => {
            run_ticks(&shared, n);
            println!("{}", tools.get_status());
            Ok(())
        }
        None => repl(&tools, args.json),
    }
}
