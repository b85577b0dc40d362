//! ai-dispatch CLI: 模型枚举、任务调用与缓存状态查询的命令行工具
//!
//! Usage:
//!   ai-dispatch models                                  List models visible to every key
//!   ai-dispatch run <task> [--model M] [--json-out] <text|->
//!   ai-dispatch tasks                                   List built-in tasks
//!   ai-dispatch cache-stats                             Show cache occupancy and health

use ai_dispatch::{DispatchConfig, DispatchContext, Task};
use anyhow::{anyhow, bail, Context};
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ai_dispatch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (config_path, rest) = split_config_flag(&args[1..]);
    let result = match rest.first().map(String::as_str) {
        Some("models") => cmd_models(config_path).await,
        Some("run") => cmd_run(config_path, &rest[1..]).await,
        Some("tasks") => {
            cmd_tasks();
            Ok(0)
        }
        Some("cache-stats") => cmd_cache_stats(config_path).await,
        Some("version" | "--version" | "-V") => {
            cmd_version();
            Ok(0)
        }
        Some("help" | "--help" | "-h") | None => {
            print_usage();
            Ok(0)
        }
        Some(other) => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            Ok(1)
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"ai-dispatch: 多厂商大模型调度命令行工具

USAGE:
    ai-dispatch [--config <path>] <COMMAND> [OPTIONS]

COMMANDS:
    models                              List models visible to every configured key (JSON)
    run <task> [--model M] [--json-out] <text|->
                                        Run a built-in task; '-' reads the text from stdin
    tasks                               List built-in tasks
    cache-stats                         Show cache occupancy and durable-tier health (JSON)
    version                             Show version information
    help                                Show this help message

ENVIRONMENT:
    AI_DISPATCH_CONFIG                  YAML configuration file (same as --config)
    SILICONFLOW_API_KEY, OPENAI_API_KEY Provider credentials when no file is given
    REDIS_URL                           Durable cache tier
    RUST_LOG                            Log filter (default: ai_dispatch=info)"#
    );
}

fn cmd_version() {
    println!("ai-dispatch {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_tasks() {
    for task in Task::ALL {
        let mode = if task.wants_json() { "json" } else { "text" };
        println!("{:<28} {}", task.name(), mode);
    }
}

async fn cmd_models(config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let ctx = build_context(config_path).await?;
    let listing = ctx.list_models().await?;
    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(0)
}

async fn cmd_cache_stats(config_path: Option<PathBuf>) -> anyhow::Result<i32> {
    let ctx = build_context(config_path).await?;
    let stats = ctx.cache().stats().await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(0)
}

async fn cmd_run(config_path: Option<PathBuf>, args: &[String]) -> anyhow::Result<i32> {
    let mut model: Option<String> = None;
    let mut json_out = false;
    let mut positional: Vec<&str> = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--model" => {
                model = Some(
                    iter.next()
                        .ok_or_else(|| anyhow!("--model requires a value"))?
                        .clone(),
                )
            }
            "--json-out" => json_out = true,
            other => positional.push(other),
        }
    }

    let (task, text) = match positional.as_slice() {
        [task, text] => (*task, *text),
        _ => bail!("usage: ai-dispatch run <task> [--model M] [--json-out] <text|->"),
    };
    let task: Task = task.parse().map_err(|e: String| anyhow!(e))?;
    let text = if text == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("reading text from stdin")?;
        buf
    } else {
        text.to_string()
    };

    let ctx = build_context(config_path).await?;
    let completion = ctx.run_task(task, &text, model.as_deref()).await?;
    if json_out {
        println!("{}", serde_json::to_string_pretty(&completion)?);
    } else {
        println!("{}", completion.content.to_display_string());
    }
    Ok(if completion.is_success() { 0 } else { 2 })
}

async fn build_context(config_path: Option<PathBuf>) -> anyhow::Result<DispatchContext> {
    let path = config_path.or_else(|| std::env::var_os("AI_DISPATCH_CONFIG").map(PathBuf::from));
    let config = match path {
        Some(p) => DispatchConfig::from_yaml_file(&p)
            .with_context(|| format!("loading configuration from {}", p.display()))?,
        None => DispatchConfig::from_env().context("loading configuration from environment")?,
    };
    Ok(DispatchContext::from_config(config).await?)
}

/// Pull `--config <path>` out of the argument list, wherever it appears.
fn split_config_flag(args: &[String]) -> (Option<PathBuf>, Vec<String>) {
    let mut path = None;
    let mut rest = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            path = iter.next().map(PathBuf::from);
        } else {
            rest.push(arg.clone());
        }
    }
    (path, rest)
}
