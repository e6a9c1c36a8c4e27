// src/main.rs
use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use log::{error, info, LevelFilter};
use rustbuster::cli::Args;
use rustbuster::config;
use rustbuster::engine::Engine;
use rustbuster::output::{self, OutputManager};
use rustbuster::plugins::create_plugin;
use rustbuster::types::GlobalOptions;
use std::process;
use tokio_util::sync::CancellationToken;

const BANNER: &str = r#"
                  _   _               _
 _ __ _   _ ___| |_| |__  _   _ ___| |_ ___ _ __
| '__| | | / __| __| '_ \| | | / __| __/ _ \ '__|
| |  | |_| \__ \ |_| |_) | |_| \__ \ ||  __/ |
|_|   \__,_|___/\__|_.__/ \__,_|___/\__\___|_|
"#;

const RULE: &str = "===============================================================";

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(&args);

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn init_logging(args: &Args) {
    let level = if args.global.verbose {
        LevelFilter::Debug
    } else if args.global.quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    };

    // RUST_LOG still wins over the level picked from the flags.
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_target(false)
        .init();
}

async fn run(args: Args) -> Result<()> {
    let file_config = config::load_config(args.global.config.as_deref())?;
    let reading_stdin = args.use_stdin();
    let (global, plugin_config) = args.into_options(&file_config)?;
    config::validate_global(&global)?;

    if reading_stdin && atty::is(atty::Stream::Stdin) {
        info!("reading words from stdin, pipe a wordlist or pass --wordlist");
    }

    let plugin = create_plugin(plugin_config, &global)?;
    let (engine, channels) = Engine::new(global.clone(), plugin);

    if !global.quiet {
        print_banner(&global, &engine.plugin().config_string());
    }

    let cancel = engine.cancellation_token();
    tokio::spawn(watch_interrupt(cancel.clone()));

    let bar = output::progress_bar(&global)?;
    let output = OutputManager::new(&global, bar.clone())?;
    let consumer = tokio::spawn(output.consume(channels.results, channels.errors));

    let ticker_done = CancellationToken::new();
    let ticker = output::spawn_ticker(engine.progress(), bar, ticker_done.clone());

    let outcome = engine.run().await;

    let found = consumer.await.context("result consumer failed")??;
    ticker_done.cancel();
    ticker.await.context("progress ticker failed")?;

    if !global.quiet {
        println!("{}", RULE);
        println!("{} Finished, {} results", Local::now().format("%Y/%m/%d %H:%M:%S"), found);
        println!("{}", RULE);
    }

    outcome.context("enumeration failed")
}

async fn watch_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("interrupted, finishing in-flight requests");
        cancel.cancel();
    }
}

fn print_banner(global: &GlobalOptions, plugin_config: &str) {
    println!("{}", BANNER);
    println!("{} v{}", rustbuster::NAME, rustbuster::VERSION);
    println!("{}", RULE);
    println!("{:<26}{}", "[+] Threads:", global.threads);
    println!("{:<26}{}", "[+] Wordlist:", global.words);
    if global.offset > 0 {
        println!("{:<26}{}", "[+] Wordlist offset:", global.offset);
    }
    if let Some(pattern) = &global.pattern_file {
        println!("{:<26}{}", "[+] Patterns:", pattern.display());
    }
    if let Some(delay) = global.delay {
        println!("{:<26}{:?}", "[+] Delay:", delay);
    }
    if global.verbose {
        println!("{:<26}true", "[+] Verbose:");
    }
    print!("{}", plugin_config);
    println!("{}", RULE);
    println!("{} Starting", Local::now().format("%Y/%m/%d %H:%M:%S"));
    println!("{}", RULE);
}
