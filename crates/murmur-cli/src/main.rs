//! murmur - browse, import and branch chat threads

mod commands;
mod config;
mod store;
mod utils;

use clap::Parser;
use murmur_chat::ThreadStore;
use murmur_core::{Error, MessageId, ThreadId};
use std::path::PathBuf;

use crate::store::JsonlThreadStore;

/// murmur - chat thread tool
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// List saved threads, newest first
    #[arg(long)]
    threads: bool,

    /// Page of the thread list to show (1-based)
    #[arg(long, default_value_t = 1)]
    page: usize,

    /// Threads per page (overrides config)
    #[arg(long)]
    per_page: Option<usize>,

    /// Print a thread as a transcript
    #[arg(long, value_name = "THREAD")]
    show: Option<String>,

    /// Import a JSON array of messages as a new thread
    #[arg(long, value_name = "FILE")]
    import: Option<PathBuf>,

    /// Title for an imported thread
    #[arg(long, requires = "import")]
    title: Option<String>,

    /// Fork a thread to edit one of its user messages
    #[arg(long, value_name = "THREAD", requires = "at")]
    branch: Option<String>,

    /// Message to fork before (with --branch)
    #[arg(long, value_name = "MESSAGE", requires = "branch")]
    at: Option<String>,

    /// Model (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Provider (overrides config)
    #[arg(short, long)]
    provider: Option<String>,

    /// Directory holding thread files (overrides config)
    #[arg(long)]
    data_dir: Option<String>,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("murmur=debug")
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let mut config = config::Config::load();
    if args.model.is_some() {
        config.model = args.model.clone();
    }
    if args.provider.is_some() {
        config.provider = args.provider.clone();
    }
    if args.data_dir.is_some() {
        config.data_dir = args.data_dir.clone();
    }
    if let Some(per_page) = args.per_page {
        if per_page == 0 {
            return Err(Error::InvalidConfig("--per-page must be at least 1".to_string()).into());
        }
        config.page_size = Some(per_page);
    }

    let store = JsonlThreadStore::new(config.threads_dir());
    tracing::debug!("Thread directory: {}", store.dir().display());

    if let Some(path) = &args.import {
        let thread = commands::import_thread(&store, path, args.title.clone()).await?;
        println!(
            "Imported {} messages into thread {} ({})",
            thread.message_count, thread.id, thread.title
        );
        return Ok(());
    }

    if let (Some(thread), Some(at)) = (&args.branch, &args.at) {
        let (branch, text) = commands::branch_thread(
            &store,
            &ThreadId::from(thread.as_str()),
            &MessageId::from(at.as_str()),
        )
        .await?;
        println!("Created branch {} from thread {}", branch.id, thread);
        println!("Kept {} earlier messages. Editing:\n\n{}", branch.message_count, text);
        return Ok(());
    }

    if let Some(thread) = &args.show {
        let out = commands::show_thread(&store, &ThreadId::from(thread.as_str())).await?;
        print!("{}", out);
        return Ok(());
    }

    if args.threads {
        let page = args.page.max(1);
        let per_page = config.page_size();
        let threads = commands::list_threads(&store, page, per_page).await?;
        println!("{}", commands::format_thread_page(&threads, page, per_page));
        if threads.total > 0 {
            println!("Show one with: murmur --show <thread-id>");
        } else {
            println!("Threads are stored in: {}", store.dir().display());
        }
        return Ok(());
    }

    print_status(&config, &store).await
}

/// Summary shown when no command is given
async fn print_status(config: &config::Config, store: &JsonlThreadStore) -> anyhow::Result<()> {
    let threads = store
        .list_threads(murmur_chat::PageRequest::first(0))
        .await?;

    println!("Config:  {}", config::Config::config_path().display());
    match config.target() {
        Some(target) => println!("Target:  {}", target.label()),
        None => println!("Target:  none (set `model` or `agent` in the config)"),
    }
    println!("Threads: {} in {}", threads.total, store.dir().display());
    println!("\nRun `murmur --help` for commands.");
    Ok(())
}
