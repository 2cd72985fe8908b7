use apiscout::commands::command_argument_builder;
use apiscout::handlers::{handle_clear, handle_crawl, handle_init, handle_stats};
use apiscout_scanner::CancelFlag;
use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn print_banner() {
    println!(
        "{} {}",
        "apiscout".bright_cyan().bold(),
        format!("v{} - API discovery crawler", env!("CARGO_PKG_VERSION")).dimmed()
    );
}

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    let verbose = chosen_command.get_flag("verbose");

    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        return;
    }

    let cancel: CancelFlag = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nStopping after the current page...");
            flag.store(true, Ordering::SeqCst);
        }
    });

    let result = match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("crawl", primary_command)) => handle_crawl(primary_command, cancel, verbose).await,
        Some(("stats", primary_command)) => handle_stats(primary_command, verbose),
        Some(("clear", primary_command)) => handle_clear(primary_command, verbose),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}
