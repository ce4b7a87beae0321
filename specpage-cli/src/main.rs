use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cmd {
    pub mod convert;
    pub mod watch;
}
mod config;

fn cli() -> Command {
    Command::new("specpage")
        .about("Turn YAML specification documents into documentation pages")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Log more detail")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(cmd::convert::make_subcommand())
        .subcommand(cmd::watch::make_subcommand())
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "info,specpage=debug"
    } else {
        "warn,specpage=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("convert", args)) => cmd::convert::execute(args),
        Some(("watch", args)) => cmd::watch::execute(args).await,
        _ => unreachable!("a subcommand is required"),
    }
}
