use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use specpage_core::{Converter, EventSink, ServerMode, TracingSink};
use specpage_dev_server::{
    LiveServer, LiveServerConfig, ProcessServer, ProcessServerConfig, RestartPolicy, RunSummary,
    WatchOptions, WatchSession,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use crate::cmd::convert::add_build_args;
use crate::config::SpecpageConfig;

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("watch"))
        .about("Convert, serve the pages, and rebuild when sources change")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Port to serve on [default: 3000]"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Host to bind to [default: 127.0.0.1]"),
        )
        .arg(
            Arg::new("debounce-ms")
                .long("debounce-ms")
                .value_name("MS")
                .help("Quiet period before a rebuild starts [default: 2000]"),
        )
        .arg(
            Arg::new("server")
                .long("server")
                .value_name("KIND")
                .value_parser(["builtin", "external"])
                .help("Built-in preview server or the configured external command"),
        )
        .arg(
            Arg::new("open")
                .long("open")
                .help("Open browser automatically")
                .action(ArgAction::SetTrue),
        )
}

pub async fn execute(args: &ArgMatches) -> Result<ExitCode> {
    let config = SpecpageConfig::load(args)?;
    let sink: Arc<dyn EventSink> = Arc::new(TracingSink);

    let converter = Arc::new(
        Converter::builder()
            .source_dir(&config.build.input)
            .output_dir(&config.build.output)
            .site_config(config.site.clone())
            .event_sink(sink.clone())
            .build()?,
    );

    let session = WatchSession::new(
        WatchOptions {
            debounce_window: Duration::from_millis(config.build.debounce_ms),
            port: config.server.port,
        },
        sink.clone(),
    );
    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutting down");
            stop.stop();
        }
    });

    let server = &config.server;
    let summary = match server.mode {
        ServerMode::Builtin => {
            let live = LiveServer::new(LiveServerConfig {
                host: server.host.clone(),
                root: PathBuf::from(&config.build.output),
                open: server.open,
            });
            session.run(converter, live).await?
        }
        ServerMode::External => {
            let command = server
                .command
                .clone()
                .context("server.command must be set to use an external server")?;
            let process = ProcessServer::new(
                ProcessServerConfig {
                    command,
                    rebuild_command: server.rebuild_command.clone(),
                    working_dir: std::env::current_dir()?,
                    hot_reload: server.hot_reload,
                    policy: RestartPolicy {
                        restart_on_crash: server.restart_on_crash,
                        max_restarts: server.max_restarts,
                    },
                },
                sink,
            );
            session.run(converter, process).await?
        }
    };

    Ok(exit_code(&summary))
}

fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.last_build_failed {
        eprintln!("The last build had errors");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_follows_last_build() {
        let failed = RunSummary {
            jobs_started: 3,
            last_build_failed: true,
        };
        let clean = RunSummary {
            jobs_started: 3,
            last_build_failed: false,
        };
        assert_eq!(
            format!("{:?}", exit_code(&failed)),
            format!("{:?}", ExitCode::FAILURE)
        );
        assert_eq!(
            format!("{:?}", exit_code(&clean)),
            format!("{:?}", ExitCode::SUCCESS)
        );
    }
}
