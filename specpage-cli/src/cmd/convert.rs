use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use specpage_core::{CancellationToken, Converter};
use std::process::ExitCode;

use crate::config::SpecpageConfig;

/// Arguments shared by every command that converts a source tree.
pub fn add_build_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("input")
                .value_name("INPUT_DIR")
                .help("Directory containing the specification documents")
                .required(true),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory for generated pages [default: ./docs]"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file [default: ./specpage.toml]"),
        )
        .arg(
            Arg::new("title")
                .long("title")
                .value_name("TITLE")
                .help("Title written to index.json"),
        )
        .arg(
            Arg::new("theme")
                .short('t')
                .long("theme")
                .value_name("DIR")
                .help("Directory with a page.md template override"),
        )
}

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("convert"))
        .about("Convert specification documents into documentation pages")
}

pub fn execute(args: &ArgMatches) -> Result<ExitCode> {
    let config = SpecpageConfig::load(args)?;
    convert(&config)
}

/// Fails only when a document could not be converted; validation warnings
/// still exit successfully.
fn convert(config: &SpecpageConfig) -> Result<ExitCode> {
    let converter = Converter::builder()
        .source_dir(&config.build.input)
        .output_dir(&config.build.output)
        .site_config(config.site.clone())
        .build()?;
    let report = converter.convert_all(&CancellationToken::new())?;

    println!(
        "Converted {} document(s) into {}",
        report.rendered.len(),
        converter.output_dir().display()
    );
    if report.has_fatal() {
        for failure in &report.failures {
            eprintln!("error: {}: {}", failure.path.display(), failure.error);
        }
        eprintln!("{} document(s) could not be converted", report.failures.len());
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}
