use clap::{App, Arg, ArgMatches};
use colored::*;
use std::net::SocketAddr;
use std::path::Path;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

use flightcheck::config::HarnessConfig;
use flightcheck::logging::init_logging;
use flightcheck::probes::{self, ProbeEnv};
use flightcheck::runner::{select_probes, ProbeOutcome, ProbeReport, ProbeRunner, RunSummary};
use flightcheck::transport::UdpTransport;

const EXIT_FAILING: i32 = 1;
const EXIT_SETUP: i32 = 2;

fn cli() -> App<'static, 'static> {
    App::new("flightcheck")
        .version("0.1.0")
        .about("🛩️  Flight controller self-check - run the on-board diagnostic probes once")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bind")
                .short("b")
                .long("bind")
                .value_name("ADDR")
                .help("Local telemetry endpoint, e.g. 0.0.0.0:14540")
                .takes_value(true)
                .validator(validate_addr),
        )
        .arg(
            Arg::with_name("fcu")
                .long("fcu")
                .value_name("ADDR")
                .help("Fixed FCU endpoint; learned from the first inbound datagram when omitted")
                .takes_value(true)
                .validator(validate_addr),
        )
        .arg(
            Arg::with_name("skip")
                .long("skip")
                .value_name("NAME")
                .help("Skip a probe by name")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("only")
                .long("only")
                .value_name("NAME")
                .help("Run only the named probe")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("list")
                .short("l")
                .long("list")
                .help("List probes in run order and exit"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable debug logging"),
        )
}

fn validate_addr(value: String) -> Result<(), String> {
    value
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| format!("'{}' is not a socket address (host:port)", value))
}

/// Configuration file (or defaults) with command line overrides applied.
fn build_config(matches: &ArgMatches) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => HarnessConfig::load(Path::new(path))?,
        None => HarnessConfig::default(),
    };

    if let Some(bind) = matches.value_of("bind") {
        config.link.bind = bind.parse()?;
    }
    if let Some(fcu) = matches.value_of("fcu") {
        config.link.remote = Some(fcu.parse()?);
    }
    if let Some(only) = matches.values_of("only") {
        config.run.only = only.map(str::to_string).collect();
    }
    if let Some(skip) = matches.values_of("skip") {
        config.run.skip.extend(skip.map(str::to_string));
    }
    config.validate()?;
    Ok(config)
}

fn print_report(report: &ProbeReport) {
    let elapsed = format!("({:.1}s)", report.elapsed.as_secs_f64()).dimmed();
    match &report.outcome {
        ProbeOutcome::Ok => {
            println!("{} {} {}", "✅".green(), report.name.bright_white(), elapsed);
        }
        ProbeOutcome::Reported(findings) => {
            let marker = if findings.failures.is_empty() { "ℹ️ ".bright_blue() } else { "❌".red() };
            println!("{} {} {}", marker, report.name.bright_white(), elapsed);
            for failure in &findings.failures {
                println!("     {} {}", "✗".bright_red(), failure.bright_red());
            }
            for info in &findings.infos {
                println!("     {} {}", "·".dimmed(), info);
            }
        }
        ProbeOutcome::Errored { error } => {
            println!("{} {} {}", "💥".red(), report.name.bright_white(), elapsed);
            println!("     {} {}", "exception occurred:".bright_red(), error);
        }
    }
}

fn print_summary(reports: &[ProbeReport]) -> RunSummary {
    let summary = RunSummary::from_reports(reports);
    println!();
    println!("{}", "🛩️  Self-check summary".bright_blue().bold());
    for report in reports {
        print_report(report);
    }
    println!();

    let totals = format!(
        "{} probes: {} OK, {} with findings, {} errored",
        reports.len(),
        summary.ok,
        summary.reported,
        summary.errored
    );
    if summary.failing == 0 {
        println!("{}", totals.bright_green());
    } else {
        println!("{}", totals.bright_yellow());
    }
    summary
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_logging(matches.is_present("verbose"));

    if matches.is_present("list") {
        for probe in probes::default_probes() {
            println!("{}", probe.name());
        }
        return;
    }

    let config = match build_config(&matches) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(EXIT_SETUP);
        }
    };

    let transport = match UdpTransport::bind(&config.link).await {
        Ok(transport) => transport,
        Err(e) => {
            error!("Cannot open telemetry link on {}: {}", config.link.bind, e);
            process::exit(EXIT_SETUP);
        }
    };

    let selected = select_probes(probes::default_probes(), &config.run.only, &config.run.skip);
    info!("🛩️  Running {} probes", selected.len());

    let runner = ProbeRunner::new(config.run.probe_deadline());
    let env = Arc::new(ProbeEnv::over_mavlink(config, transport));
    let reports = runner.run(env, &selected).await;

    let summary = print_summary(&reports);
    if summary.failing > 0 {
        process::exit(EXIT_FAILING);
    }
}
