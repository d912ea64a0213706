use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use std::path::Path;
use std::time::{Duration, Instant};

use flightbus::components::run_component;
use flightbus::messages::{unix_time, ComponentId};
use flightbus::shm::RegionToken;
use flightbus::supervisor::{install_shutdown_handler, shutdown_requested};
use flightbus::{status, ExecLauncher, SimConfig, Supervisor};

/// Supervisor control-loop period.
const TICK: Duration = Duration::from_millis(10);
/// Status display period, in ticks.
const STATUS_TICKS: u64 = 100;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = App::new("flightbus")
        .version("0.1.0")
        .author("Avionics Systems Engineering Team")
        .about("Multi-process flight control simulator over a shared-memory bus")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("run")
                .about("Start the flight controller and all simulated components")
                .arg(
                    Arg::with_name("config")
                        .short("c")
                        .long("config")
                        .value_name("PATH")
                        .help("JSON config file (defaults apply when omitted)")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("duration")
                        .short("d")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Run for a fixed duration instead of until Ctrl+C")
                        .takes_value(true)
                        .validator(|v| {
                            v.parse::<u64>().map(|_| ()).map_err(|_| {
                                "Duration must be a whole number of seconds".into()
                            })
                        }),
                ),
        )
        .subcommand(
            // Internal: how the supervisor re-execs itself into components.
            SubCommand::with_name("child")
                .setting(AppSettings::Hidden)
                .arg(
                    Arg::with_name("component")
                        .long("component")
                        .value_name("NAME")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("bus")
                        .long("bus")
                        .value_name("TOKEN")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("config")
                        .long("config")
                        .value_name("JSON")
                        .required(true)
                        .takes_value(true),
                ),
        )
        .get_matches();

    let code = match matches.subcommand() {
        ("run", Some(sub)) => run_supervisor(sub),
        ("child", Some(sub)) => run_child(sub),
        _ => unreachable!("subcommand is required"),
    };
    std::process::exit(code);
}

fn run_supervisor(matches: &ArgMatches<'_>) -> i32 {
    let config = match matches.value_of("config") {
        Some(path) => match SimConfig::load(Path::new(path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{} {}", "config error:".red().bold(), e);
                return 1;
            }
        },
        None => SimConfig::default(),
    };
    let duration = matches
        .value_of("duration")
        .map(|v| Duration::from_secs(v.parse().unwrap()));

    if let Err(e) = install_shutdown_handler() {
        eprintln!("{} {}", "signal setup failed:".red().bold(), e);
        return 1;
    }

    let mut sup = match Supervisor::new(config, ExecLauncher) {
        Ok(sup) => sup,
        Err(e) => {
            eprintln!("{} {}", "bus setup failed:".red().bold(), e);
            return 1;
        }
    };

    println!(
        "{}",
        "flightbus: starting flight controller".bright_blue().bold()
    );
    if let Err(e) = sup.start_all() {
        eprintln!("{} {}", "startup failed:".red().bold(), e);
        sup.shutdown();
        return 1;
    }

    let started = Instant::now();
    let mut ticks: u64 = 0;
    while !shutdown_requested() {
        if let Some(limit) = duration {
            if started.elapsed() >= limit {
                break;
            }
        }
        sup.tick();
        ticks += 1;
        if ticks % STATUS_TICKS == 0 {
            status::print(&sup, unix_time());
        }
        std::thread::sleep(TICK);
    }

    println!("{}", "flightbus: shutting down".yellow());
    sup.shutdown();
    0
}

fn run_child(matches: &ArgMatches<'_>) -> i32 {
    let name = matches.value_of("component").unwrap();
    let id = match ComponentId::from_name(name) {
        Some(id) => id,
        None => {
            eprintln!("unknown component `{}`", name);
            return 1;
        }
    };
    let token = RegionToken::new(matches.value_of("bus").unwrap());
    let config = match SimConfig::from_json(matches.value_of("config").unwrap()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bad component config: {}", e);
            return 1;
        }
    };

    match run_component(id, &token, &config) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} exited with error: {}", id.name(), e);
            1
        }
    }
}
