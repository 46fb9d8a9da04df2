#![recursion_limit = "1024"]

use clap::{App, Arg};
use colored::*;
use log::{error, info};
use pbr::ProgressBar;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use polyscft::comm::SerialComm;
use polyscft::config;
use polyscft::domain::init_domain;
use polyscft::errors::*;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const EXIT_OK: i32 = 0;
const EXIT_BAD_CLI: i32 = 2;
const EXIT_BAD_ATTRIB: i32 = 3;
const EXIT_RUN_ERROR: i32 = 4;
const EXIT_BAD_INPUT: i32 = 6;

fn main() {
    // initialize the env_logger implementation
    env_logger::init();

    let code = match run() {
        Ok(()) => EXIT_OK,
        Err((code, ref e)) => {
            error!("{}: {}", "error".red(), e);
            for cause in e.iter().skip(1) {
                error!("caused by: {}", cause);
            }
            if let Some(backtrace) = e.backtrace() {
                error!("backtrace: {:?}", backtrace);
            }
            code
        }
    };
    ::std::process::exit(code);
}

fn run() -> std::result::Result<(), (i32, Error)> {
    let app = App::new("polyscft simulation")
        .version(VERSION)
        .about("SCFT field simulator for inhomogeneous polymer melts")
        .arg(
            Arg::with_name("input")
                .short("i")
                .long("input")
                .value_name("FILE")
                .help("TOML parameter file")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .value_name("PREFIX")
                .help("Output file prefix")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("nsteps")
                .short("n")
                .long("nsteps")
                .value_name("N")
                .help("Number of update steps (overrides the input deck)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("restart")
                .short("r")
                .long("restart")
                .value_name("NUM")
                .help("Restart from the dump with this number")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("dump")
                .short("d")
                .long("dump")
                .value_name("PERIOD")
                .help("Dump period (overrides the input deck)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("progress_bar")
                .short("p")
                .long("progress")
                .help("Show a progress bar"),
        );

    let matches = app
        .get_matches_safe()
        .map_err(|e| (EXIT_BAD_CLI, Error::from(e.message)))?;

    let input = matches.value_of("input").unwrap();
    if !Path::new(input).exists() {
        return Err((
            EXIT_BAD_INPUT,
            Error::from(format!("input file '{}' does not exist", input)),
        ));
    }

    let mut settings = config::read_parameter_file(input)
        .chain_err(|| "Error reading parameter file.")
        .map_err(|e| (EXIT_BAD_ATTRIB, e))?;

    if let Some(n) = matches.value_of("nsteps") {
        settings.simulation.nsteps = n
            .parse()
            .map_err(|_| (EXIT_BAD_CLI, Error::from(format!("bad step count '{}'", n))))?;
    }
    if let Some(d) = matches.value_of("dump") {
        settings.simulation.dump_periodicity = d
            .parse()
            .map_err(|_| (EXIT_BAD_CLI, Error::from(format!("bad dump period '{}'", d))))?;
    }
    let restart: Option<usize> = match matches.value_of("restart") {
        Some(r) => Some(r.parse().map_err(|_| {
            (
                EXIT_BAD_CLI,
                Error::from(format!("bad restart number '{}'", r)),
            )
        })?),
        None => None,
    };
    let prefix = matches.value_of("output").unwrap_or("polyscft").to_string();

    let mut domain = init_domain(
        &settings,
        Box::new(SerialComm),
        restart.map(|n| (prefix.as_str(), n)),
    )
    .map_err(|e| match restart {
        Some(_) => (EXIT_BAD_INPUT, e),
        None => (EXIT_BAD_ATTRIB, e),
    })?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|_| (EXIT_RUN_ERROR, Error::from("cannot install signal handler")))?;
    }

    let show_progress = matches.is_present("progress_bar");
    let nsteps = settings.simulation.nsteps;
    let dump_period = settings.simulation.dump_periodicity;
    let step_start = domain.step_count();

    let mut pb = ProgressBar::new(nsteps as u64);
    pb.show_bar = show_progress;
    pb.show_counter = show_progress;
    pb.show_percent = show_progress;
    pb.show_speed = show_progress;
    pb.show_time_left = show_progress;
    pb.show_message = show_progress;

    let start_time = Instant::now();
    info!(
        "running {} steps from step {} with prefix '{}'",
        nsteps, step_start, prefix
    );

    for _ in 0..nsteps {
        if stop.load(Ordering::SeqCst) {
            info!("interrupted; writing final dump");
            break;
        }
        pb.inc();

        domain.update().map_err(|e| (EXIT_RUN_ERROR, e))?;

        if domain.should_dump() {
            let seq = domain.step_count() / dump_period;
            domain
                .dump(&prefix, seq)
                .map_err(|e| (EXIT_RUN_ERROR, e))?;
            info!("step {}: F = {}", domain.step_count(), domain.free_energy());
        }
    }

    // final dump when the run did not end on the dump cadence
    if dump_period > 0 && !domain.should_dump() {
        let seq = domain.step_count() / dump_period + 1;
        domain.dump(&prefix, seq).map_err(|e| (EXIT_RUN_ERROR, e))?;
    }

    pb.finish_print(&format!("{} {} ", "DONE".green().bold(), prefix));
    println!();
    println!(
        "Elapsed time: {:.1} s, final F = {}",
        start_time.elapsed().as_secs_f64(),
        domain.free_energy()
    );

    Ok(())
}
