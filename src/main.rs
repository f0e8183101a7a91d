//! Synchronize a freshly built Android application onto a device.
mod adb;
mod cli;
mod dex;
mod error;
mod logger;
mod manifest;
mod orchestrator;
mod progress;
mod resources;
mod timestamp;

use crate::adb::RealAdb;
use crate::orchestrator::Config;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = match cli::Cli::parse_with_flagfile() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    logger::init_logger(&cli.verbosity);

    let bridge = match RealAdb::new(
        cli.adb.clone(),
        cli.extra_adb_arg.clone(),
        cli.user_home_dir.clone(),
        cli.adb_jobs,
    ) {
        Ok(bridge) => bridge,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let config = Config {
        execroot: cli.execroot,
        stub_datafile: cli.stub_datafile,
        dexmanifest: cli.dexmanifest,
        resource_apk: cli.resource_apk,
        apk: cli.apk,
        split_main_apk: cli.split_main_apk,
        split_apk: cli.split_apk,
        output_marker: cli.output_marker,
        start_app: cli.start_app,
    };

    match orchestrator::run(&bridge, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
