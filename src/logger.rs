use env_logger::{Builder, Target};
use std::io::Write;

pub fn init_logger(verbosity: &str) {
    let level = if verbosity == "1" { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    Builder::from_default_env()
        .target(Target::Stdout)
        .format_module_path(false)
        .format_target(false)
        .filter_level(level)
        .write_style(env_logger::WriteStyle::Auto)
        .format(move |buf, record| writeln!(buf, "{:?}", record.args()))
        .init();
}
