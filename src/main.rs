mod cli;
mod package;
mod signal;
mod spawn;
mod supervisor;

use crate::cli::Cli;
use crate::package::NAME;
use crate::signal::SignalTable;
use crate::supervisor::Supervisor;

use log::LevelFilter;
use std::io::Write;
use std::process::exit;

fn main() {
    let config = Cli::parse();

    env_logger::Builder::new()
        .filter_level(if config.debug {
            LevelFilter::Debug
        } else {
            LevelFilter::Off
        })
        .format(|buf, record| writeln!(buf, "[{}] {}", NAME, record.args()))
        .init();

    let table = SignalTable::new(config.use_setsid, &config.rewrites);

    let launched = match spawn::launch(&config.command, config.use_setsid) {
        Ok(launched) => launched,
        Err(err) => {
            eprintln!("[{NAME}] Unable to fork ({}). Exiting.", err.desc());
            exit(1);
        }
    };

    exit(Supervisor::new(launched, table).run());
}
