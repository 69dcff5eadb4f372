use std::env;
use std::error::Error;
use std::io::{self, Write};

use clap::ArgMatches;
use topoflow_core::cleanup::{PersistedStateStore, StateDirectory};
use topoflow_core::config::NodeConfig;
use topoflow_core::topology::validate_topology_name;
use tracing::{error, info};

mod cmdline;
mod setup_tracing;

fn main() -> Result<(), Box<dyn Error>> {
    setup_tracing::register();

    let matches = cmdline::root_cli().get_matches();
    if let Err(e) = run(&matches, &mut io::stdout()) {
        error!("{e:?}");
        return Err(e);
    }
    info!("Exiting...");
    Ok(())
}

fn run(matches: &ArgMatches, out: &mut impl Write) -> Result<(), Box<dyn Error>> {
    let config = NodeConfig::load(env::vars())?;
    let state = StateDirectory::from_config(&config);

    match matches.subcommand() {
        Some((cmdline::STATE, state_matches)) => run_state(&state, state_matches, out),
        _ => Err("Unknown command".into()),
    }
}

fn run_state(
    state: &StateDirectory,
    matches: &ArgMatches,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    match matches.subcommand() {
        Some((cmdline::LIST, _)) => {
            for topology in state.topologies_with_state()? {
                let tasks: Vec<String> = state
                    .task_ids(&topology)?
                    .iter()
                    .map(ToString::to_string)
                    .collect();
                writeln!(out, "{topology}\t{}", tasks.join(","))?;
            }
            Ok(())
        }
        Some((cmdline::CLEAN, clean_matches)) => {
            let topology = clean_matches
                .get_one::<String>(cmdline::TOPOLOGY)
                .ok_or("Missing topology name")?;
            validate_topology_name(topology)?;
            info!(
                topology = %topology,
                dir = %state.named_topology_dir(topology)?.display(),
                "Cleaning local state"
            );
            state.clear_state(topology)?;
            writeln!(out, "Cleaned local state of {topology}")?;
            Ok(())
        }
        _ => Err("Unknown state command".into()),
    }
}
