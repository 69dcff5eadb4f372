use clap::{Arg, Command};

pub(crate) const STATE: &str = "state";
pub(crate) const LIST: &str = "list";
pub(crate) const CLEAN: &str = "clean";
pub(crate) const TOPOLOGY: &str = "topology";

pub(crate) fn root_cli() -> Command {
    Command::new("topoflow")
        .about("Offline tooling for nodes hosting named topologies")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_state_subcommand())
}

fn add_state_subcommand() -> Command {
    Command::new(STATE)
        .about("Inspect and clean the local state of named topologies. Stop the node first.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new(LIST).about("List named topologies with local state"))
        .subcommand(
            Command::new(CLEAN)
                .about("Delete the local state of a named topology")
                .arg(
                    Arg::new(TOPOLOGY)
                        .required(true)
                        .help("Name of the topology"),
                ),
        )
}
