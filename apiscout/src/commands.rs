use crate::CLAP_STYLING;
use clap::{arg, command};
use std::path::PathBuf;

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("apiscout")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("apiscout")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(-v --"verbose" "Log at debug level regardless of the configured level")
                .required(false),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Writes the default configuration and creates the capture database")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Directory for config.toml and apiscout.db")
                        .default_value("~/.config/apiscout/"),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite an existing configuration and database")
                        .required(false),
                ),
        )
        .subcommand(
            command!("crawl")
                .about(
                    "Crawl a site, capture the JSON API traffic behind it and store \
                anonymized exchanges.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(true)
                        .help("The start URL. A missing scheme defaults to http://"),
                )
                .arg(config_arg())
                .arg(
                    arg!(-d --"depth" <DEPTH>)
                        .required(false)
                        .help("Maximum link depth (overrides [crawl].max_depth)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(db_arg())
                .arg(
                    arg!(--"ignore-robots")
                        .required(false)
                        .help("Do not fetch or honour robots.txt")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"no-progress")
                        .required(false)
                        .help("Disable the progress spinner")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            command!("stats")
                .about("Show capture totals and the most called endpoints")
                .arg(config_arg())
                .arg(db_arg()),
        )
        .subcommand(
            command!("clear")
                .about("Delete every captured endpoint, call and crawl session")
                .arg(config_arg())
                .arg(db_arg())
                .arg(
                    arg!(-y --"yes")
                        .required(false)
                        .help("Do not ask for confirmation")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
}

fn config_arg() -> clap::Arg {
    arg!(-c --"config" <PATH>)
        .required(false)
        .help("Config file (default: ~/.config/apiscout/config.toml when present)")
        .value_parser(clap::value_parser!(PathBuf))
}

fn db_arg() -> clap::Arg {
    arg!(--"db" <PATH>)
        .required(false)
        .help("Database file (overrides [database].path)")
        .value_parser(clap::value_parser!(PathBuf))
}
