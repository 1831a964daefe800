use anyhow::Context;
use canopy_controller::simulate::{hierarchy, parse_objects, render, simulate};
use canopy_controller::ManagerOptions;
use canopy_model::Config;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("canopy-controller")
        .version(canopy_controller::VERSION)
        .about("Hierarchical scope controller")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .arg(
            Arg::new("workers")
                .long("workers")
                .global(true)
                .default_value("4")
                .value_parser(value_parser!(usize))
                .help("Workers per controller"),
        )
        .subcommand(
            Command::new("check-config")
                .about("Load and validate a configuration file")
                .arg(config_arg()),
        )
        .subcommand(Command::new("config-schema").about("Print the JSON schema of the configuration"))
        .subcommand(
            Command::new("simulate")
                .about("Converge a set of objects in memory and print the result")
                .arg(config_arg())
                .arg(
                    Arg::new("objects")
                        .long("objects")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Multi-document YAML with scopes, intents, and resources"),
                )
                .arg(
                    Arg::new("timeout-secs")
                        .long("timeout-secs")
                        .default_value("30")
                        .value_parser(value_parser!(u64))
                        .help("Give up if the objects have not converged by then"),
                )
                .arg(
                    Arg::new("tree")
                        .long("tree")
                        .action(ArgAction::SetTrue)
                        .help("Print the converged scope tree instead of the objects"),
                ),
        )
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .required(true)
        .value_parser(value_parser!(PathBuf))
        .help("Configuration file (YAML)")
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn path(args: &ArgMatches, name: &str) -> anyhow::Result<PathBuf> {
    args.get_one::<PathBuf>(name)
        .cloned()
        .with_context(|| format!("--{name} is required"))
}

async fn run_simulate(args: &ArgMatches, workers: usize) -> anyhow::Result<()> {
    let config = Config::from_file(path(args, "config")?)?.validate()?;
    let objects_path = path(args, "objects")?;
    let data = std::fs::read_to_string(&objects_path)
        .with_context(|| format!("failed to read {}", objects_path.display()))?;
    let objects = parse_objects(&data)?;
    let timeout = Duration::from_secs(args.get_one::<u64>("timeout-secs").copied().unwrap_or(30));

    let options = ManagerOptions {
        workers,
        ..ManagerOptions::default()
    };
    let converged = simulate(config, objects, options, timeout).await?;
    if args.get_flag("tree") {
        print!("{}", hierarchy(&converged)?.render());
    } else {
        print!("{}", render(&converged)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));
    let workers = matches.get_one::<usize>("workers").copied().unwrap_or(4);

    match matches.subcommand() {
        Some(("check-config", args)) => {
            let path = path(args, "config")?;
            let config = Config::from_file(&path)?;
            let validated = config.validate()?;
            println!(
                "{}: ok ({} watched kinds, {} naming policies)",
                path.display(),
                validated.watches.len(),
                validated.naming_policies.len()
            );
        }
        Some(("config-schema", _)) => {
            let schema = schemars::schema_for!(Config);
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Some(("simulate", args)) => run_simulate(args, workers).await?,
        _ => anyhow::bail!("no command given, see --help"),
    }
    Ok(())
}
