use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shared::{
    domain::{ConnectionState, PopulationIndex},
    protocol::{Command, TagPayload, ViewKind},
};
use sync_core::{load_settings, Subscription, ViewSnapshot};
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Follow and control a running evolution engine over its dashboard endpoints")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ViewArg {
    PopulationList,
    PopulationDetail,
    Individual,
}

impl From<ViewArg> for ViewKind {
    fn from(view: ViewArg) -> ViewKind {
        match view {
            ViewArg::PopulationList => ViewKind::PopulationList,
            ViewArg::PopulationDetail => ViewKind::PopulationDetail,
            ViewArg::Individual => ViewKind::Individual,
        }
    }
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Stream state snapshots from an endpoint until interrupted.
    Watch {
        #[arg(long)]
        url: String,
        #[arg(long, value_enum, default_value_t = ViewArg::PopulationList)]
        view: ViewArg,
    },
    /// Add a population from a YAML configuration file.
    AddPopulation {
        #[arg(long)]
        url: String,
        #[arg(long)]
        configuration_file: PathBuf,
    },
    /// Remove a population by its index.
    RemovePopulation {
        #[arg(long)]
        url: String,
        #[arg(long)]
        population_index: usize,
    },
    /// Replace a population's configuration from a YAML file.
    UpdateConfiguration {
        #[arg(long)]
        url: String,
        #[arg(long)]
        configuration_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Watch { url, view } => watch(&url, view.into()).await,
        CliCommand::AddPopulation {
            url,
            configuration_file,
        } => {
            let configuration = read_configuration(&configuration_file)?;
            send_command(
                &url,
                ViewKind::PopulationList,
                Command::AddPopulation { configuration },
            )
            .await
        }
        CliCommand::RemovePopulation {
            url,
            population_index,
        } => {
            send_command(
                &url,
                ViewKind::PopulationList,
                Command::RemovePopulation {
                    population_index: PopulationIndex(population_index),
                },
            )
            .await
        }
        CliCommand::UpdateConfiguration {
            url,
            configuration_file,
        } => {
            let configuration = read_configuration(&configuration_file)?;
            send_command(
                &url,
                ViewKind::PopulationDetail,
                Command::UpdateConfiguration { configuration },
            )
            .await
        }
    }
}

fn read_configuration(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from '{}'", path.display()))
}

async fn watch(url: &str, view: ViewKind) -> Result<()> {
    let subscription = Subscription::open(url, view, load_settings())?;
    let mut updates = subscription.updates();
    let mut state = subscription.state_watch();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                subscription.close().await;
                return Ok(());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                let current = *state.borrow_and_update();
                println!("connection: {current}");
                if current.is_terminal() {
                    if let Some(err) = subscription.last_error().await {
                        bail!("subscription ended: {err}");
                    }
                    return Ok(());
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
                print_snapshot(&subscription.snapshot().await);
            }
        }
    }
}

fn print_snapshot(snapshot: &ViewSnapshot) {
    println!(
        "[{}] ready={} connection={}",
        snapshot.view, snapshot.ready, snapshot.connection
    );
    for (tag, payload) in &snapshot.values {
        println!("  {tag}: {}", describe(payload));
    }
    for (rank, (id, member)) in snapshot.members_by_fitness().into_iter().take(5).enumerate() {
        match member.fitness {
            Some(fitness) => println!("  #{} {id} fitness={fitness}", rank + 1),
            None => println!("  #{} {id} unevaluated", rank + 1),
        }
    }
}

fn describe(payload: &TagPayload) -> String {
    match payload {
        TagPayload::Configuration(text) | TagPayload::InitialConfiguration(text) => {
            format!("{} line(s) of configuration", text.lines().count())
        }
        TagPayload::CurrentMetrics(metrics) => format!("{} population(s)", metrics.len()),
        TagPayload::DetailedMetrics(detailed) => format!(
            "{} member(s), {} history row(s)",
            detailed.current.amount_of_members,
            detailed.history.data.len()
        ),
        TagPayload::IndividualType(name) | TagPayload::CreationType(name) => name.clone(),
        TagPayload::Members(members) => format!("{} member(s)", members.len()),
        TagPayload::GenealogyParents(parents) => format!("{} parent(s)", parents.len()),
        TagPayload::GenealogyChildren(children) => format!("{} child(ren)", children.len()),
        TagPayload::Fitness(Some(fitness)) => fitness.to_string(),
        TagPayload::Fitness(None) => "unevaluated".to_string(),
        TagPayload::Genome(value)
        | TagPayload::EvaluationResult(value)
        | TagPayload::ComputationalCost(value) => value.to_string(),
    }
}

async fn send_command(url: &str, view: ViewKind, command: Command) -> Result<()> {
    let subscription = Subscription::open(url, view, load_settings())?;
    let mut state = subscription.state_watch();
    let opened = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let current = *state.borrow_and_update();
            if current == ConnectionState::Open {
                return Ok(());
            }
            if current.is_terminal() {
                return Err(current);
            }
            if state.changed().await.is_err() {
                return Err(current);
            }
        }
    })
    .await;

    match opened {
        Ok(Ok(())) => {}
        Ok(Err(state)) => {
            let detail = subscription
                .last_error()
                .await
                .map(|err| err.to_string())
                .unwrap_or_else(|| state.to_string());
            bail!("could not connect to '{url}': {detail}");
        }
        Err(_) => bail!("timed out connecting to '{url}'"),
    }

    subscription.send(&command).await?;
    info!(command = command.name(), "command sent");
    subscription.close().await;
    Ok(())
}
