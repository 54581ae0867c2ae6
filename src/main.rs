use mapf_pbs::common::Agent;
use mapf_pbs::config::{Cli, Config};
use mapf_pbs::map::Map;
use mapf_pbs::scenario::Scenario;
use mapf_pbs::solver::{SolveError, Solver, PBS};

use anyhow::{bail, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_file) = cli.config.as_ref() {
        let config_str = fs::read_to_string(config_file)
            .with_context(|| format!("failed to read config file: {config_file}"))?;
        Config::from_yaml_str(&config_str)
            .with_context(|| format!("error with config file: {config_file}"))?
    } else {
        Config::default()
    }
    .override_from_command_line(&cli)?;

    // An explicit --log-level beats RUST_LOG, which beats the config file.
    let filter = match (&cli.log_level, EnvFilter::try_from_default_env()) {
        (None, Ok(filter)) => filter,
        _ => EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("invalid log level: {}", config.log_level))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    if cli.config.is_none() {
        info!("No config file specified, using default config");
    }

    let map = Map::from_file(&config.map_path)?;
    let agents = load_agents(&config)?;
    for agent in &agents {
        if !agent.verify(&map) {
            bail!("agent {} starts or ends on a blocked cell", agent.id);
        }
    }

    let mut solver = PBS::new(agents.clone(), &map);
    let result = solver.solve(&config);

    let status = match &result {
        Ok(_) => "success",
        Err(err) => err.status(),
    };
    let solver_name = if config.fixed_priority { "PP" } else { "PBS" };
    solver.stats().append_csv(
        &config.output_path,
        solver_name,
        &instance_name(&config),
        agents.len(),
        status,
    )?;

    match result {
        Ok(solution) => {
            if !solution.verify(&map, &agents) {
                bail!("solver returned an invalid solution");
            }
            info!(
                "cost {}, makespan {}",
                solution.cost,
                solution.makespan()
            );
            if let Some(solution_path) = &config.solution_path {
                if let Some(parent) = Path::new(solution_path)
                    .parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                {
                    fs::create_dir_all(parent)?;
                }
                fs::write(solution_path, serde_json::to_string_pretty(&solution)?)
                    .with_context(|| format!("failed to write solution to {solution_path}"))?;
            }
        }
        Err(err @ SolveError::InvariantViolation(_)) => {
            error!("{err}");
            return Err(err.into());
        }
        Err(err @ SolveError::Exhausted) => error!("{err}"),
        Err(err) => warn!("{err}"),
    }

    Ok(())
}

fn load_agents(config: &Config) -> anyhow::Result<Vec<Agent>> {
    if let Some(agents_path) = &config.agents_path {
        return Scenario::load_agents_from_yaml(agents_path);
    }

    let scenario = Scenario::load_from_scen(&config.scen_path)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    scenario.generate_agents(config.num_agents, &mut rng)
}

fn instance_name(config: &Config) -> String {
    let source = config.agents_path.as_deref().unwrap_or(&config.scen_path);
    Path::new(source)
        .file_stem()
        .map_or_else(|| source.to_string(), |stem| stem.to_string_lossy().into_owned())
}
