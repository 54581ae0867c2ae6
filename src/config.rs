use crate::solver::ConflictSelection;

use anyhow::{anyhow, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Parser, Debug, Default)]
#[command(
    name = "Rust PBS",
    about = "Priority-Based Search for multi-agent path finding.",
    version = "1.0"
)]
pub struct Cli {
    #[arg(long, help = "Path to a YAML config file")]
    pub config: Option<String>,

    #[arg(long, help = "Path to the map file")]
    pub map_path: Option<String>,

    #[arg(long, help = "Path to the MovingAI scenario file")]
    pub scen_path: Option<String>,

    #[arg(long, help = "Path to a YAML agent list, used instead of the scenario file")]
    pub agents_path: Option<String>,

    #[arg(long, help = "Path to the CSV stats file")]
    pub output_path: Option<String>,

    #[arg(long, help = "Path to write the solution paths as JSON")]
    pub solution_path: Option<String>,

    #[arg(long, help = "Number of agents")]
    pub num_agents: Option<usize>,

    #[arg(long, help = "Seed for the random number generator")]
    pub seed: Option<u64>,

    #[arg(long, help = "Suboptimal factor of the low-level search")]
    pub sub_optimal: Option<f64>,

    #[arg(long, help = "Plan agents in one shuffled total order")]
    pub fixed_priority: bool,

    #[arg(long, value_enum, help = "Conflict selection policy")]
    pub conflict_selection: Option<ConflictSelection>,

    #[arg(long, help = "Wall-clock limit of the search in seconds")]
    pub time_limit_secs: Option<u64>,

    #[arg(long, help = "Maximum number of high-level expansions")]
    pub node_limit: Option<usize>,

    #[arg(long, help = "Log filter, e.g. info or mapf_pbs=debug")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub map_path: String,
    pub scen_path: String,
    pub agents_path: Option<String>,
    pub output_path: String,
    pub solution_path: Option<String>,
    pub num_agents: usize,
    pub seed: u64,
    pub sub_optimal: f64,
    pub fixed_priority: bool,
    pub conflict_selection: ConflictSelection,
    pub time_limit_secs: u64,
    pub node_limit: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            map_path: "map_file/empty-8-8/empty-8-8.map".to_string(),
            scen_path: "map_file/empty-8-8/empty-8-8-random-1.scen".to_string(),
            agents_path: None,
            output_path: "result/result.csv".to_string(),
            solution_path: None,
            num_agents: 10,
            seed: 0,
            sub_optimal: 1.0,
            fixed_priority: false,
            conflict_selection: ConflictSelection::Exhaustive,
            time_limit_secs: 60,
            node_limit: 1_000_000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml).context("invalid config yaml")?;
        config.validate()?;
        Ok(config)
    }

    /// Command-line values win over the config file.
    pub fn override_from_command_line(mut self, cli: &Cli) -> anyhow::Result<Self> {
        if let Some(map_path) = &cli.map_path {
            self.map_path = map_path.clone();
        }
        if let Some(scen_path) = &cli.scen_path {
            self.scen_path = scen_path.clone();
        }
        if let Some(agents_path) = &cli.agents_path {
            self.agents_path = Some(agents_path.clone());
        }
        if let Some(output_path) = &cli.output_path {
            self.output_path = output_path.clone();
        }
        if let Some(solution_path) = &cli.solution_path {
            self.solution_path = Some(solution_path.clone());
        }
        if let Some(num_agents) = cli.num_agents {
            self.num_agents = num_agents;
        }
        if let Some(seed) = cli.seed {
            self.seed = seed;
        }
        if let Some(sub_optimal) = cli.sub_optimal {
            self.sub_optimal = sub_optimal;
        }
        if cli.fixed_priority {
            self.fixed_priority = true;
        }
        if let Some(conflict_selection) = cli.conflict_selection {
            self.conflict_selection = conflict_selection;
        }
        if let Some(time_limit_secs) = cli.time_limit_secs {
            self.time_limit_secs = time_limit_secs;
        }
        if let Some(node_limit) = cli.node_limit {
            self.node_limit = node_limit;
        }
        if let Some(log_level) = &cli.log_level {
            self.log_level = log_level.clone();
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sub_optimal.is_nan() || self.sub_optimal < 1.0 {
            return Err(anyhow!(
                "Sub-optimal factor must be at least 1.0, got {}",
                self.sub_optimal
            ));
        }
        if self.num_agents == 0 {
            return Err(anyhow!("Number of agents must be positive"));
        }
        if self.time_limit_secs == 0 {
            return Err(anyhow!("Time limit must be positive"));
        }
        Ok(())
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_limit_secs)
    }
}
