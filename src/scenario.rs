use anyhow::{anyhow, bail, Context, Result};
use rand::prelude::*;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::str::FromStr;
use tracing::info;

use crate::common::Agent;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Route {
    pub start_x: usize,
    pub start_y: usize,
    pub goal_x: usize,
    pub goal_y: usize,
}

impl Route {
    fn to_agent(&self, id: usize) -> Agent {
        Agent {
            id,
            start: (self.start_x, self.start_y),
            goal: (self.goal_x, self.goal_y),
        }
    }
}

type Bucket = Vec<Route>;

/// A MovingAI `.scen` file. Routes keep their file order inside each bucket.
#[derive(Debug)]
pub struct Scenario {
    pub map: String,
    pub map_width: usize,
    pub map_height: usize,
    pub buckets: BTreeMap<usize, Bucket>,
}

impl FromStr for Scenario {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> Result<Self> {
        let mut lines = content.lines().filter(|line| !line.trim().is_empty());

        // First line is "version x.x" which we can skip
        let _version = lines.next().ok_or_else(|| anyhow!("empty scenario"))?;

        let mut scenario = Scenario {
            map: String::new(),
            map_width: 0,
            map_height: 0,
            buckets: BTreeMap::new(),
        };

        for line in lines {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 8 {
                bail!(
                    "scenario line {line:?} has {} fields, expected at least 8",
                    parts.len()
                );
            }
            let field = |index: usize| -> Result<usize> {
                parts[index]
                    .parse()
                    .with_context(|| format!("invalid field {index} in scenario line {line:?}"))
            };

            let bucket_index = field(0)?;
            // Columns come before rows in the file.
            let route = Route {
                start_x: field(5)?,
                start_y: field(4)?,
                goal_x: field(7)?,
                goal_y: field(6)?,
            };

            if scenario.map.is_empty() {
                scenario.map = parts[1].to_string();
                scenario.map_width = field(2)?;
                scenario.map_height = field(3)?;
            }

            scenario
                .buckets
                .entry(bucket_index)
                .or_default()
                .push(route);
        }

        Ok(scenario)
    }
}

impl Scenario {
    pub fn load_from_scen(path: &str) -> Result<Scenario> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario file {path}"))?;
        content
            .parse()
            .with_context(|| format!("failed to parse scenario file {path}"))
    }

    pub fn num_routes(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// `num_agents` distinct routes picked at random.
    pub fn generate_agents<R: Rng + ?Sized>(
        &self,
        num_agents: usize,
        rng: &mut R,
    ) -> Result<Vec<Agent>> {
        let mut available_routes: Vec<&Route> = self.buckets.values().flatten().collect();
        available_routes.sort();
        available_routes.dedup();

        if available_routes.len() < num_agents {
            bail!(
                "Not enough unique routes for {num_agents} agents, only {} available",
                available_routes.len()
            );
        }

        available_routes.shuffle(rng);
        let agents: Vec<Agent> = available_routes
            .into_iter()
            .take(num_agents)
            .enumerate()
            .map(|(id, route)| route.to_agent(id))
            .collect();

        info!("Generate scen: {agents:?}");
        Ok(agents)
    }

    /// The first `num_agents` routes in file order.
    pub fn first_agents(&self, num_agents: usize) -> Result<Vec<Agent>> {
        if self.num_routes() < num_agents {
            bail!(
                "Scenario has {} routes, {num_agents} agents requested",
                self.num_routes()
            );
        }

        Ok(self
            .buckets
            .values()
            .flatten()
            .take(num_agents)
            .enumerate()
            .map(|(id, route)| route.to_agent(id))
            .collect())
    }

    /// Agents listed in YAML, ids numbered from zero in list order.
    pub fn load_agents_from_yaml(path: &str) -> Result<Vec<Agent>> {
        let file = File::open(path).with_context(|| format!("failed to open agent file {path}"))?;
        let agents: Vec<Agent> = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse agent file {path}"))?;

        if let Some((index, agent)) = agents
            .iter()
            .enumerate()
            .find(|(index, agent)| agent.id != *index)
        {
            bail!("agent at position {index} has id {}", agent.id);
        }
        Ok(agents)
    }
}
