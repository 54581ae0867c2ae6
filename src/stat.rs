use anyhow::Context;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const CSV_HEADER: &str = "solver,instance,num_agents,status,runtime_us,cost,root_cost,\
hl_expanded,hl_generated,ll_expanded,ll_generated,num_pathfinding,\
agent_itself_failed,lower_priority_agent_failed,total_conflicts,internal_conflicts,\
external_conflicts,zero_children,one_child,two_children,max_meta_agent_size,\
fixed_priority_restarts,preprocessing_us,low_level_us,conflict_detection_us,\
list_operation_us,update_paths_us,generate_child_us";

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub solution_cost: Option<usize>,
    pub root_cost: usize,

    pub high_level_expanded: usize,
    pub high_level_generated: usize,
    pub low_level_expanded: usize,
    pub low_level_generated: usize,
    pub num_single_pathfinding: usize,

    pub agent_itself_failed: usize,
    pub lower_priority_agent_failed: usize,

    pub num_total_conflicts: usize,
    pub num_internal_conflicts: usize,
    pub num_external_conflicts: usize,

    // Successful children per expansion.
    pub num_0_child: usize,
    pub num_1_child: usize,
    pub num_2_child: usize,

    pub max_meta_agent_size: usize,
    pub fixed_priority_restarts: usize,

    pub runtime: Duration,
    pub runtime_preprocessing: Duration,
    pub runtime_low_level: Duration,
    pub runtime_conflict_detection: Duration,
    pub runtime_list_operation: Duration,
    pub runtime_update_paths: Duration,
    pub runtime_generate_child: Duration,
}

impl Stats {
    pub(crate) fn record_children(&mut self, generated: usize) {
        match generated {
            0 => self.num_0_child += 1,
            1 => self.num_1_child += 1,
            _ => self.num_2_child += 1,
        }
    }

    pub fn print(&self) {
        info!(
            "Cost {:?} (root {}) Time(microseconds) {:?} High level expanded(generated) {}({}) Low level expanded(generated) {}({}) Pathfinding calls {} Max meta-agent size {}",
            self.solution_cost,
            self.root_cost,
            self.runtime.as_micros(),
            self.high_level_expanded,
            self.high_level_generated,
            self.low_level_expanded,
            self.low_level_generated,
            self.num_single_pathfinding,
            self.max_meta_agent_size
        );
        info!(
            "Conflicts total {} internal {} external {}; children 0/1/2: {}/{}/{}; failures itself {} lower {}",
            self.num_total_conflicts,
            self.num_internal_conflicts,
            self.num_external_conflicts,
            self.num_0_child,
            self.num_1_child,
            self.num_2_child,
            self.agent_itself_failed,
            self.lower_priority_agent_failed
        );
    }

    /// Appends one CSV row to `path`, writing the header first if the file is new.
    pub fn append_csv(
        &self,
        path: &str,
        solver: &str,
        instance: &str,
        num_agents: usize,
        status: &str,
    ) -> anyhow::Result<()> {
        let file_path = Path::new(path);
        if let Some(parent) = file_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        let is_new = fs::metadata(file_path).map_or(true, |metadata| metadata.len() == 0);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)
            .with_context(|| format!("failed to open stats file {path}"))?;
        if is_new {
            writeln!(file, "{CSV_HEADER}")?;
        }
        writeln!(file, "{}", self.csv_row(solver, instance, num_agents, status))?;
        Ok(())
    }

    fn csv_row(&self, solver: &str, instance: &str, num_agents: usize, status: &str) -> String {
        let micros = |duration: Duration| duration.as_micros().to_string();
        let cost = self
            .solution_cost
            .map_or_else(|| "-1".to_string(), |cost| cost.to_string());

        [
            solver.to_string(),
            instance.to_string(),
            num_agents.to_string(),
            status.to_string(),
            micros(self.runtime),
            cost,
            self.root_cost.to_string(),
            self.high_level_expanded.to_string(),
            self.high_level_generated.to_string(),
            self.low_level_expanded.to_string(),
            self.low_level_generated.to_string(),
            self.num_single_pathfinding.to_string(),
            self.agent_itself_failed.to_string(),
            self.lower_priority_agent_failed.to_string(),
            self.num_total_conflicts.to_string(),
            self.num_internal_conflicts.to_string(),
            self.num_external_conflicts.to_string(),
            self.num_0_child.to_string(),
            self.num_1_child.to_string(),
            self.num_2_child.to_string(),
            self.max_meta_agent_size.to_string(),
            self.fixed_priority_restarts.to_string(),
            micros(self.runtime_preprocessing),
            micros(self.runtime_low_level),
            micros(self.runtime_conflict_detection),
            micros(self.runtime_list_operation),
            micros(self.runtime_update_paths),
            micros(self.runtime_generate_child),
        ]
        .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_row_matches_header() {
        let stats = Stats {
            solution_cost: Some(12),
            high_level_expanded: 3,
            ..Default::default()
        };
        let row = stats.csv_row("PBS", "empty-8-8", 4, "success");
        assert_eq!(row.split(',').count(), CSV_HEADER.split(',').count());
        assert!(row.starts_with("PBS,empty-8-8,4,success,0,12,0,3,"));
    }

    #[test]
    fn test_append_csv_writes_header_once() {
        let dir = std::env::temp_dir().join(format!("mapf_pbs_stats_{}", std::process::id()));
        let path = dir.join("result.csv");
        let path = path.to_str().unwrap();
        let _ = fs::remove_file(path);

        let stats = Stats::default();
        stats.append_csv(path, "PBS", "a", 1, "success").unwrap();
        stats.append_csv(path, "PBS", "b", 1, "exhausted").unwrap();

        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[2].contains(",-1,"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_record_children() {
        let mut stats = Stats::default();
        stats.record_children(0);
        stats.record_children(2);
        stats.record_children(2);
        assert_eq!(
            (stats.num_0_child, stats.num_1_child, stats.num_2_child),
            (1, 0, 2)
        );
    }
}
