use mapf_pbs::common::{is_collide, Agent, PriorityGraph};
use mapf_pbs::config::Config;
use mapf_pbs::map::Map;
use mapf_pbs::solver::{ConflictSelection, SolveError, Solver, PBS};

use clap::ValueEnum;
use proptest::prelude::*;

fn graph_from(num_agents: usize, edges: &[(usize, usize)]) -> PriorityGraph {
    let mut graph = PriorityGraph::new(num_agents);
    for &(high, low) in edges {
        let (high, low) = (high % num_agents, low % num_agents);
        if high != low && !graph.precedes(low, high) {
            graph.add_edge(high, low);
        }
    }
    graph
}

fn instance() -> impl Strategy<Value = (usize, usize, Vec<(usize, usize)>, Vec<(usize, usize)>)> {
    (2usize..5, 2usize..5, 2usize..5).prop_flat_map(|(height, width, num_agents)| {
        let cells: Vec<usize> = (0..height * width).collect();
        let num_agents = num_agents.min(height * width);
        let to_positions = move |cells: Vec<usize>| -> Vec<(usize, usize)> {
            cells
                .into_iter()
                .take(num_agents)
                .map(|cell| (cell / width, cell % width))
                .collect()
        };
        (
            Just(height),
            Just(width),
            Just(cells.clone()).prop_shuffle().prop_map(to_positions),
            Just(cells).prop_shuffle().prop_map(to_positions),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn priority_closure_stays_acyclic(
        num_agents in 2usize..8,
        edges in prop::collection::vec((0usize..8, 0usize..8), 0..20),
    ) {
        let graph = graph_from(num_agents, &edges);

        for a in 0..num_agents {
            prop_assert!(!graph.precedes(a, a));
            for b in 0..num_agents {
                prop_assert!(!(graph.precedes(a, b) && graph.precedes(b, a)));
                prop_assert_eq!(graph.precedes(a, b), graph.higher(b).contains(&a));
                for c in 0..num_agents {
                    if graph.precedes(a, b) && graph.precedes(b, c) {
                        prop_assert!(graph.precedes(a, c));
                    }
                }
            }
        }
    }

    #[test]
    fn topological_order_covers_descendants(
        num_agents in 2usize..8,
        edges in prop::collection::vec((0usize..8, 0usize..8), 0..20),
        agent in 0usize..8,
    ) {
        let graph = graph_from(num_agents, &edges);
        let agent = agent % num_agents;
        let order = graph.topological_from(agent);

        prop_assert_eq!(order[0], agent);
        prop_assert_eq!(order.len(), graph.lower(agent).len() + 1);
        for (i, &first) in order.iter().enumerate() {
            for &after in &order[i + 1..] {
                prop_assert!(!graph.precedes(after, first));
            }
        }

        let meta_agent = graph.meta_agent(agent, usize::MAX);
        for &member in &order {
            prop_assert!(meta_agent.contains(&member));
        }
    }

    #[test]
    fn solutions_are_collision_free(
        (height, width, starts, goals) in instance(),
        policy_index in 0usize..9,
        fixed_priority in any::<bool>(),
    ) {
        let rows = vec![".".repeat(width); height];
        let map = Map::from_rows(&rows);
        let agents: Vec<Agent> = starts
            .into_iter()
            .zip(goals)
            .enumerate()
            .map(|(id, (start, goal))| Agent { id, start, goal })
            .collect();
        let config = Config {
            conflict_selection: ConflictSelection::value_variants()[policy_index],
            fixed_priority,
            time_limit_secs: 1,
            node_limit: 5_000,
            ..Config::default()
        };

        let mut solver = PBS::new(agents.clone(), &map);
        match solver.solve(&config) {
            Ok(solution) => {
                prop_assert!(solution.verify(&map, &agents));
                prop_assert_eq!(
                    solution.cost,
                    solution.paths.iter().map(|path| path.len() - 1).sum::<usize>()
                );
                for a1 in 0..agents.len() {
                    for a2 in (a1 + 1)..agents.len() {
                        prop_assert!(!is_collide(&solution.paths[a1], &solution.paths[a2]));
                    }
                }
            }
            Err(SolveError::Exhausted) | Err(SolveError::BudgetExceeded { .. }) => {}
            Err(err @ SolveError::InvariantViolation(_)) => {
                prop_assert!(false, "{}", err);
            }
        }
    }
}
