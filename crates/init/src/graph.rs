//! Dependency graph: cycle detection and Kahn topological levels.
//!
//! `after` and `ready` entries form the edge set (an edge points from the
//! dependent service to its prerequisite). `wants` is advisory and never
//! an edge. Roots get level 0; every dependent sits strictly above all of
//! its prerequisites, and the runtime walks services in topological order.

use crate::config::ServiceSet;
use alloc::string::String;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    After,
    Ready,
}

#[derive(Debug, Clone)]
pub enum GraphError {
    UnknownDependency { service: String, dep: String, kind: DepKind },
    /// The cycle path, in dependency order, for the diagnostic.
    Cycle(Vec<String>),
}

impl core::fmt::Display for GraphError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            GraphError::UnknownDependency { service, dep, kind } => {
                let what = match kind {
                    DepKind::After => "after",
                    DepKind::Ready => "ready",
                };
                write!(f, "service '{}' depends on unknown service '{}' ({})", service, dep, what)
            }
            GraphError::Cycle(path) => {
                write!(f, "circular dependency: ")?;
                for (i, name) in path.iter().enumerate() {
                    if i > 0 {
                        write!(f, " -> ")?;
                    }
                    write!(f, "{}", name)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub struct Graph {
    /// `deps[i]` lists (prerequisite index, kind) for service `i`.
    pub deps: Vec<Vec<(usize, DepKind)>>,
    /// Service indices in start order.
    pub topo_order: Vec<usize>,
    /// Topological level per service; prerequisites sit strictly lower.
    pub levels: Vec<u32>,
    pub max_level: u32,
}

fn dfs_cycle(
    deps: &[Vec<(usize, DepKind)>],
    idx: usize,
    visited: &mut [bool],
    in_path: &mut [bool],
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    if in_path[idx] {
        let mut cycle: Vec<usize> = path.clone();
        cycle.push(idx);
        return Some(cycle);
    }
    if visited[idx] {
        return None;
    }

    in_path[idx] = true;
    path.push(idx);

    for &(target, _) in &deps[idx] {
        if let Some(cycle) = dfs_cycle(deps, target, visited, in_path, path) {
            return Some(cycle);
        }
    }

    path.pop();
    in_path[idx] = false;
    visited[idx] = true;
    None
}

/// Build the edge set and run Kahn's algorithm.
pub fn build(set: &ServiceSet) -> Result<Graph, GraphError> {
    let n = set.services.len();
    let mut deps: Vec<Vec<(usize, DepKind)>> = alloc::vec![Vec::new(); n];

    for (i, svc) in set.services.iter().enumerate() {
        for (list, kind) in [(&svc.after, DepKind::After), (&svc.ready, DepKind::Ready)] {
            for dep in list {
                let target = set.find_service(dep).ok_or_else(|| GraphError::UnknownDependency {
                    service: svc.name.clone(),
                    dep: dep.clone(),
                    kind,
                })?;
                deps[i].push((target, kind));
            }
        }
    }

    // Cycle check first, so the error carries the actual cycle path.
    {
        let mut visited = alloc::vec![false; n];
        let mut in_path = alloc::vec![false; n];
        let mut path = Vec::new();
        for i in 0..n {
            if !visited[i] {
                if let Some(cycle) = dfs_cycle(&deps, i, &mut visited, &mut in_path, &mut path) {
                    return Err(GraphError::Cycle(
                        cycle.into_iter().map(|idx| set.services[idx].name.clone()).collect(),
                    ));
                }
            }
        }
    }

    // Kahn by levels: services whose prerequisites are all placed move to
    // the next level together.
    let mut in_degree: Vec<usize> = deps.iter().map(|d| d.len()).collect();
    let mut levels = alloc::vec![0u32; n];
    let mut topo_order = Vec::with_capacity(n);
    let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut level = 0u32;

    while !queue.is_empty() {
        let mut next = Vec::new();
        for &idx in &queue {
            levels[idx] = level;
            topo_order.push(idx);

            for (j, d) in deps.iter().enumerate() {
                if d.iter().any(|&(t, _)| t == idx) {
                    // One satisfied prerequisite per edge instance.
                    let satisfied = d.iter().filter(|&&(t, _)| t == idx).count();
                    in_degree[j] -= satisfied;
                    if in_degree[j] == 0 {
                        next.push(j);
                    }
                }
            }
        }
        queue = next;
        level += 1;
    }

    if topo_order.len() != n {
        // Unreachable after the DFS, kept as a hard invariant.
        return Err(GraphError::Cycle(Vec::new()));
    }

    let max_level = level.saturating_sub(1);
    Ok(Graph { deps, topo_order, levels, max_level })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn set_from(conf: &str) -> ServiceSet {
        config::parse(conf, |_| {})
    }

    #[test]
    fn levels_respect_dependencies() {
        let set = set_from(
            "[service.a]\n\
             [service.b]\nready = a\n\
             [service.c]\nafter = b\n\
             [service.d]\nafter = a\nready = c\n",
        );
        let g = build(&set).unwrap();

        let idx = |name: &str| set.find_service(name).unwrap();
        assert_eq!(g.levels[idx("a")], 0);
        assert_eq!(g.levels[idx("b")], 1);
        assert_eq!(g.levels[idx("c")], 2);
        assert_eq!(g.levels[idx("d")], 3);
        assert_eq!(g.max_level, 3);

        // Every prerequisite is strictly below its dependent.
        for (i, deps) in g.deps.iter().enumerate() {
            for &(t, _) in deps {
                assert!(g.levels[i] > g.levels[t]);
            }
        }

        // Start order never places a dependent before its prerequisite.
        for (pos, &idx) in g.topo_order.iter().enumerate() {
            for &(t, _) in &g.deps[idx] {
                let dep_pos = g.topo_order.iter().position(|&x| x == t).unwrap();
                assert!(dep_pos < pos);
            }
        }
    }

    #[test]
    fn unknown_dependency_is_reported() {
        let set = set_from("[service.a]\nafter = ghost\n");
        match build(&set) {
            Err(GraphError::UnknownDependency { service, dep, .. }) => {
                assert_eq!(service, "a");
                assert_eq!(dep, "ghost");
            }
            other => panic!("expected UnknownDependency, got {:?}", other),
        }
    }

    #[test]
    fn cycle_is_detected_with_path() {
        let set = set_from(
            "[service.a]\nafter = c\n\
             [service.b]\nafter = a\n\
             [service.c]\nafter = b\n",
        );
        match build(&set) {
            Err(GraphError::Cycle(path)) => {
                assert!(path.len() >= 3, "cycle path: {:?}", path);
            }
            other => panic!("expected Cycle, got {:?}", other),
        }
    }

    #[test]
    fn wants_is_not_an_edge() {
        let set = set_from("[service.a]\nwants = b\n[service.b]\nwants = a\n");
        // Mutual wants must not count as a cycle.
        let g = build(&set).unwrap();
        assert_eq!(g.max_level, 0);
    }
}
