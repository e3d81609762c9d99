//! Dependency-graph algorithms over the task set
//!
//! `depends_on` edges point from a task to its prerequisite. Edges that name
//! unknown task ids are ignored here; the director resolves or drops them.

use std::collections::{HashMap, HashSet, VecDeque};

use super::task::Task;

/// Find a dependency cycle, returning the ids along it
///
/// Returns `None` when the graph is acyclic.
pub fn find_cycle(tasks: &[Task]) -> Option<Vec<String>> {
    let index: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut colors: HashMap<&str, Color> = tasks.iter().map(|t| (t.id.as_str(), Color::White)).collect();

    fn visit<'a>(
        id: &'a str,
        index: &HashMap<&'a str, &'a Task>,
        colors: &mut HashMap<&'a str, Color>,
        stack: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        colors.insert(id, Color::Gray);
        stack.push(id);

        if let Some(task) = index.get(id) {
            for dep in &task.depends_on {
                let dep = dep.as_str();
                match colors.get(dep) {
                    Some(Color::Gray) => {
                        // Found a back edge; slice the cycle out of the stack
                        let start = stack.iter().position(|s| *s == dep).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Some(cycle);
                    }
                    Some(Color::White) => {
                        if let Some(cycle) = visit(dep, index, colors, stack) {
                            return Some(cycle);
                        }
                    }
                    // Black (already explored) or unknown id
                    _ => {}
                }
            }
        }

        stack.pop();
        colors.insert(id, Color::Black);
        None
    }

    let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for id in ids {
        if colors.get(id) == Some(&Color::White) {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(id, &index, &mut colors, &mut stack) {
                return Some(cycle);
            }
        }
    }

    None
}

/// Whether the task set has a dependency cycle
pub fn has_cycle(tasks: &[Task]) -> bool {
    find_cycle(tasks).is_some()
}

/// Whether adding `from -> to` (from depends on to) would create a cycle
pub fn would_create_cycle(tasks: &[Task], from: &str, to: &str) -> bool {
    if from == to {
        return true;
    }
    // A cycle appears iff `from` is already reachable from `to`
    reachable(tasks, to).contains(from)
}

/// Ids reachable from `start` by following depends_on edges (excluding start)
fn reachable(tasks: &[Task], start: &str) -> HashSet<String> {
    let index: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start.to_string());

    while let Some(id) = queue.pop_front() {
        if let Some(task) = index.get(id.as_str()) {
            for dep in &task.depends_on {
                if seen.insert(dep.clone()) {
                    queue.push_back(dep.clone());
                }
            }
        }
    }

    seen
}

/// Topological order of task ids, prerequisites first
///
/// Returns `None` when the graph has a cycle. Insertion order breaks ties so
/// the result is deterministic.
pub fn topological_order(tasks: &[Task]) -> Option<Vec<String>> {
    let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();

    // in-degree counts only edges between known tasks
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in tasks {
        let degree = task.depends_on.iter().filter(|d| known.contains(d.as_str())).count();
        indegree.insert(task.id.as_str(), degree);
        for dep in &task.depends_on {
            if known.contains(dep.as_str()) {
                dependents.entry(dep.as_str()).or_default().push(task.id.as_str());
            }
        }
    }

    let mut queue: VecDeque<&str> = tasks
        .iter()
        .filter(|t| indegree[t.id.as_str()] == 0)
        .map(|t| t.id.as_str())
        .collect();

    let mut order = Vec::with_capacity(tasks.len());
    while let Some(id) = queue.pop_front() {
        order.push(id.to_string());
        if let Some(children) = dependents.get(id) {
            for child in children {
                let entry = indegree.get_mut(child).expect("indegree entry");
                *entry -= 1;
                if *entry == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if order.len() == tasks.len() { Some(order) } else { None }
}

/// Remove dependency edges implied by a longer path, keeping the DAG minimal
///
/// An edge `u -> v` is redundant when `v` is reachable from another direct
/// dependency of `u`. Returns the number of edges removed. The graph must be
/// acyclic; call [`find_cycle`] first.
pub fn transitive_reduction(tasks: &mut [Task]) -> usize {
    let snapshot: Vec<Task> = tasks.to_vec();
    let mut removed = 0;

    for task in tasks.iter_mut() {
        let direct: Vec<String> = task.depends_on.clone();
        let mut keep = Vec::with_capacity(direct.len());

        for dep in &direct {
            let implied = direct
                .iter()
                .filter(|other| *other != dep)
                .any(|other| reachable(&snapshot, other).contains(dep));
            if implied {
                removed += 1;
            } else {
                keep.push(dep.clone());
            }
        }

        task.depends_on = keep;
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskPhase;

    fn task(id: &str, deps: &[&str]) -> Task {
        let mut t = Task::with_id(id, id, TaskPhase::Build);
        t.depends_on = deps.iter().map(|d| d.to_string()).collect();
        t
    }

    #[test]
    fn test_no_cycle_in_chain() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        assert!(find_cycle(&tasks).is_none());
    }

    #[test]
    fn test_detects_three_cycle() {
        let tasks = vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])];
        let cycle = find_cycle(&tasks).unwrap();
        // The path closes on itself
        assert_eq!(cycle.first(), cycle.last());
        assert!(cycle.len() >= 4);
    }

    #[test]
    fn test_detects_self_cycle() {
        let tasks = vec![task("a", &["a"])];
        assert!(has_cycle(&tasks));
    }

    #[test]
    fn test_unknown_deps_ignored() {
        let tasks = vec![task("a", &["ghost"]), task("b", &["a"])];
        assert!(!has_cycle(&tasks));
    }

    #[test]
    fn test_would_create_cycle() {
        let tasks = vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])];
        // a depends on c would close the loop
        assert!(would_create_cycle(&tasks, "a", "c"));
        // c depends on a is already implied and is fine
        assert!(!would_create_cycle(&tasks, "c", "a"));
        assert!(would_create_cycle(&tasks, "a", "a"));
    }

    #[test]
    fn test_topological_order_chain() {
        let tasks = vec![task("c", &["b"]), task("a", &[]), task("b", &["a"])];
        let order = topological_order(&tasks).unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn test_topological_order_cycle_is_none() {
        let tasks = vec![task("a", &["b"]), task("b", &["a"])];
        assert!(topological_order(&tasks).is_none());
    }

    #[test]
    fn test_reduction_on_linear_chain_removes_nothing() {
        let mut tasks: Vec<Task> = Vec::new();
        for i in 0..20 {
            let deps: Vec<String> = if i == 0 { vec![] } else { vec![format!("t{}", i - 1)] };
            let mut t = Task::with_id(format!("t{}", i), format!("t{}", i), TaskPhase::Build);
            t.depends_on = deps;
            tasks.push(t);
        }

        let removed = transitive_reduction(&mut tasks);
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_reduction_of_complete_order_yields_hamiltonian_path() {
        // Each task depends on every earlier task; the minimal equivalent
        // DAG is the 4-edge chain.
        let mut tasks: Vec<Task> = Vec::new();
        for i in 0..5 {
            let deps: Vec<String> = (0..i).map(|j| format!("t{}", j)).collect();
            let mut t = Task::with_id(format!("t{}", i), format!("t{}", i), TaskPhase::Build);
            t.depends_on = deps;
            tasks.push(t);
        }

        let removed = transitive_reduction(&mut tasks);
        let remaining: usize = tasks.iter().map(|t| t.depends_on.len()).sum();
        assert_eq!(remaining, 4);
        assert_eq!(removed, 6);
        for (i, t) in tasks.iter().enumerate().skip(1) {
            assert_eq!(t.depends_on, vec![format!("t{}", i - 1)]);
        }
    }

    #[test]
    fn test_reduction_keeps_diamond_sides() {
        // d -> b -> a, d -> c -> a: neither side edge is redundant
        let mut tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ];
        let removed = transitive_reduction(&mut tasks);
        assert_eq!(removed, 0);
        assert_eq!(tasks[3].depends_on, vec!["b".to_string(), "c".to_string()]);
    }
}
