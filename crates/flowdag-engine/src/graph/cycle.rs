use std::collections::{HashMap, HashSet};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Find a cycle in a dependency adjacency map.
///
/// Iterative DFS with an explicit recursion stack; a back-edge into a node
/// still on the stack is a cycle. Runs in O(V + E). Returns the ids forming
/// the cycle, first id repeated at the end.
///
/// Edges pointing at ids outside `order` are ignored.
pub fn find_cycle(order: &[String], edges: &HashMap<String, HashSet<String>>) -> Option<Vec<String>> {
    let index: HashMap<&str, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    // Sorted adjacency keeps reported paths stable across runs.
    let adjacency: Vec<Vec<usize>> = order
        .iter()
        .map(|id| {
            let mut next: Vec<usize> = edges
                .get(id)
                .map(|deps| deps.iter().filter_map(|d| index.get(d.as_str()).copied()).collect())
                .unwrap_or_default();
            next.sort_unstable();
            next
        })
        .collect();

    let mut marks = vec![Mark::Unvisited; order.len()];
    // (node, next edge position)
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..order.len() {
        if marks[root] != Mark::Unvisited {
            continue;
        }
        marks[root] = Mark::OnStack;
        stack.push((root, 0));

        while let Some(top) = stack.last_mut() {
            let node = top.0;
            if let Some(&next) = adjacency[node].get(top.1) {
                top.1 += 1;
                match marks[next] {
                    Mark::Unvisited => {
                        marks[next] = Mark::OnStack;
                        stack.push((next, 0));
                    }
                    Mark::OnStack => {
                        let start = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[start..].iter().map(|(n, _)| order[*n].clone()).collect();
                        path.push(order[next].clone());
                        return Some(path);
                    }
                    Mark::Done => {}
                }
            } else {
                marks[node] = Mark::Done;
                stack.pop();
            }
        }
    }
    None
}

/// Union of two adjacency maps.
pub fn combine(
    a: &HashMap<String, HashSet<String>>,
    b: &HashMap<String, HashSet<String>>,
) -> HashMap<String, HashSet<String>> {
    let mut out = a.clone();
    for (id, deps) in b {
        out.entry(id.clone()).or_default().extend(deps.iter().cloned());
    }
    out
}
