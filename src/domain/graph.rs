use super::{ConfigGraph, Container};
use std::collections::HashSet;
use tracing::debug;

/// Sort (and possibly enlarge) a set of containers so it can be used for
/// starting or stopping a group without breaking any links.
///
/// The result is in start order: dependencies precede dependents. Reverse
/// it for stopping.
///
/// `add_dependencies` pulls in containers the given ones link to (useful
/// for starting). `add_reverse_dependencies` pulls in containers that link
/// to the given ones, transitively (useful for stopping — everything that
/// would be broken).
///
/// Termination is guaranteed by the graph's acyclicity invariant; the
/// repeated fixed-point passes are O(n²) over the container count, which
/// is fine at the tens-of-containers scale this tool targets.
pub fn order_by_dependency<'a>(
    graph: &'a ConfigGraph,
    requested: &[&'a Container],
    add_dependencies: bool,
    add_reverse_dependencies: bool,
) -> Vec<&'a Container> {
    // work on graph positions so membership checks are unambiguous
    let position = |name: &str| {
        graph
            .position(name)
            .expect("links are validated at configuration load")
    };

    let mut working: Vec<usize> = requested.iter().map(|c| position(&c.name)).collect();
    let mut in_working: HashSet<usize> = working.iter().copied().collect();

    if add_reverse_dependencies {
        let mut changed = true;
        while changed {
            changed = false;
            for (idx, container) in graph.all().iter().enumerate() {
                if in_working.contains(&idx) {
                    continue;
                }
                let depends_on_set = container
                    .links
                    .iter()
                    .any(|link| in_working.contains(&position(link)));
                if depends_on_set {
                    debug!(
                        "adding reverse dependency {} to the given list of containers",
                        container.name
                    );
                    working.push(idx);
                    in_working.insert(idx);
                    changed = true;
                }
            }
        }
    }

    let mut ordered: Vec<usize> = Vec::new();
    let mut in_ordered: HashSet<usize> = HashSet::new();
    let mut changed = true;
    while changed {
        changed = false;
        for idx in working.clone() {
            if in_ordered.contains(&idx) {
                continue;
            }
            let mut links_satisfied = true;
            for link in &graph.all()[idx].links {
                let link_idx = position(link);
                if !in_working.contains(&link_idx) {
                    if add_dependencies {
                        debug!("adding dependency {link} to the given list of containers");
                        working.push(link_idx);
                        in_working.insert(link_idx);
                        changed = true;
                    } else {
                        // dependency cannot be satisfied within the set, ignore
                        continue;
                    }
                }
                if !in_ordered.contains(&link_idx) {
                    links_satisfied = false;
                }
            }
            if links_satisfied {
                ordered.push(idx);
                in_ordered.insert(idx);
                changed = true;
            }
        }
    }

    ordered.into_iter().map(|idx| &graph.all()[idx]).collect()
}
