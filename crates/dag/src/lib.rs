//! Parallel DAG traversal engine.
//!
//! Given a set of start nodes, a resolver that returns a node's direct
//! dependencies, and a visitor that processes a node once all its
//! dependencies have been visited, [`traverse`] calls each function at most
//! once per unique node and guarantees: for every edge N → M (N depends on
//! M), `visit(M)` returns successfully before `visit(N)` is ever invoked.
//!
//! The backup, restore, and verify pipelines are all instances of this one
//! engine with different resolver/visitor pairs — the directory tree is the
//! dependency graph, children are dependencies, and loading/writing/hashing
//! a node is the visit.

#![deny(unsafe_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// A cancellation handle threaded into every resolver and visitor call.
///
/// A resolver or visitor that blocks on external work should poll
/// [`is_cancelled`](Cancel::is_cancelled) and unwind promptly once the
/// traversal has failed elsewhere.
#[derive(Clone)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
}

impl Cancel {
    /// True once some other node's resolver or visitor has failed and the
    /// traversal is winding down.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Errors a traversal can fail with.
///
/// A worker that wakes only to observe someone else's failure never
/// contributes an error of its own — the first one stored wins, and that is
/// always what `traverse` returns.
#[derive(thiserror::Error, Debug)]
pub enum Error<E> {
    /// The graph contains a cycle reachable from the roots.
    #[error("cycle detected in dependency graph")]
    Cycle,
    /// A dependency resolver call failed.
    #[error("resolver failed: {0}")]
    Resolver(E),
    /// A visitor call failed.
    #[error("visitor failed: {0}")]
    Visitor(E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    DependenciesUnresolved,
    DependenciesUnsatisfied,
    Unvisited,
    Visited,
}

struct NodeRecord<N> {
    state: NodeState,
    unsatisfied_count: usize,
    dependants: Vec<N>,
}

struct Shared<N, E> {
    nodes: HashMap<N, NodeRecord<N>>,
    to_resolve: VecDeque<N>,
    to_visit: VecDeque<N>,
    unsatisfied: HashSet<N>,
    first_error: Option<Error<E>>,
    busy_workers: usize,
}

impl<N: Eq + Hash + Clone, E> Shared<N, E> {
    /// Admit `node` as a newly-known node if it isn't already. Returns
    /// whether it was newly admitted.
    fn admit(&mut self, node: &N) -> bool {
        if self.nodes.contains_key(node) {
            return false;
        }
        self.nodes.insert(
            node.clone(),
            NodeRecord { state: NodeState::DependenciesUnresolved, unsatisfied_count: 0, dependants: Vec::new() },
        );
        true
    }
}

/// Traverse the dependency graph rooted at `roots` with up to `workers`
/// concurrent threads.
///
/// `resolve(node, cancel)` returns `node`'s direct dependencies; they are
/// admitted and queued for resolution themselves if not already known.
/// `visit(node, cancel)` only ever runs once every dependency `resolve`
/// returned for `node` has itself been visited. Both are called at most
/// once per unique node. If the graph has a cycle reachable from the roots,
/// this returns [`Error::Cycle`]. If any resolver or visitor call fails,
/// this returns that failure and no other node's error.
///
/// # Panics
///
/// Panics if `workers` is zero, or if the internal mutex is poisoned by a
/// panicking resolver or visitor.
pub fn traverse<N, E, R, V>(roots: Vec<N>, workers: usize, resolve: R, visit: V) -> Result<(), Error<E>>
where
    N: Clone + Eq + Hash + Send + Sync + fmt::Debug,
    E: Send + Sync,
    R: Fn(&N, &Cancel) -> Result<Vec<N>, E> + Send + Sync,
    V: Fn(&N, &Cancel) -> Result<(), E> + Send + Sync,
{
    assert!(workers > 0, "worker count must be at least one");

    let mut initial = Shared {
        nodes: HashMap::new(),
        to_resolve: VecDeque::new(),
        to_visit: VecDeque::new(),
        unsatisfied: HashSet::new(),
        first_error: None,
        busy_workers: 0,
    };
    for root in roots {
        if initial.admit(&root) {
            initial.to_resolve.push_back(root);
        }
    }

    let state = Mutex::new(initial);
    let condvar = Condvar::new();
    let cancelled_flag = Arc::new(AtomicBool::new(false));
    let cancel = Cancel { flag: Arc::clone(&cancelled_flag) };

    // A scoped pool: every worker thread is guaranteed to have stopped by
    // the time this block exits, so there is no detached lifecycle for a
    // caller to manage.
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let state = &state;
            let condvar = &condvar;
            let cancelled_flag = &*cancelled_flag;
            let resolve = &resolve;
            let visit = &visit;
            let cancel = cancel.clone();
            scope.spawn(move || worker_loop(state, condvar, cancelled_flag, &cancel, resolve, visit));
        }
    });

    let guard = state.into_inner().expect("dag engine mutex poisoned");
    if let Some(err) = guard.first_error {
        return Err(err);
    }
    if !guard.unsatisfied.is_empty() {
        tracing::error!(count = guard.unsatisfied.len(), "dag traversal ended with unsatisfied nodes");
        return Err(Error::Cycle);
    }
    Ok(())
}

fn worker_loop<N, E, R, V>(
    state: &Mutex<Shared<N, E>>,
    condvar: &Condvar,
    cancelled_flag: &AtomicBool,
    cancel: &Cancel,
    resolve: &R,
    visit: &V,
) where
    N: Clone + Eq + Hash + Send + Sync + fmt::Debug,
    E: Send + Sync,
    R: Fn(&N, &Cancel) -> Result<Vec<N>, E> + Send + Sync,
    V: Fn(&N, &Cancel) -> Result<(), E> + Send + Sync,
{
    loop {
        let guard = state.lock().expect("dag engine mutex poisoned");
        let mut guard = condvar
            .wait_while(guard, |s| {
                s.to_visit.is_empty() && s.to_resolve.is_empty() && s.first_error.is_none() && s.busy_workers != 0
            })
            .expect("dag engine mutex poisoned");

        if guard.first_error.is_some() {
            // Cancelled: some other worker's error already won. This
            // worker contributes nothing and is never the engine's error.
            return;
        }

        if let Some(node) = guard.to_visit.pop_front() {
            visit_step(guard, state, condvar, cancelled_flag, node, cancel, visit);
            continue;
        }

        if let Some(node) = guard.to_resolve.pop_front() {
            resolve_step(guard, state, condvar, cancelled_flag, node, cancel, resolve);
            continue;
        }

        debug_assert_eq!(guard.busy_workers, 0);
        return;
    }
}

fn visit_step<N, E, V>(
    mut guard: MutexGuard<'_, Shared<N, E>>,
    state: &Mutex<Shared<N, E>>,
    condvar: &Condvar,
    cancelled_flag: &AtomicBool,
    node: N,
    cancel: &Cancel,
    visit: &V,
) where
    N: Clone + Eq + Hash + Send + Sync + fmt::Debug,
    V: Fn(&N, &Cancel) -> Result<(), E> + Send + Sync,
{
    guard.busy_workers += 1;
    drop(guard);
    let result = visit(&node, cancel);
    let mut guard = state.lock().expect("dag engine mutex poisoned");

    match result {
        Ok(()) => {
            let dependants = guard.nodes.get(&node).map_or_else(Vec::new, |rec| rec.dependants.clone());
            for dependant in dependants {
                if let Some(rec) = guard.nodes.get_mut(&dependant) {
                    rec.unsatisfied_count -= 1;
                    if rec.unsatisfied_count == 0 {
                        rec.state = NodeState::Unvisited;
                        guard.unsatisfied.remove(&dependant);
                        guard.to_visit.push_back(dependant);
                    }
                }
            }
            if let Some(rec) = guard.nodes.get_mut(&node) {
                rec.state = NodeState::Visited;
            }
        }
        Err(e) => {
            if guard.first_error.is_none() {
                tracing::error!(node = ?node, "visitor failed");
                guard.first_error = Some(Error::Visitor(e));
                cancelled_flag.store(true, Ordering::Release);
            }
        }
    }
    guard.busy_workers -= 1;
    condvar.notify_all();
}

fn resolve_step<N, E, R>(
    mut guard: MutexGuard<'_, Shared<N, E>>,
    state: &Mutex<Shared<N, E>>,
    condvar: &Condvar,
    cancelled_flag: &AtomicBool,
    node: N,
    cancel: &Cancel,
    resolve: &R,
) where
    N: Clone + Eq + Hash + Send + Sync + fmt::Debug,
    R: Fn(&N, &Cancel) -> Result<Vec<N>, E> + Send + Sync,
{
    guard.busy_workers += 1;
    drop(guard);
    let result = resolve(&node, cancel);
    let mut guard = state.lock().expect("dag engine mutex poisoned");

    match result {
        Ok(dependencies) => {
            for dep in &dependencies {
                if guard.admit(dep) {
                    guard.to_resolve.push_back(dep.clone());
                }
            }
            let mut unsatisfied_count = 0usize;
            for dep in &dependencies {
                let dep_visited = guard.nodes.get(dep).is_some_and(|rec| rec.state == NodeState::Visited);
                if !dep_visited {
                    unsatisfied_count += 1;
                    if let Some(rec) = guard.nodes.get_mut(dep) {
                        rec.dependants.push(node.clone());
                    }
                }
            }
            if let Some(rec) = guard.nodes.get_mut(&node) {
                rec.unsatisfied_count = unsatisfied_count;
                if unsatisfied_count == 0 {
                    rec.state = NodeState::Unvisited;
                    guard.to_visit.push_back(node.clone());
                } else {
                    rec.state = NodeState::DependenciesUnsatisfied;
                    guard.unsatisfied.insert(node.clone());
                }
            }
        }
        Err(e) => {
            if guard.first_error.is_none() {
                tracing::error!(node = ?node, "resolver failed");
                guard.first_error = Some(Error::Resolver(e));
                cancelled_flag.store(true, Ordering::Release);
            }
        }
    }
    guard.busy_workers -= 1;
    condvar.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug)]
    struct TestError(String);
    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    fn graph(edges: &[(&'static str, &'static str)]) -> Map<&'static str, Vec<&'static str>> {
        let mut out: Map<&'static str, Vec<&'static str>> = Map::new();
        for &(from, to) in edges {
            out.entry(from).or_default().push(to);
        }
        out
    }

    #[test]
    fn visits_every_node_exactly_once_in_dependency_order() {
        // Diamond: a -> {b, c}, b -> d, c -> d.
        let edges = graph(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")]);
        let visited: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));
        let visit_counts: Arc<DashCounter> = Arc::new(DashCounter::default());

        let visited_for_visit = Arc::clone(&visited);
        let counts_for_visit = Arc::clone(&visit_counts);
        let result: Result<(), Error<TestError>> = traverse(
            vec!["a"],
            4,
            move |node: &&'static str, _cancel| Ok(edges.get(node).cloned().unwrap_or_default()),
            move |node: &&'static str, _cancel| {
                counts_for_visit.bump(node);
                visited_for_visit.lock().unwrap().push(node);
                Ok(())
            },
        );

        result.unwrap();
        let order = visited.lock().unwrap();
        assert_eq!(order.len(), 4);
        let pos = |n: &str| order.iter().position(|&x| x == n).unwrap();
        assert!(pos("d") < pos("b"));
        assert!(pos("d") < pos("c"));
        assert!(pos("b") < pos("a"));
        assert!(pos("c") < pos("a"));
        assert_eq!(visit_counts.max_count(), 1, "every node visited at most once");
    }

    #[derive(Default)]
    struct DashCounter {
        counts: StdMutex<Map<&'static str, usize>>,
    }
    impl DashCounter {
        fn bump(&self, node: &'static str) {
            *self.counts.lock().unwrap().entry(node).or_insert(0) += 1;
        }
        fn max_count(&self) -> usize {
            self.counts.lock().unwrap().values().copied().max().unwrap_or(0)
        }
    }

    #[test]
    fn detects_a_cycle() {
        // a -> b -> a
        let edges = graph(&[("a", "b"), ("b", "a")]);
        let result: Result<(), Error<TestError>> = traverse(
            vec!["a"],
            2,
            move |node: &&'static str, _cancel| Ok(edges.get(node).cloned().unwrap_or_default()),
            move |_node: &&'static str, _cancel| Ok(()),
        );
        assert!(matches!(result, Err(Error::Cycle)));
    }

    #[test]
    fn visitor_error_is_returned_verbatim() {
        let result: Result<(), Error<TestError>> = traverse(
            vec!["only"],
            2,
            |_node: &&'static str, _cancel| Ok(Vec::new()),
            |_node: &&'static str, _cancel| Err(TestError("boom".to_string())),
        );
        match result {
            Err(Error::Visitor(TestError(msg))) => assert_eq!(msg, "boom"),
            other => panic!("expected Visitor error, got {other:?}"),
        }
    }

    #[test]
    fn resolver_error_is_returned_verbatim() {
        let result: Result<(), Error<TestError>> = traverse(
            vec!["only"],
            2,
            |_node: &&'static str, _cancel| Err(TestError("resolve boom".to_string())),
            |_node: &&'static str, _cancel| Ok(()),
        );
        match result {
            Err(Error::Resolver(TestError(msg))) => assert_eq!(msg, "resolve boom"),
            other => panic!("expected Resolver error, got {other:?}"),
        }
    }

    #[test]
    fn single_node_with_no_dependencies_visits_once() {
        let count = Arc::new(StdMutex::new(0usize));
        let count_clone = Arc::clone(&count);
        let result: Result<(), Error<TestError>> = traverse(
            vec!["lonely"],
            3,
            |_node: &&'static str, _cancel| Ok(Vec::new()),
            move |_node: &&'static str, _cancel| {
                *count_clone.lock().unwrap() += 1;
                Ok(())
            },
        );
        result.unwrap();
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn shared_dependency_is_resolved_and_visited_once_across_many_parents() {
        // ten roots all depend on the same leaf
        let roots: Vec<&'static str> = vec!["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9"];
        let resolve_count = Arc::new(StdMutex::new(Map::<&'static str, usize>::new()));
        let visit_count = Arc::new(StdMutex::new(Map::<&'static str, usize>::new()));
        let resolve_count_clone = Arc::clone(&resolve_count);
        let visit_count_clone = Arc::clone(&visit_count);

        let result: Result<(), Error<TestError>> = traverse(
            roots,
            8,
            move |node: &&'static str, _cancel| {
                *resolve_count_clone.lock().unwrap().entry(node).or_insert(0) += 1;
                if node.starts_with('r') {
                    Ok(vec!["leaf"])
                } else {
                    Ok(Vec::new())
                }
            },
            move |node: &&'static str, _cancel| {
                *visit_count_clone.lock().unwrap().entry(node).or_insert(0) += 1;
                Ok(())
            },
        );

        result.unwrap();
        assert_eq!(*visit_count.lock().unwrap().get("leaf").unwrap(), 1);
        assert_eq!(*resolve_count.lock().unwrap().get("leaf").unwrap(), 1);
    }

    proptest::proptest! {
        /// Every node in a random forest (node `i` depends on some `j < i`,
        /// so the graph is acyclic by construction) is visited exactly
        /// once, strictly after all of its dependencies.
        #[test]
        fn random_forest_visits_every_node_once_in_order(parent_offsets in proptest::collection::vec(0usize..4, 1..64)) {
            let n = parent_offsets.len();
            let mut deps: Map<usize, Vec<usize>> = Map::new();
            for (i, offset) in parent_offsets.iter().enumerate() {
                if i == 0 {
                    deps.insert(i, Vec::new());
                    continue;
                }
                let parent = i.saturating_sub(1 + offset % i);
                deps.insert(i, vec![parent]);
            }
            let deps = Arc::new(deps);
            let order: Arc<StdMutex<Vec<usize>>> = Arc::new(StdMutex::new(Vec::new()));
            let visit_counts: Arc<StdMutex<Map<usize, usize>>> = Arc::new(StdMutex::new(Map::new()));

            let deps_for_resolve = Arc::clone(&deps);
            let order_for_visit = Arc::clone(&order);
            let counts_for_visit = Arc::clone(&visit_counts);
            let result: Result<(), Error<TestError>> = traverse(
                (0..n).collect(),
                4,
                move |node: &usize, _cancel| Ok(deps_for_resolve.get(node).cloned().unwrap_or_default()),
                move |node: &usize, _cancel| {
                    *counts_for_visit.lock().unwrap().entry(*node).or_insert(0) += 1;
                    order_for_visit.lock().unwrap().push(*node);
                    Ok(())
                },
            );

            result.unwrap();
            let order = order.lock().unwrap();
            proptest::prop_assert_eq!(order.len(), n);
            let counts = visit_counts.lock().unwrap();
            for count in counts.values() {
                proptest::prop_assert_eq!(*count, 1);
            }
            let position = |node: usize| order.iter().position(|&x| x == node).unwrap();
            for (node, parents) in deps.iter() {
                for parent in parents {
                    proptest::prop_assert!(position(*parent) < position(*node));
                }
            }
        }
    }
}
