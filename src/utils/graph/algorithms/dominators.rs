//! Dominator tree and dominance frontier computation.
//!
//! A node `d` dominates `n` if every path from the entry to `n` passes
//! through `d`. The immediate dominator of `n` is the unique strict dominator
//! of `n` that every other strict dominator of `n` dominates; linking each
//! node to it yields the dominator tree.
//!
//! Immediate dominators are computed with the Lengauer-Tarjan algorithm using
//! simple path compression, `O(E log V)`. Dominance frontiers use the
//! Cooper-Harvey-Kennedy runner walk over join points.
//!
//! # References
//!
//! - Lengauer & Tarjan, "A Fast Algorithm for Finding Dominators in a Flowgraph" (1979)
//! - Cooper, Harvey & Kennedy, "A Simple, Fast Dominance Algorithm" (2001)

use crate::utils::graph::{NodeId, Predecessors, Successors};

/// Immediate dominators of every node reachable from the entry.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: NodeId,
    idom: Vec<Option<NodeId>>,
    reachable: Vec<bool>,
}

impl DominatorTree {
    /// Returns the entry node, the root of the tree.
    #[inline]
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the immediate dominator of `node`.
    ///
    /// `None` for the entry and for nodes unreachable from it.
    #[inline]
    #[must_use]
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        self.idom.get(node.index()).copied().flatten()
    }

    /// Returns `true` if `node` was reached from the entry.
    #[inline]
    #[must_use]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.reachable.get(node.index()).copied().unwrap_or(false)
    }

    /// Returns `true` if `a` dominates `b`. Every reachable node dominates itself.
    #[must_use]
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut current = Some(b);
        while let Some(node) = current {
            if node == a {
                return true;
            }
            current = self.immediate_dominator(node);
        }
        false
    }

    /// Returns `true` if `a` dominates `b` and `a != b`.
    #[inline]
    #[must_use]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns the dominator-tree children of every node, indexed by node.
    ///
    /// Children appear in ascending node order.
    #[must_use]
    pub fn children(&self) -> Vec<Vec<NodeId>> {
        let mut children = vec![Vec::new(); self.idom.len()];
        for (index, idom) in self.idom.iter().enumerate() {
            if let Some(parent) = idom {
                children[parent.index()].push(NodeId::new(index));
            }
        }
        children
    }

    /// Returns the depth of `node` in the tree; the entry has depth 0.
    #[must_use]
    pub fn depth(&self, node: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.immediate_dominator(node);
        while let Some(parent) = current {
            depth += 1;
            current = self.immediate_dominator(parent);
        }
        depth
    }

    /// Returns the number of node slots covered.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Computes the dominator tree of `graph` rooted at `entry`.
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors + Predecessors,
{
    let n = graph.node_count();
    if n == 0 || entry.index() >= n {
        return DominatorTree {
            entry,
            idom: Vec::new(),
            reachable: Vec::new(),
        };
    }

    let mut lt = LengauerTarjan::new(n, entry);
    lt.compute(graph);

    let mut reachable = vec![false; n];
    let mut idom = vec![None; n];
    for &node in &lt.vertex[..lt.dfs_counter] {
        reachable[node.index()] = true;
        if node != entry {
            idom[node.index()] = Some(lt.idom[node.index()]);
        }
    }

    DominatorTree {
        entry,
        idom,
        reachable,
    }
}

const UNDEFINED: NodeId = NodeId(usize::MAX);

/// Working state of the Lengauer-Tarjan algorithm.
struct LengauerTarjan {
    entry: NodeId,
    /// DFS preorder number, 1-based; 0 means unvisited.
    dfnum: Vec<usize>,
    /// Node with a given (0-based) DFS number.
    vertex: Vec<NodeId>,
    parent: Vec<NodeId>,
    semi: Vec<NodeId>,
    idom: Vec<NodeId>,
    ancestor: Vec<NodeId>,
    best: Vec<NodeId>,
    bucket: Vec<Vec<NodeId>>,
    dfs_counter: usize,
}

impl LengauerTarjan {
    fn new(n: usize, entry: NodeId) -> Self {
        Self {
            entry,
            dfnum: vec![0; n],
            vertex: vec![UNDEFINED; n],
            parent: vec![UNDEFINED; n],
            semi: (0..n).map(NodeId::new).collect(),
            idom: vec![UNDEFINED; n],
            ancestor: vec![UNDEFINED; n],
            best: (0..n).map(NodeId::new).collect(),
            bucket: vec![Vec::new(); n],
            dfs_counter: 0,
        }
    }

    fn compute<G: Successors + Predecessors>(&mut self, graph: &G) {
        self.dfs(graph);

        for i in (1..self.dfs_counter).rev() {
            let w = self.vertex[i];
            let parent_w = self.parent[w.index()];

            // semi(w) = min over predecessors v of sdom candidates
            let predecessors: Vec<NodeId> = graph.predecessors(w).collect();
            for v in predecessors {
                if self.dfnum[v.index()] == 0 {
                    continue;
                }
                let u = self.eval(v);
                if self.dfnum[self.semi[u.index()].index()]
                    < self.dfnum[self.semi[w.index()].index()]
                {
                    self.semi[w.index()] = self.semi[u.index()];
                }
            }

            let semi_w = self.semi[w.index()];
            self.bucket[semi_w.index()].push(w);
            self.ancestor[w.index()] = parent_w;

            for v in std::mem::take(&mut self.bucket[parent_w.index()]) {
                let u = self.eval(v);
                self.idom[v.index()] = if self.semi[u.index()] == self.semi[v.index()] {
                    parent_w
                } else {
                    u
                };
            }
        }

        for i in 1..self.dfs_counter {
            let w = self.vertex[i];
            if self.idom[w.index()] != self.semi[w.index()] {
                self.idom[w.index()] = self.idom[self.idom[w.index()].index()];
            }
        }

        self.idom[self.entry.index()] = self.entry;
    }

    fn dfs<G: Successors>(&mut self, graph: &G) {
        let mut stack = vec![self.entry];

        while let Some(node) = stack.pop() {
            if self.dfnum[node.index()] != 0 {
                continue;
            }

            self.vertex[self.dfs_counter] = node;
            self.dfs_counter += 1;
            self.dfnum[node.index()] = self.dfs_counter;

            for succ in graph.successors(node) {
                if self.dfnum[succ.index()] == 0 {
                    // The last pusher wins, and it is also the first to be popped.
                    self.parent[succ.index()] = node;
                    stack.push(succ);
                }
            }
        }
    }

    fn eval(&mut self, v: NodeId) -> NodeId {
        if self.ancestor[v.index()] == UNDEFINED {
            return v;
        }
        self.compress(v);
        self.best[v.index()]
    }

    fn compress(&mut self, v: NodeId) {
        // Iterative form of the textbook recursion: collect the path, then
        // fold it back from the root side.
        let mut path = Vec::new();
        let mut current = v;
        while self.ancestor[self.ancestor[current.index()].index()] != UNDEFINED {
            path.push(current);
            current = self.ancestor[current.index()];
        }

        while let Some(node) = path.pop() {
            let ancestor = self.ancestor[node.index()];
            let best_ancestor = self.best[ancestor.index()];
            let best_node = self.best[node.index()];
            if self.dfnum[self.semi[best_ancestor.index()].index()]
                < self.dfnum[self.semi[best_node.index()].index()]
            {
                self.best[node.index()] = best_ancestor;
            }
            self.ancestor[node.index()] = self.ancestor[ancestor.index()];
        }
    }
}

/// Computes the dominance frontier of every node.
///
/// `DF(n)` is the set of nodes `m` such that `n` dominates a predecessor of
/// `m` but does not strictly dominate `m`. Only join points (two or more
/// reachable predecessors) can appear in a frontier. Each frontier is sorted
/// and free of duplicates.
pub fn compute_dominance_frontiers<G>(graph: &G, tree: &DominatorTree) -> Vec<Vec<NodeId>>
where
    G: Predecessors,
{
    let n = graph.node_count();
    let mut frontiers: Vec<Vec<NodeId>> = vec![Vec::new(); n];

    for index in 0..n {
        let node = NodeId::new(index);
        if !tree.is_reachable(node) {
            continue;
        }
        let predecessors: Vec<NodeId> = graph
            .predecessors(node)
            .filter(|&p| tree.is_reachable(p))
            .collect();
        if predecessors.len() < 2 {
            continue;
        }

        let idom = tree.immediate_dominator(node);
        for pred in predecessors {
            let mut runner = Some(pred);
            while let Some(current) = runner {
                if Some(current) == idom {
                    break;
                }
                frontiers[current.index()].push(node);
                runner = tree.immediate_dominator(current);
            }
        }
    }

    for frontier in &mut frontiers {
        frontier.sort_unstable();
        frontier.dedup();
    }
    frontiers
}
