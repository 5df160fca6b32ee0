//! The Lengauer–Tarjan dominance solver (spec §4.2.1), used by both forward
//! dominance (CFG, entry = function entry) and reverse/post-dominance (CFG with
//! edges reversed, entries = return blocks and infinite-loop roots).
//!
//! Operates over a plain `0..n` adjacency-list graph so it has no IR dependency —
//! `analysis::dominators` is the thin adapter from `Function`/`Cfg` to this shape.

/// Result of running the solver over a graph of `n` nodes.
#[derive(Debug, Clone)]
pub struct DomResult {
    /// `imm_dom[v]` — immediate dominator, or `v` itself for an entry node.
    pub imm_dom: Vec<usize>,
    /// Dominator-tree children of each node.
    pub dom_tree: Vec<Vec<usize>>,
    /// Dominance frontier of each node.
    pub dom_frontier: Vec<Vec<usize>>,
}

/// Runs Lengauer–Tarjan over `graph` (adjacency list on `0..graph.len()`), treating
/// every node in `entry_points` as a root reachable with no dominator of its own. A
/// virtual source node is added and connected to all entries, then stripped from the
/// output (entries' `imm_dom` becomes themselves, per spec §4.2.1).
pub fn solve(graph: &[Vec<usize>], entry_points: &[usize]) -> DomResult {
    let n = graph.len();
    let virtual_source = n;
    let total = n + 1;

    let mut working: Vec<Vec<usize>> = graph.to_vec();
    working.push(entry_points.to_vec());

    let mut backward_edges = vec![Vec::new(); total];
    for (u, succs) in working.iter().enumerate() {
        for &v in succs {
            backward_edges[v].push(u);
        }
    }

    let mut dfn = vec![usize::MAX; total];
    let mut dfs_to_node = Vec::with_capacity(total);
    let mut parent = vec![0usize; total];
    let mut semi = vec![0usize; total]; // holds a DFS-number, not a node id, during the main loop

    // Iterative DFS (avoids stack overflow on deep CFGs from pathological input).
    {
        let mut stack = vec![(virtual_source, 0usize)];
        let mut visited = vec![false; total];
        visited[virtual_source] = true;
        dfn[virtual_source] = 0;
        dfs_to_node.push(virtual_source);
        semi[virtual_source] = 0;
        while let Some((node, mut child_idx)) = stack.pop() {
            let mut advanced = false;
            while child_idx < working[node].len() {
                let next = working[node][child_idx];
                child_idx += 1;
                if !visited[next] {
                    visited[next] = true;
                    parent[next] = node;
                    dfn[next] = dfs_to_node.len();
                    semi[next] = dfn[next];
                    dfs_to_node.push(next);
                    stack.push((node, child_idx));
                    stack.push((next, 0));
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                continue;
            }
        }
    }

    let dfs_count = dfs_to_node.len();

    let mut dsu_parent: Vec<usize> = (0..total).collect();
    let mut min_ancestor: Vec<usize> = (0..total).collect();
    let mut semi_children: Vec<Vec<usize>> = vec![Vec::new(); total];
    let mut imm_dom = vec![0usize; total];

    fn dsu_find(u: usize, dsu_parent: &mut [usize], min_ancestor: &mut [usize], semi: &[usize]) -> usize {
        if dsu_parent[u] == u {
            return u;
        }
        let p = dsu_parent[u];
        let root = dsu_find(p, dsu_parent, min_ancestor, semi);
        if semi[min_ancestor[p]] < semi[min_ancestor[u]] {
            min_ancestor[u] = min_ancestor[p];
        }
        dsu_parent[u] = root;
        root
    }

    let dsu_query = |u: usize, dsu_parent: &mut [usize], min_ancestor: &mut [usize], semi: &[usize]| -> usize {
        dsu_find(u, dsu_parent, min_ancestor, semi);
        min_ancestor[u]
    };

    for dfs_id in (1..dfs_count).rev() {
        let curr = dfs_to_node[dfs_id];
        for &pred in &backward_edges[curr] {
            if dfn[pred] == usize::MAX {
                continue;
            }
            let eval_node = if dfn[pred] < dfn[curr] {
                pred
            } else {
                dsu_query(pred, &mut dsu_parent, &mut min_ancestor, &semi)
            };
            if semi[eval_node] < semi[curr] {
                semi[curr] = semi[eval_node];
            }
        }

        let sdom_node = dfs_to_node[semi[curr]];
        semi_children[sdom_node].push(curr);
        dsu_parent[curr] = parent[curr];

        let p = parent[curr];
        let children = std::mem::take(&mut semi_children[p]);
        for child in children {
            let u = dsu_query(child, &mut dsu_parent, &mut min_ancestor, &semi);
            imm_dom[child] = if semi[u] == semi[child] { p } else { u };
        }
    }

    for dfs_id in 1..dfs_count {
        let curr = dfs_to_node[dfs_id];
        if imm_dom[curr] != dfs_to_node[semi[curr]] {
            imm_dom[curr] = imm_dom[imm_dom[curr]];
        }
    }

    for i in 0..total {
        if dfn[i] != usize::MAX && imm_dom[i] == virtual_source {
            imm_dom[i] = i;
        }
    }

    let mut dom_tree = vec![Vec::new(); total];
    for i in 0..total {
        if dfn[i] != usize::MAX && i != virtual_source {
            dom_tree[imm_dom[i]].push(i);
        }
    }

    let mut dom_frontier = vec![Vec::new(); total];
    for block in 0..n {
        if dfn[block] == usize::MAX {
            continue;
        }
        for &succ in &graph[block] {
            let mut runner = block;
            while runner != imm_dom[succ] && dfn[runner] != usize::MAX {
                if !dom_frontier[runner].contains(&succ) {
                    dom_frontier[runner].push(succ);
                }
                if runner == imm_dom[runner] {
                    break;
                }
                runner = imm_dom[runner];
            }
        }
    }

    dom_tree.truncate(n);
    dom_frontier.truncate(n);
    imm_dom.truncate(n);

    DomResult { imm_dom, dom_tree, dom_frontier }
}
