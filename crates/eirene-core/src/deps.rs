// Copyright 2015-2020 Eirene developers.
// This file is part of Eirene.

// Eirene is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Eirene is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Eirene.  If not, see <http://www.gnu.org/licenses/>.

//! Transaction dependency analyzer: partitions a block's transaction
//! list into levels that can execute in parallel, using Kahn's
//! algorithm over a conservative (over-approximating) edge set. Edges
//! are added for same-sender nonce order, for any pair of
//! transactions whose declared state-key sets conflict, and for calls
//! into the same contract, since calldata effects cannot be inspected
//! to prove independence.

use std::collections::{HashMap, HashSet};

use eirene_types::{Address, Error, Transaction};

/// One level of the partition: a set of transaction indices with no
/// dependency edges between them, safe to execute concurrently.
pub type Level = Vec<usize>;

/// A state key a transaction declares it will touch. The set is a
/// static over-approximation: sender balance and nonce are always
/// written, a recipient's balance is written by any transfer, and a
/// contract creation writes its (sender, nonce)-determined code slot
/// while a call with calldata reads the callee's code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StateKey {
    Balance(Address),
    Nonce(Address),
    Code(Address),
    CreatedCode(Address, u64),
}

#[derive(Debug, Clone, Copy)]
struct Access {
    key: StateKey,
    write: bool,
}

fn declared_accesses(tx: &Transaction) -> Vec<Access> {
    let mut accesses = vec![
        Access { key: StateKey::Balance(tx.sender), write: true },
        Access { key: StateKey::Nonce(tx.sender), write: true },
    ];
    match tx.to {
        Some(recipient) => {
            accesses.push(Access { key: StateKey::Balance(recipient), write: true });
            if !tx.data.is_empty() {
                accesses.push(Access { key: StateKey::Code(recipient), write: false });
            }
        }
        None => {
            accesses.push(Access {
                key: StateKey::CreatedCode(tx.sender, tx.nonce),
                write: true,
            });
        }
    }
    accesses
}

struct Graph {
    edges: Vec<HashSet<usize>>,
    indegree: Vec<usize>,
}

impl Graph {
    fn new(n: usize) -> Self {
        Graph {
            edges: vec![HashSet::new(); n],
            indegree: vec![0; n],
        }
    }

    fn add_edge(&mut self, before: usize, after: usize) {
        if before == after {
            return;
        }
        if self.edges[before].insert(after) {
            self.indegree[after] += 1;
        }
    }
}

fn build_graph(txs: &[Transaction]) -> Graph {
    let mut graph = Graph::new(txs.len());

    // Nonce-dependent edges: ascending nonce within one sender. These
    // may point against submission order when a block lists a sender's
    // transactions out of nonce order.
    let mut by_sender: HashMap<Address, Vec<usize>> = HashMap::new();
    for (i, tx) in txs.iter().enumerate() {
        by_sender.entry(tx.sender).or_default().push(i);
    }
    for indices in by_sender.values() {
        let mut sorted = indices.clone();
        sorted.sort_by_key(|&i| txs[i].nonce);
        for w in sorted.windows(2) {
            graph.add_edge(w[0], w[1]);
        }
    }

    // State-dependent edges: any pair sharing a key where at least one
    // side writes is serialized in submission order. Pairs from the
    // same sender are exempt here, since their relative order is
    // already fixed by the nonce rule above and must not be
    // contradicted by submission order.
    let mut by_key: HashMap<StateKey, Vec<(usize, bool)>> = HashMap::new();
    for (i, tx) in txs.iter().enumerate() {
        for access in declared_accesses(tx) {
            by_key.entry(access.key).or_default().push((i, access.write));
        }
    }
    for accesses in by_key.values() {
        for (a, &(i, i_writes)) in accesses.iter().enumerate() {
            for &(j, j_writes) in &accesses[a + 1..] {
                if (i_writes || j_writes) && txs[i].sender != txs[j].sender {
                    graph.add_edge(i, j);
                }
            }
        }
    }

    // Contract-call edges: calls carrying calldata into the same
    // contract are chained in submission order, since their effects on
    // that contract's storage are opaque to the analyzer.
    let mut by_contract: HashMap<Address, Vec<usize>> = HashMap::new();
    for (i, tx) in txs.iter().enumerate() {
        if let Some(to) = tx.to {
            if !tx.data.is_empty() {
                by_contract.entry(to).or_default().push(i);
            }
        }
    }
    for indices in by_contract.values() {
        for w in indices.windows(2) {
            graph.add_edge(w[0], w[1]);
        }
    }

    graph
}

/// Kahn's levels. Returns the partition plus the count of transactions
/// that could not be resolved (cycle participants), which land together
/// in one terminal level so the caller can still execute everything.
fn kahn_levels(n: usize, graph: &mut Graph) -> (Vec<Level>, usize) {
    let mut levels = Vec::new();
    let mut resolved = vec![false; n];
    let mut remaining = n;

    loop {
        let level: Level = (0..n)
            .filter(|&i| !resolved[i] && graph.indegree[i] == 0)
            .collect();
        if level.is_empty() {
            break;
        }
        for &i in &level {
            resolved[i] = true;
            remaining -= 1;
            for &j in &graph.edges[i] {
                if !resolved[j] {
                    graph.indegree[j] -= 1;
                }
            }
        }
        levels.push(level);
    }

    if remaining > 0 {
        let terminal: Level = (0..n).filter(|&i| !resolved[i]).collect();
        levels.push(terminal);
    }
    (levels, remaining)
}

/// Builds the dependency graph for `txs` and returns it partitioned
/// into levels in execution order, or [`Error::TxDependencyCycle`] if
/// the conservative edge set admitted a cycle (possible only when a
/// sender's nonce order contradicts its submission order against a
/// shared contract or recipient).
pub fn partition(txs: &[Transaction]) -> Result<Vec<Level>, Error> {
    let (levels, unresolved) = levels_with_cycle_count(txs);
    if unresolved > 0 {
        return Err(Error::TxDependencyCycle);
    }
    Ok(levels)
}

/// Like [`partition`], but a detected cycle only produces a warning:
/// the cycle's transactions are forced into a single terminal level,
/// serialized after everything the graph could order, and the full
/// partition is returned. The terminal level must be executed
/// sequentially by the caller since its members may conflict.
pub fn partition_lenient(txs: &[Transaction]) -> Vec<Level> {
    let (levels, unresolved) = levels_with_cycle_count(txs);
    if unresolved > 0 {
        log::warn!(
            target: "deps",
            "dependency cycle among {} of {} transactions; forcing them into a terminal level",
            unresolved,
            txs.len()
        );
    }
    levels
}

fn levels_with_cycle_count(txs: &[Transaction]) -> (Vec<Level>, usize) {
    let n = txs.len();
    if n == 0 {
        return (Vec::new(), 0);
    }
    let mut graph = build_graph(txs);
    kahn_levels(n, &mut graph)
}
