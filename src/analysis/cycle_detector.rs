// DANS : src/analysis/cycle_detector.rs

use crate::model::{Instruction, Transaction};
use std::collections::{BTreeMap, HashSet};

/// Graphe de flux local à une transaction : compte -> comptes touchés ensuite.
/// BTreeMap pour un parcours déterministe.
pub type FlowGraph<'a> = BTreeMap<&'a str, Vec<&'a str>>;

/// `[A, B, C]` dans une instruction donne A -> B et B -> C. Les boucles A -> A sont ignorées.
pub fn build_flow_graph<'a>(instructions: impl IntoIterator<Item = &'a Instruction>) -> FlowGraph<'a> {
    let mut graph: FlowGraph<'a> = BTreeMap::new();
    for instruction in instructions {
        for pair in instruction.accounts.windows(2) {
            let (from, to) = (pair[0].as_str(), pair[1].as_str());
            if from == to {
                continue;
            }
            let edges = graph.entry(from).or_default();
            if !edges.contains(&to) {
                edges.push(to);
            }
        }
    }
    graph
}

/// DFS itératif avec marqueur "sur la pile". Retourne le premier cycle trouvé,
/// fermé sur son nœud de départ (`[A, B, C, A]`).
pub fn find_cycle(graph: &FlowGraph<'_>) -> Option<Vec<String>> {
    let mut visited: HashSet<&str> = HashSet::new();

    for &start in graph.keys() {
        if !visited.insert(start) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        let mut on_stack: HashSet<&str> = HashSet::from([start]);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let next = graph.get(node).and_then(|edges| edges.get(frame.1)).copied();
            frame.1 += 1;

            match next {
                Some(next) if on_stack.contains(next) => {
                    let entry = stack.iter().position(|(n, _)| *n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = stack[entry..].iter().map(|(n, _)| n.to_string()).collect();
                    cycle.push(next.to_string());
                    return Some(cycle);
                }
                Some(next) => {
                    if visited.insert(next) {
                        on_stack.insert(next);
                        stack.push((next, 0));
                    }
                }
                None => {
                    on_stack.remove(node);
                    stack.pop();
                }
            }
        }
    }
    None
}

/// Cycle dans les flux des instructions internes d'une transaction.
pub fn detect_cycle(tx: &Transaction) -> Option<Vec<String>> {
    find_cycle(&build_flow_graph(tx.inner_instruction_iter()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InnerInstructionGroup;
    use test_case::test_case;

    fn tx_with_hops(hops: &[&[&str]]) -> Transaction {
        Transaction {
            inner_instructions: vec![InnerInstructionGroup {
                index: Some(0),
                instructions: hops.iter().map(|accounts| Instruction::with_accounts(accounts.iter().copied())).collect(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_triangle_is_a_cycle() {
        let tx = tx_with_hops(&[&["A", "B"], &["B", "C"], &["C", "A"]]);
        assert_eq!(detect_cycle(&tx), Some(vec!["A".into(), "B".into(), "C".into(), "A".into()]));
    }

    #[test_case(&[&["A", "B"], &["B", "C"]] ; "open chain")]
    #[test_case(&[&["A", "A"]] ; "self loop")]
    #[test_case(&[&["A"]] ; "single account")]
    #[test_case(&[] ; "no inner instructions")]
    #[test_case(&[&["A", "B"], &["A", "C"], &["B", "D"], &["C", "D"]] ; "diamond")]
    fn test_acyclic(hops: &[&[&str]]) {
        assert_eq!(detect_cycle(&tx_with_hops(hops)), None);
    }

    #[test]
    fn test_back_and_forth_is_a_two_cycle() {
        let tx = tx_with_hops(&[&["A", "B"], &["B", "A"]]);
        assert_eq!(detect_cycle(&tx).map(|c| c.len()), Some(3));
    }

    #[test]
    fn test_multi_account_instruction_chains_edges() {
        // Une seule instruction [X, Y, Z, X] : X -> Y -> Z -> X.
        let tx = tx_with_hops(&[&["X", "Y", "Z", "X"]]);
        assert!(detect_cycle(&tx).is_some());
    }

    #[test]
    fn test_cycle_reached_from_a_tail() {
        let tx = tx_with_hops(&[&["Start", "P"], &["P", "Q"], &["Q", "R"], &["R", "P"]]);
        assert_eq!(
            detect_cycle(&tx),
            Some(vec!["P".into(), "Q".into(), "R".into(), "P".into()])
        );
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let names: Vec<String> = (0..50_000).map(|i| format!("acc{i}")).collect();
        let instructions: Vec<Instruction> = names
            .windows(2)
            .map(|w| Instruction::with_accounts([w[0].clone(), w[1].clone()]))
            .collect();
        assert_eq!(find_cycle(&build_flow_graph(&instructions)), None);
    }
}
