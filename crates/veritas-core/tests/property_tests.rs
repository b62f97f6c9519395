//! Property-based tests for the episodic data contracts.
//!
//! Invariants that should hold for any inputs:
//! - F1 values stay in [0, 1] and reset really clears them
//! - collation preserves node counts and keeps member indices disjoint

use proptest::prelude::*;

mod f1_props {
    use super::*;
    use veritas_core::F1Scores;

    fn arb_labels(len: usize) -> impl Strategy<Value = Vec<i64>> {
        proptest::collection::vec(0i64..2, len)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn f1_bounded(
            preds in arb_labels(32),
            targets in arb_labels(32),
        ) {
            let mut scores = F1Scores::new(2);
            scores.update(&preds, &targets).unwrap();

            let report = scores.compute().unwrap();
            for f1 in &report.per_class {
                prop_assert!((0.0..=1.0).contains(f1));
            }
            prop_assert!((0.0..=1.0).contains(&report.macro_f1));
        }

        #[test]
        fn perfect_predictions_give_f1_one(targets in arb_labels(16)) {
            // Skip degenerate all-one-class target sets: the absent class
            // has an empty denominator and reports 0 by convention.
            prop_assume!(targets.contains(&0) && targets.contains(&1));

            let mut scores = F1Scores::new(2);
            scores.update(&targets, &targets).unwrap();
            let report = scores.compute().unwrap();
            prop_assert!((report.macro_f1 - 1.0).abs() < 1e-12);
        }

        #[test]
        fn reset_is_complete(
            preds in arb_labels(16),
            targets in arb_labels(16),
        ) {
            let mut scores = F1Scores::new(2);
            scores.update(&preds, &targets).unwrap();
            scores.reset();
            prop_assert!(scores.compute().is_none());
        }
    }
}

mod collate_props {
    use super::*;
    use candle_core::{DType, Device, Tensor};
    use veritas_core::{Subgraph, SubgraphBatch};

    fn ring(nodes: usize, dim: usize) -> Subgraph {
        let device = Device::Cpu;
        let features = Tensor::zeros((nodes, dim), DType::F32, &device).unwrap();
        let mut targets = Vec::new();
        let mut sources = Vec::new();
        for i in 0..nodes as u32 {
            targets.push(i);
            sources.push((i + 1) % nodes as u32);
        }
        let num_edges = targets.len();
        let mut data = targets;
        data.extend_from_slice(&sources);
        let edges = Tensor::from_vec(data, (2, num_edges), &device).unwrap();
        Subgraph::new(features, edges, None, vec![0]).unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn collate_preserves_node_count(sizes in proptest::collection::vec(2usize..10, 1..6)) {
            let graphs: Vec<Subgraph> = sizes.iter().map(|&n| ring(n, 3)).collect();
            let batch = SubgraphBatch::collate(graphs.iter()).unwrap();

            let total: usize = sizes.iter().sum();
            prop_assert_eq!(batch.num_nodes().unwrap(), total);
            prop_assert_eq!(batch.num_centers().unwrap(), sizes.len());
        }

        #[test]
        fn collate_keeps_members_disjoint(sizes in proptest::collection::vec(2usize..10, 2..5)) {
            let graphs: Vec<Subgraph> = sizes.iter().map(|&n| ring(n, 3)).collect();
            let batch = SubgraphBatch::collate(graphs.iter()).unwrap();

            // Edge e of member k must only reference member k's node range.
            let edges = batch.edges.to_vec2::<u32>().unwrap();
            let mut edge_cursor = 0;
            let mut node_offset = 0u32;
            for &n in &sizes {
                let range = node_offset..node_offset + n as u32;
                for row in &edges {
                    for &idx in &row[edge_cursor..edge_cursor + n] {
                        prop_assert!(range.contains(&idx));
                    }
                }
                edge_cursor += n;
                node_offset += n as u32;
            }
        }
    }
}
