//! Property-based tests for prototype computation and the closed-form
//! head initialization.

use candle_core::{Device, Tensor};
use proptest::prelude::*;
use veritas_nn::{compute_prototypes, prototype_head};

const DIM: usize = 3;
const EXAMPLES: usize = 8;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prototypes_match_hand_computed_means(
        values in proptest::collection::vec(-10.0f32..10.0, EXAMPLES * DIM),
        labels in proptest::collection::vec(0i64..3, EXAMPLES),
    ) {
        let device = Device::Cpu;
        let embeddings =
            Tensor::from_vec(values.clone(), (EXAMPLES, DIM), &device).unwrap();

        let (prototypes, classes) = compute_prototypes(&embeddings, &labels).unwrap();
        let rows = prototypes.to_vec2::<f32>().unwrap();

        prop_assert_eq!(rows.len(), classes.len());
        for (row, &class) in classes.iter().enumerate() {
            let members: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|(_, &l)| l == class)
                .map(|(i, _)| i)
                .collect();
            prop_assert!(!members.is_empty());
            for d in 0..DIM {
                let mean: f32 = members.iter().map(|&i| values[i * DIM + d]).sum::<f32>()
                    / members.len() as f32;
                prop_assert!((rows[row][d] - mean).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn head_init_is_twice_prototype_and_negative_squared_norm(
        values in proptest::collection::vec(-5.0f32..5.0, 2 * 4),
    ) {
        let device = Device::Cpu;
        let prototypes = Tensor::from_vec(values.clone(), (2, 4), &device).unwrap();

        let (weight, bias) = prototype_head(&prototypes).unwrap();
        let w = weight.to_vec2::<f32>().unwrap();
        let b = bias.to_vec1::<f32>().unwrap();

        for c in 0..2 {
            let norm_sq: f32 = (0..4).map(|d| values[c * 4 + d].powi(2)).sum();
            prop_assert!((b[c] + norm_sq).abs() < 1e-3);
            for d in 0..4 {
                prop_assert!((w[c][d] - 2.0 * values[c * 4 + d]).abs() < 1e-5);
            }
        }
    }
}
