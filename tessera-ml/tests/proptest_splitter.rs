//! Property-based tests for partitioning and metrics using proptest.

use std::collections::BTreeSet;

use proptest::prelude::*;

use tessera_core::Configuration;
use tessera_ml::{ClassificationMetrics, Dataframe, KFoldSplitter, Record, Value};

fn frame(config: &Configuration, n: usize) -> Dataframe {
    Dataframe::from_records(config, (0..n).map(|i| Record::labeled([("x", i as f64)], 0.0)))
}

// --- Partition properties ---

proptest! {
    #[test]
    fn partition_is_exhaustive_and_balanced(
        (n, k) in (2usize..200).prop_flat_map(|n| (Just(n), 2..=n)),
        seed in proptest::option::of(any::<u64>()),
    ) {
        let ids: Vec<u64> = (0..n as u64).collect();
        let splitter = match seed {
            Some(seed) => KFoldSplitter::shuffled(k, seed).unwrap(),
            None => KFoldSplitter::new(k).unwrap(),
        };
        let parts = splitter.partition(&ids).unwrap();

        prop_assert_eq!(parts.len(), k);
        let sizes: Vec<usize> = parts.iter().map(Vec::len).collect();
        for (i, size) in sizes.iter().enumerate() {
            let expected = n / k + usize::from(i < n % k);
            prop_assert_eq!(*size, expected);
        }

        let union: BTreeSet<u64> = parts.iter().flatten().copied().collect();
        prop_assert_eq!(union.len(), n);
        prop_assert_eq!(sizes.iter().sum::<usize>(), n);
    }

    #[test]
    fn every_record_validates_exactly_once(
        (n, k) in (2usize..60).prop_flat_map(|n| (Just(n), 2..=n)),
    ) {
        let config = Configuration::in_memory();
        let data = frame(&config, n);
        let mut validated = BTreeSet::new();
        for fold in KFoldSplitter::new(k).unwrap().split(&data).unwrap() {
            prop_assert_eq!(fold.train.len() + fold.validation.len(), n);
            for id in fold.validation.ids() {
                prop_assert!(validated.insert(id));
                prop_assert!(fold.train.get(id).is_none());
            }
        }
        prop_assert_eq!(validated.len(), n);
    }

    #[test]
    fn k_out_of_range_is_rejected(n in 0usize..50, extra in 1usize..10) {
        let ids: Vec<u64> = (0..n as u64).collect();
        let splitter = KFoldSplitter::new(n.max(1) + extra).unwrap();
        prop_assert!(splitter.partition(&ids).is_err());
    }
}

// --- Metric properties ---

proptest! {
    #[test]
    fn classification_scores_are_bounded(
        pairs in prop::collection::vec((0u8..5, 0u8..5), 1..200),
    ) {
        let labels: Vec<(Value, Value)> = pairs
            .iter()
            .map(|(a, p)| (Value::from(f64::from(*a)), Value::from(f64::from(*p))))
            .collect();
        let metrics = ClassificationMetrics::from_pairs(labels.iter().map(|(a, p)| (a, p)));

        for score in [
            metrics.accuracy(),
            metrics.macro_precision(),
            metrics.macro_recall(),
            metrics.macro_f1(),
        ] {
            prop_assert!((0.0..=1.0).contains(&score));
        }
        for class in metrics.per_class() {
            prop_assert!((0.0..=1.0).contains(&class.precision));
            prop_assert!((0.0..=1.0).contains(&class.recall));
            prop_assert!((0.0..=1.0).contains(&class.f1));
        }

        let distinct: BTreeSet<&Value> = labels.iter().flat_map(|(a, p)| [a, p]).collect();
        prop_assert_eq!(metrics.per_class().len(), distinct.len());
    }

    #[test]
    fn perfect_predictions_score_one(labels in prop::collection::vec(0u8..4, 1..100)) {
        let values: Vec<Value> = labels.iter().map(|l| Value::from(f64::from(*l))).collect();
        let metrics = ClassificationMetrics::from_pairs(values.iter().map(|v| (v, v)));
        prop_assert_eq!(metrics.accuracy(), 1.0);
        prop_assert_eq!(metrics.macro_f1(), 1.0);
    }
}
