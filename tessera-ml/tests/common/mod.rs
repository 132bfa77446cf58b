//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use tessera_core::Configuration;
use tessera_ml::{Dataframe, Record, Value};

pub const WINE_RECORDS: usize = 150;

/// Three quality grades (5, 6, 7) over two informative numeric features with
/// overlapping jitter and one uninformative categorical column. Classes are
/// interleaved, so every insertion-order fold holds all three grades.
pub fn wine_quality(config: &Configuration) -> Dataframe {
    Dataframe::from_records(config, (0..WINE_RECORDS).map(wine_record))
}

pub fn wine_record(i: usize) -> Record {
    let grade = (i % 3) as f64;
    let alcohol = 9.0 + 1.5 * grade + ((i * 37) % 17) as f64 / 17.0 * 1.8 - 0.9;
    let acidity = 7.0 - 0.8 * grade + ((i * 13) % 11) as f64 / 11.0 * 1.2 - 0.6;
    let colour = if i % 2 == 0 { "red" } else { "white" };
    Record::labeled(
        [
            ("alcohol", Value::from(alcohol)),
            ("acidity", Value::from(acidity)),
            ("colour", Value::from(colour)),
        ],
        5.0 + grade,
    )
}

/// `y = 1 + 3a - 2b` with small deterministic noise; `c` is unrelated.
pub fn linear_trend(config: &Configuration, n: usize) -> Dataframe {
    Dataframe::from_records(
        config,
        (0..n).map(|i| {
            let a = i as f64 / 10.0;
            let b = ((i * 5) % 7) as f64;
            let c = ((i * 11) % 13) as f64 - 6.0;
            let noise = [0.05, -0.1, 0.08, -0.03, 0.0][i % 5];
            Record::labeled([("a", a), ("b", b), ("c", c)], 1.0 + 3.0 * a - 2.0 * b + noise)
        }),
    )
}
