//! End-to-end k-fold validation scenarios.

mod common;

use pretty_assertions::assert_eq;
use tessera_core::Configuration;
use tessera_ml::{
    ClassificationMetrics, KFoldSplitter, LinearRegressionParams, MinMaxScalerParams, MlError,
    OneHotEncoderParams, OrdinalRegressionParams, Pipeline, RegressionMetrics, ValidationMetrics,
    Validator, Value, io,
};

use common::{linear_trend, wine_quality};

fn wine_pipeline() -> Pipeline<OrdinalRegressionParams> {
    Pipeline::new(OrdinalRegressionParams::new(100, 0.001))
        .with_scaler(MinMaxScalerParams::default())
        .with_encoder(OneHotEncoderParams::default())
}

#[test]
fn test_wine_quality_fixture() {
    let config = Configuration::in_memory();
    let data = wine_quality(&config);
    let folds = KFoldSplitter::new(5).unwrap().split(&data).unwrap();

    let metrics = Validator::<ClassificationMetrics>::new(&config)
        .validate(folds, &wine_pipeline())
        .unwrap();

    // Insertion-order folds score macro F1 of 0.93266, 0.89770, 1, 1 and 0.86490.
    assert!(
        (metrics.macro_f1() - 0.939_052_389_557_168_1).abs() < 1e-10,
        "macro F1 = {}",
        metrics.macro_f1()
    );
    assert!((metrics.accuracy() - 0.94).abs() < 1e-10, "accuracy = {}", metrics.accuracy());
    let classes: Vec<&Value> = metrics.per_class().iter().map(|c| &c.class).collect();
    assert_eq!(classes, vec![&Value::from(5.0), &Value::from(6.0), &Value::from(7.0)]);
}

#[test]
fn test_aggregate_is_unweighted_mean_of_folds() {
    let config = Configuration::in_memory();
    // 152 records over 5 folds: parts of 31, 31, 30, 30, 30.
    let mut data = wine_quality(&config);
    data.add(common::wine_record(150));
    data.add(common::wine_record(151));
    let folds = KFoldSplitter::new(5).unwrap().split(&data).unwrap();

    let report = Validator::<ClassificationMetrics>::new(&config)
        .report(folds, &wine_pipeline())
        .unwrap();
    assert_eq!(report.folds.len(), 5);

    let k = report.folds.len() as f64;
    for (i, (name, aggregate)) in report.aggregate.scores().into_iter().enumerate() {
        let mean = report.folds.iter().map(|fold| fold.scores()[i].1).sum::<f64>() / k;
        assert!((aggregate - mean).abs() <= 1e-12, "{name}: {aggregate} vs {mean}");
    }
}

#[test]
fn test_parallel_matches_sequential() {
    let config = Configuration::in_memory();
    let data = wine_quality(&config);
    let splitter = KFoldSplitter::shuffled(5, 42).unwrap();

    let sequential = Validator::<ClassificationMetrics>::new(&config)
        .report(splitter.split(&data).unwrap(), &wine_pipeline())
        .unwrap();
    let parallel = Validator::<ClassificationMetrics>::new(&config)
        .with_parallelism(4)
        .report(splitter.split(&data).unwrap(), &wine_pipeline())
        .unwrap();

    let scores = |metrics: &[ClassificationMetrics]| {
        metrics.iter().map(ValidationMetrics::scores).collect::<Vec<_>>()
    };
    assert_eq!(scores(&sequential.folds), scores(&parallel.folds));
    assert_eq!(sequential.aggregate.scores(), parallel.aggregate.scores());
}

#[test]
fn test_seeded_shuffle_is_reproducible() {
    let config = Configuration::in_memory();
    let data = wine_quality(&config);
    let run = || {
        let folds = KFoldSplitter::shuffled(5, 7).unwrap().split(&data).unwrap();
        Validator::<ClassificationMetrics>::new(&config)
            .validate(folds, &wine_pipeline())
            .unwrap()
            .scores()
    };
    assert_eq!(run(), run());
}

#[test]
fn test_failing_fold_aborts_with_its_error() {
    let config = Configuration::in_memory();
    let mut data = wine_quality(&config);
    // A text cell in a numeric column breaks fitting for every fold that trains on it
    // and prediction for the fold that validates on it.
    data.get_mut(3)
        .unwrap()
        .x
        .insert("alcohol".into(), Value::from("n/a"));

    for parallelism in [1, 3] {
        let folds = KFoldSplitter::new(5).unwrap().split(&data).unwrap();
        let result = Validator::<ClassificationMetrics>::new(&config)
            .with_parallelism(parallelism)
            .validate(folds, &wine_pipeline());
        assert!(
            matches!(result, Err(MlError::Schema(_))),
            "parallelism {parallelism}: {result:?}"
        );
    }
}

#[test]
fn test_sparse_column_validates() {
    let config = Configuration::in_memory();
    // Column `b` only has cells in the first fold's records.
    let mut text = String::from("a,b,grade\n");
    for i in 0..40 {
        let grade = i % 2;
        let a = grade as f64 + (i % 5) as f64 * 0.1;
        let b = if i < 8 { (i as f64 * 0.5).to_string() } else { String::new() };
        text.push_str(&format!("{a},{b},{grade}\n"));
    }
    let data = io::read_delimited(text.as_bytes(), b',', "grade", &config).unwrap();
    assert!(!data.get(8).unwrap().x.contains_key("b"));

    let folds = KFoldSplitter::new(5).unwrap().split(&data).unwrap();
    let report = Validator::<ClassificationMetrics>::new(&config)
        .report(folds, &OrdinalRegressionParams::default())
        .unwrap();
    assert_eq!(report.folds.len(), 5);
}

#[test]
fn test_regression_validation() {
    let config = Configuration::in_memory();
    let data = linear_trend(&config, 50);
    let folds = KFoldSplitter::new(5).unwrap().split(&data).unwrap();
    let metrics = Validator::<RegressionMetrics>::new(&config)
        .validate(folds, &LinearRegressionParams::default())
        .unwrap();
    assert!(metrics.r_squared() > 0.99, "r2 = {}", metrics.r_squared());
    assert!(metrics.rmse() < 0.2, "rmse = {}", metrics.rmse());
}

#[test]
fn test_folds_leave_source_dataframe_untouched() {
    let config = Configuration::in_memory();
    let data = wine_quality(&config);
    let folds = KFoldSplitter::new(5).unwrap().split(&data).unwrap();
    Validator::<ClassificationMetrics>::new(&config)
        .validate(folds, &wine_pipeline())
        .unwrap();
    assert_eq!(data.len(), common::WINE_RECORDS);
    assert!(data.entries().all(|(_, record)| record.y_predicted.is_none()));
}
