//! CLI subcommand handlers.

use crate::{Commands, ConfigAction, DataArgs, ModelArgs, ModelKind};
use std::path::Path;
use tessera_core::{Configuration, Settings};
use tessera_ml::dataframe::DATAFRAME_KIND;
use tessera_ml::{
    ArtifactRole, ClassificationMetrics, Dataframe, KFoldSplitter, LinearRegressionParams,
    MinMaxScalerParams, ModelHandle, ModelRegistry, OneHotEncoderParams, OrdinalRegressionParams,
    Pipeline, Predictor, RegressionMetrics, SplitOrder, TrainingParameters, Transform,
    ValidationMetrics, Validator, io,
};

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, settings: Settings, workspace: &Path) -> anyhow::Result<()> {
    if let Commands::Config { action } = command {
        return handle_config(action, &settings, workspace);
    }

    let config = Configuration::new(settings)?;
    match command {
        Commands::Validate {
            data,
            model,
            folds,
            seed,
            parallelism,
            json,
        } => handle_validate(&config, &data, &model, folds, seed, parallelism, json),
        Commands::Train { data, model, name } => handle_train(&config, &data, &model, &name),
        Commands::Predict { data, target, name } => {
            handle_predict(&config, &data, target.as_deref(), &name)
        }
        Commands::Pvalues { name, json } => handle_pvalues(&config, &name, json),
        Commands::Delete { name } => handle_delete(&config, &name),
        Commands::List => handle_list(&config),
        Commands::Config { action } => handle_config(action, config.settings(), workspace),
    }
}

fn handle_config(action: ConfigAction, settings: &Settings, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(settings)?);
            Ok(())
        }
        ConfigAction::Init => {
            let config_dir = workspace.join(".tessera");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&Settings::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
    }
}

fn ordinal_params(model: &ModelArgs) -> OrdinalRegressionParams {
    OrdinalRegressionParams {
        total_iterations: model.iterations,
        l2: model.l2,
        learning_rate: model.learning_rate,
    }
}

fn linear_params(model: &ModelArgs) -> LinearRegressionParams {
    LinearRegressionParams { l2: model.l2 }
}

fn pipeline<P>(model: &ModelArgs, params: P) -> Pipeline<P> {
    let mut pipeline = Pipeline::new(params);
    if model.scale {
        pipeline = pipeline.with_scaler(MinMaxScalerParams::default());
    }
    if model.encode {
        pipeline = pipeline.with_encoder(OneHotEncoderParams::default());
    }
    pipeline
}

fn handle_validate(
    config: &Configuration,
    data: &DataArgs,
    model: &ModelArgs,
    folds: Option<usize>,
    seed: Option<u64>,
    parallelism: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let frame = io::read_csv(&data.data, &data.target, config)?;

    let mut splitter = KFoldSplitter::from_settings(&config.settings().validation)?;
    if let Some(k) = folds {
        splitter = KFoldSplitter::new(k)?.with_order(splitter.order());
    }
    if let Some(seed) = seed {
        splitter = splitter.with_order(SplitOrder::Shuffled { seed });
    }
    let parallelism = parallelism.unwrap_or(config.settings().validation.parallelism);
    tracing::info!(
        records = frame.len(),
        folds = splitter.k(),
        parallelism,
        "Starting cross-validation"
    );

    match model.model {
        ModelKind::Ordinal => run_validation::<_, ClassificationMetrics>(
            config,
            &frame,
            &splitter,
            parallelism,
            &pipeline(model, ordinal_params(model)),
            json,
        ),
        ModelKind::Linear => run_validation::<_, RegressionMetrics>(
            config,
            &frame,
            &splitter,
            parallelism,
            &pipeline(model, linear_params(model)),
            json,
        ),
    }
}

fn run_validation<P, M>(
    config: &Configuration,
    frame: &Dataframe,
    splitter: &KFoldSplitter,
    parallelism: usize,
    params: &P,
    json: bool,
) -> anyhow::Result<()>
where
    P: TrainingParameters,
    P::Model: Predictor,
    M: ValidationMetrics,
{
    let report = Validator::<M>::new(config)
        .with_parallelism(parallelism)
        .report(splitter.split(frame)?, params)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} records, {} folds, parallelism {}",
        frame.len(),
        splitter.k(),
        parallelism.max(1)
    );
    for (i, fold) in report.folds.iter().enumerate() {
        let scores: Vec<String> = fold
            .scores()
            .into_iter()
            .map(|(name, value)| format!("{name}={value:.4}"))
            .collect();
        println!("  fold {i}: {}", scores.join("  "));
    }
    println!("  mean:");
    for ((name, mean), (_, spread)) in report.aggregate.scores().into_iter().zip(report.spread()) {
        println!("    {name:<16} {mean:.4} ± {spread:.4}");
    }
    Ok(())
}

/// Fit `params` on `frame`, rewrite `frame` with the fitted transform, and save it.
fn fit_transformer<P>(
    config: &Configuration,
    params: P,
    frame: &mut Dataframe,
    name: &str,
) -> anyhow::Result<()>
where
    P: TrainingParameters,
    P::Model: Transform,
{
    let mut handle = ModelHandle::create(params, config);
    handle.fit_transform(frame)?;
    handle.save(name)?;
    Ok(())
}

fn fit_model<P: TrainingParameters>(
    config: &Configuration,
    params: P,
    frame: &Dataframe,
    name: &str,
) -> anyhow::Result<ModelHandle<P>> {
    let mut handle = ModelHandle::create(params, config);
    handle.fit(frame)?;
    handle.save(name)?;
    Ok(handle)
}

fn handle_train(
    config: &Configuration,
    data: &DataArgs,
    model: &ModelArgs,
    name: &str,
) -> anyhow::Result<()> {
    let mut frame = io::read_csv(&data.data, &data.target, config)?;

    // A previous training run under this name may have saved other transformers.
    remove_all(config, name)?;

    if model.scale {
        fit_transformer(config, MinMaxScalerParams::default(), &mut frame, name)?;
    }
    if model.encode {
        fit_transformer(config, OneHotEncoderParams::default(), &mut frame, name)?;
    }

    match model.model {
        ModelKind::Ordinal => {
            let handle = fit_model(config, ordinal_params(model), &frame, name)?;
            if let Some(fitted) = handle.fitted() {
                println!("Saved ordinal model '{name}' ({} classes)", fitted.classes().len());
            }
        }
        ModelKind::Linear => {
            let handle = fit_model(config, linear_params(model), &frame, name)?;
            if let Some(fitted) = handle.fitted() {
                println!(
                    "Saved linear model '{name}' (intercept {:.4}, {} coefficients)",
                    fitted.intercept(),
                    fitted.coefficients().len()
                );
            }
        }
    }
    Ok(())
}

/// Transformer kinds in the order training applies them.
const TRANSFORM_ORDER: [&str; 2] = [MinMaxScalerParams::KIND, OneHotEncoderParams::KIND];

fn handle_predict(
    config: &Configuration,
    data: &Path,
    target: Option<&str>,
    name: &str,
) -> anyhow::Result<()> {
    let registry = ModelRegistry::with_builtin();
    let stored = registry.stored_kinds(name, config)?;
    let model_kind = stored
        .iter()
        .copied()
        .find(|kind| registry.role(kind) == Some(ArtifactRole::Predictor))
        .ok_or_else(|| anyhow::anyhow!("No model stored under '{name}'"))?;

    let mut frame = match target {
        Some(target) => io::read_csv(data, target, config)?,
        None => io::read_features(data, config)?,
    };

    for kind in TRANSFORM_ORDER.into_iter().filter(|kind| stored.contains(kind)) {
        let transformer = registry.load_as(ArtifactRole::Transformer, kind, name, config)?;
        transformer.apply(&mut frame)?;
    }
    let predictor = registry.load_as(ArtifactRole::Predictor, model_kind, name, config)?;
    predictor.apply(&mut frame)?;

    io::write_predictions(&frame, std::io::stdout().lock())?;
    Ok(())
}

fn handle_pvalues(config: &Configuration, name: &str, json: bool) -> anyhow::Result<()> {
    let registry = ModelRegistry::with_builtin();
    let model_kind = registry
        .stored_kinds(name, config)?
        .into_iter()
        .find(|kind| registry.role(kind) == Some(ArtifactRole::Predictor))
        .ok_or_else(|| anyhow::anyhow!("No model stored under '{name}'"))?;

    let artifact = registry.load(model_kind, name, config)?;
    let stepwise = artifact
        .as_stepwise()
        .ok_or_else(|| anyhow::anyhow!("A {model_kind} model does not report p-values"))?;
    let pvalues = stepwise.feature_pvalues()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pvalues)?);
    } else {
        for (feature, pvalue) in &pvalues {
            println!("{feature:<24} {pvalue:.6}");
        }
    }
    Ok(())
}

/// Delete every registered artifact stored under `name`; returns the kinds removed.
fn remove_all(config: &Configuration, name: &str) -> anyhow::Result<Vec<&'static str>> {
    let registry = ModelRegistry::with_builtin();
    let stored = registry.stored_kinds(name, config)?;
    for kind in &stored {
        let mut artifact = registry.load(kind, name, config)?;
        artifact.close();
        artifact.delete()?;
    }
    Ok(stored)
}

fn handle_delete(config: &Configuration, name: &str) -> anyhow::Result<()> {
    let removed = remove_all(config, name)?;
    if removed.is_empty() {
        anyhow::bail!("Nothing stored under '{name}'");
    }
    println!("Deleted '{name}' ({})", removed.join(", "));
    Ok(())
}

fn handle_list(config: &Configuration) -> anyhow::Result<()> {
    let registry = ModelRegistry::with_builtin();
    let mut any = false;
    for kind in registry.kinds().chain([DATAFRAME_KIND]) {
        for name in config.store().list(kind)? {
            println!("{kind:<20} {name}");
            any = true;
        }
    }
    if !any {
        println!("No stored artifacts.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tessera_core::{StorageBackend, StorageSettings};

    fn file_settings(dir: &TempDir) -> Settings {
        Settings {
            storage: StorageSettings {
                backend: StorageBackend::File,
                root: Some(dir.path().join("store")),
            },
            ..Settings::default()
        }
    }

    fn model_args(model: ModelKind, scale: bool, encode: bool) -> ModelArgs {
        ModelArgs {
            model,
            iterations: 100,
            l2: 0.001,
            learning_rate: 0.1,
            scale,
            encode,
        }
    }

    /// `y = 2 + 3a - b` with a little noise, plus a colour column.
    fn write_csv(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("trend.csv");
        let mut text = String::from("a,b,colour,y,grade\n");
        for i in 0..30 {
            let a = i as f64 / 3.0;
            let b = ((i * 7) % 5) as f64;
            let noise = [0.02, -0.04, 0.01][i % 3];
            let y = 2.0 + 3.0 * a - b + noise;
            let colour = if i % 2 == 0 { "red" } else { "white" };
            let grade = if y < 8.0 { "low" } else if y < 20.0 { "mid" } else { "high" };
            text.push_str(&format!("{a},{b},{colour},{y},{grade}\n"));
        }
        std::fs::write(&path, text).unwrap();
        path
    }

    fn data_args(path: PathBuf, target: &str) -> DataArgs {
        DataArgs {
            data: path,
            target: target.to_string(),
        }
    }

    #[test]
    fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, Settings::default(), dir.path()).unwrap();

        let config_path = dir.path().join(".tessera").join("config.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: Settings = toml::from_str(&content).unwrap();
        assert_eq!(parsed, Settings::default());
    }

    #[test]
    fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join(".tessera").join("config.toml");
        std::fs::create_dir_all(config_path.parent().unwrap()).unwrap();
        std::fs::write(&config_path, "[validation]\nfolds = 3\n").unwrap();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, Settings::default(), dir.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(&config_path).unwrap(),
            "[validation]\nfolds = 3\n"
        );
    }

    #[test]
    fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, Settings::default(), dir.path()).is_ok());
    }

    #[test]
    fn test_train_predict_delete_round_trip() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(&dir);
        let config = Configuration::new(file_settings(&dir)).unwrap();
        let registry = ModelRegistry::with_builtin();

        // The grade column is text and is dropped to keep the linear model numeric.
        let numeric = dir.path().join("numeric.csv");
        let text = std::fs::read_to_string(&csv).unwrap();
        let trimmed: String = text
            .lines()
            .map(|line| {
                let cells: Vec<&str> = line.split(',').collect();
                format!("{},{},{}\n", cells[0], cells[1], cells[3])
            })
            .collect();
        std::fs::write(&numeric, trimmed).unwrap();

        handle_train(
            &config,
            &data_args(numeric.clone(), "y"),
            &model_args(ModelKind::Linear, true, false),
            "trend",
        )
        .unwrap();
        assert_eq!(
            registry.stored_kinds("trend", &config).unwrap(),
            vec!["linear_regression", "min_max_scaler"]
        );

        handle_predict(&config, &numeric, Some("y"), "trend").unwrap();
        handle_pvalues(&config, "trend", true).unwrap();

        // Retraining without scaling drops the stale scaler.
        handle_train(
            &config,
            &data_args(numeric.clone(), "y"),
            &model_args(ModelKind::Linear, false, false),
            "trend",
        )
        .unwrap();
        assert_eq!(
            registry.stored_kinds("trend", &config).unwrap(),
            vec!["linear_regression"]
        );

        handle_delete(&config, "trend").unwrap();
        assert!(registry.stored_kinds("trend", &config).unwrap().is_empty());
        assert!(handle_delete(&config, "trend").is_err());
        assert!(handle_predict(&config, &numeric, None, "trend").is_err());
    }

    #[test]
    fn test_ordinal_model_has_no_pvalues() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(&dir);
        let config = Configuration::new(file_settings(&dir)).unwrap();

        let numeric = dir.path().join("grades.csv");
        let text = std::fs::read_to_string(&csv).unwrap();
        let trimmed: String = text
            .lines()
            .map(|line| {
                let cells: Vec<&str> = line.split(',').collect();
                format!("{},{},{},{}\n", cells[0], cells[1], cells[2], cells[4])
            })
            .collect();
        std::fs::write(&numeric, trimmed).unwrap();

        handle_train(
            &config,
            &data_args(numeric.clone(), "grade"),
            &model_args(ModelKind::Ordinal, true, true),
            "grades",
        )
        .unwrap();
        handle_predict(&config, &numeric, Some("grade"), "grades").unwrap();
        assert!(handle_pvalues(&config, "grades", false).is_err());
        handle_list(&config).unwrap();
    }

    #[test]
    fn test_validate_runs_and_surfaces_fold_errors() {
        let dir = TempDir::new().unwrap();
        let csv = write_csv(&dir);
        let config = Configuration::in_memory();

        handle_validate(
            &config,
            &data_args(csv.clone(), "grade"),
            &model_args(ModelKind::Ordinal, true, true),
            Some(3),
            Some(11),
            Some(2),
            true,
        )
        .unwrap();

        // Text columns reach a linear model unencoded.
        let err = handle_validate(
            &config,
            &data_args(csv, "y"),
            &model_args(ModelKind::Linear, false, false),
            Some(3),
            None,
            None,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Schema"));
    }
}
