use std::error::Error;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use review_pipeline::{
    ConflictLog, ContextSource, EngineDeps, ReviewRequest, RuleEstimator, RuleStore, Scanner,
    SharedConfig, UnitSource, start_review,
};
use rule_growth::{GrowthThresholds, Learner};

/// Runs one review over units prepared by the external unit builder and
/// prints the event stream as JSON lines.
///
/// # Environment
/// - `REVIEW_UNITS_FILE`    — JSON array of review units (required)
/// - `REVIEW_PROJECT`       — project partition key (default `local/project`)
/// - `REVIEW_CHANGE_ID`     — change identifier (default `pending`)
/// - `REVIEW_MODEL`         — provider preference (default `auto`)
/// - `REVIEW_RULES_FILE`    — rule configuration path (default `code_data/rules.json`)
/// - `REVIEW_CATALOG_FILE`  — model catalog path (default `code_data/catalog.json`)
/// - `REVIEW_SUGGEST_RULES` — when `true`, run the learner after the review
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Load environment variables from a .env file when present.
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(llm_providers::telemetry::layer())
        .init();

    let units_file = std::env::var("REVIEW_UNITS_FILE")
        .map_err(|_| "REVIEW_UNITS_FILE must point at a JSON array of review units")?;
    let units: Vec<review_pipeline::ReviewUnit> =
        serde_json::from_slice(&tokio::fs::read(&units_file).await?)?;

    let project =
        std::env::var("REVIEW_PROJECT").unwrap_or_else(|_| "local/project".to_string());
    let change_id = std::env::var("REVIEW_CHANGE_ID").unwrap_or_else(|_| "pending".to_string());
    let preference = std::env::var("REVIEW_MODEL").unwrap_or_else(|_| "auto".to_string());
    let rules_path =
        std::env::var("REVIEW_RULES_FILE").unwrap_or_else(|_| "code_data/rules.json".to_string());
    let catalog_path = std::env::var("REVIEW_CATALOG_FILE")
        .unwrap_or_else(|_| "code_data/catalog.json".to_string());

    let cfg = SharedConfig::from_env()?;
    let factory = Arc::new(llm_providers::ProviderFactory::from_env(&catalog_path));
    factory.refresh().await;

    let rule_store = RuleStore::new(&rules_path);
    let estimator = RuleEstimator::from_store(&rule_store).await?;
    let conflict_log = ConflictLog::from_env(project.clone());

    let deps = EngineDeps {
        factory,
        estimator,
        conflict_log: conflict_log.clone(),
        units: UnitSource::Prepared(units),
        context: ContextSource::Inline,
        scanner: Scanner::Disabled,
    };

    let mut run = start_review(
        cfg,
        deps,
        ReviewRequest {
            project,
            change_id,
            model_preference: preference,
        },
    );
    while let Some(event) = run.events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    run.handle.await?;

    // Optional post-run learning pass over the accumulated conflict log.
    if std::env::var("REVIEW_SUGGEST_RULES").as_deref() == Ok("true") {
        let learner = Learner::new(conflict_log, rule_store, GrowthThresholds::default());
        let stats = learner.summarize().await?;
        tracing::info!(
            "conflict log: {} entries across {} file(s)",
            stats.total,
            stats.unique_files
        );
        let report = learner.suggest().await?;
        for rule in &report.applicable_rules {
            tracing::info!(
                "applicable: {} → {} ({} samples, {:.0}% consistent)",
                rule.rule_id,
                rule.group.majority_level,
                rule.group.sample_count,
                rule.group.consistency * 100.0
            );
        }
        for hint in &report.reference_hints {
            tracing::info!(
                "hint: {} {:?} → {} (short: {})",
                hint.group.language,
                hint.group.tags,
                hint.group.majority_level,
                hint.reason
            );
        }
    }

    Ok(())
}
