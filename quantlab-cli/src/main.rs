//! QuantLab CLI — walk-forward candidate evaluation and the champion registry.
//!
//! Commands:
//! - `stage-a` — build folds over the panel, score every candidate, write Stage A artifacts
//! - `stage-b` — robustness proxies and strict gates over a Stage A run
//! - `registry-update` — champion/challenger decision for a Stage B run
//! - `reconcile` — cross-check the artifacts of a run
//! - `validate-folds` — fold-policy validation of a Stage A run
//! - `pipeline` — stage-a, stage-b, registry-update and reconcile in sequence
//!
//! Every command prints one JSON document to stdout. Logs go to stderr.

use chrono::{Duration, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use quantlab_core::domain::RunId;
use quantlab_runner::registry::RegistryUpdateReport;
use quantlab_runner::stages::{exit_code, stage_a, stage_b, StageError};
use quantlab_runner::{
    Failure, FailureReport, Lease, PipelineConfig, ReconcileReport, Reconciler, RegistryUpdate, StageA, StageB,
};

const LEASE_TTL_MINUTES: i64 = 15;

#[derive(Parser)]
#[command(
    name = "quantlab",
    about = "QuantLab CLI — walk-forward candidate evaluation and champion registry"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build folds, score the candidate catalogue and apply the proxy gate.
    StageA {
        #[command(flatten)]
        root: RootArgs,
        #[command(flatten)]
        panel: PanelArgs,
        #[command(flatten)]
        fold: FoldArgs,
        /// Last as-of date of the panel (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long, value_parser = parse_date)]
        asof_end_date: Option<NaiveDate>,
        /// Run id. Defaults to stagea_tsplits_<asof-end-date>.
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Robustness proxies and strict gates over a Stage A run.
    StageB {
        #[command(flatten)]
        root: RootArgs,
        #[command(flatten)]
        policy: PolicyArgs,
        #[command(flatten)]
        gates: GateArgs,
        #[command(flatten)]
        robustness: RobustnessArgs,
        /// Stage A run id.
        #[arg(long)]
        run_id: String,
    },
    /// Decide PROMOTE / NO_PROMOTION for a Stage B run and update the registry.
    RegistryUpdate {
        #[command(flatten)]
        root: RootArgs,
        #[command(flatten)]
        promotion: PromotionArgs,
        /// Stage B run id. A Stage A run id is mapped to its Stage B run.
        #[arg(long)]
        run_id: String,
        /// Hold the registry lease for the duration of the update.
        #[arg(long, default_value_t = false)]
        use_lease: bool,
    },
    /// Cross-check the artifacts of a Stage A run and everything derived from it.
    Reconcile {
        #[command(flatten)]
        root: RootArgs,
        /// Stage A run id.
        #[arg(long)]
        run_id: String,
        /// Exit non-zero when any check fails.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Validate the fold set of a Stage A run against the policy minima.
    ValidateFolds {
        #[command(flatten)]
        root: RootArgs,
        #[command(flatten)]
        policy: PolicyArgs,
        /// Stage A run id.
        #[arg(long)]
        run_id: String,
    },
    /// Run stage-a, stage-b, registry-update and reconcile in sequence.
    Pipeline {
        #[command(flatten)]
        root: RootArgs,
        #[command(flatten)]
        panel: PanelArgs,
        #[command(flatten)]
        fold: FoldArgs,
        #[command(flatten)]
        policy: PolicyArgs,
        #[command(flatten)]
        gates: GateArgs,
        #[command(flatten)]
        robustness: RobustnessArgs,
        #[command(flatten)]
        promotion: PromotionArgs,
        /// Last as-of date of the panel (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long, value_parser = parse_date)]
        asof_end_date: Option<NaiveDate>,
        /// Stage A run id. Defaults to stagea_tsplits_<asof-end-date>.
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long, default_value_t = false)]
        use_lease: bool,
        /// Fail the pipeline when reconciliation finds a mismatch.
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
}

#[derive(Args)]
struct RootArgs {
    /// Root holding features/, runs/ and registry/.
    #[arg(long, default_value = "quant")]
    quant_root: PathBuf,

    /// TOML config layered over the defaults. Flags layer over the file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct PanelArgs {
    #[arg(long)]
    feature_store_version: Option<String>,
    /// Comma-separated asset classes, e.g. stock,etf.
    #[arg(long, value_delimiter = ',')]
    asset_classes: Option<Vec<String>>,
    #[arg(long)]
    panel_asof_days: Option<usize>,
    #[arg(long)]
    top_liquid_n: Option<usize>,
    /// Cap on Stage A survivors.
    #[arg(long)]
    survivors_max: Option<usize>,
}

#[derive(Args)]
struct FoldArgs {
    #[arg(long)]
    fold_count: Option<usize>,
    #[arg(long)]
    test_days: Option<usize>,
    #[arg(long)]
    embargo_days: Option<usize>,
    #[arg(long)]
    min_train_days: Option<usize>,
}

#[derive(Args)]
struct PolicyArgs {
    #[arg(long)]
    fold_count_min: Option<usize>,
    #[arg(long)]
    embargo_days_min: Option<usize>,
    #[arg(long)]
    test_days_min: Option<usize>,
    #[arg(long)]
    min_train_days_min: Option<usize>,
    /// Downgrade a fold-policy violation to a warning.
    #[arg(long, default_value_t = false)]
    skip_fold_policy_valid: bool,
}

#[derive(Args)]
struct GateArgs {
    #[arg(long)]
    ic_mean_min: Option<f64>,
    #[arg(long)]
    ic_min_min: Option<f64>,
    #[arg(long)]
    ic_fold_std_max: Option<f64>,
    #[arg(long)]
    sharpe_mean_min: Option<f64>,
    #[arg(long)]
    sharpe_min_min: Option<f64>,
    #[arg(long)]
    turnover_mean_max: Option<f64>,
    #[arg(long)]
    maxdd_mean_max: Option<f64>,
    #[arg(long)]
    bootstrap_neg_sharpe_share_max: Option<f64>,
    #[arg(long)]
    psr_proxy_min: Option<f64>,
    #[arg(long)]
    dsr_proxy_min: Option<f64>,
    #[arg(long)]
    psr_bootstrap_proxy_min: Option<f64>,
    #[arg(long)]
    dsr_bootstrap_proxy_min: Option<f64>,
    #[arg(long)]
    cpcv_light_sharpe_min: Option<f64>,
    #[arg(long)]
    cpcv_light_p25_min: Option<f64>,
    #[arg(long)]
    cpcv_light_neg_share_max: Option<f64>,
    #[arg(long)]
    stress_lite_sharpe_mean_min: Option<f64>,
    #[arg(long)]
    stress_lite_maxdd_mean_max: Option<f64>,
    #[arg(long)]
    stress_lite_fail_share_max: Option<f64>,
    /// Cap on Stage B survivors.
    #[arg(long)]
    strict_survivors_max: Option<usize>,
}

#[derive(Args)]
struct RobustnessArgs {
    #[arg(long)]
    cpcv_light_min_combo_size: Option<usize>,
    #[arg(long)]
    bootstrap_resamples: Option<usize>,
}

#[derive(Args)]
struct PromotionArgs {
    /// Score margin a challenger must clear over the champion.
    #[arg(long)]
    score_epsilon: Option<f64>,
    /// Promote the top survivor when no champion exists.
    #[arg(long, default_value_t = false, conflicts_with = "no_promote_on_empty")]
    promote_on_empty: bool,
    #[arg(long, default_value_t = false)]
    no_promote_on_empty: bool,
}

fn set<T: Clone>(dst: &mut T, src: &Option<T>) {
    if let Some(v) = src {
        *dst = v.clone();
    }
}

impl PanelArgs {
    fn apply(&self, c: &mut PipelineConfig) {
        let sa = &mut c.stage_a;
        set(&mut sa.feature_store_version, &self.feature_store_version);
        set(&mut sa.asset_classes, &self.asset_classes);
        set(&mut sa.panel_asof_days, &self.panel_asof_days);
        set(&mut sa.top_liquid_n, &self.top_liquid_n);
        set(&mut sa.survivors_max, &self.survivors_max);
    }
}

impl FoldArgs {
    fn apply(&self, c: &mut PipelineConfig) {
        set(&mut c.fold.fold_count, &self.fold_count);
        set(&mut c.fold.test_days, &self.test_days);
        set(&mut c.fold.embargo_days, &self.embargo_days);
        set(&mut c.fold.min_train_days, &self.min_train_days);
    }
}

impl PolicyArgs {
    fn apply(&self, c: &mut PipelineConfig) {
        set(&mut c.policy.fold_count_min, &self.fold_count_min);
        set(&mut c.policy.embargo_days_min, &self.embargo_days_min);
        set(&mut c.policy.test_days_min, &self.test_days_min);
        set(&mut c.policy.min_train_days_min, &self.min_train_days_min);
        if self.skip_fold_policy_valid {
            c.policy.require_fold_policy_valid = false;
        }
    }
}

impl GateArgs {
    fn apply(&self, c: &mut PipelineConfig) {
        let g = &mut c.gates;
        set(&mut g.ic_mean_min, &self.ic_mean_min);
        set(&mut g.ic_min_min, &self.ic_min_min);
        set(&mut g.ic_fold_std_max, &self.ic_fold_std_max);
        set(&mut g.sharpe_mean_min, &self.sharpe_mean_min);
        set(&mut g.sharpe_min_min, &self.sharpe_min_min);
        set(&mut g.turnover_mean_max, &self.turnover_mean_max);
        set(&mut g.maxdd_mean_max, &self.maxdd_mean_max);
        set(&mut g.bootstrap_neg_sharpe_share_max, &self.bootstrap_neg_sharpe_share_max);
        set(&mut g.psr_proxy_min, &self.psr_proxy_min);
        set(&mut g.dsr_proxy_min, &self.dsr_proxy_min);
        set(&mut g.psr_bootstrap_proxy_min, &self.psr_bootstrap_proxy_min);
        set(&mut g.dsr_bootstrap_proxy_min, &self.dsr_bootstrap_proxy_min);
        set(&mut g.cpcv_light_sharpe_min, &self.cpcv_light_sharpe_min);
        set(&mut g.cpcv_light_p25_min, &self.cpcv_light_p25_min);
        set(&mut g.cpcv_light_neg_share_max, &self.cpcv_light_neg_share_max);
        set(&mut g.stress_lite_sharpe_mean_min, &self.stress_lite_sharpe_mean_min);
        set(&mut g.stress_lite_maxdd_mean_max, &self.stress_lite_maxdd_mean_max);
        set(&mut g.stress_lite_fail_share_max, &self.stress_lite_fail_share_max);
        set(&mut g.strict_survivors_max, &self.strict_survivors_max);
    }
}

impl RobustnessArgs {
    fn apply(&self, c: &mut PipelineConfig) {
        set(&mut c.robustness.cpcv_light_min_combo_size, &self.cpcv_light_min_combo_size);
        set(&mut c.robustness.bootstrap_resamples, &self.bootstrap_resamples);
    }
}

impl PromotionArgs {
    fn apply(&self, c: &mut PipelineConfig) {
        set(&mut c.promotion.score_epsilon, &self.score_epsilon);
        if self.promote_on_empty {
            c.promotion.promote_on_empty = true;
        }
        if self.no_promote_on_empty {
            c.promotion.promote_on_empty = false;
        }
    }
}

type CmdResult = Result<Value, FailureReport>;

fn main() {
    init_tracing();
    let cli = Cli::parse();

    match dispatch(cli.command) {
        Ok(out) => print_json(&out),
        Err(failure) => {
            error!(reason = %failure.reason, exit_code = failure.exit_code, "{}", failure.error);
            print_json(&failure);
            std::process::exit(failure.exit_code);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn dispatch(command: Commands) -> CmdResult {
    match command {
        Commands::StageA {
            root,
            panel,
            fold,
            asof_end_date,
            run_id,
        } => {
            let config = load_config(&root, |c| {
                panel.apply(c);
                fold.apply(c);
            })?;
            let end = asof_end_date.unwrap_or_else(|| Utc::now().date_naive());
            let (_, report) = StageA::new(&config)
                .run(&root.quant_root, end, run_id.map(RunId::new))
                .map_err(fail)?;
            render(&report)
        }
        Commands::StageB {
            root,
            policy,
            gates,
            robustness,
            run_id,
        } => {
            let config = load_config(&root, |c| {
                policy.apply(c);
                gates.apply(c);
                robustness.apply(c);
            })?;
            let (_, report) = StageB::new(&config)
                .run(&root.quant_root, &RunId::new(run_id))
                .map_err(fail)?;
            render(&report)
        }
        Commands::RegistryUpdate {
            root,
            promotion,
            run_id,
            use_lease,
        } => {
            let config = load_config(&root, |c| promotion.apply(c))?;
            let report = registry_update(&config, &root.quant_root, &stage_b_run(&run_id), use_lease)?;
            render(&report)
        }
        Commands::Reconcile { root, run_id, strict } => {
            let config = load_config(&root, |_| {})?;
            let report = reconcile(&config, &root.quant_root, &RunId::new(run_id), strict)?;
            render(&report)
        }
        Commands::ValidateFolds { root, policy, run_id } => {
            let config = load_config(&root, |c| policy.apply(c))?;
            validate_folds(&config, &root.quant_root, &RunId::new(run_id))
        }
        Commands::Pipeline {
            root,
            panel,
            fold,
            policy,
            gates,
            robustness,
            promotion,
            asof_end_date,
            run_id,
            use_lease,
            strict,
        } => {
            let config = load_config(&root, |c| {
                panel.apply(c);
                fold.apply(c);
                policy.apply(c);
                gates.apply(c);
                robustness.apply(c);
                promotion.apply(c);
            })?;
            let end = asof_end_date.unwrap_or_else(|| Utc::now().date_naive());
            pipeline(&config, &root.quant_root, end, run_id.map(RunId::new), use_lease, strict)
        }
    }
}

/// Defaults, then the TOML file, then flags.
fn load_config(root: &RootArgs, overrides: impl FnOnce(&mut PipelineConfig)) -> Result<PipelineConfig, FailureReport> {
    let mut config = match &root.config {
        Some(path) => PipelineConfig::from_file(path),
        None => Ok(PipelineConfig::default()),
    }
    .map_err(|e| FailureReport::other("config_invalid", &e.into()))?;
    overrides(&mut config);
    config
        .validate()
        .map_err(|e| FailureReport::other("config_invalid", &e.into()))?;
    Ok(config)
}

fn registry_update(
    config: &PipelineConfig,
    quant_root: &Path,
    stage_b_run_id: &RunId,
    use_lease: bool,
) -> Result<RegistryUpdateReport, FailureReport> {
    let update = RegistryUpdate::new(&config.promotion, quant_root);
    let now = Utc::now();
    if !use_lease {
        return update.run(stage_b_run_id, now).map_err(fail);
    }
    let lease = Lease::new(update.paths().lease());
    let owner = format!("quantlab:{stage_b_run_id}");
    lease
        .hold(&owner, Duration::minutes(LEASE_TTL_MINUTES), now, || update.run(stage_b_run_id, now))
        .map_err(fail)?
        .map_err(fail)
}

fn reconcile(
    config: &PipelineConfig,
    quant_root: &Path,
    stage_a_run_id: &RunId,
    strict: bool,
) -> Result<ReconcileReport, FailureReport> {
    let report = Reconciler::new(config, quant_root)
        .run(stage_a_run_id, strict)
        .map_err(fail)?;
    if report.exit_code != 0 {
        return Err(FailureReport::from_reconcile(&report));
    }
    Ok(report)
}

fn validate_folds(config: &PipelineConfig, quant_root: &Path, stage_a_run_id: &RunId) -> CmdResult {
    let outputs = stage_a::load_outputs(quant_root, stage_a_run_id).map_err(fail)?;
    let report = StageB::new(config).validate_policy(&outputs);
    if !report.ok && config.policy.require_fold_policy_valid {
        let codes = report.error_codes().iter().map(|c| c.to_string()).collect();
        let mut failure = fail(StageError::PolicyViolation { codes });
        failure.error = format!("{}: {}", failure.error, render(&report)?);
        return Err(failure);
    }
    render(&report)
}

fn pipeline(
    config: &PipelineConfig,
    quant_root: &Path,
    asof_end_date: NaiveDate,
    run_id: Option<RunId>,
    use_lease: bool,
    strict: bool,
) -> CmdResult {
    let (a_out, a_report) = StageA::new(config)
        .run(quant_root, asof_end_date, run_id)
        .map_err(fail)?;
    let a_run = a_out.manifest.run_id.clone();
    info!(run_id = %a_run, survivors = a_report.counts.survivors_total, "stage A done");

    let (b_out, b_report) = StageB::new(config).run_loaded(quant_root, &a_out).map_err(fail)?;
    info!(run_id = %b_out.run_id, survivors = b_report.counts.survivors_total, "stage B done");

    let registry = registry_update(config, quant_root, &b_out.run_id, use_lease)?;
    info!(decision = %registry.decision.decision, "registry updated");

    let reconciliation = reconcile(config, quant_root, &a_run, strict)?;

    Ok(json!({
        "ok": true,
        "stage_a_run_id": a_run,
        "stage_b_run_id": b_out.run_id,
        "stage_a": render(&a_report)?,
        "stage_b": render(&b_report)?,
        "registry": render(&registry)?,
        "reconcile": render(&reconciliation)?,
    }))
}

/// `stageb_<A>` ids pass through; anything else is treated as a Stage A id.
fn stage_b_run(run_id: &str) -> RunId {
    let id = RunId::new(run_id);
    if run_id.starts_with("stageb_") {
        id
    } else {
        stage_b::stage_b_run_id(&id)
    }
}

fn fail<E: Failure>(err: E) -> FailureReport {
    FailureReport::from_error(&err)
}

fn render<T: Serialize>(value: &T) -> CmdResult {
    serde_json::to_value(value).map_err(|e| FailureReport::other("render_failed", &e.into()))
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("failed to render output: {e}");
            std::process::exit(exit_code::OTHER);
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected YYYY-MM-DD, got '{s}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Commands {
        Cli::try_parse_from(args).unwrap().command
    }

    #[test]
    fn flags_layer_over_defaults() {
        let Commands::Pipeline {
            root,
            panel,
            fold,
            policy,
            gates,
            promotion,
            ..
        } = parse(&[
            "quantlab",
            "pipeline",
            "--fold-count",
            "4",
            "--asset-classes",
            "stock",
            "--psr-proxy-min",
            "0.7",
            "--skip-fold-policy-valid",
            "--no-promote-on-empty",
            "--score-epsilon",
            "0.02",
        ])
        else {
            panic!("expected pipeline");
        };
        let config = load_config(&root, |c| {
            panel.apply(c);
            fold.apply(c);
            policy.apply(c);
            gates.apply(c);
            promotion.apply(c);
        })
        .unwrap();
        assert_eq!(config.fold.fold_count, 4);
        assert_eq!(config.fold.test_days, 20);
        assert_eq!(config.stage_a.asset_classes, vec!["stock".to_string()]);
        assert_eq!(config.gates.psr_proxy_min, 0.7);
        assert!(!config.policy.require_fold_policy_valid);
        assert!(!config.promotion.promote_on_empty);
        assert_eq!(config.promotion.score_epsilon, 0.02);
    }

    #[test]
    fn promote_flags_conflict() {
        assert!(Cli::try_parse_from([
            "quantlab",
            "registry-update",
            "--run-id",
            "x",
            "--promote-on-empty",
            "--no-promote-on-empty",
        ])
        .is_err());
    }

    #[test]
    fn invalid_override_is_a_config_failure() {
        let Commands::StageA { root, fold, .. } = parse(&["quantlab", "stage-a", "--fold-count", "0"]) else {
            panic!("expected stage-a");
        };
        let failure = load_config(&root, |c| fold.apply(c)).unwrap_err();
        assert_eq!(failure.reason, "config_invalid");
        assert_eq!(failure.exit_code, exit_code::OTHER);
    }

    #[test]
    fn bad_date_is_rejected() {
        assert!(Cli::try_parse_from(["quantlab", "stage-a", "--asof-end-date", "2024/06/28"]).is_err());
    }

    #[test]
    fn registry_run_id_accepts_either_stage() {
        assert_eq!(stage_b_run("stageb_x").as_str(), "stageb_x");
        assert_eq!(stage_b_run("stagea_tsplits_2024-06-28").as_str(), "stageb_stagea_tsplits_2024-06-28");
    }
}
