// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// Entry point for all user interaction. Parses arguments with
// clap, loads the YAML config and hands off to Layer 2.
//
// Commands:
//   1. `encode`        — write the encoder cache
//   2. `class-weights` — inverse-frequency weights from labels
//   3. `train-cls`     — train the classification head
//   4. `train-cap`     — train the captioning head
//   5. `eval-cap`      — BLEU / ROUGE of a captioning checkpoint
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, ConfigArgs, EvalCapArgs, TrainClsArgs};

use crate::infra::config::{load_config, ExperimentConfig};

#[derive(Parser, Debug)]
#[command(
    name = "video-heads",
    version = "0.1.0",
    about = "Cache frozen video encodings, then train and evaluate classification and captioning heads."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

fn config_from(args: &ConfigArgs) -> Result<ExperimentConfig> {
    tracing::info!("Loading config '{}'", args.config.display());
    load_config(&args.config)
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Encode(args)       => Self::run_encode(args),
            Commands::ClassWeights(args) => Self::run_class_weights(args),
            Commands::TrainCls(args)     => Self::run_train_cls(args),
            Commands::TrainCap(args)     => Self::run_train_cap(args),
            Commands::EvalCap(args)      => Self::run_eval_cap(args),
        }
    }

    fn run_encode(args: ConfigArgs) -> Result<()> {
        use crate::application::encode_use_case::EncodeUseCase;

        let report = EncodeUseCase::new(config_from(&args)?).execute()?;
        println!(
            "Encoded {} clips into {} train and {} val shard pairs.",
            report.clips, report.train_shards, report.val_shards
        );
        Ok(())
    }

    fn run_class_weights(args: ConfigArgs) -> Result<()> {
        use crate::application::class_weights::{compute_class_weights, write_class_weights};

        let config = config_from(&args)?;
        let weights = compute_class_weights(&config.data.encoding_dir)?;
        let path = write_class_weights(&config.data.encoding_dir, &weights)?;
        println!("{}", serde_json::to_string(&weights)?);
        println!("Saved to {}", path.display());
        Ok(())
    }

    fn run_train_cls(args: TrainClsArgs) -> Result<()> {
        use crate::application::train_cls_use_case::TrainClsUseCase;

        let use_case = TrainClsUseCase::new(config_from(&args.common)?, &(&args).into())?;
        tracing::info!("Experiment: {}", use_case.experiment());

        let summary = use_case.execute()?;
        match summary.best_epoch {
            Some(epoch) => println!("Training complete. Best epoch {} ({:.4}).", epoch, summary.best_value),
            None => println!("Training complete."),
        }
        Ok(())
    }

    fn run_train_cap(args: ConfigArgs) -> Result<()> {
        use crate::application::train_cap_use_case::TrainCapUseCase;

        let summary = TrainCapUseCase::new(config_from(&args)?)?.execute()?;
        if let Some(last) = summary.last {
            println!("Training complete. Last checkpoint: {}", last.display());
        }
        Ok(())
    }

    fn run_eval_cap(args: EvalCapArgs) -> Result<()> {
        use crate::application::eval_cap_use_case::EvalCapUseCase;

        let evaluation = EvalCapUseCase::new(config_from(&args.common)?, args.weight)?.execute()?;
        println!("Evaluated {} captions.", evaluation.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::train_cls_use_case::ClsOverrides;

    #[test]
    fn test_train_cls_flags() {
        let cli = Cli::try_parse_from([
            "video-heads", "train-cls", "-c", "cfg.yaml",
            "--init-lr", "0.01", "-l", "512", "256", "--layer-norm", "--lrm", "5", "8",
        ])
        .unwrap();
        let Commands::TrainCls(args) = cli.command else { panic!("expected train-cls") };
        let overrides = ClsOverrides::from(&args);

        assert_eq!(args.common.config, std::path::PathBuf::from("cfg.yaml"));
        assert_eq!(overrides.init_lr, Some(0.01));
        assert_eq!(overrides.layers, vec![512, 256]);
        assert!(overrides.layer_norm);
        assert!(!overrides.use_class_weights);
        assert_eq!(overrides.lr_milestones, vec![5, 8]);
        assert_eq!(overrides.dropout, None);
    }

    #[test]
    fn test_eval_cap_requires_weight() {
        assert!(Cli::try_parse_from(["video-heads", "eval-cap", "-c", "cfg.yaml"]).is_err());
        assert!(Cli::try_parse_from(["video-heads", "eval-cap", "-c", "cfg.yaml", "--weight", "w"]).is_ok());
    }
}
