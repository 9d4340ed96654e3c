// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the five subcommands and their flags. Everything
// about an experiment lives in the YAML config; flags only
// name the config and, for train-cls, override a few
// hyper-parameters.
//
// Reference: Rust Book §12 (Building a CLI Program)

use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::application::train_cls_use_case::ClsOverrides;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every clip through the frozen encoder and write the shard cache
    Encode(ConfigArgs),

    /// Compute inverse-frequency class weights from the cached train labels
    ClassWeights(ConfigArgs),

    /// Train the classification head on cached encodings
    TrainCls(TrainClsArgs),

    /// Train the captioning head on cached frames
    TrainCap(ConfigArgs),

    /// Score a trained captioning head with BLEU and ROUGE
    EvalCap(EvalCapArgs),
}

/// Arguments shared by every command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// The YAML config file
    #[arg(short, long)]
    pub config: PathBuf,
}

#[derive(Args, Debug)]
pub struct TrainClsArgs {
    #[command(flatten)]
    pub common: ConfigArgs,

    /// Initial learning rate (TRAIN.OPTIM.INIT_LEARNING_RATE)
    #[arg(long = "init-lr", visible_alias = "lr")]
    pub init_lr: Option<f64>,

    /// Hidden layer widths of the MLP head (MODEL.HEAD.LAYERS)
    #[arg(short, long, num_args = 1..)]
    pub layers: Vec<usize>,

    /// Dropout between hidden layers (MODEL.HEAD.DROPOUT)
    #[arg(short, long)]
    pub dropout: Option<f64>,

    /// Layer norm after every hidden layer (MODEL.HEAD.LAYER_NORM)
    #[arg(long = "layer-norm", visible_alias = "ln")]
    pub layer_norm: bool,

    /// Weight the loss by inverse class frequency (MODEL.USE_CLASS_WEIGHTS)
    #[arg(long = "use-class-weights", visible_alias = "cw")]
    pub use_class_weights: bool,

    /// Epochs at which the learning rate decays (TRAIN.OPTIM.LR_MILESTONES)
    #[arg(long = "lr-milestones", visible_alias = "lrm", num_args = 1..)]
    pub lr_milestones: Vec<usize>,
}

/// Convert CLI arguments into application-layer overrides.
/// The application layer never sees clap types.
impl From<&TrainClsArgs> for ClsOverrides {
    fn from(a: &TrainClsArgs) -> Self {
        ClsOverrides {
            init_lr:           a.init_lr,
            layers:            a.layers.clone(),
            dropout:           a.dropout,
            layer_norm:        a.layer_norm,
            use_class_weights: a.use_class_weights,
            lr_milestones:     a.lr_milestones.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct EvalCapArgs {
    #[command(flatten)]
    pub common: ConfigArgs,

    /// Trained weight file (e.g. runs/cap_exp/last.mpk)
    #[arg(short, long)]
    pub weight: PathBuf,
}
