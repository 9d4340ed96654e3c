// ============================================================
// Layer 5 — Classification Head
// ============================================================
// MLP over cached clip features, one logit per class:
//
//   features [N, D] ─► (Linear ─► LayerNorm? ─► ReLU ─► Dropout) × layers
//                   ─► Linear ─► logits [N, num_classes]
//
// Labels are multi-hot, so the loss is a per-class binary
// cross entropy, optionally scaled by inverse class frequency.

use burn::{
    nn::{
        Dropout, DropoutConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::activation::relu,
};

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct ClassificationHeadConfig {
    pub input_dim:   usize,
    pub num_classes: usize,
    /// Hidden layer widths; empty means a single linear layer.
    pub layers:      Vec<usize>,
    pub dropout:     f64,
    pub layer_norm:  bool,
}

impl ClassificationHeadConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ClassificationHead<B> {
        let mut widths = vec![self.input_dim];
        widths.extend(self.layers.iter().copied());

        let hidden: Vec<Linear<B>> = widths
            .windows(2)
            .map(|pair| LinearConfig::new(pair[0], pair[1]).init(device))
            .collect();
        let norms: Vec<LayerNorm<B>> = if self.layer_norm {
            self.layers.iter().map(|&w| LayerNormConfig::new(w).init(device)).collect()
        } else {
            Vec::new()
        };

        let last = widths.last().copied().unwrap_or(self.input_dim);
        ClassificationHead {
            hidden,
            norms,
            output:  LinearConfig::new(last, self.num_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
        }
    }
}

#[derive(Module, Debug)]
pub struct ClassificationHead<B: Backend> {
    pub hidden:  Vec<Linear<B>>,
    /// One per hidden layer, or empty when layer norm is off
    pub norms:   Vec<LayerNorm<B>>,
    pub output:  Linear<B>,
    pub dropout: Dropout,
}

impl<B: Backend> ClassificationHead<B> {
    /// features: [batch, input_dim] → logits: [batch, num_classes]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = features;
        for (i, linear) in self.hidden.iter().enumerate() {
            x = linear.forward(x);
            if let Some(norm) = self.norms.get(i) {
                x = norm.forward(x);
            }
            x = self.dropout.forward(relu(x));
        }
        self.output.forward(x)
    }

    pub fn forward_loss(
        &self,
        features:      Tensor<B, 2>,
        labels:        Tensor<B, 2>,
        class_weights: Option<Tensor<B, 1>>,
    ) -> (Tensor<B, 1>, Tensor<B, 2>) {
        let logits = self.forward(features);
        let loss = bce_with_logits(logits.clone(), labels, class_weights);
        (loss, logits)
    }
}

/// Mean binary cross entropy on raw logits, optionally weighted per class.
///
/// Uses max(x, 0) − x·y + ln(1 + e^−|x|), which never exponentiates a
/// positive number.
pub fn bce_with_logits<B: Backend>(
    logits:        Tensor<B, 2>,
    targets:       Tensor<B, 2>,
    class_weights: Option<Tensor<B, 1>>,
) -> Tensor<B, 1> {
    let [batch, classes] = logits.dims();
    let loss = logits.clone().clamp_min(0.0)
        - logits.clone() * targets
        + logits.abs().neg().exp().add_scalar(1.0).log();

    let loss = match class_weights {
        Some(w) => loss * w.unsqueeze::<2>().expand([batch, classes]),
        None => loss,
    };
    loss.mean()
}
