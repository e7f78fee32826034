//! Two-branch author classifier.
//!
//! One branch reads the style metrics vector, the other the padded token id
//! sequence. Their outputs are concatenated and projected to the output head.
//!
//! # Architecture
//!
//! ```text
//! metrics (22) → Dropout → Linear(mw) → ReLU → Dropout → Linear(mw) → ReLU ─┐
//!                                                                             ├→ Concat → Dropout → Linear(fw) → ReLU → Dropout → Linear(units)
//! tokens (L)   → Linear(tw) → [Dropout → Linear(b0) → Linear(b1)] × blocks    │
//!              → Dropout → Linear(tw) → ReLU ──────────────────────────────────┘
//! ```
//!
//! The head (units, activation, loss) comes from [`classifier_head_config`].
//! The network always returns logits; activations are applied by
//! [`HeadConfig::probabilities`] and folded into [`HeadConfig::loss`].

use authorid_core::{AuthorIdError, HeadKind, ModelConfig, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Dropout, Linear, Module, VarBuilder, VarMap};
use std::collections::BTreeMap;

/// Output activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Independent probability of the second class.
    Sigmoid,
    /// Distribution over all classes.
    Softmax,
}

/// Training loss matching the activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Binary cross-entropy on a single logit.
    BinaryCrossEntropy,
    /// Cross-entropy on integer class targets.
    SparseCategoricalCrossEntropy,
}

/// Shape of the output layer and how it is trained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadConfig {
    /// Binary or multi-class head.
    pub kind: HeadKind,
    /// Number of output units.
    pub units: usize,
    /// Output activation.
    pub activation: Activation,
    /// Loss used during training.
    pub loss: LossKind,
}

/// Choose the output head for `class_count` classes.
///
/// Two classes get a single sigmoid unit trained with binary cross-entropy;
/// anything else gets one softmax unit per class.
pub fn classifier_head_config(class_count: usize) -> HeadConfig {
    if class_count == 2 {
        HeadConfig {
            kind: HeadKind::Binary,
            units: 1,
            activation: Activation::Sigmoid,
            loss: LossKind::BinaryCrossEntropy,
        }
    } else {
        HeadConfig {
            kind: HeadKind::MultiClass,
            units: class_count,
            activation: Activation::Softmax,
            loss: LossKind::SparseCategoricalCrossEntropy,
        }
    }
}

impl HeadConfig {
    /// Mean loss of `logits` against `labels` (class indices, `u32`).
    pub fn loss(&self, logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let loss = match self.loss {
            LossKind::BinaryCrossEntropy => labels
                .to_dtype(DType::F32)
                .and_then(|t| t.unsqueeze(1))
                .and_then(|targets| binary_cross_entropy_with_logits(logits, &targets)),
            LossKind::SparseCategoricalCrossEntropy => {
                candle_nn::loss::cross_entropy(logits, labels)
            }
        };
        loss.map_err(|e| AuthorIdError::Model(format!("Loss computation failed: {e}")))
    }

    /// Per-class probabilities of shape `[batch, classes]`.
    ///
    /// A binary head's single sigmoid output `p` expands to `[1 - p, p]`.
    pub fn probabilities(&self, logits: &Tensor) -> Result<Tensor> {
        let probs = match self.activation {
            Activation::Sigmoid => candle_nn::ops::sigmoid(logits).and_then(|p| {
                let complement = p.affine(-1.0, 1.0)?;
                Tensor::cat(&[&complement, &p], 1)
            }),
            Activation::Softmax => candle_nn::ops::softmax(logits, D::Minus1),
        };
        probs.map_err(|e| AuthorIdError::Model(format!("Activation failed: {e}")))
    }

    /// Most likely class index per row (`u32`).
    pub fn predict_classes(&self, logits: &Tensor) -> Result<Tensor> {
        self.probabilities(logits)?
            .argmax(D::Minus1)
            .map_err(|e| AuthorIdError::Model(format!("argmax failed: {e}")))
    }
}

/// Mean binary cross-entropy computed on logits as
/// `max(x, 0) - x * y + ln(1 + exp(-|x|))`.
///
/// Stays finite for saturated logits, where `sigmoid(x)` rounds to 0 or 1.
fn binary_cross_entropy_with_logits(
    logits: &Tensor,
    targets: &Tensor,
) -> candle_core::Result<Tensor> {
    let softplus = logits.abs()?.neg()?.exp()?.affine(1.0, 1.0)?.log()?;
    logits
        .relu()?
        .sub(&logits.mul(targets)?)?
        .add(&softplus)?
        .mean_all()
}

/// Input and output sizes of a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierDims {
    /// Width of the metrics vector.
    pub metrics_dim: usize,
    /// Padded token sequence length.
    pub token_len: usize,
    /// Number of active authors.
    pub classes: usize,
}

struct TokenBlock {
    fc1: Linear,
    fc2: Linear,
}

/// The fused metrics + tokens classifier.
pub struct AuthorClassifier {
    metrics_fc1: Linear,
    metrics_fc2: Linear,
    token_in: Linear,
    token_blocks: Vec<TokenBlock>,
    token_out: Linear,
    fusion_fc: Linear,
    head_fc: Linear,
    dropout: Dropout,
    head: HeadConfig,
    dims: ClassifierDims,
    device: Device,
}

impl AuthorClassifier {
    /// Build the network from a variable builder.
    pub fn new(vb: VarBuilder, dims: ClassifierDims, config: &ModelConfig) -> Result<Self> {
        let head = classifier_head_config(dims.classes);
        let layer = |in_dim: usize, out_dim: usize, name: &str| {
            candle_nn::linear(in_dim, out_dim, vb.pp(name))
                .map_err(|e| AuthorIdError::Model(format!("Failed to create {name}: {e}")))
        };

        let metrics_fc1 = layer(dims.metrics_dim, config.metrics_width, "metrics_fc1")?;
        let metrics_fc2 = layer(config.metrics_width, config.metrics_width, "metrics_fc2")?;

        let token_in = layer(dims.token_len, config.token_width, "token_in")?;
        let (block_hidden, block_out) = config.block_widths;
        let mut token_blocks = Vec::with_capacity(config.token_blocks);
        let mut width = config.token_width;
        for i in 0..config.token_blocks {
            token_blocks.push(TokenBlock {
                fc1: layer(width, block_hidden, &format!("token_block{i}_fc1"))?,
                fc2: layer(block_hidden, block_out, &format!("token_block{i}_fc2"))?,
            });
            width = block_out;
        }
        let token_out = layer(width, config.token_width, "token_out")?;

        let fusion_fc = layer(
            config.metrics_width + config.token_width,
            config.fusion_width,
            "fusion_fc",
        )?;
        let head_fc = layer(config.fusion_width, head.units, "head")?;

        Ok(Self {
            metrics_fc1,
            metrics_fc2,
            token_in,
            token_blocks,
            token_out,
            fusion_fc,
            head_fc,
            dropout: Dropout::new(config.dropout),
            head,
            dims,
            device: vb.device().clone(),
        })
    }

    /// Create a classifier whose variables live in `varmap`, for training.
    pub fn new_trainable(
        varmap: &VarMap,
        dims: ClassifierDims,
        config: &ModelConfig,
        device: &Device,
    ) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        Self::new(vb, dims, config)
    }

    /// Load a classifier from safetensors bytes.
    pub fn from_safetensors(
        weights: Vec<u8>,
        dims: ClassifierDims,
        config: &ModelConfig,
        device: &Device,
    ) -> Result<Self> {
        let vb = VarBuilder::from_buffered_safetensors(weights, DType::F32, device)
            .map_err(|e| AuthorIdError::Model(format!("Failed to read weights: {e}")))?;
        Self::new(vb, dims, config)
    }

    /// Forward pass returning logits of shape `[batch, units]`.
    ///
    /// `metrics` is `[batch, metrics_dim]` (`f32`), `tokens` is
    /// `[batch, token_len]` (`u32`). Dropout is active only when `train`.
    pub fn forward_logits(&self, metrics: &Tensor, tokens: &Tensor, train: bool) -> Result<Tensor> {
        self.forward_impl(metrics, tokens, train)
            .map_err(|e| AuthorIdError::Model(format!("Forward pass failed: {e}")))
    }

    fn forward_impl(
        &self,
        metrics: &Tensor,
        tokens: &Tensor,
        train: bool,
    ) -> candle_core::Result<Tensor> {
        let m = self.dropout.forward(metrics, train)?;
        let m = self.metrics_fc1.forward(&m)?.relu()?;
        let m = self.dropout.forward(&m, train)?;
        let m = self.metrics_fc2.forward(&m)?.relu()?;

        let mut t = self.token_in.forward(&tokens.to_dtype(DType::F32)?)?;
        for block in &self.token_blocks {
            t = self.dropout.forward(&t, train)?;
            t = block.fc1.forward(&t)?;
            t = block.fc2.forward(&t)?;
        }
        let t = self.dropout.forward(&t, train)?;
        let t = self.token_out.forward(&t)?.relu()?;

        let fused = Tensor::cat(&[&t, &m], 1)?;
        let fused = self.dropout.forward(&fused, train)?;
        let fused = self.fusion_fc.forward(&fused)?.relu()?;
        let fused = self.dropout.forward(&fused, train)?;
        self.head_fc.forward(&fused)
    }

    /// Class probabilities for each row, in class index order.
    pub fn predict_proba(&self, metrics: &Tensor, tokens: &Tensor) -> Result<Vec<Vec<f32>>> {
        let logits = self.forward_logits(metrics, tokens, false)?;
        self.head
            .probabilities(&logits)?
            .to_vec2()
            .map_err(|e| AuthorIdError::Model(format!("Failed to extract probabilities: {e}")))
    }

    /// The output head this classifier was built with.
    pub fn head(&self) -> HeadConfig {
        self.head
    }

    /// Input and output sizes.
    pub fn dims(&self) -> ClassifierDims {
        self.dims
    }

    /// Returns a reference to the device this classifier runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Serialize every variable in `varmap` to safetensors bytes.
pub fn serialize_weights(varmap: &VarMap) -> Result<Vec<u8>> {
    let tensors: BTreeMap<String, Tensor> = {
        let data = varmap
            .data()
            .lock()
            .map_err(|e| AuthorIdError::Model(format!("Variable map lock poisoned: {e}")))?;
        data.iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect()
    };
    safetensors::tensor::serialize(tensors.iter().map(|(k, v)| (k.as_str(), v)), &None)
        .map_err(|e| AuthorIdError::Model(format!("Failed to serialize weights: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::METRICS_DIM;

    fn dims(classes: usize) -> ClassifierDims {
        ClassifierDims {
            metrics_dim: METRICS_DIM,
            token_len: 6,
            classes,
        }
    }

    fn small_config() -> ModelConfig {
        ModelConfig {
            dropout: 0.1,
            metrics_width: 8,
            token_width: 8,
            block_widths: (12, 10),
            token_blocks: 2,
            fusion_width: 6,
        }
    }

    fn inputs(batch: usize, device: &Device) -> (Tensor, Tensor) {
        let metrics = Tensor::ones((batch, METRICS_DIM), DType::F32, device).unwrap();
        let tokens = Tensor::zeros((batch, 6), DType::U32, device).unwrap();
        (metrics, tokens)
    }

    #[test]
    fn test_head_config_binary() {
        let head = classifier_head_config(2);
        assert_eq!(head.kind, HeadKind::Binary);
        assert_eq!(head.units, 1);
        assert_eq!(head.activation, Activation::Sigmoid);
        assert_eq!(head.loss, LossKind::BinaryCrossEntropy);
    }

    #[test]
    fn test_head_config_multi_class() {
        for classes in [3, 5, 10] {
            let head = classifier_head_config(classes);
            assert_eq!(head.kind, HeadKind::MultiClass);
            assert_eq!(head.units, classes);
            assert_eq!(head.activation, Activation::Softmax);
            assert_eq!(head.loss, LossKind::SparseCategoricalCrossEntropy);
        }
    }

    #[test]
    fn test_logits_shape_follows_head() {
        let device = Device::Cpu;
        for (classes, units) in [(2, 1), (4, 4)] {
            let varmap = VarMap::new();
            let model =
                AuthorClassifier::new_trainable(&varmap, dims(classes), &small_config(), &device)
                    .unwrap();
            let (metrics, tokens) = inputs(3, &device);
            let logits = model.forward_logits(&metrics, &tokens, true).unwrap();
            assert_eq!(logits.dims(), &[3, units]);
        }
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let device = Device::Cpu;
        for classes in [2, 3] {
            let varmap = VarMap::new();
            let model =
                AuthorClassifier::new_trainable(&varmap, dims(classes), &small_config(), &device)
                    .unwrap();
            let (metrics, tokens) = inputs(2, &device);
            let probs = model.predict_proba(&metrics, &tokens).unwrap();
            assert_eq!(probs.len(), 2);
            for row in probs {
                assert_eq!(row.len(), classes);
                let sum: f32 = row.iter().sum();
                assert!((sum - 1.0).abs() < 1e-4);
                assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
            }
        }
    }

    #[test]
    fn test_losses_are_finite_scalars() {
        let device = Device::Cpu;
        for classes in [2, 3] {
            let varmap = VarMap::new();
            let model =
                AuthorClassifier::new_trainable(&varmap, dims(classes), &small_config(), &device)
                    .unwrap();
            let (metrics, tokens) = inputs(2, &device);
            let labels = Tensor::new(&[0u32, 1], &device).unwrap();
            let logits = model.forward_logits(&metrics, &tokens, false).unwrap();
            let loss = model.head().loss(&logits, &labels).unwrap();
            let value = loss.to_scalar::<f32>().unwrap();
            assert!(value.is_finite());
        }
    }

    #[test]
    fn test_binary_loss_with_saturated_logits() {
        let device = Device::Cpu;
        let head = classifier_head_config(2);
        let logits = candle_core::Var::new(&[[40f32], [-40.0], [3.0]], &device).unwrap();
        let labels = Tensor::new(&[0u32, 1, 1], &device).unwrap();

        let loss = head.loss(logits.as_tensor(), &labels).unwrap();
        let value = loss.to_scalar::<f32>().unwrap();
        let expected = (80.0 + (1.0 + (-3f32).exp()).ln()) / 3.0;
        assert!((value - expected).abs() < 1e-4, "loss {value}");

        // d/dx = (sigmoid(x) - y) / n
        let grads = loss.backward().unwrap();
        let grad = grads
            .get(logits.as_tensor())
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        let sigmoid_3 = 1.0 / (1.0 + (-3f32).exp());
        let expected = [1.0 / 3.0, -1.0 / 3.0, (sigmoid_3 - 1.0) / 3.0];
        for (g, e) in grad.iter().zip(expected) {
            assert!(g.is_finite());
            assert!((g - e).abs() < 1e-4, "grad {g} vs {e}");
        }
    }

    #[test]
    fn test_binary_loss_at_zero_logit_is_ln2() {
        let device = Device::Cpu;
        let head = classifier_head_config(2);
        let logits = Tensor::zeros((4, 1), DType::F32, &device).unwrap();
        let labels = Tensor::new(&[0u32, 1, 0, 1], &device).unwrap();
        let value = head
            .loss(&logits, &labels)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!((value - std::f32::consts::LN_2).abs() < 1e-6);
    }

    #[test]
    fn test_weights_round_trip_through_safetensors() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let model =
            AuthorClassifier::new_trainable(&varmap, dims(3), &small_config(), &device).unwrap();
        let (metrics, tokens) = inputs(2, &device);
        let before = model.predict_proba(&metrics, &tokens).unwrap();

        let bytes = serialize_weights(&varmap).unwrap();
        let loaded =
            AuthorClassifier::from_safetensors(bytes, dims(3), &small_config(), &device).unwrap();
        let after = loaded.predict_proba(&metrics, &tokens).unwrap();

        for (a, b) in before.iter().flatten().zip(after.iter().flatten()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_load_mismatched_dims_fails() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        AuthorClassifier::new_trainable(&varmap, dims(3), &small_config(), &device).unwrap();
        let bytes = serialize_weights(&varmap).unwrap();
        let result = AuthorClassifier::from_safetensors(bytes, dims(4), &small_config(), &device);
        assert!(result.is_err());
    }
}
