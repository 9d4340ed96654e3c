// ============================================================
// Layer 5 — Training Loops
// ============================================================
// Train + validation loops for both heads, driven by the epoch
// loader over cached shards and Adam.
//
//   - Training runs on B (an autodiff backend)
//   - model.valid() moves the head to B::InnerBackend, so the
//     validation batcher builds InnerBackend tensors
//   - The learning rate follows MultiStepLr, one value per epoch
//
// Checkpoints go to the run directory:
//   classification  best (by TRAIN.BEST_CHECKPOINT_BY) + last
//   captioning      epoch_{e} every TRAIN.SAVE_EVERY_N_EPOCHS + last
// and checkpoint.json is rewritten after every epoch.
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use anyhow::{anyhow, Result};
use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{activation::sigmoid, backend::AutodiffBackend, TensorData},
};
use serde::Serialize;
use std::path::PathBuf;

use crate::data::{
    collate::{CaptioningBatcher, ClassificationBatcher},
    loader::EpochLoader,
};
use crate::domain::clip::{CapSample, ClsSample};
use crate::infra::{
    checkpoint::{CheckpointManager, CheckpointMeta},
    config::{Monitor, TrainSettings},
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::ml::{
    cap_head::CaptionModel,
    cls_head::{bce_with_logits, ClassificationHeadConfig},
    ranking::mean_average_precision,
    schedule::MultiStepLr,
};

/// Where a training run writes its artifacts.
pub struct TrainRun<C> {
    pub checkpoints: CheckpointManager,
    pub metrics:     MetricsLogger,
    /// Sidecar template; `epoch` is updated as training goes
    pub meta:        CheckpointMeta<C>,
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub epochs:     usize,
    pub best_epoch: Option<usize>,
    pub best_value: f64,
    pub last:       Option<PathBuf>,
}

fn mean(sum: f64, count: usize) -> f64 {
    if count > 0 { sum / count as f64 } else { f64::NAN }
}

fn scalar<B: Backend>(loss: Tensor<B, 1>) -> f64 {
    loss.into_scalar().elem::<f64>()
}

fn host_values<B: Backend>(tensor: Tensor<B, 2>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("cannot read tensor data: {e:?}"))
}

fn weights_tensor<B: Backend>(weights: Option<&[f32]>, device: &B::Device) -> Option<Tensor<B, 1>> {
    weights.map(|w| Tensor::from_data(TensorData::new(w.to_vec(), [w.len()]), device))
}

// ─── Classification ───────────────────────────────────────────────────────────
pub fn train_classification<B: AutodiffBackend, C: Serialize>(
    device:        &B::Device,
    head_config:   &ClassificationHeadConfig,
    train_loader:  &EpochLoader<ClsSample>,
    val_loader:    &EpochLoader<ClsSample>,
    class_weights: Option<&[f32]>,
    settings:      &TrainSettings,
    run:           &mut TrainRun<C>,
) -> Result<TrainSummary> {
    let mut model = head_config.init::<B>(device);
    tracing::info!(
        "Classification head ready: {} → {:?} → {}",
        head_config.input_dim,
        head_config.layers,
        head_config.num_classes
    );

    let mut optim = AdamConfig::new().with_epsilon(1e-8).init();
    let schedule = MultiStepLr::new(
        settings.optim.init_learning_rate,
        &settings.optim.lr_milestones,
        settings.optim.lr_gamma,
    );

    let train_batcher = ClassificationBatcher::<B>::new(device.clone());
    let val_batcher = ClassificationBatcher::<B::InnerBackend>::new(device.clone());
    let train_weights = weights_tensor::<B>(class_weights, device);
    let val_weights = weights_tensor::<B::InnerBackend>(class_weights, device);

    let monitor = settings.best_checkpoint_by;
    let mut summary = TrainSummary {
        epochs:     settings.num_epochs,
        best_epoch: None,
        best_value: monitor.worst(),
        last:       None,
    };

    for epoch in 0..settings.num_epochs {
        let lr = schedule.lr(epoch);

        // ── Training phase ────────────────────────────────────────────────────
        let mut train_loss_sum = 0.0f64;
        let mut train_batches = 0usize;

        for (step, items) in train_loader.iter(epoch).enumerate() {
            let batch = train_batcher.batch(items?);
            let (loss, _) = model.forward_loss(batch.features, batch.labels, train_weights.clone());

            let loss_val = scalar(loss.clone());
            train_loss_sum += loss_val;
            train_batches += 1;
            if settings.log_steps > 0 && (step + 1) % settings.log_steps == 0 {
                tracing::info!("epoch {} step {}: loss={:.4}", epoch, step + 1, loss_val);
            }

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);
        }

        // ── Validation phase ──────────────────────────────────────────────────
        let model_valid = model.valid();
        let mut val_loss_sum = 0.0f64;
        let mut val_batches = 0usize;
        let mut scores = Vec::new();
        let mut targets = Vec::new();

        for items in val_loader.iter(epoch) {
            let batch = val_batcher.batch(items?);
            let logits = model_valid.forward(batch.features);
            let loss = bce_with_logits(logits.clone(), batch.labels.clone(), val_weights.clone());

            val_loss_sum += scalar(loss);
            val_batches += 1;
            scores.extend(host_values(sigmoid(logits))?);
            targets.extend(host_values(batch.labels)?);
        }

        let val_map = mean_average_precision(&scores, &targets, head_config.num_classes);
        let metrics = EpochMetrics::new(
            epoch,
            lr,
            mean(train_loss_sum, train_batches),
            mean(val_loss_sum, val_batches),
            val_map,
        );
        run.metrics.log(&metrics)?;

        println!(
            "Epoch {:>3}/{} | lr={:.2e} | train_loss={:.4} | val_loss={:.4} | val_mAP={}",
            epoch + 1,
            settings.num_epochs,
            lr,
            metrics.train_loss,
            metrics.val_loss,
            val_map.map(|m| format!("{m:.4}")).unwrap_or_else(|| "n/a".to_string()),
        );

        // ── Checkpoints ───────────────────────────────────────────────────────
        let monitored = match monitor {
            Monitor::ValLoss => Some(metrics.val_loss),
            Monitor::ValMap => val_map,
        };
        if let Some(value) = monitored.filter(|v| monitor.is_better(*v, summary.best_value)) {
            run.checkpoints.save_module::<B, _>(&model, "best")?;
            summary.best_epoch = Some(epoch);
            summary.best_value = value;
            tracing::info!("New best {:?} = {:.4} at epoch {}", monitor, value, epoch);
        }
        summary.last = Some(run.checkpoints.save_module::<B, _>(&model, "last")?);

        run.meta.epoch = epoch;
        run.checkpoints.save_meta(&run.meta)?;
    }

    tracing::info!("Training complete!");
    Ok(summary)
}

// ─── Captioning ───────────────────────────────────────────────────────────────
pub fn train_captioning<B: AutodiffBackend, C: Serialize>(
    device:       &B::Device,
    model:        CaptionModel<B>,
    train_loader: &EpochLoader<CapSample>,
    val_loader:   &EpochLoader<CapSample>,
    settings:     &TrainSettings,
    run:          &mut TrainRun<C>,
) -> Result<TrainSummary> {
    let pad_id = model.pad_id as u32;
    let CaptionModel { mut head, encoder, .. } = model;

    let mut optim = AdamConfig::new().with_epsilon(1e-8).init();
    let schedule = MultiStepLr::new(
        settings.optim.init_learning_rate,
        &settings.optim.lr_milestones,
        settings.optim.lr_gamma,
    );

    let train_batcher = CaptioningBatcher::<B>::new(device.clone(), pad_id);
    let val_batcher = CaptioningBatcher::<B::InnerBackend>::new(device.clone(), pad_id);
    let save_every = settings.save_every_n_epochs.max(1);

    let mut summary = TrainSummary {
        epochs:     settings.num_epochs,
        best_epoch: None,
        best_value: f64::INFINITY,
        last:       None,
    };

    for epoch in 0..settings.num_epochs {
        let lr = schedule.lr(epoch);

        // ── Training phase ────────────────────────────────────────────────────
        let mut train_loss_sum = 0.0f64;
        let mut train_batches = 0usize;

        for (step, items) in train_loader.iter(epoch).enumerate() {
            let batch = train_batcher.batch(items?);
            let visual = encoder.encode_frames(batch.frames);
            let loss = head.forward_loss(
                visual,
                batch.frame_pad,
                batch.input_ids,
                batch.token_pad,
                pad_id as usize,
            );

            let loss_val = scalar(loss.clone());
            train_loss_sum += loss_val;
            train_batches += 1;
            if settings.log_steps > 0 && (step + 1) % settings.log_steps == 0 {
                tracing::info!("epoch {} step {}: loss={:.4}", epoch, step + 1, loss_val);
            }

            let grads = GradientsParams::from_grads(loss.backward(), &head);
            head = optim.step(lr, head, grads);
        }

        // ── Validation phase ──────────────────────────────────────────────────
        let model_valid = CaptionModel::new(head.valid(), encoder.clone(), pad_id);
        let mut val_loss_sum = 0.0f64;
        let mut val_batches = 0usize;

        for items in val_loader.iter(epoch) {
            let batch = val_batcher.batch(items?);
            val_loss_sum += scalar(model_valid.forward_loss(batch));
            val_batches += 1;
        }

        let metrics = EpochMetrics::new(
            epoch,
            lr,
            mean(train_loss_sum, train_batches),
            mean(val_loss_sum, val_batches),
            None,
        );
        run.metrics.log(&metrics)?;

        println!(
            "Epoch {:>3}/{} | lr={:.2e} | train_loss={:.4} | val_loss={:.4}",
            epoch + 1,
            settings.num_epochs,
            lr,
            metrics.train_loss,
            metrics.val_loss,
        );

        if metrics.is_improvement(summary.best_value) {
            summary.best_epoch = Some(epoch);
            summary.best_value = metrics.val_loss;
        }

        // ── Checkpoints ───────────────────────────────────────────────────────
        if (epoch + 1) % save_every == 0 {
            run.checkpoints.save_module::<B, _>(&head, &format!("epoch_{epoch}"))?;
            tracing::info!("Checkpoint saved for epoch {}", epoch);
        }
        summary.last = Some(run.checkpoints.save_module::<B, _>(&head, "last")?);

        run.meta.epoch = epoch;
        run.checkpoints.save_meta(&run.meta)?;
    }

    tracing::info!("Training complete!");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::loader::LoaderConfig;
    use crate::domain::{model_type::ModelType, tensor::HostTensor};
    use crate::infra::config::{Accelerator, OptimSettings};
    use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};
    use burn::data::dataset::InMemDataset;
    use std::sync::Arc;

    type B = Autodiff<NdArray>;

    fn settings(epochs: usize) -> TrainSettings {
        TrainSettings {
            batch_size:          2,
            num_epochs:          epochs,
            accelerator:         Accelerator::Cpu,
            precision:           "32".to_string(),
            devices:             1,
            log_steps:           1,
            best_checkpoint_by:  Monitor::ValLoss,
            save_every_n_epochs: 2,
            optim:               OptimSettings {
                init_learning_rate: 1e-2,
                lr_milestones:      vec![1],
                lr_gamma:           0.1,
            },
        }
    }

    fn cls_loader(n: usize) -> EpochLoader<ClsSample> {
        let items: Vec<ClsSample> = (0..n)
            .map(|i| {
                let label = (i % 2) as f32;
                ClsSample::new(
                    HostTensor::f32(vec![1, 4], vec![label, 1.0 - label, 0.5, 0.0]).unwrap(),
                    HostTensor::f32(vec![1, 2], vec![label, 1.0 - label]).unwrap(),
                )
                .unwrap()
            })
            .collect();
        EpochLoader::new(Arc::new(InMemDataset::new(items)), LoaderConfig::ordered(2)).unwrap()
    }

    fn run<C>(dir: &std::path::Path, head: C, kind: ModelType) -> TrainRun<C> {
        TrainRun {
            checkpoints: CheckpointManager::new(dir).unwrap(),
            metrics:     MetricsLogger::new(dir).unwrap(),
            meta:        CheckpointMeta {
                model_type: kind,
                experiment: "test".to_string(),
                epoch:      0,
                head,
                tokenizer:  None,
            },
        }
    }

    #[test]
    fn test_classification_writes_best_last_and_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClassificationHeadConfig::new(4, 2, vec![3], 0.0, false);
        let mut run = run(dir.path(), config.clone(), ModelType::Classification);

        let summary = train_classification::<B, _>(
            &NdArrayDevice::Cpu,
            &config,
            &cls_loader(6),
            &cls_loader(4),
            Some([1.0f32, 2.0].as_slice()),
            &settings(2),
            &mut run,
        )
        .unwrap();

        assert_eq!(summary.epochs, 2);
        assert!(summary.best_epoch.is_some());
        assert!(dir.path().join("best.mpk").is_file());
        let last = summary.last.unwrap();
        assert_eq!(last, dir.path().join("last.mpk"));

        let fresh = config.init::<B>(&NdArrayDevice::Cpu);
        let restored = CheckpointManager::load_module::<B, _>(&last, fresh, &NdArrayDevice::Cpu).unwrap();
        let logits = restored.forward(Tensor::<B, 2>::ones([1, 4], &NdArrayDevice::Cpu));
        assert_eq!(logits.dims(), [1, 2]);

        let csv = std::fs::read_to_string(dir.path().join("metrics.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3);
        let meta: CheckpointMeta<ClassificationHeadConfig> =
            CheckpointManager::load_meta(&dir.path().join("last")).unwrap();
        assert_eq!(meta.epoch, 1);
    }

    #[test]
    fn test_captioning_saves_every_n_epochs() {
        use crate::ml::{cap_head::CaptioningHeadConfig, encoder::FrameEncoder};

        let items: Vec<CapSample> = (0..3)
            .map(|i| CapSample {
                frames:         HostTensor::u8(vec![2, 1, 1, 3], vec![i as u8; 6]).unwrap(),
                input_ids:      HostTensor::i64(vec![1, 4], vec![101, 5, 102, 0]).unwrap(),
                attention_mask: HostTensor::i64(vec![1, 4], vec![1, 1, 1, 0]).unwrap(),
            })
            .collect();
        let loader = || {
            EpochLoader::new(Arc::new(InMemDataset::new(items.clone())), LoaderConfig::ordered(2)).unwrap()
        };

        let dir = tempfile::tempdir().unwrap();
        let config = CaptioningHeadConfig::new(3, 110, 8, 8, 2, 1, 16, 0.0);
        let model = CaptionModel::new(config.init::<B>(&NdArrayDevice::Cpu), FrameEncoder::Identity, 0);
        let mut run = run(dir.path(), config, ModelType::Captioning);

        let summary =
            train_captioning::<B, _>(&NdArrayDevice::Cpu, model, &loader(), &loader(), &settings(3), &mut run)
                .unwrap();

        assert!(summary.best_value.is_finite());
        assert!(dir.path().join("epoch_1.mpk").is_file());
        assert!(!dir.path().join("epoch_0.mpk").exists());
        assert!(!dir.path().join("epoch_2.mpk").exists());
        assert_eq!(summary.last, Some(dir.path().join("last.mpk")));
        assert!(dir.path().join("last.mpk").is_file());
    }
}
