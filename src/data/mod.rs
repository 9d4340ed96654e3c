// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// Everything between decoded clips and device tensors.
//
// The pipeline flows in two passes:
//
//   Encoding pass (runs once, fills the cache)
//
//   ClipSource        → synthetic clips or a frame folder
//       │
//       ▼
//   Clip datasets     → ClsSample / CaptionClip items
//       │
//       ▼
//   Collate           → host batches (concat or tokenize + pad)
//       │
//       ▼
//   ShardStore        → {split}_x_{i}.safetensors + {split}_y_{i}.safetensors
//
//   Training pass (every epoch)
//
//   ShardDataset      → one cached item per shard pair
//       │
//       ▼
//   EpochLoader       → shuffled, prefetched batches of items
//       │
//       ▼
//   Batchers          → tensors on the training device
//
// Reference: Burn Book §4 (Datasets and Dataloaders)
//            Rust Book §13 (Iterators and Closures)

/// Stacks items into host batches and device batches
pub mod collate;

/// Clip sources, dataset views and the dataset factory
pub mod dataset;

/// Charades-style folders of extracted frames
pub mod frame_folder;

/// Epoch iteration with shuffling and background prefetch
pub mod loader;

/// Shard file naming, pairing and the safetensors codec
pub mod shard;

/// Implements Burn's Dataset trait over a shard directory
pub mod shard_dataset;

/// Shuffles and splits annotations into train/validation sets
pub mod splitter;

/// Deterministic generated clips
pub mod synthetic;
