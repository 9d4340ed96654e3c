// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust types that every other layer agrees on.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain Rust structs, enums, and traits
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Clip, sample and caption item types
pub mod clip;

// Purpose-written pipeline failures
pub mod error;

// ModelType and Split
pub mod model_type;

// Framework-free tensors in host memory
pub mod tensor;

// Core abstractions (traits) that other layers implement
pub mod traits;
