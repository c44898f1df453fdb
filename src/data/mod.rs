/// Data layer: container I/O and the in-memory trace types.
///
/// Architecture:
/// ```text
///  .parquet / .json
///        │
///        ▼
///   ┌──────────────┐
///   │    store     │  file ⇄ DatasetStore (named N-d datasets)
///   └──────────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │    model     │  TraceMatrix, NoiseEstimate, OutputBundle
///   └──────────────┘
/// ```

pub mod model;
pub mod store;
