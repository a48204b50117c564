//! Runnable examples for `imagegen_rs` live under `examples/`.
