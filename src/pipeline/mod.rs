//! Invocation stages.
//!
//! Each submodule implements exactly one step, so each can be tested without
//! a network:
//!
//! ```text
//! images ──▶ encode ──▶ prompt ──▶ client (retry) ──▶ normalize
//!           (webp/b64)  (message)   (VisionService)    (JSON / fallback)
//! ```
//!
//! 1. [`encode`]   : serialise each `DynamicImage` in the configured format
//! 2. [`prompt`]   : one user message: instruction, then images in order
//! 3. [`client`]   : drive the service call with classified retry/backoff;
//!    the only stage with network I/O
//! 4. [`retry`]    : the retry policy and per-call state machine
//! 5. [`normalize`]: recover a structured payload from the raw reply

pub mod client;
pub mod encode;
pub mod normalize;
pub mod prompt;
pub mod retry;
