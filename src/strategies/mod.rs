//! Entry-side strategies that open a trade and hand it to the exit stages.

pub mod atm_straddle;

pub use atm_straddle::{atm_straddle, StraddleOutcome};
