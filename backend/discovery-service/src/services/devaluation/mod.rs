// ============================================
// Devaluation Engine
// ============================================
//
// Computes the retention multiplier for candidates the user has already
// seen: how strongly to suppress them now, and how much of that
// suppression has decayed since the last view.
//
// Construction validates the config and is startup-fatal on failure;
// per-request inputs degrade gracefully and never error.

mod engine;

pub use engine::DevaluationEngine;
