//! QuantLab Core — panel rows, anchored folds, leakage-safe normalization and
//! candidate scoring.
//!
//! This crate contains the leaf-level building blocks of the evaluation
//! pipeline:
//! - Domain types (panel rows, folds, fold metrics, ids)
//! - Anchored walk-forward fold construction and fold-set validation
//! - Per-fold feature normalization fitted on training rows only
//! - The fixed candidate catalogue and fold-level scoring
//! - Feature-store partition discovery and the panel cache

pub mod candidates;
pub mod data;
pub mod domain;
pub mod folds;
pub mod normalize;
pub mod rng;
pub mod scoring;
pub mod stats;
