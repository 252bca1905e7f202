//! # wq-data
//!
//! Tabular data handling for the wine-quality pipeline: CSV loading into a
//! column-oriented [`Frame`], correlation-based feature selection, a seeded
//! train/validation split, and the preparation step that writes the four
//! partition files the training sweep consumes.

pub mod features;
pub mod frame;
pub mod prep;
pub mod split;

pub use features::{correlations_with, pearson, select_features, DEFAULT_CORRELATION_THRESHOLD};
pub use frame::{Column, ColumnData, Frame};
pub use prep::{prepare, IndicatorSpec, Partitions, PrepConfig};
pub use split::{train_test_split, SplitConfig, SplitIndices};
