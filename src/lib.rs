//! ThermoMark: interactive anomaly annotation for transformer thermal
//! inspections.
//!
//! An inspection pairs a baseline photo with a maintenance thermal image.
//! AI detection proposes anomaly boxes over the thermal image; inspectors
//! review them in a pan/zoom viewer, draw their own boxes, classify, comment,
//! and soft-delete, with all edits provenance-gated and autosaved on a
//! debounced schedule.

pub mod annotations;
pub mod app;
pub mod components;
pub mod geometry;
pub mod inference;
pub mod interaction;
pub mod logger;
pub mod observe;
pub mod sync;
pub mod viewer;
pub mod viewport;
