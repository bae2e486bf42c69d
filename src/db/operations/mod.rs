//! Per-collection queries. Every function takes a bare connection so callers
//! can run several of them inside one transaction (`&mut *tx`).

pub mod coach;
pub mod documents;
pub mod exercises;
pub mod simulations;
pub mod topics;
