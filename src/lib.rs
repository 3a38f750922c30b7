pub mod builtin;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod matching;
pub mod metrics;
pub mod proof;
pub mod rule;
pub mod strata;
pub mod subrule;
pub mod symbol;
pub mod table;
pub mod term;
pub mod trace;
pub mod unify;

#[cfg(test)]
pub(crate) mod test_utils;
