//! Content enrichment stages: equations, figures/tables and glossary terms

pub mod asset;
pub mod glossary;
pub mod math;

pub use asset::{asset_statistics, AssetBlock, AssetBlockKind, AssetProcessor, AssetStatistics};
pub use glossary::{glossary_statistics, search_glossary_terms, GlossaryExtractor, GlossaryStatistics};
pub use math::{
    Canonicalizer, EquationDelimiter, EquationSpan, MathError, MathematicalProcessor, MATH_ENVIRONMENTS,
};
