pub mod blocks;
pub mod translation;

pub use translation::{BlockTranslator, TranslationError, TranslationTable};
