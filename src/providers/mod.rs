//! Thin feature providers.
//!
//! Each provider obtains a live interpreter connection (creating one on
//! demand when policy permits), publishes a payload on its request channel,
//! awaits exactly one reply on the correlated response channel, and
//! transforms the reply into LSP types. All the interesting behavior lives
//! on the bus boundary; the semantic work happens in the helper.

pub mod completion;
pub mod folding;
pub mod format;
pub mod lint;

pub use completion::CompletionSupport;
pub use folding::FoldingSupport;
pub use format::FormattingSupport;
pub use lint::LintingSupport;
