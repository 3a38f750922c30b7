//! Shared fixtures for unit tests.

use crate::symbol::SymbolStore;
use crate::term::TermStore;

/// Fresh stores for one test, with tracing initialized when enabled.
pub(crate) fn setup() -> (SymbolStore, TermStore) {
    crate::trace::init_subscriber();
    (SymbolStore::new(), TermStore::new())
}
