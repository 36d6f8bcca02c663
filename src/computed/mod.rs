//! Memoized values derived from store state.

mod computed;

pub use computed::Computed;
