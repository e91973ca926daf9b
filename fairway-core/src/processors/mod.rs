//! Event processors for the round lifecycle.
//!
//! - `EventDispatcher`: pulls deliveries off the bus, decodes them once and
//!   hands the typed envelope to every registered handler
//! - `RoundSaga`: drives rounds through creation, joining, scoring and
//!   finalization, one hop per event
//! - `TagLookupResponder`: answers `TagLookupRequest` from the tag ledger
//! - `TagSwapMatcher`: pairs reciprocal tag swap requests (called directly,
//!   not through the bus), emits `ScheduledRoundTagUpdate` on success

pub mod dispatcher;
pub mod round_saga;
pub mod tag_lookup;
pub mod tag_swap;

pub use dispatcher::{EventDispatcher, EventHandler};
pub use round_saga::{HopError, RoundSaga};
pub use tag_lookup::TagLookupResponder;
pub use tag_swap::{SwapError, SwapOutcome, SwapRequest, TagSwapMatcher};
