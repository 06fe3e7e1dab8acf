//! Calendar domain: events, view windows and their projection into grids.

pub mod display;
pub mod models;
pub mod projection;
pub mod range;

pub use models::{Event, EventDraft, EventId, EventInput, EventKind, EventPatch, User, UserId, UserProfile};
pub use projection::{project, Projection};
pub use range::{RangeResolver, ViewMode, ViewWindow};
