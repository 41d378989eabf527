//! Routing layer of hopnet: links, meeting points and route search.
//!
//! A link owns the channels to one peer and implements the relay
//! verbs; a meeting point pairs the two half-routes of a payment;
//! a route search walks the candidate links one at a time. All three
//! are pure state machines emitting effects.

pub mod completed;
pub mod error;
pub mod link;
pub mod meeting_point;
pub mod search;

pub use completed::{CompletedRoute, CompletedRoutes, RouteDisposition};
pub use error::RoutingError;
pub use link::Link;
pub use meeting_point::MeetingPoint;
pub use search::{RouteSearch, SearchOrigin};
