//! # Event subscribers.
//!
//! [`Subscribe`] is the trait user code implements to observe runtime events;
//! [`SubscriberSet`] owns one bounded queue and worker per subscriber.

mod set;
mod subscribe;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;
