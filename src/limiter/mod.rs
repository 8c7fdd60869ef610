//! Sliding-window rate limiting core.

pub mod key;
pub mod rules;
pub mod window;

pub use key::{RateLimitKey, Scope};
pub use rules::{RateLimitRule, RuleRegistry};
pub use window::{Decision, SlidingWindow};
