//! Domain services.
//!
//! Each service owns only its domain logic and hands every call to the
//! handler matching the method's shape.

pub mod blog;
pub mod calculator;
pub mod greet;

pub use blog::DocumentService;
pub use calculator::ArithmeticService;
pub use greet::GreetingService;
