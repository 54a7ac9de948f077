//! Client-side components of the tracking pipeline.
//!
//! These run on the driver and viewer hosts, not in the server process:
//! [`geo`] decides which raw GPS readings are worth transmitting, and
//! [`interpolator`] turns the sparse sample stream a viewer receives into
//! smooth marker motion. Both are plain structs driven by injected clocks
//! and sources so any host (simulator, embedded viewer, tests) can run them.

pub mod geo;
pub mod interpolator;
