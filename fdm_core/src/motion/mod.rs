//! The motion-planning pipeline: ring buffer, block builder, look-ahead
//! speed optimizer, trapezoid generator, and the reference block consumer.

pub mod block;
pub mod lookahead;
pub mod planner;
pub mod queue;
pub mod stepper;
pub mod trapezoid;
