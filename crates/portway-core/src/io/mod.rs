//! I/O primitives for the byte relay.

mod copy;

pub use copy::{copy_bidirectional, CopyEnd, CopyOutcome, IoOp, Leg, LegFault};
