//! Tick pipeline components.
//!
//! ```text
//! CPAL Thread → Ring Buffer → Registry (extract/consume) → Canvas tick → Router → Sinks
//! ```
//!
//! - **Ring Buffer**: lock-free SPSC queue between the hardware callback and
//!   the master's extraction
//! - **Scheduler**: the [`Canvas`] ticks every node once per pipeline frame
//! - **Router**: fans each node's output out to all sinks with retry logic
//!
//! The ring buffer ensures the CPAL callback never blocks.

mod ring_buffer;
mod router;
mod scheduler;

pub(crate) use ring_buffer::AccumulationBuffer;
pub use router::OutputRouter;
pub use scheduler::{Canvas, CanvasCommand};
