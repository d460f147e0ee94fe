//! Event envelopes, the versioned content codec, and projections.

pub mod codec;
pub mod envelope;
pub mod event;
pub mod projection;
pub mod runner;

pub use codec::{CodecError, DecoderTable, EventCodec, encode_content};
pub use envelope::{EventEnvelope, EventMetadata};
pub use event::Event;
pub use projection::{Projection, ProjectionError, RowChange};
pub use runner::{ApplyOutcome, PartitionCursor, ProjectionRunner, RowState};
