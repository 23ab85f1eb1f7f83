//! Build event protocol: wire types, decoding, and observers.

pub mod decoder;
pub mod event;
pub mod observer;

pub use decoder::{DecodeError, DecodeStep, EventDecoder, SortedValidator};
pub use event::{
    BuildEvent, EndPayload, EndVertex, ErrorPayload, EventParseError, MessageRef, NdjsonAssembler,
    VertexRef, VerticesSorted, parse_ndjson,
};
pub use observer::{
    BuildFailure, BuildObserver, BuildSummary, ChannelObserver, MemoryObserver, MessageUpdate,
    NullObserver, ObserverRecord,
};
