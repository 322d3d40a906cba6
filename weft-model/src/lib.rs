//! Weft Model
//!
//! Pure data types and capability traits for the Weft replicated topic mesh,
//! decoupled from storage engines, network stacks, and the node assembly.

pub mod clock;
pub mod envelope;
pub mod proto;
pub mod registry;
pub mod store;
pub mod transport;
pub mod types;

pub use clock::{Clock, MockClock, SystemClock};
pub use envelope::{Envelope, EnvelopeError};
pub use registry::{Node, RosterError, RosterSource};
pub use store::{InsertOutcome, QueryFilter, StoreError, TopicStore};
pub use transport::{FetchProvider, Transport, TransportError};
pub use types::{Cid, PeerId};
