//! Wire-format messages
//!
//! Hand-derived `prost` messages. The encoding of `storage::Envelope` is the
//! canonical byte string for content addressing: prost writes fields in tag
//! order and `parent_cids` is kept sorted, so encoding is deterministic.

pub mod storage {
    /// Wire form of an envelope. The cid is never carried on the wire;
    /// receivers derive it from these fields.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Envelope {
        #[prost(string, tag = "1")]
        pub content_topic: ::prost::alloc::string::String,
        #[prost(uint64, tag = "2")]
        pub timestamp_ns: u64,
        #[prost(bytes = "vec", tag = "3")]
        pub payload: ::prost::alloc::vec::Vec<u8>,
        /// Sorted, deduplicated parent content ids (32 bytes each).
        #[prost(bytes = "vec", repeated, tag = "4")]
        pub parent_cids: ::prost::alloc::vec::Vec<::prost::alloc::vec::Vec<u8>>,
    }
}
