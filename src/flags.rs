use bitflags::bitflags;

bitflags! {
    /// https://httpwg.org/specs/rfc7540.html#DATA
    #[repr(transparent)]
    pub struct DataFlags: u8 {
        /// When set, this frame is the last the endpoint will send for the
        /// identified stream.
        const END_STREAM = 0x1;
    }

    /// https://httpwg.org/specs/rfc7540.html#HEADERS
    #[repr(transparent)]
    pub struct HeadersFlags: u8 {
        /// When set, the header block is the last the endpoint will send for
        /// the identified stream. A trailers-only gRPC response arrives as a
        /// single HEADERS frame carrying this flag.
        const END_STREAM = 0x1;
        /// When set, the frame contains an entire header block. The engine
        /// reassembles CONTINUATION sequences, so decoded frames surfaced to
        /// this crate always carry it.
        const END_HEADERS = 0x4;
    }

    /// https://httpwg.org/specs/rfc7540.html#PING
    #[repr(transparent)]
    pub struct PingFlags: u8 {
        /// When set, this PING frame is a PING response.
        const ACK = 0x1;
    }
}
