#![warn(missing_docs)]

//! Functionality common to UASC clients and servers: the OPC UA TCP binary
//! transport (hello/acknowledge framing, chunking, reassembly) and the
//! secure channel with its tokens, derived keys and per-chunk security.

pub mod comms;

pub mod messages;
pub use messages::{Message, MessageType, RequestMessage, ResponseMessage};

/// Common OPC UA constants.
pub mod constants {
    /// Default OPC UA port number. Used implicitly in opc.tcp:// urls that
    /// carry no explicit port.
    pub const DEFAULT_OPC_UA_SERVER_PORT: u16 = 4840;
}

/// Common synchronous locks. Re-exports locks from parking_lot used
/// internally.
pub mod sync {
    /// Read-write lock. Use this if you usually only need to read the value.
    pub type RwLock<T> = parking_lot::RwLock<T>;
    /// Mutually exclusive lock. Use this if you need both read and write often.
    pub type Mutex<T> = parking_lot::Mutex<T>;
}
