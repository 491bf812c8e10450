//! Switchyard Core: service identifiers and the message envelope.
//!
//! These are the leaf types shared by the router, the workers hosting
//! services, and the services themselves.

pub mod id;
pub mod message;

pub use id::{ParseServiceIdError, ServiceId};
pub use message::{Message, MessageType};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
