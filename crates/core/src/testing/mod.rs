//! Test doubles for driving the storage stack without a network.

mod mock_transport;

pub use mock_transport::{MockTransport, StoredObject};
