//! The live BACnet device side of the gateway.
//!
//! [`registry::ObjectRegistry`] holds the materialised object graph,
//! [`cov::CovEngine`] drives change-of-value subscriptions and fanout,
//! and [`server::DeviceServer`] serves BACnet requests over a
//! [`transport::BacnetTransport`]. Production traffic runs over BACnet/IP
//! UDP ([`udp::UdpTransport`]); tests use the in-process
//! [`channel::ChannelTransport`].

pub mod channel;
pub mod cov;
pub mod error;
pub mod registry;
pub mod server;
pub mod transport;
pub mod udp;
pub mod wire;

pub use cov::{CovEngine, CovSubscription, SubscribeOutcome, SubscribeRequest};
pub use error::{CovError, RegistryError};
pub use registry::{ObjectRegistry, ValueChange, WriteRequest};
pub use server::DeviceServer;
pub use transport::{
    BacnetTransport, CovNotification, CovNotifier, PeerAddress, PropertyValue, ServiceReply,
    ServiceRequest, TransportError,
};
