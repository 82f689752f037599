//! In-process transport carrying decoded service requests over channels.
//!
//! This is the test-side implementation of the wire traits: requests are
//! injected through a [`ChannelClient`], and replies and notifications
//! are recorded for inspection instead of being encoded.

use crate::transport::{
    BacnetTransport, CovNotification, CovNotifier, PeerAddress, ServiceReply, ServiceRequest,
    TransportError,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

pub struct ChannelTransport {
    requests: Mutex<Receiver<(PeerAddress, ServiceRequest)>>,
    replies: Mutex<Vec<(PeerAddress, ServiceReply)>>,
    notifications: Mutex<Vec<(PeerAddress, bool, CovNotification)>>,
    drop_confirmed: AtomicBool,
}

/// The client half: injects requests into the transport.
#[derive(Clone)]
pub struct ChannelClient {
    tx: Sender<(PeerAddress, ServiceRequest)>,
}

impl ChannelClient {
    pub fn send(&self, peer: PeerAddress, request: ServiceRequest) -> Result<(), TransportError> {
        self.tx
            .send((peer, request))
            .map_err(|_| TransportError::Closed)
    }
}

impl ChannelTransport {
    pub fn pair() -> (Arc<Self>, ChannelClient) {
        let (tx, rx) = mpsc::channel();
        let transport = Arc::new(Self {
            requests: Mutex::new(rx),
            replies: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            drop_confirmed: AtomicBool::new(false),
        });
        (transport, ChannelClient { tx })
    }

    /// Makes confirmed notifications fail, as if subscribers stopped
    /// acknowledging.
    pub fn set_drop_confirmed(&self, drop: bool) {
        self.drop_confirmed.store(drop, Ordering::SeqCst);
    }

    /// Drains the recorded replies.
    pub fn take_replies(&self) -> Vec<(PeerAddress, ServiceReply)> {
        std::mem::take(&mut *self.replies.lock())
    }

    /// Drains the recorded notifications.
    pub fn take_notifications(&self) -> Vec<(PeerAddress, bool, CovNotification)> {
        std::mem::take(&mut *self.notifications.lock())
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().len()
    }
}

impl BacnetTransport for ChannelTransport {
    fn poll(
        &self,
        timeout: Duration,
    ) -> Result<Option<(PeerAddress, ServiceRequest)>, TransportError> {
        match self.requests.lock().recv_timeout(timeout) {
            Ok(incoming) => Ok(Some(incoming)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn reply(&self, peer: &PeerAddress, reply: ServiceReply) -> Result<(), TransportError> {
        self.replies.lock().push((peer.clone(), reply));
        Ok(())
    }
}

impl CovNotifier for ChannelTransport {
    fn notify(
        &self,
        address: &PeerAddress,
        confirmed: bool,
        notification: &CovNotification,
    ) -> Result<(), TransportError> {
        if confirmed && self.drop_confirmed.load(Ordering::SeqCst) {
            return Err(TransportError::NotificationTimeout);
        }
        self.notifications
            .lock()
            .push((address.clone(), confirmed, notification.clone()));
        Ok(())
    }
}
