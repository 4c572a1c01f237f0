//! Broadcast to every attached session
//!
//! A message is encoded once and the same frame is queued on every session
//! that accepts it. Sessions that cannot take the frame (queue full or
//! writer gone) are removed on the spot; the remaining sessions are not
//! held up.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use indi_codec::{Encoder, Message};
use tracing::{trace, warn};

use crate::error::{ConnectionError, Result};
use crate::session::{Session, SessionId};

/// The set of sessions a driver broadcasts to
#[derive(Debug, Default)]
pub struct Fanout {
    sessions: DashMap<SessionId, Arc<Session>>,
    encoder: Encoder,
}

impl Fanout {
    pub fn new(encoder: Encoder) -> Self {
        Self {
            sessions: DashMap::new(),
            encoder,
        }
    }

    pub fn attach(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
    }

    pub fn detach(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| Arc::clone(s.value())).collect()
    }

    /// Encode `message` once and queue it on every accepting session
    ///
    /// Returns the number of sessions the frame was queued on.
    pub fn broadcast(&self, message: &Message) -> Result<usize> {
        self.broadcast_filtered(message, |session| session.accepts(message))
    }

    /// Like [`Fanout::broadcast`] with a caller-supplied session filter
    pub fn broadcast_filtered<F>(&self, message: &Message, filter: F) -> Result<usize>
    where
        F: Fn(&Session) -> bool,
    {
        let mut frame: Option<Bytes> = None;
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.sessions.iter() {
            let session = entry.value();
            if !filter(session) {
                continue;
            }
            let bytes = match &frame {
                Some(bytes) => bytes.clone(),
                None => {
                    let bytes = self.encoder.encode(message)?;
                    frame = Some(bytes.clone());
                    bytes
                }
            };
            match session.try_send(bytes) {
                Ok(()) => delivered += 1,
                Err(e) => dead.push((session.id(), e)),
            }
        }

        for (id, reason) in dead {
            if let Some((_, session)) = self.sessions.remove(&id) {
                warn!("Dropping {} ({}): {}", id, session.peer(), reason);
            }
        }
        trace!("{} queued on {} sessions", message.tag(), delivered);
        Ok(delivered)
    }

    /// Queue `message` on a single session
    pub fn send_to(&self, id: SessionId, message: &Message) -> Result<()> {
        let session = self.get(id).ok_or(ConnectionError::UnknownSession(id))?;
        let frame = self.encoder.encode(message)?;
        if let Err(e) = session.try_send(frame) {
            self.sessions.remove(&id);
            warn!("Dropping {} ({}): {}", id, session.peer(), e);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use indi_codec::{decode, Notice};

    #[test]
    fn test_broadcast_encodes_once_and_filters() {
        let fanout = Fanout::default();
        let config = SessionConfig::default();
        let (cam, mut cam_rx) = Session::detached("cam-client", &config);
        let (mount, mut mount_rx) = Session::detached("mount-client", &config);
        cam.request_device(Some("Cam"));
        mount.request_device(Some("Mount"));
        fanout.attach(cam);
        fanout.attach(mount);

        let message = Message::Message(Notice {
            device: Some("Cam".into()),
            timestamp: None,
            message: "exposure done".into(),
        });
        assert_eq!(fanout.broadcast(&message).unwrap(), 1);

        let frame = cam_rx.try_recv().unwrap();
        assert_eq!(decode(&frame).unwrap(), message);
        assert!(mount_rx.try_recv().is_err());
    }

    #[test]
    fn test_slow_session_is_evicted_without_blocking_others() {
        let fanout = Fanout::default();
        let (slow, _slow_rx) =
            Session::detached("slow", &SessionConfig::default().with_outbound_queue_len(1));
        let (fast, mut fast_rx) = Session::detached("fast", &SessionConfig::default());
        slow.request_device(None);
        fast.request_device(None);
        let slow_id = slow.id();
        fanout.attach(slow);
        fanout.attach(fast);

        let message = Message::Message(Notice::new(None, "tick"));
        assert_eq!(fanout.broadcast(&message).unwrap(), 2);
        assert_eq!(fanout.broadcast(&message).unwrap(), 1);
        assert_eq!(fanout.len(), 1);
        assert!(fanout.get(slow_id).is_none());

        assert_eq!(fanout.broadcast(&message).unwrap(), 1);
        assert_eq!(std::iter::from_fn(|| fast_rx.try_recv().ok()).count(), 3);
    }

    #[test]
    fn test_closed_session_is_evicted() {
        let fanout = Fanout::default();
        let (session, rx) = Session::detached("gone", &SessionConfig::default());
        session.request_device(None);
        let id = session.id();
        fanout.attach(session);
        drop(rx);

        let message = Message::Message(Notice::new(None, "anyone?"));
        assert_eq!(fanout.broadcast(&message).unwrap(), 0);
        assert!(fanout.is_empty());
        assert!(matches!(
            fanout.send_to(id, &message),
            Err(ConnectionError::UnknownSession(_))
        ));
    }
}
