//! An in-process stand-in for [`warden_vsr::OverlayTransport`]: every
//! simulated replica shares one [`Network`], which just fans `Send`/
//! `Broadcast` effects out to per-replica lock-free queues. No actual
//! sockets, no reordering or drops — the simulation's job is to exercise
//! the protocol state machine, not the overlay's delivery guarantees.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use warden_types::ReplicaId;

pub struct Network {
    inboxes: Vec<Arc<SegQueue<(ReplicaId, Vec<u8>)>>>,
}

impl Network {
    pub fn new(n: u32) -> Self {
        Self {
            inboxes: (0..n).map(|_| Arc::new(SegQueue::new())).collect(),
        }
    }

    pub fn handle_for(&self, replica: ReplicaId) -> NetworkHandle {
        NetworkHandle {
            local: replica,
            inboxes: self.inboxes.clone(),
        }
    }
}

/// One replica's view of the shared [`Network`]: where it drops outbound
/// bytes, and where it polls for inbound ones.
#[derive(Clone)]
pub struct NetworkHandle {
    local: ReplicaId,
    inboxes: Vec<Arc<SegQueue<(ReplicaId, Vec<u8>)>>>,
}

impl NetworkHandle {
    pub fn send(&self, to: Option<ReplicaId>, bytes: Vec<u8>) {
        match to {
            Some(to) => {
                if let Some(inbox) = self.inboxes.get(to.as_index()) {
                    inbox.push((self.local, bytes));
                }
            }
            None => {
                for (index, inbox) in self.inboxes.iter().enumerate() {
                    if ReplicaId::from_index(index) == self.local {
                        continue;
                    }
                    inbox.push((self.local, bytes.clone()));
                }
            }
        }
    }

    pub fn try_recv(&self) -> Option<(ReplicaId, Vec<u8>)> {
        self.inboxes[self.local.as_index()].pop()
    }
}

impl warden_vsr::OverlayTransport for NetworkHandle {
    fn send(&mut self, to: Option<ReplicaId>, bytes: Vec<u8>) {
        NetworkHandle::send(self, to, bytes);
    }

    fn try_recv(&mut self) -> Option<(ReplicaId, Vec<u8>)> {
        NetworkHandle::try_recv(self)
    }
}
