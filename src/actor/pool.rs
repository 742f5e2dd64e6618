use std::sync::Arc;

use crate::actor::{ActorCell, ActorSlot};
use crate::error::SendError;
use crate::mailbox::Mailbox;
use crate::message::{ActorId, Addr, Message, PoolId, SendResult};

/// A group of actors sharing one overflow queue. Messages with a
/// specific destination land in that actor's private mailbox; messages
/// addressed to the pool, or bounced off a full private mailbox, go to
/// the shared queue where any pool member may pick them up.
///
/// Pool 0 is special: its actors never drain the shared queue, so
/// nothing is allowed to spill into it.
pub struct Pool {
    pub(crate) id: PoolId,
    pub(crate) shared: Arc<Mailbox<Message>>,
    pub(crate) cells: Vec<ActorCell>,
}

impl Pool {
    pub(crate) fn new(id: PoolId, shared_cap: usize) -> Self {
        Self {
            id,
            shared: Arc::new(Mailbox::with_capacity(shared_cap)),
            cells: Vec::new(),
        }
    }

    pub(crate) fn add(&mut self, queue_cap: usize, core_id: Option<usize>) -> ActorId {
        let actor = self.cells.len() as ActorId;
        let slot = Arc::new(ActorSlot::new(Addr::new(self.id, actor), queue_cap));
        self.cells.push(ActorCell { slot, core_id });
        actor
    }

    pub(crate) fn slot(&self, actor: ActorId) -> Option<&Arc<ActorSlot>> {
        self.cells.get(actor as usize).map(|cell| &cell.slot)
    }

    /// Delivers into the pool. `force` demands the private mailbox and
    /// fails instead of falling back to the shared queue.
    pub(crate) fn push_msg(&self, msg: Message, force: bool) -> SendResult {
        if msg.dst.has_actor() {
            let Some(cell) = self.cells.get(msg.dst.actor as usize) else {
                return Err(SendError::no_route(Some(msg)));
            };
            match cell.slot.mailbox.push(msg) {
                Ok(()) => return Ok(()),
                Err(mut err) => {
                    if force || self.id == 0 {
                        return Err(err);
                    }
                    return match err.value.take() {
                        Some(msg) => self.shared.push(msg),
                        None => Err(err),
                    };
                }
            }
        }

        // Pool-addressed message, shared queue is the only route.
        if self.id == 0 {
            return Err(SendError::no_route(Some(msg)));
        }
        self.shared.push(msg)
    }
}
