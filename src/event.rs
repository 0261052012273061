//! The shared event object (C6): the common fields mutex and semaphore
//! build on, plus the wait/wake plumbing both reuse.
use crate::{
    klock::CpuLockCell,
    queue::ListHead,
    task::TaskId,
    utils::Init,
};

/// Index into the static event table. Stable for the process lifetime.
pub type EventId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Uninitialized,
    Mutex,
    Semaphore,
}

impl Init for EventKind {
    const INIT: Self = Self::Uninitialized;
}

pub(crate) struct EventCb {
    pub(crate) kind: CpuLockCell<EventKind>,
    /// Semaphore remaining-permit count. Unused by mutexes.
    pub(crate) count: CpuLockCell<u32>,
    /// Mutex owning task. Unused by semaphores.
    pub(crate) holder: CpuLockCell<Option<TaskId>>,
    /// Tasks blocked in `WAITING_FOR_EVENT` on this event.
    pub(crate) queue: CpuLockCell<ListHead>,
    /// Reserved for a future message-queue primitive; read and written by
    /// nothing in this core (feature `enable_message_queues`).
    #[cfg(feature = "enable_message_queues")]
    pub(crate) _message_queue_slot: CpuLockCell<()>,
}

impl Init for EventCb {
    const INIT: Self = Self {
        kind: Init::INIT,
        count: Init::INIT,
        holder: Init::INIT,
        queue: Init::INIT,
        #[cfg(feature = "enable_message_queues")]
        _message_queue_slot: Init::INIT,
    };
}
