//! Task control blocks and the intrusive queue link they carry.
use crate::{
    error::PanicReason,
    klock::{CpuLockCell, CpuLockTokenRefMut},
    port::Port,
    utils::Init,
};

/// Index into the static task table. Stable for the process lifetime.
pub type TaskId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskState {
    Ready,
    Running,
    Asleep,
    WaitingForEvent,
}

impl Init for TaskState {
    const INIT: Self = Self::Ready;
}

/// `OK` or `TIMEOUT`, written by the waker just before readying a task that
/// was blocked on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitResult {
    Ok,
    Timeout,
}

impl Init for WaitResult {
    const INIT: Self = Self::Ok;
}

/// Intrusive doubly-linked-list membership. A TCB is in at most one queue
/// (a priority queue or an event queue, never both) at any instant, so a
/// single pair of links covers both roles.
#[derive(Clone, Copy)]
pub(crate) struct Link {
    pub(crate) prev: Option<TaskId>,
    pub(crate) next: Option<TaskId>,
}

impl Init for Link {
    const INIT: Self = Self {
        prev: None,
        next: None,
    };
}

/// Static, once-written task identity: priority, stack bounds, entry
/// point. Populated by [`crate::cfg::init`] before the scheduler first
/// runs, then read-only for the rest of the process lifetime.
#[derive(Clone, Copy)]
pub(crate) struct TaskIdentity {
    pub(crate) base_prio: usize,
    pub(crate) stack_base: *mut u8,
    pub(crate) stack_size: usize,
    pub(crate) entry: Option<fn(usize)>,
    pub(crate) entry_param: usize,
}

impl Init for TaskIdentity {
    const INIT: Self = Self {
        base_prio: 0,
        stack_base: core::ptr::null_mut(),
        stack_size: 0,
        entry: None,
        entry_param: 0,
    };
}

// Safety: stack pointers are fixed for the task's lifetime and only ever
// observed under CPU Lock.
unsafe impl Send for TaskIdentity {}
unsafe impl Sync for TaskIdentity {}

pub(crate) struct TaskCb {
    pub(crate) identity: CpuLockCell<TaskIdentity>,
    pub(crate) state: CpuLockCell<TaskState>,
    /// Effective priority: equals `identity.base_prio` except while
    /// inheriting a higher priority from a waiter on a mutex this task
    /// holds (see `crate::mutex`).
    pub(crate) curr_prio: CpuLockCell<usize>,
    /// Remaining ticks before a sleep or a blocking-call timeout expires.
    /// `0` means "no active timer".
    pub(crate) delay: CpuLockCell<u32>,
    pub(crate) wait_event: CpuLockCell<Option<crate::event::EventId>>,
    pub(crate) wait_return: CpuLockCell<WaitResult>,
    pub(crate) link: CpuLockCell<Link>,
    /// Saved top-of-stack for a non-running task; written by `init` and by
    /// every context switch away from this task.
    pub(crate) stack_ptr: CpuLockCell<*mut u8>,
    #[cfg(feature = "enable_stats")]
    pub(crate) stack_high_water: CpuLockCell<usize>,
}

impl Init for TaskCb {
    const INIT: Self = Self {
        identity: Init::INIT,
        state: Init::INIT,
        curr_prio: Init::INIT,
        delay: Init::INIT,
        wait_event: Init::INIT,
        wait_return: Init::INIT,
        link: Init::INIT,
        stack_ptr: Init::INIT,
        #[cfg(feature = "enable_stats")]
        stack_high_water: Init::INIT,
    };
}

impl TaskCb {
    /// Opportunistically refresh the stack high-water mark by scanning for
    /// the sentinel fill pattern from `stack_base` forward. Called only
    /// when a task blocks, never on every tick, so it never competes with
    /// the scheduler's O(1) budget.
    #[cfg(feature = "enable_stats")]
    pub(crate) fn refresh_stack_high_water(&self, lock: &mut CpuLockTokenRefMut<'_>) {
        const FILL: u8 = 0xA5;
        let identity = *self.identity.read(&**lock);
        if identity.stack_base.is_null() {
            return;
        }
        // Safety: `stack_base..stack_base + stack_size` is the task's own
        // statically-allocated stack, which is otherwise untouched while
        // the task is not running; this function only runs with CPU Lock
        // held and is only called for the currently-blocking task.
        let used = unsafe {
            let mut i = 0;
            while i < identity.stack_size && *identity.stack_base.add(i) == FILL {
                i += 1;
            }
            identity.stack_size - i
        };
        let high_water = self.stack_high_water.write(&mut **lock);
        if used > *high_water {
            *high_water = used;
        }
    }
}

/// The fatal landing pad a task's synthetic return address points to.
///
/// A task's entry function is declared to run forever (looping or
/// sleeping); returning from it is always a bug. The port's `init_stack`
/// arranges for this to be reached instead of undefined behavior.
pub fn task_exit<P: Port>() -> ! {
    crate::panic::panic::<P>(PanicReason::TaskExited)
}
