//! The kernel singleton (`System`), the ready set (C3), and the scheduler
//! (C4): selecting the next runnable task and asking the port to switch to
//! it.
use core::{
    marker::PhantomData,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    error::PanicReason,
    klock::{CpuLockCell, CpuLockTokenRefMut},
    port::Port,
    queue::{self, ListHead},
    task::{TaskCb, TaskId, TaskState},
    utils::{Init, PrioBitmap},
};

/// Sentinel stored in [`TaskSlot`] for "no task selected".
const NO_TASK: usize = usize::MAX;

/// A task-id handle the port's context-switch trampoline may read without
/// holding CPU Lock (§5: "`curr_task` and `next_task` ... are declared
/// volatile-observable"). Written only by the scheduler, always under the
/// critical section; read lock-free by the port from any context,
/// including from inside the actual register-save/restore sequence.
pub(crate) struct TaskSlot(AtomicUsize);

impl Init for TaskSlot {
    const INIT: Self = Self(AtomicUsize::new(NO_TASK));
}

impl TaskSlot {
    fn set(&self, task: Option<TaskId>, _lock: &mut CpuLockTokenRefMut<'_>) {
        self.0
            .store(task.unwrap_or(NO_TASK), Ordering::Release);
    }

    /// Lock-free by design — see the type's docs.
    fn get(&self) -> Option<TaskId> {
        match self.0.load(Ordering::Acquire) {
            NO_TASK => None,
            id => Some(id),
        }
    }
}

/// The kernel's singleton process-wide state.
///
/// Zero-initialized (`System::INIT`) and declared as a single `static`;
/// populated once by [`crate::cfg::init`], then lives for the process.
/// `NUM_TASKS`/`NUM_EVENTS` are the sizes of the static task/event tables;
/// `NUM_PRIOS` is the number of distinct priority levels, bounded by
/// `usize::BITS` since the ready set is a single machine word.
pub struct System<P, const NUM_TASKS: usize, const NUM_EVENTS: usize, const NUM_PRIOS: usize> {
    pub(crate) tasks: [TaskCb; NUM_TASKS],
    pub(crate) events: [crate::event::EventCb; NUM_EVENTS],
    ready_queues: [CpuLockCell<ListHead>; NUM_PRIOS],
    ready_set: CpuLockCell<PrioBitmap>,
    isr_nesting_cnt: CpuLockCell<u8>,
    curr_task: TaskSlot,
    next_task: TaskSlot,
    is_running: CpuLockCell<bool>,
    _port: PhantomData<fn() -> P>,
}

impl<P, const NT: usize, const NE: usize, const NP: usize> Init for System<P, NT, NE, NP> {
    const INIT: Self = {
        assert!(NP <= PrioBitmap::MAX_LEN, "too many priority levels for a single-word ready set");
        Self {
            tasks: Init::INIT,
            events: Init::INIT,
            ready_queues: Init::INIT,
            ready_set: Init::INIT,
            isr_nesting_cnt: Init::INIT,
            curr_task: Init::INIT,
            next_task: Init::INIT,
            is_running: Init::INIT,
            _port: PhantomData,
        }
    };
}

impl<P: Port, const NT: usize, const NE: usize, const NP: usize> System<P, NT, NE, NP> {
    pub(crate) fn task(&self, id: TaskId) -> &TaskCb {
        &self.tasks[id]
    }

    /// The task the scheduler last selected to run. Does not require CPU
    /// Lock — see [`TaskSlot`] — so the port's context-switch trampoline
    /// may call this directly from the switch handler.
    pub fn current_task(&self) -> Option<TaskId> {
        self.curr_task.get()
    }

    /// The task the scheduler wants running next. Does not require CPU
    /// Lock, for the same reason as [`Self::current_task`].
    pub fn next_task(&self) -> Option<TaskId> {
        self.next_task.get()
    }

    pub(crate) fn curr_task(&self, _lock: &CpuLockTokenRefMut<'_>) -> Option<TaskId> {
        self.curr_task.get()
    }

    /// The task currently selected to run, panicking if called before
    /// `init` has run the scheduler at least once.
    pub(crate) fn running_task(&self, lock: &CpuLockTokenRefMut<'_>) -> TaskId {
        self.curr_task(lock)
            .expect("running_task called before the scheduler selected a task")
    }

    // ---- Ready set (C3) ----

    fn mark_ready(&self, prio: usize, lock: &mut CpuLockTokenRefMut<'_>) {
        self.ready_set.write(&mut **lock).set(prio);
    }

    fn mark_unready_if_empty(&self, prio: usize, lock: &mut CpuLockTokenRefMut<'_>) {
        if self.ready_queues[prio].read(&**lock).is_empty() {
            self.ready_set.write(&mut **lock).clear(prio);
        }
    }

    /// The priority of the highest-priority non-empty ready queue. Only
    /// `None` before `init` has readied the first task (including idle).
    pub(crate) fn highest_ready_prio(&self, lock: &CpuLockTokenRefMut<'_>) -> Option<usize> {
        self.ready_set.read(lock).highest()
    }

    /// Insert `task` into its current-priority ready queue and mark that
    /// priority's ready-set bit. Transitions `task`'s state to `Ready`.
    pub(crate) fn ready_task(&self, task: TaskId, lock: &mut CpuLockTokenRefMut<'_>) {
        let prio = *self.tasks[task].curr_prio.read(&**lock);
        *self.tasks[task].state.write(&mut **lock) = TaskState::Ready;
        let queue = self.ready_queues[prio].write(&mut **lock);
        let mut queue = *queue;
        queue::push_back(&self.tasks, &mut queue, lock, task);
        *self.ready_queues[prio].write(&mut **lock) = queue;
        self.mark_ready(prio, lock);
        log::trace!("task {task} ready at prio {prio}");
    }

    /// Remove `task` from its current-priority ready queue (it is about to
    /// run, sleep, or block). Does not change `task`'s `state` — the
    /// caller sets that to whatever comes next.
    pub(crate) fn unready_task(&self, task: TaskId, lock: &mut CpuLockTokenRefMut<'_>) {
        let prio = *self.tasks[task].curr_prio.read(&**lock);
        let queue = self.ready_queues[prio].write(&mut **lock);
        let mut queue = *queue;
        queue::remove(&self.tasks, &mut queue, lock, task);
        *self.ready_queues[prio].write(&mut **lock) = queue;
        self.mark_unready_if_empty(prio, lock);
    }

    /// Reposition `task` from `old_prio`'s ready queue to its (already
    /// updated) `curr_prio` queue. Used by priority inheritance.
    pub(crate) fn reposition_ready_task(
        &self,
        task: TaskId,
        old_prio: usize,
        lock: &mut CpuLockTokenRefMut<'_>,
    ) {
        let queue = self.ready_queues[old_prio].write(&mut **lock);
        let mut queue = *queue;
        queue::remove(&self.tasks, &mut queue, lock, task);
        *self.ready_queues[old_prio].write(&mut **lock) = queue;
        self.mark_unready_if_empty(old_prio, lock);

        let new_prio = *self.tasks[task].curr_prio.read(&**lock);
        let queue = self.ready_queues[new_prio].write(&mut **lock);
        let mut queue = *queue;
        queue::push_back(&self.tasks, &mut queue, lock, task);
        *self.ready_queues[new_prio].write(&mut **lock) = queue;
        self.mark_ready(new_prio, lock);
    }

    // ---- Scheduler (C4) ----

    /// Re-evaluate the highest-priority ready task and, if it differs from
    /// `curr_task`, request a context switch. Suppressed while any ISR is
    /// active; the outermost `exit_isr` performs the switch instead.
    pub(crate) fn schedule(&self, lock: &mut CpuLockTokenRefMut<'_>) {
        if *self.isr_nesting_cnt.read(&**lock) > 0 {
            return;
        }
        let highest = self
            .highest_ready_prio(lock)
            .expect("ready set must never be empty once the idle task exists");
        let next = self.ready_queues[highest].read(&**lock).front().expect(
            "ready-set bit set implies its queue is non-empty",
        );
        self.next_task.set(Some(next), lock);

        if Some(next) != self.curr_task(lock) {
            log::trace!("schedule: switching {:?} -> {next}", self.curr_task(lock));
            self.demote_preempted_task(lock);
            // Safety: CPU Lock is held (required by `lock`'s existence).
            unsafe { P::context_switch() };
        }
    }

    /// If `curr_task` is still marked `Running`, this is a pure preemption
    /// (the caller didn't already transition it to `Asleep`/
    /// `WaitingForEvent` itself) — demote it to `Ready`. It stays at the
    /// front of its ready queue either way; only the bookkeeping state
    /// changes. Without this, a preempted mutex holder would still read as
    /// `Running` and `mutex::raise_priority` would wrongly treat it as
    /// already on the CPU and skip boosting it.
    fn demote_preempted_task(&self, lock: &mut CpuLockTokenRefMut<'_>) {
        if let Some(prev) = self.curr_task(lock) {
            if *self.tasks[prev].state.read(&**lock) == TaskState::Running {
                *self.tasks[prev].state.write(&mut **lock) = TaskState::Ready;
            }
        }
    }

    /// Select the highest-priority ready task and record it as
    /// `next_task`, without requesting a port context switch. Used only by
    /// `init`, before any task has ever run, where there is nothing to
    /// switch away from.
    pub(crate) fn select_initial(&self, lock: &mut CpuLockTokenRefMut<'_>) {
        let highest = self
            .highest_ready_prio(lock)
            .expect("at least the idle task must be ready after init populates the task table");
        let next = self.ready_queues[highest]
            .read(&**lock)
            .front()
            .expect("ready-set bit set implies its queue is non-empty");
        self.next_task.set(Some(next), lock);
    }

    /// Called by the port immediately before transferring control to
    /// `next_task`, to update the observable `curr_task` handle.
    pub(crate) fn commit_switch(&self, lock: &mut CpuLockTokenRefMut<'_>) -> TaskId {
        let next = self.next_task.get().expect("no task selected");
        self.curr_task.set(Some(next), lock);
        *self.tasks[next].state.write(&mut **lock) = TaskState::Running;
        next
    }

    pub(crate) fn enter_isr(&self, lock: &mut CpuLockTokenRefMut<'_>) {
        let cnt = self.isr_nesting_cnt.write(&mut **lock);
        *cnt = match cnt.checked_add(1) {
            Some(next) => next,
            None => crate::panic::panic::<P>(PanicReason::IsrOverflow),
        };
    }

    /// Decrement the ISR nesting counter; if it reaches zero, re-evaluate
    /// the scheduler and, if needed, request the from-ISR switch variant.
    pub(crate) fn exit_isr(&self, lock: &mut CpuLockTokenRefMut<'_>) {
        let cnt = self.isr_nesting_cnt.write(&mut **lock);
        *cnt = match cnt.checked_sub(1) {
            Some(next) => next,
            None => crate::panic::panic::<P>(PanicReason::IsrUnderflow),
        };
        if *self.isr_nesting_cnt.read(&**lock) != 0 {
            return;
        }

        let highest = self
            .highest_ready_prio(lock)
            .expect("ready set must never be empty once the idle task exists");
        let next = self.ready_queues[highest].read(&**lock).front().expect(
            "ready-set bit set implies its queue is non-empty",
        );
        self.next_task.set(Some(next), lock);

        if Some(next) != self.curr_task(lock) {
            log::trace!("exit_isr: switching {:?} -> {next}", self.curr_task(lock));
            self.demote_preempted_task(lock);
            // Safety: CPU Lock is held.
            unsafe { P::context_switch_from_isr() };
        }
    }

    pub(crate) fn mark_running(&self, lock: &mut CpuLockTokenRefMut<'_>) {
        *self.is_running.write(&mut **lock) = true;
    }
}

/// Block the calling task for exactly `ticks` tick periods, then ready it
/// at its base priority.
///
/// `ticks` is never special-cased: `delay == 0` is the sentinel the tick
/// service reads as "no active timer" (see `crate::tick`), so `sleep(0)`
/// puts the calling task to sleep permanently — nothing ever revisits it —
/// rather than returning immediately. This matches the original kernel's
/// `os_sleep`, which sets `delay = ticks` unconditionally before blocking.
pub fn sleep<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
    ticks: u32,
) {
    let mut guard = match crate::klock::lock_cpu::<P>() {
        Ok(guard) => guard,
        Err(_) => return,
    };
    let lock = &mut guard.borrow_mut();

    let current = sys.running_task(lock);
    sys.unready_task(current, lock);
    *sys.tasks[current].state.write(&mut **lock) = TaskState::Asleep;
    *sys.tasks[current].delay.write(&mut **lock) = ticks;
    #[cfg(feature = "enable_stats")]
    sys.tasks[current].refresh_stack_high_water(lock);

    sys.schedule(lock);
}

/// Mark entry into a kernel-aware ISR. Must be paired with [`exit_isr`]
/// before the interrupt handler returns.
pub fn enter_isr<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
) {
    let mut guard = match crate::klock::lock_cpu::<P>() {
        Ok(guard) => guard,
        Err(_) => return,
    };
    sys.enter_isr(&mut guard.borrow_mut());
}

/// Mark exit from a kernel-aware ISR. When nesting returns to zero,
/// re-evaluates the scheduler and requests the from-ISR switch variant if
/// the selected task changed.
pub fn exit_isr<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
) {
    let mut guard = match crate::klock::lock_cpu::<P>() {
        Ok(guard) => guard,
        Err(_) => return,
    };
    sys.exit_isr(&mut guard.borrow_mut());
}
