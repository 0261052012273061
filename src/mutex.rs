//! Mutex: mutual exclusion with priority inheritance (C6).
//!
//! Unlike the reference kernel — which bounds priority inversion with a
//! static priority *ceiling* declared per mutex — this core implements
//! genuine priority *inheritance*: a holder's effective priority is raised
//! on demand to match whichever waiter currently needs it most, and the
//! raise propagates through a chain of held mutexes. No per-mutex ceiling
//! is declared; the protocol follows the original kernel's
//! `nya_mutex_take`/`nya_mutex_timeout` rather than the reference crate's
//! ceiling protocol.
use crate::{
    error::{Error, PanicReason, Result},
    event::{EventCb, EventId, EventKind},
    klock::{lock_cpu, CpuLockTokenRefMut},
    port::Port,
    queue,
    sched::System,
    task::{TaskId, TaskState, WaitResult},
};

fn precheck<'a, P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &'a System<P, NT, NE, NP>,
    id: EventId,
    lock: &mut CpuLockTokenRefMut<'_>,
) -> Result<&'a EventCb> {
    let event = &sys.events[id];
    if *event.kind.read(&**lock) != EventKind::Mutex {
        return Err(Error::WrongEvent);
    }
    Ok(event)
}

/// Acquire `id`. Blocks the calling task if already held, for up to
/// `timeout` ticks (`0` means wait indefinitely, matching the original
/// kernel's convention).
pub fn mutex_take<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
    id: EventId,
    timeout: u32,
) -> Result<()> {
    let mut guard = lock_cpu::<P>()?;
    let lock = &mut guard.borrow_mut();

    precheck(sys, id, lock)?;
    let event = &sys.events[id];
    let current = sys.running_task(lock);

    let holder = *event.holder.read(&**lock);
    let holder = match holder {
        None => {
            *event.holder.write(&mut **lock) = Some(current);
            return Ok(());
        }
        Some(holder) if holder == current => return Err(Error::WouldDeadlock),
        Some(holder) => holder,
    };

    // Block: leave the ready set, join the mutex's wait queue.
    sys.unready_task(current, lock);
    *sys.task(current).state.write(&mut **lock) = TaskState::WaitingForEvent;
    *sys.task(current).wait_event.write(&mut **lock) = Some(id);
    *sys.task(current).delay.write(&mut **lock) = timeout;
    #[cfg(feature = "enable_stats")]
    sys.task(current).refresh_stack_high_water(lock);

    let current_prio = *sys.task(current).curr_prio.read(&**lock);
    if *sys.task(holder).curr_prio.read(&**lock) < current_prio {
        raise_priority(sys, holder, current_prio, lock);
    }

    let mut queue = *event.queue.read(&**lock);
    queue::push_back(&sys.tasks, &mut queue, lock, current);
    *event.queue.write(&mut **lock) = queue;

    sys.schedule(lock);
    drop(guard);

    // Re-acquire CPU Lock after the switch back to us to inspect the
    // outcome the waker left behind.
    let mut guard = lock_cpu::<P>()?;
    let lock = &mut guard.borrow_mut();
    match *sys.task(current).wait_return.read(&**lock) {
        WaitResult::Ok => Ok(()),
        WaitResult::Timeout => Err(Error::Timeout),
    }
}

/// Release `id`. The caller must be the current holder.
pub fn mutex_give<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
    id: EventId,
) -> Result<()> {
    let mut guard = lock_cpu::<P>()?;
    let lock = &mut guard.borrow_mut();

    precheck(sys, id, lock)?;
    let event = &sys.events[id];
    let current = sys.running_task(lock);

    if *event.holder.read(&**lock) != Some(current) {
        return Err(Error::NotOwner);
    }

    // Restore the releaser to its base priority if it was inheriting one.
    // A single-mutex-hold design: no attempt is made to partially demote
    // for tasks holding more than one mutex at once (see module docs).
    let identity = *sys.task(current).identity.read(&**lock);
    let curr_prio = *sys.task(current).curr_prio.read(&**lock);
    if curr_prio != identity.base_prio {
        sys.reposition_demoted_task(current, curr_prio, identity.base_prio, lock);
    }

    let queue = *event.queue.read(&**lock);
    if queue.is_empty() {
        *event.holder.write(&mut **lock) = None;
        sys.schedule(lock);
        return Ok(());
    }

    // Select the highest-priority waiter, ties broken in favor of the one
    // that has been waiting shortest (last occurrence of the max wins,
    // since the queue is FIFO insertion order and we walk oldest-to-newest).
    let mut best: Option<(TaskId, usize)> = None;
    queue::for_each(&sys.tasks, &queue, lock, |task, lock| {
        let prio = *sys.task(task).curr_prio.read(&**lock);
        if best.map_or(true, |(_, best_prio)| prio >= best_prio) {
            best = Some((task, prio));
        }
    });
    let (next_holder, _) =
        best.unwrap_or_else(|| crate::panic::panic::<P>(PanicReason::QueueCorrupted));

    let mut queue = queue;
    queue::remove(&sys.tasks, &mut queue, lock, next_holder);
    *event.queue.write(&mut **lock) = queue;

    *sys.task(next_holder).wait_return.write(&mut **lock) = WaitResult::Ok;
    *sys.task(next_holder).delay.write(&mut **lock) = 0;
    sys.ready_task(next_holder, lock);
    *event.holder.write(&mut **lock) = Some(next_holder);

    sys.schedule(lock);
    Ok(())
}

/// Raise `task`'s effective priority to (at least) `target`, propagating
/// transitively through any mutex `task` is itself blocked on.
///
/// Mirrors the original kernel's inheritance propagation (`nya_mutex_take`
/// / `nya_mutex_timeout`), inverted for this crate's "higher number =
/// higher priority" convention.
fn raise_priority<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
    task: TaskId,
    target: usize,
    lock: &mut CpuLockTokenRefMut<'_>,
) {
    let mut task = task;
    let mut target = target;
    loop {
        let curr = *sys.task(task).curr_prio.read(&**lock);
        if curr >= target {
            return;
        }
        let old_prio = curr;
        *sys.task(task).curr_prio.write(&mut **lock) = target;
        log::debug!("priority inheritance: task {task} raised {old_prio} -> {target}");

        match *sys.task(task).state.read(&**lock) {
            // `Running` is still physically linked into its priority's
            // ready queue (see `System::demote_preempted_task`), so it
            // needs the same reposition `Ready` does — otherwise its
            // ready-set bit stays set at the old (now wrong) priority and
            // the new one never gets marked, silently defeating the raise.
            TaskState::Ready | TaskState::Running => {
                sys.reposition_ready_task(task, old_prio, lock);
                return;
            }
            TaskState::WaitingForEvent => {
                let Some(blocking_event) = *sys.task(task).wait_event.read(&**lock) else {
                    return;
                };
                let event = &sys.events[blocking_event];
                if *event.kind.read(&**lock) != EventKind::Mutex {
                    // Priority inheritance only propagates across mutexes.
                    return;
                }
                let Some(next_holder) = *event.holder.read(&**lock) else {
                    return;
                };
                if next_holder == task {
                    return;
                }
                task = next_holder;
                target = recompute_required_priority(sys, blocking_event, next_holder, lock);
            }
            TaskState::Asleep => return,
        }
    }
}

/// `max(holder.base_prio, max over holder's mutex waiters of curr_prio)`.
fn recompute_required_priority<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
    event_id: EventId,
    holder: TaskId,
    lock: &mut CpuLockTokenRefMut<'_>,
) -> usize {
    let identity = *sys.task(holder).identity.read(&**lock);
    let mut required = identity.base_prio;
    let queue = *sys.events[event_id].queue.read(&**lock);
    queue::for_each(&sys.tasks, &queue, lock, |task, lock| {
        let prio = *sys.task(task).curr_prio.read(&**lock);
        if prio > required {
            required = prio;
        }
    });
    required
}

impl<P: Port, const NT: usize, const NE: usize, const NP: usize> System<P, NT, NE, NP> {
    /// Move a task between priority queues when its `curr_prio` changes
    /// without a state transition (demotion on `mutex_give`, where the
    /// releaser is always `Running`; or after a timeout-driven recompute,
    /// where the holder may be `Ready`, `Running`, or — if it itself is
    /// blocked on something else while still holding this mutex — neither).
    ///
    /// A `Running` task is still physically linked in its priority's ready
    /// queue — `schedule()` never unlinks the task it selects, it just
    /// stops advancing past it — so it needs the same reposition a `Ready`
    /// task does. An `Asleep`/`WaitingForEvent` holder isn't linked into
    /// any ready queue at all; reusing `old_prio` against
    /// `reposition_ready_task` there would unlink it from (and corrupt) a
    /// ready queue it was never actually a member of.
    pub(crate) fn reposition_demoted_task(
        &self,
        task: TaskId,
        old_prio: usize,
        new_prio: usize,
        lock: &mut CpuLockTokenRefMut<'_>,
    ) {
        *self.task(task).curr_prio.write(&mut **lock) = new_prio;
        log::debug!("priority demotion: task {task} {old_prio} -> {new_prio}");
        match *self.task(task).state.read(&**lock) {
            TaskState::Ready | TaskState::Running => {
                self.reposition_ready_task(task, old_prio, lock);
            }
            TaskState::Asleep | TaskState::WaitingForEvent => {}
        }
    }

    /// Re-evaluate a mutex's holder priority after one of its waiters
    /// times out: falls back to `max(base_prio, highest remaining waiter)`,
    /// exactly as `recompute_required_priority` computes on the take path.
    pub(crate) fn demote_after_mutex_timeout(
        &self,
        event_id: EventId,
        lock: &mut CpuLockTokenRefMut<'_>,
    ) {
        let Some(holder) = *self.events[event_id].holder.read(&**lock) else {
            return;
        };
        let old_prio = *self.task(holder).curr_prio.read(&**lock);
        let required = recompute_required_priority(self, event_id, holder, lock);
        if required != old_prio {
            self.reposition_demoted_task(holder, old_prio, required, lock);
        }
    }
}
