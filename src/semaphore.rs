//! Counting semaphore (C6).
//!
//! `give` increments the count unconditionally and, if a waiter is
//! present, hands off to it as well — it does not implement strict
//! counting semantics (where a direct hand-off would leave `count`
//! unchanged). This is a deliberate match to the original kernel's
//! `nya_semaphore_give`, not an oversight; see the crate's design notes.
//! Semaphore waiters are never subject to priority inheritance.
use crate::{
    error::{Error, Result},
    event::{EventCb, EventId, EventKind},
    klock::{lock_cpu, CpuLockTokenRefMut},
    port::Port,
    queue,
    sched::System,
    task::{TaskState, WaitResult},
};

fn precheck<'a, P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &'a System<P, NT, NE, NP>,
    id: EventId,
    lock: &mut CpuLockTokenRefMut<'_>,
) -> Result<&'a EventCb> {
    let event = &sys.events[id];
    if *event.kind.read(&**lock) != EventKind::Semaphore {
        return Err(Error::WrongEvent);
    }
    Ok(event)
}

/// Decrement `id`'s count, blocking for up to `timeout` ticks (`0` =
/// indefinite) if it is currently zero.
pub fn semaphore_take<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
    id: EventId,
    timeout: u32,
) -> Result<()> {
    let mut guard = lock_cpu::<P>()?;
    let lock = &mut guard.borrow_mut();

    precheck(sys, id, lock)?;
    let event = &sys.events[id];
    let current = sys.running_task(lock);

    let count = *event.count.read(&**lock);
    if count > 0 {
        *event.count.write(&mut **lock) = count - 1;
        return Ok(());
    }

    // Block: same waiting protocol as mutex_take, minus priority
    // inheritance — a FIFO queue, no reordering by priority.
    sys.unready_task(current, lock);
    *sys.task(current).state.write(&mut **lock) = TaskState::WaitingForEvent;
    *sys.task(current).wait_event.write(&mut **lock) = Some(id);
    *sys.task(current).delay.write(&mut **lock) = timeout;
    #[cfg(feature = "enable_stats")]
    sys.task(current).refresh_stack_high_water(lock);

    let mut queue = *event.queue.read(&**lock);
    queue::push_back(&sys.tasks, &mut queue, lock, current);
    *event.queue.write(&mut **lock) = queue;

    sys.schedule(lock);
    drop(guard);

    let mut guard = lock_cpu::<P>()?;
    let lock = &mut guard.borrow_mut();
    match *sys.task(current).wait_return.read(&**lock) {
        WaitResult::Ok => Ok(()),
        WaitResult::Timeout => Err(Error::Timeout),
    }
}

/// Increment `id`'s count and, if a task is waiting, hand off to the
/// longest-waiting one. Safe to call from an ISR (bracketed by
/// `enter_isr`/`exit_isr`) — unlike the mutex calls, `give` never blocks.
pub fn semaphore_give<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
    id: EventId,
) -> Result<()> {
    let mut guard = lock_cpu::<P>()?;
    let lock = &mut guard.borrow_mut();

    precheck(sys, id, lock)?;
    let event = &sys.events[id];

    let count = *event.count.read(&**lock);
    *event.count.write(&mut **lock) = count + 1;

    let mut queue = *event.queue.read(&**lock);
    if !queue.is_empty() {
        let waiter = queue::pop_front(&sys.tasks, &mut queue, lock);
        *event.queue.write(&mut **lock) = queue;

        *sys.task(waiter).wait_return.write(&mut **lock) = WaitResult::Ok;
        *sys.task(waiter).delay.write(&mut **lock) = 0;
        sys.ready_task(waiter, lock);
    }

    sys.schedule(lock);
    Ok(())
}
