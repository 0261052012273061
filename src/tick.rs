//! Tick service (C5): the countdown time base driving `sleep` and
//! blocking-call timeouts.
//!
//! Scans the full task table once per tick rather than maintaining a
//! sorted pending-wakeup structure. This is the conforming simplification
//! the design explicitly allows — observable timing is unaffected at the
//! task counts this core targets, and it avoids a second data structure
//! (and its own wraparound arithmetic) purely to shave an O(N) scan that
//! is already bounded by a compile-time task count.
use crate::{
    error::PanicReason,
    event::EventKind,
    klock::{lock_cpu, CpuLockTokenRefMut},
    port::Port,
    queue,
    sched::System,
    task::{TaskId, TaskState, WaitResult},
};

/// Advance the tick. Call this, bracketed by `enter_isr`/`exit_isr`, from
/// the port's tick-interrupt handler.
pub fn systick<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
) {
    let mut guard = match lock_cpu::<P>() {
        Ok(guard) => guard,
        Err(_) => return, // already in a critical section; a nested ISR will retry
    };
    let lock = &mut guard.borrow_mut();

    for task in 0..NT {
        tick_task::<P, NT, NE, NP>(sys, task, lock);
    }
}

fn tick_task<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
    task: TaskId,
    lock: &mut CpuLockTokenRefMut<'_>,
) {
    let delay = *sys.task(task).delay.read(&**lock);
    if delay == 0 {
        return;
    }
    let delay = delay - 1;
    *sys.task(task).delay.write(&mut **lock) = delay;
    if delay != 0 {
        return;
    }

    match *sys.task(task).state.read(&**lock) {
        TaskState::Asleep => {
            log::trace!("tick: task {task} woke from sleep");
            sys.ready_task(task, lock);
        }
        TaskState::WaitingForEvent => {
            let event_id = sys.task(task).wait_event.read(&**lock).expect(
                "a WaitingForEvent task must have wait_event set",
            );
            let event = &sys.events[event_id];

            let mut queue = *event.queue.read(&**lock);
            queue::remove(&sys.tasks, &mut queue, lock, task);
            *event.queue.write(&mut **lock) = queue;

            *sys.task(task).wait_return.write(&mut **lock) = WaitResult::Timeout;
            *sys.task(task).wait_event.write(&mut **lock) = None;
            log::debug!("tick: task {task} timed out waiting on event {event_id}");
            sys.ready_task(task, lock);

            if *event.kind.read(&**lock) == EventKind::Mutex {
                sys.demote_after_mutex_timeout(event_id, lock);
            }
        }
        TaskState::Ready | TaskState::Running => {
            crate::panic::panic::<P>(PanicReason::SpuriousWakeup)
        }
    }
}
