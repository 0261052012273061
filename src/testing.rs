//! Host-side test harness (§10.4): a synchronous simulation port plus the
//! scenario tests that drive the scheduler, mutex, and semaphore through
//! it end to end.
//!
//! Unlike a real CPU port, [`context_switch`]/[`context_switch_from_isr`]
//! never touch a register or a stack — they just commit the scheduler's
//! already-made decision ([`System::commit_switch`]) and return, the same
//! role `r3_port_std` plays for the reference crate's own test suite,
//! scaled down to this core's narrower port contract. Task entry functions
//! are never actually invoked; a test instead calls the kernel API
//! directly, once per step, representing whichever task
//! [`System::current_task`] currently names. This exercises the
//! scheduling *decisions* the core makes — which task runs, at what
//! priority, in what order — not register save/restore, which is exactly
//! the part a CPU port owns and this core deliberately doesn't implement.
//!
//! [`context_switch`]: Port::context_switch
//! [`context_switch_from_isr`]: Port::context_switch_from_isr
use crate::{
    cfg::{self, EventConfig, EventKindConfig, TaskConfig},
    klock::{assume_cpu_lock, lock_cpu, CpuLockTokenRefMut},
    panic::{NullHook, PanicHook},
    port::{CpuLockError, Port},
    sched::{enter_isr, exit_isr, System},
    task::TaskId,
    tick::systick,
};

fn noop_entry(_param: usize) {}

fn task_at(priority: usize) -> TaskConfig {
    TaskConfig {
        priority,
        stack_base: core::ptr::null_mut(),
        stack_size: 0,
        entry: noop_entry,
        entry_param: 0,
    }
}

/// Acquire CPU Lock once and run `f` with the token, for test assertions
/// that peek at fields `System`'s public API doesn't expose.
fn with_lock<P: Port, const NT: usize, const NE: usize, const NP: usize, R>(
    sys: &System<P, NT, NE, NP>,
    f: impl FnOnce(&System<P, NT, NE, NP>, &mut CpuLockTokenRefMut<'_>) -> R,
) -> R {
    let mut guard = lock_cpu::<P>().expect("test harness: CPU Lock unexpectedly held");
    f(sys, &mut guard.borrow_mut())
}

/// Run one full tick: the sequence a real port's tick-interrupt handler is
/// documented to follow (`enter_isr`, `systick`, `exit_isr`).
fn tick<P: Port, const NT: usize, const NE: usize, const NP: usize>(sys: &System<P, NT, NE, NP>) {
    enter_isr(sys);
    systick(sys);
    exit_isr(sys);
}

/// Declare a self-contained fixture: a zero-sized port type, its bound
/// `System`, and the nesting counter `enter_critical`/`exit_critical`
/// share. Each scenario test gets its own fixture so tests never share
/// mutable global state (`cargo test` runs them concurrently by default).
macro_rules! define_fixture {
    ($port:ident, $sys:ident, $nesting:ident, $nt:literal, $ne:literal, $np:literal) => {
        struct $port;

        static $nesting: core::sync::atomic::AtomicU16 = core::sync::atomic::AtomicU16::new(0);
        static $sys: System<$port, $nt, $ne, $np> = System::INIT;

        impl Port for $port {
            unsafe fn init_stack(
                stack_base: *mut u8,
                _stack_size: usize,
                _entry: fn(usize),
                _entry_param: usize,
            ) -> *mut u8 {
                stack_base
            }

            fn startup(_task: TaskId) -> ! {
                // Never reached: this module builds the system through
                // `cfg::build`, which stops short of handing off to
                // `startup`, so tests can keep running afterward.
                loop {
                    unsafe { Self::idle_spin() }
                }
            }

            unsafe fn context_switch() {
                Self::switch();
            }

            unsafe fn context_switch_from_isr() {
                Self::switch();
            }

            unsafe fn enter_critical() -> Result<(), CpuLockError> {
                use core::sync::atomic::Ordering;
                let prev = $nesting.fetch_add(1, Ordering::AcqRel);
                if prev == u16::MAX {
                    $nesting.fetch_sub(1, Ordering::AcqRel);
                    return Err(CpuLockError);
                }
                Ok(())
            }

            unsafe fn exit_critical() {
                $nesting.fetch_sub(1, core::sync::atomic::Ordering::AcqRel);
            }

            fn panic_hook() -> &'static dyn PanicHook {
                &NullHook
            }

            unsafe fn idle_spin() {
                std::thread::yield_now();
            }
        }

        impl $port {
            /// Commit the scheduler's pending decision. Stands in for the
            /// register save/restore a real port's trampoline performs.
            fn switch() {
                // Safety: `context_switch`/`context_switch_from_isr` are
                // only ever invoked while CPU Lock is held (the `Port`
                // trait's own contract), so this reconstructs a token for
                // the already-active section instead of acquiring a
                // second, nested one.
                let mut guard = unsafe { assume_cpu_lock::<Self>() };
                let lock = &mut guard.borrow_mut();
                $sys.commit_switch(lock);
                // The real guard further up the call stack still owns
                // leaving the critical section; forget this one so it
                // doesn't exit a second time on drop.
                core::mem::forget(guard);
            }
        }
    };
}

mod fixture_strict_priority {
    //! S1: a ready higher-priority task always preempts a running lower-
    //! priority one, and control returns to the lower one only once the
    //! higher one blocks again.
    use super::*;

    define_fixture!(Port1, SYS, NESTING, 3, 0, 3);

    const IDLE: TaskId = 0;
    const LOW: TaskId = 1;
    const HIGH: TaskId = 2;

    #[test]
    fn s1_strict_priority_preemption() {
        let tasks = [task_at(0), task_at(1), task_at(2)];
        let first = cfg::build(&SYS, &tasks, &[]);
        // All three start Ready; the highest priority runs first.
        assert_eq!(first, HIGH);
        assert_eq!(SYS.current_task(), Some(HIGH));

        crate::sched::sleep(&SYS, 10);
        assert_eq!(SYS.current_task(), Some(LOW), "HIGH asleep: LOW is next highest");

        crate::sched::sleep(&SYS, 20);
        assert_eq!(SYS.current_task(), Some(IDLE), "LOW asleep too: only IDLE is ready");

        // Nothing changes for the first 9 ticks.
        for _ in 0..9 {
            tick(&SYS);
            assert_eq!(SYS.current_task(), Some(IDLE));
        }
        // The 10th tick wakes HIGH, which immediately preempts IDLE.
        tick(&SYS);
        assert_eq!(
            SYS.current_task(),
            Some(HIGH),
            "HIGH's delay elapsed: it preempts IDLE on exit_isr"
        );

        // 10 more ticks wake LOW, but HIGH outranks it and keeps running.
        for _ in 0..10 {
            tick(&SYS);
        }
        assert_eq!(SYS.current_task(), Some(HIGH), "LOW woke but can't preempt HIGH");
    }
}

mod fixture_fifo {
    //! S2: three equal-priority tasks woken by the same tick run in
    //! ascending task-id order, not an arbitrary one.
    use super::*;

    define_fixture!(Port2, SYS, NESTING, 4, 0, 2);

    const IDLE: TaskId = 0;
    const A: TaskId = 1;
    const B: TaskId = 2;
    const C: TaskId = 3;

    #[test]
    fn s2_fifo_within_priority_after_simultaneous_wakeup() {
        let tasks = [task_at(0), task_at(1), task_at(1), task_at(1)];
        let first = cfg::build(&SYS, &tasks, &[]);
        assert_eq!(first, A, "declaration order breaks the tie among equal priorities");

        crate::sched::sleep(&SYS, 5);
        assert_eq!(SYS.current_task(), Some(B));
        crate::sched::sleep(&SYS, 5);
        assert_eq!(SYS.current_task(), Some(C));
        crate::sched::sleep(&SYS, 5);
        assert_eq!(SYS.current_task(), Some(IDLE), "all three now asleep");

        for _ in 0..4 {
            tick(&SYS);
            assert_eq!(SYS.current_task(), Some(IDLE));
        }
        // A, B, and C all elapse on the same tick; they re-enter the ready
        // queue in ascending task-id order (the order `tick_task` scans
        // the table), so A runs first again.
        tick(&SYS);
        assert_eq!(SYS.current_task(), Some(A));
    }
}

mod fixture_inheritance {
    //! S3: a mutex holder's effective priority is raised to match the
    //! highest-priority waiter, and restored to its own base priority
    //! (handing the mutex to that waiter) on release.
    use super::*;
    use crate::task::TaskState;

    define_fixture!(Port3, SYS, NESTING, 4, 1, 4);

    const IDLE: TaskId = 0;
    const L: TaskId = 1;
    const M: TaskId = 2;
    const H: TaskId = 3;
    const MUTEX: crate::event::EventId = 0;

    fn curr_prio(id: TaskId) -> usize {
        with_lock(&SYS, |sys, lock| *sys.task(id).curr_prio.read(&**lock))
    }

    #[test]
    fn s3_priority_inheritance_raise_and_restore() {
        let tasks = [task_at(0), task_at(1), task_at(2), task_at(3)];
        let events = [EventConfig { kind: EventKindConfig::Mutex }];
        let first = cfg::build(&SYS, &tasks, &events);
        assert_eq!(first, H);

        crate::sched::sleep(&SYS, 5);
        assert_eq!(SYS.current_task(), Some(M));
        crate::sched::sleep(&SYS, 5);
        assert_eq!(SYS.current_task(), Some(L));

        // L grabs the uncontended mutex without blocking.
        crate::mutex::mutex_take(&SYS, MUTEX, 0).unwrap();
        assert_eq!(SYS.current_task(), Some(L));
        assert_eq!(curr_prio(L), 1);

        // H and M's sleeps elapse together; H, the higher priority, wins
        // the race for the CPU and preempts L.
        for _ in 0..5 {
            tick(&SYS);
        }
        assert_eq!(SYS.current_task(), Some(H));
        assert_eq!(
            with_lock(&SYS, |sys, lock| *sys.task(L).state.read(&**lock)),
            TaskState::Ready,
            "preempted, not silently left Running"
        );

        // H blocks on the mutex L holds: this one synchronous call both
        // blocks H and (since nothing else is runnable above L) performs
        // the switch back to L, so there is nothing left to await.
        crate::mutex::mutex_take(&SYS, MUTEX, 0).ok();
        assert_eq!(SYS.current_task(), Some(L), "L resumes running, now at H's priority");
        assert_eq!(curr_prio(L), 3);

        // L releases: it drops back to its own base priority and hands
        // the mutex straight to H.
        crate::mutex::mutex_give(&SYS, MUTEX).unwrap();
        assert_eq!(SYS.current_task(), Some(H));
        assert_eq!(curr_prio(L), 1);
        assert_eq!(
            with_lock(&SYS, |sys, lock| *sys.events[MUTEX].holder.read(&**lock)),
            Some(H)
        );
    }
}

mod fixture_timeout_demotion {
    //! S4: when the highest-priority waiter on a mutex times out, the
    //! holder's inherited priority falls back to match whichever waiter
    //! is now the highest — not all the way to its own base priority.
    use super::*;

    define_fixture!(Port4, SYS, NESTING, 4, 1, 4);

    const IDLE: TaskId = 0;
    const L: TaskId = 1;
    const H1: TaskId = 2;
    const H2: TaskId = 3;
    const MUTEX: crate::event::EventId = 0;

    fn curr_prio(id: TaskId) -> usize {
        with_lock(&SYS, |sys, lock| *sys.task(id).curr_prio.read(&**lock))
    }

    #[test]
    fn s4_timeout_demotes_to_next_highest_waiter() {
        let tasks = [task_at(0), task_at(1), task_at(2), task_at(3)];
        let events = [EventConfig { kind: EventKindConfig::Mutex }];
        let first = cfg::build(&SYS, &tasks, &events);
        assert_eq!(first, H2);

        crate::sched::sleep(&SYS, 10);
        assert_eq!(SYS.current_task(), Some(H1));
        crate::sched::sleep(&SYS, 3);
        assert_eq!(SYS.current_task(), Some(L));

        crate::mutex::mutex_take(&SYS, MUTEX, 0).unwrap();
        assert_eq!(SYS.current_task(), Some(L));

        // H1 wakes first (shorter sleep) and blocks on the mutex,
        // raising L to its priority.
        for _ in 0..3 {
            tick(&SYS);
        }
        assert_eq!(SYS.current_task(), Some(H1));
        crate::mutex::mutex_take(&SYS, MUTEX, 0).ok();
        assert_eq!(SYS.current_task(), Some(L));
        assert_eq!(curr_prio(L), 2);

        // H2 wakes later and blocks too, with a finite timeout, raising L
        // further.
        for _ in 0..7 {
            tick(&SYS);
        }
        assert_eq!(SYS.current_task(), Some(H2));
        crate::mutex::mutex_take(&SYS, MUTEX, 5).ok();
        assert_eq!(SYS.current_task(), Some(L));
        assert_eq!(curr_prio(L), 3);

        // H2's timeout elapses before it ever gets the mutex: L drops
        // back to H1's level, not all the way to its own base priority,
        // and H2 preempts L again purely on its own base priority.
        for _ in 0..5 {
            tick(&SYS);
        }
        assert_eq!(SYS.current_task(), Some(H2));
        assert_eq!(curr_prio(L), 2, "demoted to H1's level, the remaining waiter");

        crate::sched::sleep(&SYS, 100);
        assert_eq!(SYS.current_task(), Some(L));

        // L releases: H1, the only remaining waiter, gets the mutex.
        crate::mutex::mutex_give(&SYS, MUTEX).unwrap();
        assert_eq!(SYS.current_task(), Some(H1));
        assert_eq!(curr_prio(L), 1);
        assert_eq!(
            with_lock(&SYS, |sys, lock| *sys.events[MUTEX].holder.read(&**lock)),
            Some(H1)
        );
    }
}

mod fixture_semaphore {
    //! S5: `give` increments the count even while handing off directly to
    //! a waiter (this core's documented non-strict semantics), and
    //! waiters are served in FIFO order regardless of priority.
    use super::*;

    define_fixture!(Port5, SYS, NESTING, 4, 1, 2);

    const IDLE: TaskId = 0;
    const A: TaskId = 1;
    const B: TaskId = 2;
    const C: TaskId = 3;
    const SEM: crate::event::EventId = 0;

    fn count() -> u32 {
        with_lock(&SYS, |sys, lock| *sys.events[SEM].count.read(&**lock))
    }

    #[test]
    fn s5_counting_semaphore_with_hand_off() {
        let tasks = [task_at(0), task_at(1), task_at(1), task_at(1)];
        let events = [EventConfig {
            kind: EventKindConfig::Semaphore { initial_count: 1 },
        }];
        let first = cfg::build(&SYS, &tasks, &events);
        assert_eq!(first, A);

        crate::semaphore::semaphore_take(&SYS, SEM, 0).unwrap();
        assert_eq!(count(), 0);
        assert_eq!(SYS.current_task(), Some(A), "uncontended take doesn't block");

        // The count is exhausted: A's next take blocks.
        crate::semaphore::semaphore_take(&SYS, SEM, 0).ok();
        assert_eq!(SYS.current_task(), Some(B), "A blocks, B is next in FIFO order");

        // B's give hands off to A directly *and* leaves count at 1 — the
        // non-strict semantics this core documents.
        crate::semaphore::semaphore_give(&SYS, SEM).unwrap();
        assert_eq!(count(), 1);
        assert_eq!(SYS.current_task(), Some(B), "B keeps running: it's still the queue front");

        crate::sched::sleep(&SYS, 100);
        assert_eq!(SYS.current_task(), Some(C));
        crate::sched::sleep(&SYS, 100);
        assert_eq!(SYS.current_task(), Some(A), "A, woken earlier, runs after B and C");

        // A consumes the permit `give` left behind.
        crate::semaphore::semaphore_take(&SYS, SEM, 0).unwrap();
        assert_eq!(count(), 0);
    }
}

mod fixture_isr_give {
    //! S6: `semaphore_give` from an ISR defers the actual preemption to
    //! the outermost `exit_isr`, which then switches away from whatever
    //! was running (even the idle task) to the newly-woken higher-priority
    //! task.
    use super::*;

    define_fixture!(Port6, SYS, NESTING, 3, 1, 3);

    const IDLE: TaskId = 0;
    const LOW: TaskId = 1;
    const HIGH: TaskId = 2;
    const SEM: crate::event::EventId = 0;

    #[test]
    fn s6_isr_driven_semaphore_give_preempts_on_exit_isr() {
        let tasks = [task_at(0), task_at(1), task_at(2)];
        let events = [EventConfig {
            kind: EventKindConfig::Semaphore { initial_count: 0 },
        }];
        let first = cfg::build(&SYS, &tasks, &events);
        assert_eq!(first, HIGH);

        crate::sched::sleep(&SYS, 100);
        assert_eq!(SYS.current_task(), Some(LOW));

        crate::semaphore::semaphore_take(&SYS, SEM, 0).ok();
        assert_eq!(SYS.current_task(), Some(IDLE), "LOW blocks on the empty semaphore");

        enter_isr(&SYS);
        crate::semaphore::semaphore_give(&SYS, SEM).unwrap();
        // Still inside the ISR: the switch is suppressed even though LOW
        // now outranks the running IDLE task.
        assert_eq!(SYS.current_task(), Some(IDLE));
        exit_isr(&SYS);
        assert_eq!(
            SYS.current_task(),
            Some(LOW),
            "the outermost exit_isr performs the deferred preemption"
        );
    }
}
