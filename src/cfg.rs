//! Compile-time configuration (§6.3): the static task and event tables,
//! and the `init()` entry point that builds a zero-initialized [`System`]
//! from them.
//!
//! This replaces the original kernel's X-macro table generation with
//! plain `const`-constructible descriptor arrays, and replaces the
//! reference crate's const-generic `CfgBuilder`/`Traits` machinery (built
//! to let one kernel implementation serve many wire-incompatible ports)
//! with the much smaller surface a single-kernel, single-port-contract
//! core actually needs: two flat arrays, consumed once.
use crate::{
    error::PanicReason,
    event::EventKind,
    klock::lock_cpu,
    port::Port,
    sched::System,
    task::{TaskId, TaskIdentity, TaskState},
};

/// One entry in the static task table.
#[derive(Clone, Copy)]
pub struct TaskConfig {
    pub priority: usize,
    pub stack_base: *mut u8,
    pub stack_size: usize,
    pub entry: fn(usize),
    pub entry_param: usize,
}

// Safety: `stack_base` denotes a statically-allocated region handed to
// exactly one task for the life of the process; configs are only ever
// read, never aliased mutably outside `init`.
unsafe impl Send for TaskConfig {}
unsafe impl Sync for TaskConfig {}

#[derive(Clone, Copy)]
pub enum EventKindConfig {
    Mutex,
    Semaphore { initial_count: u32 },
}

/// One entry in the static event table.
#[derive(Clone, Copy)]
pub struct EventConfig {
    pub kind: EventKindConfig,
}

/// Build every TCB and event from the static tables and run the scheduler
/// once to select the first task. Returns that task's id with it already
/// recorded as [`System::current_task`] and its state set to `Running`.
///
/// Split out of [`init`] so the host simulation port's test harness can
/// reuse the same table-loading logic without going through
/// [`Port::startup`], which never returns.
pub(crate) fn build<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
    tasks: &[TaskConfig; NT],
    events: &[EventConfig; NE],
) -> TaskId {
    let mut guard = lock_cpu::<P>().unwrap_or_else(|_| {
        // `init` runs before interrupts are live, so CPU Lock cannot
        // already be held; a failure here means the port itself is
        // misbehaving before the kernel has even started.
        crate::panic::panic::<P>(PanicReason::InitCriticalSectionFailed)
    });
    let lock = &mut guard.borrow_mut();

    for (id, cfg) in tasks.iter().enumerate() {
        let identity = TaskIdentity {
            base_prio: cfg.priority,
            stack_base: cfg.stack_base,
            stack_size: cfg.stack_size,
            entry: Some(cfg.entry),
            entry_param: cfg.entry_param,
        };
        *sys.task(id).identity.write(&mut **lock) = identity;
        *sys.task(id).curr_prio.write(&mut **lock) = cfg.priority;

        // Safety: `init` runs once, before interrupts are live, and each
        // config's `stack_base`/`stack_size` names a region exclusively
        // owned by this task for the rest of the process.
        let stack_top =
            unsafe { P::init_stack(cfg.stack_base, cfg.stack_size, cfg.entry, cfg.entry_param) };
        *sys.task(id).stack_ptr.write(&mut **lock) = stack_top;

        // All tasks start runnable: this core has no dynamic activation,
        // so "declared" and "ready" coincide at init time.
        *sys.task(id).state.write(&mut **lock) = TaskState::Ready;
        sys.ready_task(id, lock);
    }

    for (id, cfg) in events.iter().enumerate() {
        let event = &sys.events[id];
        if *event.kind.read(&**lock) != EventKind::Uninitialized {
            crate::panic::panic::<P>(PanicReason::EventAlreadyInitialized);
        }
        match cfg.kind {
            EventKindConfig::Mutex => {
                *event.kind.write(&mut **lock) = EventKind::Mutex;
            }
            EventKindConfig::Semaphore { initial_count } => {
                *event.kind.write(&mut **lock) = EventKind::Semaphore;
                *event.count.write(&mut **lock) = initial_count;
            }
        }
    }

    sys.mark_running(lock);
    sys.select_initial(lock);
    sys.commit_switch(lock)
}

/// Build every TCB and event from the static tables, run the scheduler
/// once to select the first task, then hand off to the port's `startup`.
/// Never returns on success — [`Port::startup`] transfers control away
/// permanently; if it ever returns, that is itself a fatal error
/// ([`PanicReason::StartupExited`]).
///
/// Must be called exactly once, before any ISR is unmasked.
pub fn init<P: Port, const NT: usize, const NE: usize, const NP: usize>(
    sys: &System<P, NT, NE, NP>,
    tasks: &[TaskConfig; NT],
    events: &[EventConfig; NE],
) -> ! {
    let first = build(sys, tasks, events);

    P::startup(first);
    #[allow(unreachable_code)]
    {
        crate::panic::panic::<P>(PanicReason::StartupExited)
    }
}

/// A no-op spin loop, ready at all times, intended for the lowest-priority
/// task slot. A configuration may supply its own instead.
pub fn idle_entry<P: Port>(_param: usize) -> ! {
    loop {
        // Safety: the idle task holds no kernel state; spinning here is
        // always safe to interrupt and resume.
        unsafe { P::idle_spin() };
    }
}
