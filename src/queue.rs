//! Intrusive doubly-linked task queue (C2).
//!
//! Both the per-priority ready queues and an event's wait queue are built
//! out of this same primitive: a [`ListHead`] pointing at the first/last
//! member, and a [`crate::task::Link`] embedded in every [`TaskCb`]. Since
//! a task is a member of at most one queue at a time, one `Link` per task
//! suffices for both roles.
use crate::{
    klock::CpuLockTokenRefMut,
    task::{Link, TaskCb, TaskId},
    utils::Init,
};

#[derive(Clone, Copy)]
pub(crate) struct ListHead {
    head: Option<TaskId>,
    tail: Option<TaskId>,
}

impl Init for ListHead {
    const INIT: Self = Self {
        head: None,
        tail: None,
    };
}

impl ListHead {
    pub(crate) fn is_empty(&self) -> bool {
        debug_assert_eq!(self.head.is_none(), self.tail.is_none());
        self.head.is_none()
    }

    pub(crate) fn front(&self) -> Option<TaskId> {
        self.head
    }
}

/// Append `task` to the tail of `list`. O(1).
pub(crate) fn push_back(
    tasks: &[TaskCb],
    list: &mut ListHead,
    lock: &mut CpuLockTokenRefMut<'_>,
    task: TaskId,
) {
    let prev_tail = list.tail;
    *tasks[task].link.write(&mut **lock) = Link {
        prev: prev_tail,
        next: None,
    };
    if let Some(prev_tail) = prev_tail {
        tasks[prev_tail].link.write(&mut **lock).next = Some(task);
    } else {
        list.head = Some(task);
    }
    list.tail = Some(task);
}

/// Detach and return the head of `list`.
///
/// # Panics
///
/// Panics (a kernel bug, never a user-facing error) if `list` is empty —
/// callers must check [`ListHead::is_empty`] first.
pub(crate) fn pop_front(
    tasks: &[TaskCb],
    list: &mut ListHead,
    lock: &mut CpuLockTokenRefMut<'_>,
) -> TaskId {
    let head = list.head.expect("pop_front on empty queue");
    remove(tasks, list, lock, head);
    head
}

/// Unlink `task` from `list`, wherever in the list it currently sits. O(1).
/// Safe to call when `task` is the list's only element.
pub(crate) fn remove(
    tasks: &[TaskCb],
    list: &mut ListHead,
    lock: &mut CpuLockTokenRefMut<'_>,
    task: TaskId,
) {
    let Link { prev, next } = *tasks[task].link.read(&**lock);

    match prev {
        Some(prev) => tasks[prev].link.write(&mut **lock).next = next,
        None => list.head = next,
    }
    match next {
        Some(next) => tasks[next].link.write(&mut **lock).prev = prev,
        None => list.tail = prev,
    }

    *tasks[task].link.write(&mut **lock) = Link::INIT;
}

/// Collect a list front-to-back, for priority scans such as "pick the
/// highest-`curr_prio` waiter". Wait queues are expected to stay short
/// (bounded by contending task count), so a `Vec`-free fixed collection
/// isn't worth the complexity here; callers fold over this directly.
pub(crate) fn for_each(
    tasks: &[TaskCb],
    list: &ListHead,
    lock: &mut CpuLockTokenRefMut<'_>,
    mut f: impl FnMut(TaskId, &mut CpuLockTokenRefMut<'_>),
) {
    let mut next = list.head;
    while let Some(task) = next {
        next = tasks[task].link.read(&**lock).next;
        f(task, lock);
    }
}
