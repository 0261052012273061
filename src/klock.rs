//! The CPU Lock mechanism: the kernel's sole synchronization primitive.
//!
//! Every piece of mutable kernel state lives behind a [`CpuLockCell`], which
//! can only be read or written while holding a [`CpuLockGuard`]. Since this
//! is a single-core, single-kernel-instance crate, there is exactly one
//! [`CpuLockTag`] in the whole program, so `tokenlock` can prove at compile
//! time that at most one piece of code holds access at a time — the same
//! guarantee `Mutex` gives at runtime, here paid for at zero runtime cost.
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::{error::Error, port::Port, utils::Init};

pub(crate) struct CpuLockTag;

/// The key that "unlocks" [`CpuLockCell`]. Obtained through [`lock_cpu`].
pub(crate) type CpuLockToken = tokenlock::UnsyncSingletonToken<CpuLockTag>;

/// The keyhole type [`CpuLockCell`] is built on.
pub(crate) type CpuLockKeyhole = tokenlock::SingletonTokenId<CpuLockTag>;

/// A cell that can only be read or written while CPU Lock is held.
pub(crate) struct CpuLockCell<T: ?Sized>(UnsyncTokenLock<T, CpuLockKeyhole>);

impl<T> CpuLockCell<T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(CpuLockKeyhole::INIT, x))
    }
}

impl<T: Init> Init for CpuLockCell<T> {
    const INIT: Self = Self(Init::INIT);
}

impl<T> ops::Deref for CpuLockCell<T> {
    type Target = UnsyncTokenLock<T, CpuLockKeyhole>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> ops::DerefMut for CpuLockCell<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<T> fmt::Debug for CpuLockCell<T> {
    /// `CpuLockCell` has no way to name the `Port` whose critical section
    /// would need entering to read its contents safely, so this only ever
    /// prints a placeholder rather than attempting to peek inside.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CpuLockCell(..)")
    }
}

/// Enter a CPU Lock state and return an RAII guard.
///
/// Fails with [`Error::Error`] if CPU Lock is already active — this would
/// indicate the kernel attempted to re-enter its own critical section,
/// which is always a bug rather than contention to retry.
pub(crate) fn lock_cpu<P: Port>() -> Result<CpuLockGuard<P>, Error> {
    // Safety: `enter_critical` is only ever called by the kernel itself,
    // paired with a matching `exit_critical` in `CpuLockGuard::drop`.
    unsafe { P::enter_critical() }.map_err(|_| Error::Error)?;
    // Safety: we just entered the critical section above, so no other
    // `CpuLockGuard` can exist yet.
    Ok(unsafe { assume_cpu_lock() })
}

/// Construct a [`CpuLockGuard`] without actually entering CPU Lock.
///
/// # Safety
///
/// The caller must guarantee CPU Lock is genuinely active and that no other
/// `CpuLockGuard` presently exists.
pub(crate) unsafe fn assume_cpu_lock<P: Port>() -> CpuLockGuard<P> {
    CpuLockGuard {
        // Safety: upheld by the caller.
        token: unsafe { CpuLockToken::new_unchecked() },
        _port: core::marker::PhantomData,
    }
}

/// RAII guard for a held CPU Lock. Dropping it leaves the critical section
/// through the port `P` it was acquired from.
pub(crate) struct CpuLockGuard<P: Port> {
    token: CpuLockToken,
    _port: core::marker::PhantomData<P>,
}

impl<P: Port> CpuLockGuard<P> {
    pub(crate) fn borrow_mut(&mut self) -> CpuLockTokenRefMut<'_> {
        self.token.borrow_mut()
    }
}

impl<P: Port> Drop for CpuLockGuard<P> {
    fn drop(&mut self) {
        // Safety: CPU Lock is active and we are the unique guard, both
        // upheld by construction.
        unsafe { P::exit_critical() };
    }
}

impl<P: Port> ops::Deref for CpuLockGuard<P> {
    type Target = CpuLockToken;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<P: Port> ops::DerefMut for CpuLockGuard<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// Borrowed form of [`CpuLockGuard`], passed down the call stack instead of
/// re-borrowing `&mut CpuLockGuard` at every level.
pub(crate) type CpuLockTokenRefMut<'a> = tokenlock::UnsyncSingletonTokenRefMut<'a, CpuLockTag>;
