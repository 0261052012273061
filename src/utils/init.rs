//! A `const`-evaluable analogue of [`Default`].
//!
//! Kernel objects are allocated statically (`static` items, or `const`-built
//! arrays handed to [`crate::cfg`]), so they need a zero-cost way to obtain a
//! default value in a `const` context. [`Default::default`] cannot be called
//! there prior to `const Default` stabilizing, hence this crate-local trait,
//! following the same pattern as the reference kernel's `r3_core::utils::Init`.
use core::{cell::Cell, sync::atomic};

pub trait Init {
    const INIT: Self;
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

impl<T: Init, const LEN: usize> Init for [T; LEN] {
    // `T::INIT` is a constant, so the repeat-expression form is legal here
    // even though `T` itself need not be `Copy`.
    const INIT: Self = [T::INIT; LEN];
}

impl<T: Init> Init for Cell<T> {
    const INIT: Self = Cell::new(T::INIT);
}

impl<T> Init for *mut T {
    const INIT: Self = core::ptr::null_mut();
}

impl<Tag: ?Sized> Init for tokenlock::SingletonTokenId<Tag> {
    const INIT: Self = Self::new();
}

impl<T, I: Init> Init for tokenlock::UnsyncTokenLock<T, I>
where
    T: Init,
{
    const INIT: Self = Self::new(I::INIT, T::INIT);
}

impl<T, const N: usize> Init for arrayvec::ArrayVec<T, N> {
    const INIT: Self = Self::new_const();
}

macro_rules! impl_init {
    ($( $ty:ty => $value:expr, )*) => {
        $(
            impl Init for $ty {
                const INIT: Self = $value;
            }
        )*
    };
}

impl_init! {
    bool => false,
    u8 => 0,
    u16 => 0,
    u32 => 0,
    u64 => 0,
    usize => 0,
    i8 => 0,
    i32 => 0,
    atomic::AtomicBool => atomic::AtomicBool::new(false),
    atomic::AtomicUsize => atomic::AtomicUsize::new(0),
    () => (),
}
