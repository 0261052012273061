//! Small internal building blocks shared by the kernel modules.
//!
//! **Exempt from the crate's API stability guarantee.**

mod init;
mod prio_bitmap;

pub(crate) use self::{init::Init, prio_bitmap::PrioBitmap};
