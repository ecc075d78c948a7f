use core::fmt::{Debug, Display};
use downcast_rs::{impl_downcast, DowncastSync};

/// Trait that allows the host to return a custom error from a native
/// import function.
///
/// Types implementing this trait are carried through the interpreter as
/// a boxed `HostError` and can be recovered by the embedder via
/// downcasting.
pub trait HostError: 'static + Display + Debug + DowncastSync {}
impl_downcast!(HostError);
