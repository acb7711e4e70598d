use core::fmt::{Debug, Display};
use downcast_rs::{impl_downcast, DowncastSync};

/// Trait that allows the host to return custom error.
///
/// It should be useful for representing custom traps,
/// troubles at instantiation time or other host specific conditions.
///
/// Types that implement this trait can be converted into an engine
/// [`Error`][`crate::Error`] via [`Error::host`][`crate::Error::host`] and
/// recovered from it through
/// [`Error::as_host_error`][`crate::Error::as_host_error`] and a downcast.
///
/// # Examples
///
/// ```rust
/// use std::fmt;
/// use wasmet_core::{Error, HostError};
///
/// #[derive(Debug)]
/// struct MyError {
///     code: u32,
/// }
///
/// impl fmt::Display for MyError {
///     fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
///         write!(f, "MyError, code={}", self.code)
///     }
/// }
///
/// impl HostError for MyError {}
///
/// fn failable_fn() -> Result<(), Error> {
///     Err(Error::host(MyError { code: 1312 }))
/// }
///
/// match failable_fn() {
///     Err(err) => {
///         let my_error: &MyError = err
///             .as_host_error()
///             .and_then(|host| host.downcast_ref::<MyError>())
///             .unwrap();
///         assert_eq!(my_error.code, 1312);
///     }
///     _ => panic!(),
/// }
/// ```
pub trait HostError: 'static + Display + Debug + DowncastSync {}
impl_downcast!(HostError);
