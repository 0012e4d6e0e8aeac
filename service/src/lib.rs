//! Service trait oriented async abstraction for yoke crates.

#![forbid(unsafe_code)]

mod ext;
mod function;

pub use self::{
    ext::ServiceExt,
    function::{FnService, fn_service},
};

/// Trait for an async function call from a shared receiver.
///
/// The call comes from a stateful type so the returned future may borrow from
/// `Self`. Implementors are expected to be callable concurrently: a single
/// instance can serve many requests at once through `&self`.
pub trait Service<Req = ()> {
    /// The Ok part of the call output.
    type Response;

    /// The Err part of the call output.
    type Error;

    fn call(&self, req: Req) -> impl Future<Output = Result<Self::Response, Self::Error>>;
}

macro_rules! ptr_impl {
    ($ptr: ident) => {
        impl<S, Req> Service<Req> for $ptr<S>
        where
            S: Service<Req> + ?Sized,
        {
            type Response = S::Response;
            type Error = S::Error;

            #[inline]
            fn call(&self, req: Req) -> impl Future<Output = Result<Self::Response, Self::Error>> {
                (**self).call(req)
            }
        }
    };
}

use std::{boxed::Box, rc::Rc, sync::Arc};

ptr_impl!(Box);
ptr_impl!(Rc);
ptr_impl!(Arc);

impl<S, Req> Service<Req> for &S
where
    S: Service<Req> + ?Sized,
{
    type Response = S::Response;
    type Error = S::Error;

    #[inline]
    fn call(&self, req: Req) -> impl Future<Output = Result<Self::Response, Self::Error>> {
        (**self).call(req)
    }
}
