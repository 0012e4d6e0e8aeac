use super::Service;

/// Shortcut for transforming an async function into a type that impl
/// [Service] trait.
pub fn fn_service<F, Req, Fut, Res, Err>(f: F) -> FnService<F>
where
    F: Fn(Req) -> Fut,
    Fut: Future<Output = Result<Res, Err>>,
{
    FnService(f)
}

#[derive(Clone, Copy)]
pub struct FnService<F>(F);

impl<F, Req, Fut, Res, Err> Service<Req> for FnService<F>
where
    F: Fn(Req) -> Fut,
    Fut: Future<Output = Result<Res, Err>>,
{
    type Response = Res;
    type Error = Err;

    #[inline]
    fn call(&self, req: Req) -> impl Future<Output = Result<Self::Response, Self::Error>> {
        (self.0)(req)
    }
}
