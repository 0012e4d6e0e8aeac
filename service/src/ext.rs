use super::Service;

/// Extension methods for types that impl [Service] trait.
pub trait ServiceExt<Req>: Service<Req> {
    /// Map this service's error type to a different error with given function
    /// closure.
    fn map_err<F, E>(self, f: F) -> MapErr<Self, F>
    where
        F: Fn(Self::Error) -> E,
        Self: Sized,
    {
        MapErr { service: self, f }
    }
}

impl<S, Req> ServiceExt<Req> for S where S: Service<Req> {}

pub struct MapErr<S, F> {
    service: S,
    f: F,
}

impl<S, Req, F, E> Service<Req> for MapErr<S, F>
where
    S: Service<Req>,
    F: Fn(S::Error) -> E,
{
    type Response = S::Response;
    type Error = E;

    async fn call(&self, req: Req) -> Result<Self::Response, Self::Error> {
        self.service.call(req).await.map_err(&self.f)
    }
}
