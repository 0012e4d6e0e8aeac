use std::{future::poll_fn, pin::pin};

use futures_core::stream::Stream;
use tracing::error;
use yoke_service::Service;

use crate::{
    body::ResponseBody,
    http::{Request, Response},
};

use super::{body::RequestBody, error::HandlerError, writer::ResponseWriter};

/// Adapter running a returned-response service on the writer driven
/// interface: the inner service resolves to a complete [Response] and the
/// adapter emits head, body and end for it, dispatching on the body variant.
pub struct Responder<S>(S);

impl<S> Responder<S> {
    pub const fn new(service: S) -> Self {
        Self(service)
    }
}

impl<S> Service<(Request<RequestBody>, ResponseWriter)> for Responder<S>
where
    S: Service<Request<RequestBody>, Response = Response<ResponseBody>>,
{
    type Response = ();
    type Error = HandlerError<S::Error>;

    async fn call(&self, (req, mut writer): (Request<RequestBody>, ResponseWriter)) -> Result<(), Self::Error> {
        let res = self.0.call(req).await.map_err(HandlerError::Service)?;
        let (parts, body) = res.into_parts();

        writer.set_status(parts.status)?;
        writer.set_headers(parts.headers)?;
        if let Some(value) = body.content_type().cloned() {
            writer.set_content_type(value)?;
        }

        match body {
            ResponseBody::None => {
                writer.commit().await?;
                writer.complete().await?;
            }
            ResponseBody::Buffer { bytes, .. } => {
                writer.commit_and_complete_with(bytes, None).await?;
            }
            ResponseBody::Sequence { length, producer, .. } => {
                writer.set_body_length(length)?;
                writer.commit().await?;
                writer.body_part(producer()).await?;
                writer.complete().await?;
            }
            ResponseBody::Stream { length, stream, .. } => {
                writer.set_body_length(length)?;
                writer.commit().await?;

                let mut stream = pin!(stream);
                while let Some(chunk) = poll_fn(|cx| stream.as_mut().poll_next(cx)).await {
                    let bytes = chunk.map_err(|e| {
                        error!(target: "h1_dispatcher", "response body stream failed: {e}");
                        HandlerError::Body(e)
                    })?;
                    writer.body_part(bytes).await?;
                }

                writer.complete().await?;
            }
        }

        Ok(())
    }
}
