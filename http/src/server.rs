//! server surface: accept loop, worker threads and graceful shutdown.
//!
//! The server stays agnostic of the wire: a codec factory service turns each
//! accepted [TcpStream] into the framed halves the exchange coordinator
//! consumes. Connections are distributed over per-thread current-thread
//! runtimes so handler futures never need to be `Send`.

use std::{fmt, io, net::SocketAddr, sync::Arc, thread, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    runtime,
    sync::mpsc,
    task::LocalSet,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, trace, warn};
use yoke_service::Service;

use crate::{
    config::ServiceConfig,
    h1::{self, RequestBody, ResponseWriter},
    http::Request,
    io::{InboundStream, OutboundWriter},
};

/// Server wide configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    host: String,
    port: u16,
    workers: usize,
    shutdown_grace: Duration,
    service_config: ServiceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 8080,
            workers: thread::available_parallelism().map(usize::from).unwrap_or(1),
            shutdown_grace: Duration::from_secs(30),
            service_config: ServiceConfig::new(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Number of worker threads serving connections.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// How long a graceful shutdown waits for in-flight exchanges before
    /// force closing.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Per connection exchange tunables.
    pub fn service(mut self, config: ServiceConfig) -> Self {
        self.service_config = config;
        self
    }
}

/// Remote control of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    token: CancellationToken,
}

impl ServerHandle {
    /// Stop accepting connections and let in-flight exchanges finish. After
    /// the configured grace period remaining connections are force closed.
    /// [Server::run] returns once shutdown is complete.
    pub fn shutdown_gracefully(&self) {
        self.token.cancel();
    }
}

/// A bound server, ready to run.
pub struct Server<F, S> {
    listener: TcpListener,
    config: ServerConfig,
    codec: Arc<F>,
    service: Arc<S>,
    token: CancellationToken,
}

impl<F, S, I, W> Server<F, S>
where
    F: Service<TcpStream, Response = (I, W)> + Send + Sync + 'static,
    F::Error: fmt::Debug,
    S: Service<(Request<RequestBody>, ResponseWriter), Response = ()> + Send + Sync + 'static,
    S::Error: fmt::Debug,
    I: InboundStream + 'static,
    W: OutboundWriter + 'static,
{
    /// Bind the configured address. The codec factory is called once per
    /// accepted connection to produce the framed halves.
    pub async fn bind(config: ServerConfig, codec: F, service: S) -> io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        Ok(Self {
            listener,
            config,
            codec: Arc::new(codec),
            service: Arc::new(service),
            token: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            token: self.token.clone(),
        }
    }

    /// Serve until shutdown is requested; returns when shutdown completed.
    pub async fn run(self) -> io::Result<()> {
        let Self {
            listener,
            config,
            codec,
            service,
            token,
        } = self;

        let workers = config.workers.max(1);
        info!(target: "server", "serving on {} with {workers} worker(s)", listener.local_addr()?);

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = mpsc::channel::<std::net::TcpStream>(1);
            senders.push(tx);

            let codec = codec.clone();
            let service = service.clone();
            let token = token.clone();
            let service_config = config.service_config;
            let grace = config.shutdown_grace;
            handles.push(
                thread::Builder::new()
                    .name(format!("yoke-worker-{id}"))
                    .spawn(move || worker_main(rx, codec, service, service_config, grace, token))?,
            );
        }

        let mut next = 0;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                res = listener.accept() => match res {
                    Ok((stream, addr)) => {
                        trace!(target: "server", "accepted connection from {addr}");
                        let Ok(stream) = stream.into_std() else { continue };
                        let idx = next % workers;
                        next += 1;
                        if senders[idx].send(stream).await.is_err() {
                            warn!(target: "server", "worker {idx} is gone; dropping connection");
                        }
                    }
                    Err(e) => {
                        warn!(target: "server", "accept failed: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        // closing the distribution channels drains the workers.
        drop(senders);
        tokio::task::spawn_blocking(move || {
            for handle in handles {
                let _ = handle.join();
            }
        })
        .await
        .map_err(io::Error::other)?;

        info!(target: "server", "shutdown complete");
        Ok(())
    }
}

/// One worker thread: a current-thread runtime serving its share of the
/// accepted connections until shutdown, then draining with the grace period.
fn worker_main<F, S, I, W>(
    mut rx: mpsc::Receiver<std::net::TcpStream>,
    codec: Arc<F>,
    service: Arc<S>,
    config: ServiceConfig,
    grace: Duration,
    token: CancellationToken,
) where
    F: Service<TcpStream, Response = (I, W)> + 'static,
    F::Error: fmt::Debug,
    S: Service<(Request<RequestBody>, ResponseWriter), Response = ()> + 'static,
    S::Error: fmt::Debug,
    I: InboundStream + 'static,
    W: OutboundWriter + 'static,
{
    let rt = match runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(target: "server", "worker runtime failed to start: {e}");
            return;
        }
    };

    LocalSet::new().block_on(&rt, async move {
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                conn = rx.recv() => match conn {
                    Some(stream) => {
                        let codec = codec.clone();
                        let service = service.clone();
                        let conn_token = token.child_token();
                        tracker.spawn_local(async move {
                            match TcpStream::from_std(stream) {
                                Ok(stream) => serve_connection(stream, codec, service, config, conn_token).await,
                                Err(e) => error!(target: "server", "failed to register connection: {e}"),
                            }
                        });
                    }
                    None => break,
                },
            }
        }

        tracker.close();
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(target: "server", "grace period expired; forcing {} connection(s) shut", tracker.len());
        }
    });
}

async fn serve_connection<F, S, I, W>(
    stream: TcpStream,
    codec: Arc<F>,
    service: Arc<S>,
    config: ServiceConfig,
    token: CancellationToken,
) where
    F: Service<TcpStream, Response = (I, W)>,
    F::Error: fmt::Debug,
    S: Service<(Request<RequestBody>, ResponseWriter), Response = ()>,
    S::Error: fmt::Debug,
    I: InboundStream,
    W: OutboundWriter,
{
    let (inbound, writer) = match codec.call(stream).await {
        Ok(halves) => halves,
        Err(e) => {
            error!(target: "server", "codec rejected connection: {e:?}");
            return;
        }
    };

    match h1::dispatcher::run(inbound, writer, &*service, config, token).await {
        Ok(()) => {}
        Err(h1::Error::Closed) => trace!(target: "server", "peer closed connection"),
        Err(e) => error!(target: "server", "connection failed: {e:?}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::convert::Infallible;

    use yoke_service::fn_service;

    use crate::io::{PipeReader, PipeWriter, pipe};

    struct NullCodec;

    impl Service<TcpStream> for NullCodec {
        type Response = (PipeReader, PipeWriter);
        type Error = Infallible;

        async fn call(&self, _: TcpStream) -> Result<Self::Response, Self::Error> {
            // a framed connection that ends immediately.
            let (client, reader, writer) = pipe(1);
            drop(client);
            Ok((reader, writer))
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn accept_and_graceful_shutdown() {
        let config = ServerConfig::new()
            .host("127.0.0.1")
            .port(0)
            .workers(2)
            .shutdown_grace(Duration::from_secs(1));

        let handler = fn_service(|(_, _): (Request<RequestBody>, ResponseWriter)| async {
            Ok::<_, Infallible>(())
        });

        let server = Server::bind(config, NullCodec, handler).await.unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();

        let running = tokio::spawn(server.run());

        // a connection is accepted and torn down cleanly.
        let conn = TcpStream::connect(addr).await.unwrap();
        drop(conn);
        tokio::time::sleep(Duration::from_millis(100)).await;

        handle.shutdown_gracefully();
        running.await.unwrap().unwrap();
    }
}
