use std::{
    any::Any,
    error::Error,
    fmt,
    net::{SocketAddr, TcpListener, TcpStream},
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    thread,
};

use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};

use crate::{
    config::{Dispatch, ServerSettings},
    logging::LogSink,
    timing::Stopwatch,
};

use super::{DecodeOptions, Message, ProtocolTransport, ThreadPool, TransportError};

pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Identity of one accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u64,
    pub peer: SocketAddr,
    pub local: SocketAddr,
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{},{}", self.id, self.peer)
    }
}

/// Business logic run for every request a connection sends.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, request: Message, conn: &ConnectionInfo) -> Result<Message, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(Message, &ConnectionInfo) -> Result<Message, HandlerError> + Send + Sync + 'static,
{
    fn handle(&self, request: Message, conn: &ConnectionInfo) -> Result<Message, HandlerError> {
        self(request, conn)
    }
}

/// Replies with the request itself plus `ack = true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl Handler for Echo {
    fn handle(&self, request: Message, _conn: &ConnectionInfo) -> Result<Message, HandlerError> {
        Ok(request.with("ack", true))
    }
}

/// Shared count of open server-side connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionCounter {
    live: Arc<AtomicUsize>,
}

/// One counted connection; the count drops when the slot does.
#[derive(Debug)]
pub struct ConnectionSlot {
    live: Arc<AtomicUsize>,
    count: usize,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn acquire(&self) -> ConnectionSlot {
        let count = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        ConnectionSlot {
            live: Arc::clone(&self.live),
            count,
        }
    }

    /// Like [`acquire`](Self::acquire) but refuses once `max` slots are taken.
    pub fn try_acquire(&self, max: Option<usize>) -> Option<ConnectionSlot> {
        let Some(max) = max else {
            return Some(self.acquire());
        };
        self.live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then(|| n + 1))
            .ok()
            .map(|prev| ConnectionSlot {
                live: Arc::clone(&self.live),
                count: prev + 1,
            })
    }
}

impl ConnectionSlot {
    /// Live count right after this slot was taken.
    pub fn count_at_acquire(&self) -> usize {
        self.count
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Accepts TCP connections and serves each with a [`Handler`].
pub struct Server {
    listener: TcpListener,
    address: SocketAddr,
    settings: ServerSettings,
    handler: Arc<dyn Handler>,
    log: Arc<dyn LogSink>,
    connections: ConnectionCounter,
    next_id: AtomicU64,
}

impl Server {
    /// Binds and listens on `settings.address`.
    pub fn bind(
        settings: ServerSettings,
        handler: impl Handler,
        log: Arc<dyn LogSink>,
    ) -> Result<Self, TransportError> {
        let watch = Stopwatch::start();
        let method = format!("Server::bind({},{}):", settings.address, settings.backlog);

        let listener = match listen(settings.address, settings.backlog) {
            Ok(listener) => listener,
            Err(e) => {
                log.write(&format!("{method}{e}:{watch}"));
                return Err(e);
            }
        };
        let address = listener
            .local_addr()
            .map_err(|source| TransportError::Listen {
                address: settings.address,
                source,
            })?;

        info!("listening at {address}");
        log.write(&format!("{method}listening at {address}:{watch}"));
        Ok(Self {
            listener,
            address,
            settings,
            handler: Arc::new(handler),
            log,
            connections: ConnectionCounter::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn connections(&self) -> ConnectionCounter {
        self.connections.clone()
    }

    /// Runs the accept loop. Only returns on a failed `accept`, which ends
    /// the server; faults inside a connection only end that connection.
    pub fn run(self) -> Result<(), TransportError> {
        let watch = Stopwatch::start();
        let method = "Server::run():";

        let result = match self.settings.dispatch {
            Dispatch::Pool { threads } => match ThreadPool::new(threads) {
                Ok(pool) => self.accept_loop(Some(&pool)),
                Err(e) => Err(e.into()),
            },
            Dispatch::ThreadPerConnection => self.accept_loop(None),
        };

        if let Err(e) = &result {
            error!("accept loop terminated: {e}");
            self.log.write(&format!("{method}{e}"));
        }
        self.log.write(&format!("{method}{watch}"));
        result
    }

    fn accept_loop(&self, pool: Option<&ThreadPool>) -> Result<(), TransportError> {
        let method = "Server::run():";
        loop {
            let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;

            let Some(slot) = self.connections.try_acquire(self.settings.max_connections) else {
                warn!("rejecting {peer}: connection limit reached");
                self.log.write(&format!(
                    "{method}rejected {peer}:connection limit {} reached",
                    self.settings.max_connections.unwrap_or_default()
                ));
                continue;
            };
            self.log.write(&format!(
                "{method}to be connected client count:{}",
                slot.count_at_acquire()
            ));

            let info = ConnectionInfo {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                peer,
                local: self.address,
            };
            if let Some(timeout) = self.settings.socket_timeout {
                if let Err(e) = stream
                    .set_read_timeout(Some(timeout))
                    .and_then(|_| stream.set_write_timeout(Some(timeout)))
                {
                    warn!("failed to set socket timeout for {peer}: {e}");
                }
            }

            let conn = Connection {
                stream,
                info,
                slot,
                handler: Arc::clone(&self.handler),
                log: Arc::clone(&self.log),
                options: self.settings.decode,
            };
            match pool {
                Some(pool) => pool.execute(move || conn.serve())?,
                None => {
                    let spawned = thread::Builder::new()
                        .name(format!("netcore-conn-{}", conn.info.id))
                        .spawn(move || conn.serve());
                    if let Err(e) = spawned {
                        error!("failed to spawn connection thread for {peer}: {e}");
                        self.log
                            .write(&format!("{method}thread spawn error for {peer}:{e}"));
                    }
                }
            }
        }
    }
}

fn listen(address: SocketAddr, backlog: i32) -> Result<TcpListener, TransportError> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
        .map_err(|source| TransportError::Socket { address, source })?;
    socket
        .set_reuse_address(true)
        .map_err(|source| TransportError::Socket { address, source })?;
    socket
        .bind(&address.into())
        .map_err(|source| TransportError::Bind { address, source })?;
    socket
        .listen(backlog)
        .map_err(|source| TransportError::Listen { address, source })?;
    Ok(socket.into())
}

/// An accepted socket together with everything needed to serve it.
struct Connection {
    stream: TcpStream,
    info: ConnectionInfo,
    slot: ConnectionSlot,
    handler: Arc<dyn Handler>,
    log: Arc<dyn LogSink>,
    options: DecodeOptions,
}

impl Connection {
    fn serve(self) {
        let watch = Stopwatch::start();
        let method = format!("handle_connection({}):", self.info);
        let Connection {
            stream,
            info,
            slot,
            handler,
            log,
            options,
        } = self;
        debug!("serving connection {info}");

        let mut transport = ProtocolTransport::with_options(stream, options);
        match serve_requests(&mut transport, handler.as_ref(), &info, log.as_ref()) {
            Ok(requests) => log.write(&format!("{method}close requested after {requests} requests")),
            Err(e) if e.is_closed() => log.write(&format!("{method}peer disconnected")),
            Err(e) => {
                warn!("connection {info} failed: {e}");
                log.write(&format!("{method}{e}:{watch}"));
            }
        }

        drop(transport);
        drop(slot);
        log.write(&format!("{method}{watch}"));
    }
}

/// Reads requests until the close command, answering each in turn.
fn serve_requests(
    transport: &mut ProtocolTransport<TcpStream>,
    handler: &dyn Handler,
    info: &ConnectionInfo,
    log: &dyn LogSink,
) -> Result<usize, TransportError> {
    let mut served = 0;
    loop {
        let watch = Stopwatch::start();
        let (request, read) = transport.read_message()?;
        if request.is_close() {
            debug!("connection {info} sent close command");
            return Ok(served);
        }
        debug!("received {read} bytes from {info}: {request}");

        let response = match panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(request, info)
        })) {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(TransportError::Unknown(e.to_string())),
            Err(payload) => return Err(TransportError::Unknown(panic_message(payload))),
        };

        transport.write_message(&response)?;
        served += 1;
        log.write(&format!("handle_connection({info}):{response}:{watch}"));
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(s) => s.to_string(),
            Err(_) => "handler panicked".to_string(),
        },
    }
}
