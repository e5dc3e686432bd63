use std::{
    net::{Shutdown, SocketAddr, TcpStream},
    sync::Arc,
};

use log::debug;

use crate::{
    config::ClientSettings,
    logging::{ConsoleLog, LogSink},
    timing::Stopwatch,
};

use super::{Message, ProtocolTransport, TransportError};

/// One connection to a message server.
///
/// The protocol carries no request ids: a response is matched to its
/// request only by order, so a `Client` serves one exchange at a time
/// (`exchange` takes `&mut self`). Share it across threads only behind a
/// lock.
pub struct Client {
    transport: ProtocolTransport<TcpStream>,
    peer: SocketAddr,
    log: Arc<dyn LogSink>,
}

impl Client {
    pub fn connect(address: &str) -> Result<Self, TransportError> {
        Self::with_settings(&ClientSettings::new(address), Arc::new(ConsoleLog))
    }

    pub fn with_settings(
        settings: &ClientSettings,
        log: Arc<dyn LogSink>,
    ) -> Result<Self, TransportError> {
        let watch = Stopwatch::start();
        let method = format!("Client::connect({}):", settings.address);

        let connected = TcpStream::connect(settings.address.as_str()).and_then(|stream| {
            stream.set_read_timeout(settings.socket_timeout)?;
            stream.set_write_timeout(settings.socket_timeout)?;
            let peer = stream.peer_addr()?;
            Ok((stream, peer))
        });
        let (stream, peer) = match connected {
            Ok(conn) => conn,
            Err(source) => {
                let err = TransportError::Connect {
                    address: settings.address.clone(),
                    source,
                };
                log.write(&format!("{method}{err}:{watch}"));
                return Err(err);
            }
        };

        log.write(&format!("{method}connected to {peer}:{watch}"));
        Ok(Self {
            transport: ProtocolTransport::with_options(stream, settings.decode),
            peer,
            log,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Sends `request` and blocks until the matching response arrives.
    pub fn exchange(&mut self, request: &Message) -> Result<Message, TransportError> {
        let watch = Stopwatch::start();
        let method = format!("Client::exchange({},{}):", self.peer, request.command);

        let result = self
            .transport
            .write_message(request)
            .and_then(|written| {
                let (response, read) = self.transport.read_message()?;
                debug!("sent {written} bytes, received {read} bytes from {}", self.peer);
                Ok(response)
            })
            .map_err(TransportError::from);

        match &result {
            Ok(response) => self.log.write(&format!("{method}{response}:{watch}")),
            Err(e) => self.log.write(&format!("{method}{e}:{watch}")),
        }
        result
    }

    /// Sends the close command and shuts down the write half.
    pub fn close(mut self) -> Result<(), TransportError> {
        let method = format!("Client::close({}):", self.peer);
        self.transport.write_message(&Message::close())?;
        if let Err(e) = self.transport.get_ref().shutdown(Shutdown::Write) {
            debug!("{method} shutdown: {e}");
        }
        self.log.write(&format!("{method}sent close command"));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Read, net::TcpListener, thread};

    use crate::{
        logging::MemoryLog,
        protocol::{DecodeOptions, Value, decode_from_slice},
    };

    use super::*;

    #[test]
    fn connect_refused_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let log = Arc::new(MemoryLog::new());
        let err = Client::with_settings(&ClientSettings::new(addr.to_string()), log.clone())
            .err()
            .unwrap();
        assert!(matches!(err, TransportError::Connect { .. }), "{err:?}");
        assert!(log.contains("connect() error"));
    }

    #[test]
    fn exchange_writes_then_reads_one_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut transport = ProtocolTransport::new(stream);
            let (request, _) = transport.read_message().unwrap();

            let reply = Message::new(request.command + 1).with("seen", request.len() as u32);
            transport.write_message(&reply).unwrap();
            request
        });

        let mut client = Client::connect(&addr.to_string()).unwrap();
        let response = client
            .exchange(&Message::new(41).with("a", 1u8).with("b", "two"))
            .unwrap();

        assert_eq!(response.command, 42);
        assert_eq!(response.get("seen"), Some(&Value::U32(2)));
        assert_eq!(peer.join().unwrap().get("b"), Some(&Value::from("two")));
    }

    #[test]
    fn server_hangup_surfaces_as_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let _ = stream.read(&mut buf).unwrap();
        });

        let mut client = Client::connect(&addr.to_string()).unwrap();
        let res = client.exchange(&Message::new(1));
        peer.join().unwrap();

        assert!(res.unwrap_err().is_closed());
    }

    #[test]
    fn close_sends_sentinel() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut bytes = Vec::new();
            stream.read_to_end(&mut bytes).unwrap();
            bytes
        });

        Client::connect(&addr.to_string()).unwrap().close().unwrap();
        let bytes = peer.join().unwrap();
        let (msg, _) = decode_from_slice(&bytes, DecodeOptions::default()).unwrap();
        assert!(msg.is_close());
    }
}
