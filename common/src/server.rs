use std::{
    convert::Infallible,
    io::{self, Read, Write},
    net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream},
};

use log::{debug, error, info, warn};

use crate::{
    command::CommandToken,
    config::ServerConfig,
    dispatcher::{ActionDispatcher, BinaryOutput},
    error::ServerError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Responded(CommandToken),
    PeerClosed,
    TimedOut,
    ReadFailed,
    WriteFailed,
    OutputFailed,
}

impl ConnectionOutcome {
    pub fn responded(self) -> bool {
        matches!(self, Self::Responded(_))
    }
}

#[derive(Debug)]
pub struct RequestBuffer {
    bytes: Vec<u8>,
    max: usize,
}

impl RequestBuffer {
    pub fn new(max: usize) -> Self {
        let max = max.max(CommandToken::longest_len());
        Self {
            bytes: Vec::with_capacity(max),
            max,
        }
    }

    // Pieces never exceed `max - (longest_len - 1)`, so the tail of the
    // previous read always survives long enough to complete a split token.
    pub fn push(&mut self, chunk: &[u8]) -> Option<CommandToken> {
        for piece in chunk.chunks(self.piece_len()) {
            let overflow = (self.bytes.len() + piece.len()).saturating_sub(self.max);
            self.bytes.drain(..overflow);
            self.bytes.extend_from_slice(piece);

            if let Some(token) = CommandToken::recognize(&self.bytes) {
                return Some(token);
            }
        }
        None
    }

    fn piece_len(&self) -> usize {
        self.max - (CommandToken::longest_len() - 1)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn capacity_limit(&self) -> usize {
        self.max
    }
}

pub fn serve_connection<S, O>(
    stream: &mut S,
    dispatcher: &mut ActionDispatcher<O>,
    request: &mut RequestBuffer,
    chunk: &mut [u8],
) -> ConnectionOutcome
where
    S: Read + Write,
    O: BinaryOutput,
{
    request.clear();

    loop {
        let n = match stream.read(chunk) {
            Ok(0) => {
                debug!("client closed after {} bytes without a command", request.len());
                return ConnectionOutcome::PeerClosed;
            }
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                warn!("client idle past read timeout; dropping connection");
                return ConnectionOutcome::TimedOut;
            }
            Err(err) => {
                warn!("client read failed: {err}");
                return ConnectionOutcome::ReadFailed;
            }
        };

        let Some(token) = request.push(&chunk[..n]) else {
            debug!("unknown command in {n} byte chunk");
            continue;
        };
        info!("command `{}`", token.as_str());

        let response = match dispatcher.dispatch(token) {
            Ok(template) => template.render(),
            Err(err) => {
                error!("failed to apply `{}`: {err}", token.as_str());
                return ConnectionOutcome::OutputFailed;
            }
        };

        return match stream.write_all(&response).and_then(|()| stream.flush()) {
            Ok(()) => ConnectionOutcome::Responded(token),
            Err(err) => {
                warn!("failed to write response: {err}");
                ConnectionOutcome::WriteFailed
            }
        };
    }
}

pub struct CommandServer<O> {
    listener: TcpListener,
    dispatcher: ActionDispatcher<O>,
    config: ServerConfig,
    request: RequestBuffer,
    chunk: Vec<u8>,
}

impl<O: BinaryOutput> CommandServer<O> {
    pub fn bind(config: &ServerConfig, dispatcher: ActionDispatcher<O>) -> Result<Self, ServerError> {
        Self::bind_addr(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)),
            config,
            dispatcher,
        )
    }

    pub fn bind_addr(
        addr: SocketAddr,
        config: &ServerConfig,
        dispatcher: ActionDispatcher<O>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind {
            port: addr.port(),
            source,
        })?;
        info!(
            "command server listening on {} (serving http://{}/index.html)",
            listener.local_addr().unwrap_or(addr),
            dispatcher.address()
        );

        Ok(Self {
            listener,
            dispatcher,
            config: config.clone(),
            request: RequestBuffer::new(config.max_request_bytes),
            chunk: vec![0_u8; config.max_request_bytes.max(CommandToken::longest_len())],
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn dispatcher(&self) -> &ActionDispatcher<O> {
        &self.dispatcher
    }

    pub fn serve_next(&mut self) -> Result<ConnectionOutcome, ServerError> {
        let (mut stream, peer) = self.listener.accept().map_err(ServerError::Accept)?;
        info!("client connected from {peer}");

        if let Err(err) = stream.set_read_timeout(self.config.read_timeout()) {
            warn!("failed to set client read timeout: {err}");
        }

        let outcome = serve_connection(
            &mut stream,
            &mut self.dispatcher,
            &mut self.request,
            &mut self.chunk,
        );
        if !outcome.responded() {
            info!("closing {peer} without a response ({outcome:?})");
        }
        close(stream);

        Ok(outcome)
    }

    pub fn run(mut self) -> Result<Infallible, ServerError> {
        loop {
            self.serve_next()?;
        }
    }
}

fn close(stream: TcpStream) {
    if let Err(err) = stream.shutdown(Shutdown::Write) {
        debug!("client shutdown: {err}");
    }
}
