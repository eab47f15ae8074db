use std::{convert::Infallible, io, net::SocketAddr};

use http::{header, request::Parts};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use log::{debug, error};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpSocket, TcpStream},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use crate::{
    server::{
        conn::listener::RunningListener,
        handler::Response,
        virtual_host::not_found,
    },
    FleetVirtualHosts,
};

#[cfg(feature = "tokio-rust-tls")]
pub(crate) use tokio_rustls::TlsAcceptor;

#[cfg(not(feature = "tokio-rust-tls"))]
#[derive(Clone)]
pub(crate) enum TlsAcceptor {}

const BACKLOG: u32 = 1024;

pub(crate) struct TcpServerListener {
    address: SocketAddr,
    listener: TcpListener,
}

impl TcpServerListener {
    /// Binds the listening socket.
    pub(crate) fn bind(address: SocketAddr) -> io::Result<Self> {
        let socket = if address.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_reuseaddr(true)?;
        socket.bind(address)?;
        let listener = socket.listen(BACKLOG)?;
        Ok(Self { address, listener })
    }

    /// Spawns the accept loop.
    ///
    /// Every accepted connection runs in its own task. Cancelling the loop
    /// drops the listening socket and returns the open connections.
    pub(crate) fn serve(
        self,
        virtual_hosts: FleetVirtualHosts,
        tls: Option<TlsAcceptor>,
    ) -> RunningListener {
        let token = CancellationToken::new();
        let address = self.address;
        let listener = self.listener;
        let loop_token = token.clone();

        let task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    accepted = listener.accept() => {
                        let (stream, peer) = match accepted {
                            Ok(accepted) => accepted,
                            Err(e) => {
                                error!("Cannot accept connection on {}: {}", address, e);
                                continue;
                            }
                        };

                        if let Err(e) = stream.set_nodelay(true) {
                            error!("Cannot set TCP_NODELAY: {}", e);
                            continue;
                        }

                        debug!("Accepted connection from {} on {}", peer, address);

                        connections.spawn(handle_connection(
                            stream,
                            virtual_hosts.clone(),
                            tls.clone(),
                            loop_token.clone(),
                        ));
                    }
                    Some(_) = connections.join_next(), if !connections.is_empty() => {}
                }
            }

            drop(listener);
            connections
        });

        RunningListener::new(token, task)
    }
}

async fn handle_connection(
    stream: TcpStream,
    virtual_hosts: FleetVirtualHosts,
    tls: Option<TlsAcceptor>,
    token: CancellationToken,
) {
    let Some(acceptor) = tls else {
        serve_http1(TokioIo::new(stream), virtual_hosts, token).await;
        return;
    };

    #[cfg(feature = "tokio-rust-tls")]
    {
        let accepted = tokio::select! {
            _ = token.cancelled() => return,
            accepted = acceptor.accept(stream) => accepted,
        };
        match accepted {
            Ok(tls_stream) => serve_http1(TokioIo::new(tls_stream), virtual_hosts, token).await,
            Err(e) => error!("Cannot accept TLS connection: {}", e),
        }
    }

    #[cfg(not(feature = "tokio-rust-tls"))]
    match acceptor {}
}

async fn serve_http1<T>(io: TokioIo<T>, virtual_hosts: FleetVirtualHosts, token: CancellationToken)
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |request| {
        let virtual_hosts = virtual_hosts.clone();
        async move { Ok::<_, Infallible>(process_request(request, virtual_hosts).await) }
    });

    let connection = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = token.cancelled() => {
            connection
                .as_mut()
                .graceful_shutdown();
            connection.await
        }
    };

    if let Err(err) = result {
        error!("Error serving connection: {:?}", err);
    }
}

/// Returns the host part of the request's `Host` header, or of the URI
/// authority when the header is missing.
pub(crate) fn request_host(parts: &Parts) -> String {
    let host_port = parts
        .headers
        .get(header::HOST)
        .and_then(|host| {
            host.to_str()
                .ok()
        })
        .or_else(|| {
            parts
                .uri
                .authority()
                .map(|authority| authority.as_str())
        })
        .unwrap_or("");

    let host = if let Some(rest) = host_port.strip_prefix('[') {
        rest.split_once(']')
            .map(|(host, _)| host)
            .unwrap_or(rest)
    } else {
        host_port
            .split_once(':')
            .map(|(host, _)| host)
            .unwrap_or(host_port)
    };

    host.to_ascii_lowercase()
}

async fn process_request(
    request: http::Request<Incoming>,
    virtual_hosts: FleetVirtualHosts,
) -> Response {
    let (parts, _body) = request.into_parts();
    let host = request_host(&parts);

    let virtual_host = {
        let virtual_hosts = virtual_hosts
            .read()
            .await;
        virtual_hosts
            .get(&host)
            .or_else(|| virtual_hosts.get(""))
            .cloned()
    };

    match virtual_host {
        Some(virtual_host) => virtual_host.respond(&parts),
        None => {
            debug!("Virtual host not found for host: {}", host);
            not_found()
        }
    }
}
