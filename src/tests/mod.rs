use std::{error::Error, net::SocketAddr};

use bytes::Bytes;
use http::{
    header::{CONNECTION, HOST},
    Method, StatusCode,
};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

mod admin;
mod binding;
mod shutdown;

/// Status and body of a response received by [`http_request`].
pub(crate) struct Reply {
    pub status: StatusCode,
    pub body: String,
}

/// Sends one request with the given `Host` header over a fresh connection.
pub(crate) async fn http_request(
    address: SocketAddr,
    method: Method,
    host: &str,
    body: &str,
) -> Result<Reply, Box<dyn Error>> {
    let stream = TcpStream::connect(address).await?;
    let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
    tokio::spawn(connection);

    let request = http::Request::builder()
        .method(method)
        .uri("/")
        .header(HOST, host)
        .header(CONNECTION, "close")
        .body(Full::new(Bytes::from(body.to_string())))?;

    let response = sender
        .send_request(request)
        .await?;
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await?
        .to_bytes();

    Ok(Reply { status, body: String::from_utf8(body.to_vec())? })
}

/// Sends `GET /` with the given `Host` header.
pub(crate) async fn http_get(address: SocketAddr, host: &str) -> Result<Reply, Box<dyn Error>> {
    http_request(address, Method::GET, host, "").await
}

pub(crate) fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}
