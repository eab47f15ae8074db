//! Handlers of the admin API.
//!
//! Each handler takes the fleet and the already collected request input and
//! returns the complete response, so it can be driven without a socket.

use bytes::Bytes;
use http::{header, StatusCode};
use http_body_util::Full;
use log::{error, info};
use serde::Serialize;

use crate::{
    config::loader,
    errors::FleetError,
    fleet::Fleet,
    server::{handler::Response, Server, ServerState},
    CONFIG,
};

/// One entry of the server list.
#[derive(Debug, Serialize)]
pub struct ServerSummary {
    pub address: String,
    pub virtualhosts: Vec<String>,
}

/// Detailed view of one server.
#[derive(Debug, Serialize)]
pub struct ServerDetail {
    pub address: String,
    pub tls: bool,
    pub state: ServerState,
    pub virtualhosts: Vec<VirtualHostDetail>,
}

#[derive(Debug, Serialize)]
pub struct VirtualHostDetail {
    pub hostname: String,
    pub handlers: Vec<String>,
    pub shutdown_hooks: usize,
}

impl ServerSummary {
    pub async fn of(server: &Server) -> Self {
        Self {
            address: server
                .address()
                .to_string(),
            virtualhosts: server
                .hostnames()
                .await,
        }
    }
}

impl ServerDetail {
    pub async fn of(server: &Server) -> Self {
        let virtualhosts = server
            .virtual_hosts()
            .await
            .iter()
            .map(|host| VirtualHostDetail {
                hostname: host
                    .hostname()
                    .to_string(),
                handlers: host.handler_names(),
                shutdown_hooks: host
                    .shutdown_hooks()
                    .len(),
            })
            .collect();

        Self {
            address: server
                .address()
                .to_string(),
            tls: server.is_secure(),
            state: server.state(),
            virtualhosts,
        }
    }
}

fn text(status: StatusCode, message: String) -> Response {
    let mut response = http::Response::new(Full::new(Bytes::from(message)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = http::Response::new(Full::new(Bytes::from(body)));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!("Cannot encode response: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub(crate) fn failure(e: &FleetError) -> Response {
    text(e.status(), e.to_string())
}

async fn summaries(fleet: &Fleet) -> Vec<ServerSummary> {
    let servers = fleet
        .read()
        .await;
    let mut summaries = Vec::new();
    for server in servers.iter() {
        summaries.push(ServerSummary::of(server).await);
    }
    summaries
}

/// `GET /`: every server with its hostnames.
pub async fn list(fleet: &Fleet) -> Response {
    json(StatusCode::OK, &summaries(fleet).await)
}

/// `POST /`: adds the servers described by the body.
pub async fn create(fleet: &Fleet, body: &[u8]) -> Response {
    let result = match loader::load(CONFIG, body) {
        Ok(configs) => {
            fleet
                .create(configs)
                .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            info!("Servers created through the admin API");
            json(StatusCode::ACCEPTED, &summaries(fleet).await)
        }
        Err(e) => {
            error!("Cannot create servers: {}", e);
            failure(&e)
        }
    }
}

/// `PUT /`: replaces the whole fleet with the servers described by the body.
pub async fn replace(fleet: &Fleet, body: &[u8]) -> Response {
    let result = match loader::load(CONFIG, body) {
        Ok(configs) => {
            fleet
                .replace(configs)
                .await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            info!("Fleet replaced through the admin API");
            json(StatusCode::ACCEPTED, &summaries(fleet).await)
        }
        Err(e) => {
            error!("Cannot replace servers: {}", e);
            failure(&e)
        }
    }
}

/// `GET /{address}`: details of one server.
pub async fn info(fleet: &Fleet, address: &str) -> Response {
    let resolved = Fleet::locate(address).await;
    let servers = fleet
        .read()
        .await;
    match Fleet::find_in(&servers, address, resolved) {
        Some(server) => json(StatusCode::OK, &ServerDetail::of(&server).await),
        None => failure(&FleetError::NotFound(address.to_string())),
    }
}

/// `DELETE /{address}`: gracefully stops one server.
///
/// Responds once the listener is closed; draining and hooks continue in the
/// background.
pub async fn stop(fleet: &Fleet, address: &str) -> Response {
    match fleet
        .stop(address)
        .await
    {
        Ok(_) => {
            info!("Server {} stopping through the admin API", address);
            text(StatusCode::ACCEPTED, format!("Stopping {}", address))
        }
        Err(e) => failure(&e),
    }
}
