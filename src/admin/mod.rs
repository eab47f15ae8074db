//! The admin API.
//!
//! | Method   | Path         | Operation                         |
//! |----------|--------------|-----------------------------------|
//! | `GET`    | `/`          | list servers                      |
//! | `POST`   | `/`          | create servers from config text   |
//! | `PUT`    | `/`          | replace the fleet                 |
//! | `GET`    | `/{address}` | server detail                     |
//! | `DELETE` | `/{address}` | gracefully stop a server          |
//!
//! # Examples
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vetis_fleet::{admin::AdminServer, config::AdminConfig, fleet::Fleet};
//!
//! let mut admin = AdminServer::new(AdminConfig::builder().build()?, fleet.clone());
//! admin.start().await?;
//! // curl -X POST --data-binary @Fleetfile http://127.0.0.1:2019/
//! admin.stop().await?;
//! ```

use std::{convert::Infallible, sync::Arc};

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use log::{error, info};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{config::AdminConfig, errors::FleetError, fleet::Fleet, server::handler::Response};

pub mod handlers;

pub struct AdminServer {
    config: AdminConfig,
    fleet: Arc<Fleet>,
    token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl AdminServer {
    pub fn new(config: AdminConfig, fleet: Arc<Fleet>) -> Self {
        Self { config, fleet, token: None, task: None }
    }

    pub fn config(&self) -> &AdminConfig {
        &self.config
    }

    /// Binds the admin listener and serves requests in the background.
    pub async fn start(&mut self) -> Result<(), FleetError> {
        let address = self
            .config
            .socket_addr();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| FleetError::Listen { address: address.to_string(), reason: e.to_string() })?;

        let token = CancellationToken::new();
        let loop_token = token.clone();
        let fleet = self
            .fleet
            .clone();
        let max_body_size = self
            .config
            .max_body_size();

        let task = tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = loop_token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };

                let stream = match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        error!("Cannot accept admin connection: {}", e);
                        continue;
                    }
                };

                let fleet = fleet.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |request| {
                        let fleet = fleet.clone();
                        async move {
                            Ok::<_, Infallible>(serve(&fleet, request, max_body_size).await)
                        }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        error!("Error serving admin connection: {:?}", err);
                    }
                });
            }
        });

        info!("Admin API listening on {}", address);
        self.token = Some(token);
        self.task = Some(task);
        Ok(())
    }

    /// Stops accepting admin requests.
    pub async fn stop(&mut self) -> Result<(), FleetError> {
        if let Some(token) = self
            .token
            .take()
        {
            token.cancel();
        }
        if let Some(task) = self
            .task
            .take()
        {
            if let Err(e) = task.await {
                error!("Admin accept loop failed: {}", e);
            }
        }
        Ok(())
    }
}

async fn serve(fleet: &Fleet, request: http::Request<Incoming>, max_body_size: usize) -> Response {
    let (parts, body) = request.into_parts();
    let body = match Limited::new(body, max_body_size)
        .collect()
        .await
    {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e
            .downcast_ref::<LengthLimitError>()
            .is_some() =>
        {
            return status_only(StatusCode::PAYLOAD_TOO_LARGE);
        }
        Err(e) => {
            let mut response = http::Response::new(Full::new(Bytes::from(e.to_string())));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return response;
        }
    };

    route(fleet, &parts.method, parts.uri.path(), &body).await
}

/// Dispatches one admin request to its handler.
pub async fn route(fleet: &Fleet, method: &Method, path: &str, body: &[u8]) -> Response {
    let target = path.trim_start_matches('/');

    match (method, target.is_empty()) {
        (&Method::GET, true) => handlers::list(fleet).await,
        (&Method::POST, true) => handlers::create(fleet, body).await,
        (&Method::PUT, true) => handlers::replace(fleet, body).await,
        (&Method::GET, false) => handlers::info(fleet, target).await,
        (&Method::DELETE, false) => handlers::stop(fleet, target).await,
        (_, true) | (&Method::POST, false) | (&Method::PUT, false) => {
            status_only(StatusCode::METHOD_NOT_ALLOWED)
        }
        _ => status_only(StatusCode::NOT_FOUND),
    }
}

fn status_only(status: StatusCode) -> Response {
    let reason = status
        .canonical_reason()
        .unwrap_or_default();
    let mut response = http::Response::new(Full::new(Bytes::from(reason)));
    *response.status_mut() = status;
    response
}
