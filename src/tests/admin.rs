#[cfg(test)]
mod admin_tests {
    use std::{error::Error, sync::Arc, time::Duration};

    use bytes::Bytes;
    use http::{header::CONTENT_TYPE, Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tokio::{net::TcpStream, sync::mpsc};

    use crate::{
        admin::{route, AdminServer},
        config::{loader::load, AdminConfig},
        fleet::Fleet,
        server::{
            handler::{HandlerRegistry, Response},
            ServerState,
        },
        tests::{http_get, http_request, loopback},
    };

    const TEST_ADDR: &str = "localhost:2015";
    const SHUTDOWN_CUTOFF: Duration = Duration::from_secs(2);

    /// Builds a fleet from `text` without starting any listener.
    async fn set_up(text: &str) -> Fleet {
        let fleet = Fleet::new(HandlerRegistry::with_defaults(), SHUTDOWN_CUTOFF);
        let configs = load("Testfile", text.as_bytes()).unwrap();
        for server in fleet
            .build(configs)
            .await
            .unwrap()
        {
            fleet
                .register(server)
                .await
                .unwrap();
        }
        fleet
    }

    async fn kill_servers(fleet: &Fleet) {
        fleet
            .shutdown(Duration::ZERO)
            .await;
    }

    async fn body(response: Response) -> Bytes {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
    }

    fn is_json(response: &Response) -> bool {
        response
            .headers()
            .get(CONTENT_TYPE)
            .is_some_and(|value| value == "application/json")
    }

    #[tokio::test]
    async fn test_server_list() -> Result<(), Box<dyn Error>> {
        let fleet = set_up(TEST_ADDR).await;

        let response = route(&fleet, &Method::GET, "/", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(is_json(&response));

        let list: Value = serde_json::from_slice(&body(response).await)?;
        assert_eq!(list[0]["address"], "127.0.0.1:2015");
        assert_eq!(list[0]["virtualhosts"][0], "localhost");
        Ok(())
    }

    #[tokio::test]
    async fn test_server_list_empty() -> Result<(), Box<dyn Error>> {
        let fleet = Fleet::new(HandlerRegistry::with_defaults(), SHUTDOWN_CUTOFF);

        let response = route(&fleet, &Method::GET, "/", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body(response).await, Bytes::from_static(b"[]"));
        Ok(())
    }

    #[tokio::test]
    async fn test_servers_create() -> Result<(), Box<dyn Error>> {
        let fleet = set_up(TEST_ADDR).await;
        let new_server_addr = "127.0.0.1:3932";
        let request = format!("{}\n\t\tgzip", new_server_addr);

        let response = route(&fleet, &Method::POST, "/", request.as_bytes()).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let servers = fleet.servers().await;
        assert_eq!(servers.len(), 2);
        assert_eq!(
            servers[0]
                .hostnames()
                .await
                .len(),
            1
        );
        assert_eq!(
            servers[1]
                .hostnames()
                .await
                .len(),
            1
        );
        let virtual_host = servers[1]
            .virtual_host("127.0.0.1")
            .await
            .unwrap();
        assert!(virtual_host
            .handler_names()
            .contains(&"gzip".to_string()));

        let reply = http_get(new_server_addr.parse()?, "127.0.0.1").await?;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);

        kill_servers(&fleet).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_servers_create_conflict() -> Result<(), Box<dyn Error>> {
        let fleet = set_up(TEST_ADDR).await;

        let response = route(&fleet, &Method::POST, "/", TEST_ADDR.as_bytes()).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(fleet.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_servers_create_parse_error() -> Result<(), Box<dyn Error>> {
        let fleet = set_up(TEST_ADDR).await;

        let response = route(&fleet, &Method::POST, "/", b"localhost {\n gzip\n").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let message = String::from_utf8(
            body(response)
                .await
                .to_vec(),
        )?;
        assert!(message.starts_with("Parse error: Fleetfile:1"));
        assert_eq!(fleet.len().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_servers_replace() -> Result<(), Box<dyn Error>> {
        let fleet = set_up(TEST_ADDR).await;
        let new_server_addr = "127.0.0.1:3933";
        let request = format!("{}\n\t    gzip", new_server_addr);

        let response = route(&fleet, &Method::PUT, "/", request.as_bytes()).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let servers = fleet.servers().await;
        assert_eq!(servers.len(), 1);
        assert_eq!(
            servers[0]
                .hostnames()
                .await
                .len(),
            1
        );
        let virtual_host = servers[0]
            .virtual_host("127.0.0.1")
            .await
            .unwrap();
        assert!(virtual_host
            .handler_names()
            .contains(&"gzip".to_string()));

        let reply = http_get(new_server_addr.parse()?, "127.0.0.1").await?;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);

        kill_servers(&fleet).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_servers_replace_stops_running_fleet() -> Result<(), Box<dyn Error>> {
        let fleet = set_up("127.0.0.1:3934").await;
        fleet.servers().await[0]
            .start()
            .await?;

        let response = route(&fleet, &Method::PUT, "/", b"127.0.0.1:3944\ngzip").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        assert!(TcpStream::connect(loopback(3934))
            .await
            .is_err());
        let reply = http_get(loopback(3944), "127.0.0.1").await?;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);

        kill_servers(&fleet).await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_server_list_never_sees_half_applied_create() -> Result<(), Box<dyn Error>> {
        let fleet = Arc::new(Fleet::new(HandlerRegistry::with_defaults(), SHUTDOWN_CUTOFF));
        fleet
            .create(load("Testfile", "127.0.0.1:3950".as_bytes())?)
            .await?;

        let lister = {
            let fleet = fleet.clone();
            tokio::spawn(async move {
                let mut lists = Vec::new();
                for _ in 0..200 {
                    let response = route(&fleet, &Method::GET, "/", b"").await;
                    let list: Value = serde_json::from_slice(&body(response).await).unwrap();
                    lists.push(list);
                    tokio::task::yield_now().await;
                }
                lists
            })
        };

        let response = route(&fleet, &Method::POST, "/", b"localhost:3950, 127.0.0.1:3951").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        for list in lister.await? {
            let merged = list[0]["virtualhosts"]
                .as_array()
                .map(Vec::len)
                == Some(2);
            let appended = list
                .as_array()
                .map(Vec::len)
                == Some(2);
            assert_eq!(merged, appended, "torn list: {}", list);
        }

        kill_servers(&fleet).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_server_info() -> Result<(), Box<dyn Error>> {
        let fleet = set_up(TEST_ADDR).await;

        let response = route(&fleet, &Method::GET, &format!("/{}", TEST_ADDR), b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(is_json(&response));

        let detail: Value = serde_json::from_slice(&body(response).await)?;
        assert_eq!(detail["address"], "127.0.0.1:2015");
        assert_eq!(detail["tls"], false);
        assert_eq!(detail["state"], "stopped");
        assert_eq!(detail["virtualhosts"][0]["hostname"], "localhost");
        Ok(())
    }

    #[tokio::test]
    async fn test_server_info_not_found() {
        let fleet = set_up(TEST_ADDR).await;

        let response = route(&fleet, &Method::GET, "/127.0.0.1:2016", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_server_stop() -> Result<(), Box<dyn Error>> {
        let test_server_addr = "localhost:6099";
        let fleet = set_up(test_server_addr).await;

        let (properly_stopped, mut stopped) = mpsc::unbounded_channel();
        let server = fleet.servers().await[0].clone();
        server
            .virtual_host("localhost")
            .await
            .unwrap()
            .shutdown_hooks()
            .push(move || {
                properly_stopped.send(true)?;
                Ok(())
            });

        server
            .start()
            .await?;

        let response = route(&fleet, &Method::DELETE, &format!("/{}", test_server_addr), b"").await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        assert!(TcpStream::connect(loopback(6099))
            .await
            .is_err());

        let signal = tokio::time::timeout(SHUTDOWN_CUTOFF, stopped.recv()).await?;
        assert_eq!(signal, Some(true));
        assert_ne!(server.state(), ServerState::Listening);

        kill_servers(&fleet).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_server_stop_not_found() {
        let fleet = set_up(TEST_ADDR).await;

        let response = route(&fleet, &Method::DELETE, "/127.0.0.1:2016", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unsupported_routes() {
        let fleet = set_up(TEST_ADDR).await;

        let response = route(&fleet, &Method::DELETE, "/", b"").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = route(&fleet, &Method::PATCH, "/localhost:2015", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_server_over_http() -> Result<(), Box<dyn Error>> {
        let fleet = Arc::new(Fleet::new(HandlerRegistry::with_defaults(), SHUTDOWN_CUTOFF));
        let config = AdminConfig::builder()
            .port(3945)
            .build()?;
        let mut admin = AdminServer::new(config, fleet.clone());
        admin
            .start()
            .await?;

        let reply = http_get(loopback(3945), "127.0.0.1").await?;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body, "[]");

        admin
            .stop()
            .await?;
        assert!(TcpStream::connect(loopback(3945))
            .await
            .is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_admin_server_rejects_oversized_body() -> Result<(), Box<dyn Error>> {
        let fleet = Arc::new(Fleet::new(HandlerRegistry::with_defaults(), SHUTDOWN_CUTOFF));
        let config = AdminConfig::builder()
            .port(3946)
            .max_body_size(16)
            .build()?;
        let mut admin = AdminServer::new(config, fleet.clone());
        admin
            .start()
            .await?;

        let reply = http_request(
            loopback(3946),
            Method::POST,
            "127.0.0.1",
            "127.0.0.1:3947\ngzip\nheader X-Padding longer-than-the-limit",
        )
        .await?;
        assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(fleet.is_empty().await);

        admin
            .stop()
            .await?;
        Ok(())
    }
}
