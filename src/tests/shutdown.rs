#[cfg(test)]
mod shutdown_tests {
    use std::{
        error::Error,
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use bytes::Bytes;
    use http::{header::HOST, StatusCode};
    use http_body_util::Empty;
    use hyper::client::conn::http1;
    use hyper_util::rt::TokioIo;
    use tokio::{io::AsyncWriteExt, net::TcpStream};

    use crate::{
        config::Config,
        server::{handler::HandlerRegistry, shutdown::ShutdownHooks, Server, ServerState},
        tests::{http_get, loopback},
    };

    fn server(hostnames: &[&str], port: u16) -> Server {
        let configs = hostnames
            .iter()
            .map(|hostname| {
                Config::builder()
                    .host(hostname)
                    .port(port)
                    .build()
                    .unwrap()
            })
            .collect();
        Server::new(loopback(port), configs, false, &HandlerRegistry::with_defaults()).unwrap()
    }

    async fn hooks_of(server: &Server, hostname: &str) -> ShutdownHooks {
        server
            .virtual_host(hostname)
            .await
            .unwrap()
            .shutdown_hooks()
            .clone()
    }

    #[test]
    fn test_hooks_keep_registration_order() {
        let hooks = ShutdownHooks::default();
        let calls = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let calls = calls.clone();
            hooks.push(move || {
                calls
                    .lock()
                    .unwrap()
                    .push(i);
                Ok(())
            });
        }

        for hook in hooks.snapshot() {
            hook().unwrap();
        }
        assert_eq!(*calls.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_stop_runs_hooks_and_collects_failures() -> Result<(), Box<dyn Error>> {
        let server = server(&["a.test", "b.test"], 3911);
        server
            .start()
            .await?;

        let calls = Arc::new(Mutex::new(Vec::new()));
        for (hostname, fail) in [("a.test", false), ("a.test", true), ("a.test", false), ("b.test", false)] {
            let calls = calls.clone();
            let name = hostname.to_string();
            hooks_of(&server, hostname)
                .await
                .push(move || {
                    calls
                        .lock()
                        .unwrap()
                        .push(name.clone());
                    if fail {
                        return Err("log file already closed".into());
                    }
                    Ok(())
                });
        }

        let report = server
            .stop(Duration::from_secs(2))
            .await;

        assert_eq!(*calls.lock().unwrap(), vec!["a.test", "a.test", "a.test", "b.test"]);
        assert!(!report.timed_out());
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].hostname, "a.test");
        assert_eq!(report.failures()[0].index, 1);
        assert_eq!(report.failures()[0].message, "log file already closed");
        assert_eq!(report.address(), "127.0.0.1:3911");
        assert_eq!(server.state(), ServerState::Stopped);
        Ok(())
    }

    #[tokio::test]
    async fn test_cutoff_abandons_slow_hooks() -> Result<(), Box<dyn Error>> {
        let server = server(&["a.test"], 3912);
        server
            .start()
            .await?;

        hooks_of(&server, "a.test")
            .await
            .push(|| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            });

        let started = Instant::now();
        let report = server
            .stop(Duration::from_millis(50))
            .await;

        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(report.timed_out());
        assert!(!report.is_clean());
        assert_eq!(server.state(), ServerState::Stopped);
        Ok(())
    }

    #[tokio::test]
    async fn test_begin_shutdown_refuses_new_connections() -> Result<(), Box<dyn Error>> {
        let server = server(&["a.test"], 3913);
        server
            .start()
            .await?;
        let reply = http_get(loopback(3913), "a.test").await?;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);

        let drain = server
            .begin_shutdown()
            .await
            .unwrap();
        assert_eq!(server.state(), ServerState::ShuttingDown);
        assert!(TcpStream::connect(loopback(3913))
            .await
            .is_err());

        drain
            .finish(Duration::from_secs(1))
            .await;
        assert_eq!(server.state(), ServerState::Stopped);
        Ok(())
    }

    #[tokio::test]
    async fn test_idle_connections_drain_gracefully() -> Result<(), Box<dyn Error>> {
        let server = server(&["a.test"], 3914);
        server
            .start()
            .await?;

        let stream = TcpStream::connect(loopback(3914)).await?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream)).await?;
        let connection = tokio::spawn(connection);

        let request = http::Request::builder()
            .uri("/")
            .header(HOST, "a.test")
            .body(Empty::<Bytes>::new())?;
        let response = sender
            .send_request(request)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let drain = server
            .begin_shutdown()
            .await
            .unwrap();
        let report = drain
            .finish(Duration::from_secs(2))
            .await;
        assert!(!report.timed_out());

        tokio::time::timeout(Duration::from_secs(1), connection).await???;
        Ok(())
    }

    #[tokio::test]
    async fn test_hooks_run_when_a_request_outlives_the_drain() -> Result<(), Box<dyn Error>> {
        let server = server(&["a.test"], 3918);
        server
            .start()
            .await?;

        let calls = Arc::new(Mutex::new(0));
        {
            let calls = calls.clone();
            hooks_of(&server, "a.test")
                .await
                .push(move || {
                    *calls
                        .lock()
                        .unwrap() += 1;
                    Ok(())
                });
        }

        let mut stream = TcpStream::connect(loopback(3918)).await?;
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: a.test\r\n")
            .await?;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = server
            .stop(Duration::from_millis(400))
            .await;

        assert!(report.timed_out());
        assert!(report
            .failures()
            .is_empty());
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(server.state(), ServerState::Stopped);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_cutoff_stops_immediately() -> Result<(), Box<dyn Error>> {
        let server = server(&["a.test"], 3915);
        server
            .start()
            .await?;

        let report = server
            .stop(Duration::ZERO)
            .await;
        assert_eq!(server.state(), ServerState::Stopped);
        assert!(report
            .failures()
            .is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_stopped_server_can_start_again() -> Result<(), Box<dyn Error>> {
        let server = server(&["a.test"], 3916);
        server
            .start()
            .await?;
        server
            .stop(Duration::from_secs(1))
            .await;

        server
            .start()
            .await?;
        let reply = http_get(loopback(3916), "a.test").await?;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);

        server
            .stop(Duration::ZERO)
            .await;
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_when_not_listening_is_empty() {
        let server = server(&["a.test"], 3917);
        assert!(server
            .begin_shutdown()
            .await
            .is_none());
        let report = server
            .stop(Duration::from_secs(1))
            .await;
        assert!(report.is_clean());
    }
}
