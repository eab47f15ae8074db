#[cfg(test)]
mod binding_tests {
    use std::{error::Error, net::SocketAddr};

    use crate::{binding::arrange_bindings, config::Config, errors::FleetError};

    fn config(host: &str, port: u16) -> Config {
        Config::builder()
            .host(host)
            .port(port)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_same_address_shares_a_group() -> Result<(), Box<dyn Error>> {
        let bindings = arrange_bindings(vec![
            config("localhost", 2015),
            config("127.0.0.1", 2015),
            config("127.0.0.1", 2016),
        ])
        .await?;

        assert_eq!(bindings.len(), 2);

        let shared = bindings
            .get(&"127.0.0.1:2015".parse::<SocketAddr>()?)
            .unwrap();
        let hosts: Vec<&str> = shared
            .configs()
            .iter()
            .map(Config::host)
            .collect();
        assert_eq!(hosts, vec!["localhost", "127.0.0.1"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_groups_keep_first_seen_order() -> Result<(), Box<dyn Error>> {
        let bindings = arrange_bindings(vec![
            config("127.0.0.1", 3003),
            config("127.0.0.1", 3001),
            config("127.0.0.1", 3003),
            config("127.0.0.1", 3002),
        ])
        .await?;

        let ports: Vec<u16> = bindings
            .iter()
            .map(|group| {
                group
                    .address()
                    .port()
            })
            .collect();
        assert_eq!(ports, vec![3003, 3001, 3002]);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_host_binds_every_interface() -> Result<(), Box<dyn Error>> {
        let bindings = arrange_bindings(vec![config("", 2015)]).await?;
        let group = bindings
            .iter()
            .next()
            .unwrap();
        assert_eq!(group.address(), "0.0.0.0:2015".parse::<SocketAddr>()?);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_input_yields_no_groups() -> Result<(), Box<dyn Error>> {
        let bindings = arrange_bindings(Vec::new()).await?;
        assert!(bindings.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_resolution_failure_aborts_everything() {
        let result = arrange_bindings(vec![config("127.0.0.1", 2015), config("host.invalid", 80)])
            .await;
        assert!(matches!(result, Err(FleetError::Binding(_))));
    }
}
