//! Unit tests for the DHCPv6 transport

#[cfg(test)]
mod tests {
    use crate::config::{BootSource, ServerConfig};
    use crate::dhcp::{Dhcpv6Handler, Dhcpv6Server};
    use crate::server::{PxeServer, build_handler};
    use dhcp6::options::{
        ARCH_HTTP_CLIENT, OPT_BOOTFILE_URL, OPT_CLIENT_ARCH_TYPE, OPT_CLIENT_ID, OPT_IA_NA,
        OPT_ORO, OPT_SERVER_ID, OPT_STATUS_CODE,
    };
    use dhcp6::{
        DhcpOption, MessageType, MockAddressPool, MockBootConfiguration, Options, Packet,
        PacketBuilder,
    };
    use std::net::Ipv6Addr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    const MAC: [u8; 6] = [0x52, 0x54, 0x00, 0xab, 0xcd, 0xef];
    const SERVER_DUID: [u8; 14] = [0, 1, 0, 1, 0x2c, 0, 0, 1, 2, 0, 0, 0, 0, 1];
    const BOOT_URL: &str = "http://[2001:db8::1]/uefi/shim.efi";

    fn client_duid() -> Vec<u8> {
        let mut duid = vec![0, 3, 0, 1];
        duid.extend_from_slice(&MAC);
        duid
    }

    fn handler(pool: MockAddressPool) -> Dhcpv6Handler {
        let boot = MockBootConfiguration::new();
        boot.add_boot_url(&MAC, ARCH_HTTP_CLIENT, BOOT_URL);
        Dhcpv6Handler::new(
            PacketBuilder::new(550, 600).unwrap(),
            SERVER_DUID.to_vec(),
            Arc::new(boot),
            Arc::new(pool),
        )
    }

    fn solicit(request_bootfile: bool) -> Vec<u8> {
        let mut options = Options::new();
        options.add(DhcpOption::new(OPT_CLIENT_ID, client_duid()));
        options.add(DhcpOption::new(OPT_IA_NA, vec![0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]));
        options.add(DhcpOption::new(OPT_CLIENT_ARCH_TYPE, ARCH_HTTP_CLIENT.to_be_bytes()));
        if request_bootfile {
            options.add(DhcpOption::new(OPT_ORO, OPT_BOOTFILE_URL.to_be_bytes()));
        }
        Packet::new(MessageType::Solicit, [7, 8, 9], options).marshal()
    }

    fn granting_pool() -> MockAddressPool {
        let pool = MockAddressPool::new();
        pool.grant(&[0, 0, 0, 1], "2001:db8::5".parse().unwrap());
        pool
    }

    #[tokio::test]
    async fn test_solicit_gets_advertise() {
        let reply = handler(granting_pool())
            .handle_datagram(&solicit(true))
            .await
            .expect("reply");
        let reply = Packet::unmarshal(&reply).unwrap();
        assert!(matches!(reply.msg_type, MessageType::Advertise));
        assert_eq!(reply.transaction_id, [7, 8, 9]);
        assert_eq!(reply.options.server_id(), Some(&SERVER_DUID[..]));
        assert_eq!(reply.options.get(OPT_BOOTFILE_URL), Some(BOOT_URL.as_bytes()));
    }

    #[tokio::test]
    async fn test_degraded_reply_is_still_sent() {
        let pool = MockAddressPool::new();
        pool.deny_with("pool exhausted");
        let reply = handler(pool)
            .handle_datagram(&solicit(true))
            .await
            .expect("reply");
        let reply = Packet::unmarshal(&reply).unwrap();
        assert!(reply.options.get(OPT_STATUS_CODE).is_some());
    }

    #[tokio::test]
    async fn test_no_reply_cases() {
        let handler = handler(granting_pool());

        // undecodable
        assert!(handler.handle_datagram(&[1, 0]).await.is_none());
        // no boot file URL in the option request
        assert!(handler.handle_datagram(&solicit(false)).await.is_none());

        // Request addressed to another server
        let mut options = Options::new();
        options.add(DhcpOption::new(OPT_CLIENT_ID, client_duid()));
        options.add(DhcpOption::new(OPT_SERVER_ID, vec![0, 3, 0, 1, 1, 1, 1, 1, 1, 1]));
        options.add(DhcpOption::new(OPT_ORO, OPT_BOOTFILE_URL.to_be_bytes()));
        let request = Packet::new(MessageType::Request, [0; 3], options).marshal();
        assert!(handler.handle_datagram(&request).await.is_none());

        // unknown machine
        let mut options = Options::new();
        options.add(DhcpOption::new(OPT_CLIENT_ID, vec![0, 3, 0, 1, 9, 9, 9, 9, 9, 9]));
        options.add(DhcpOption::new(OPT_ORO, OPT_BOOTFILE_URL.to_be_bytes()));
        let request = Packet::new(MessageType::InformationRequest, [0; 3], options).marshal();
        assert!(handler.handle_datagram(&request).await.is_none());
    }

    #[tokio::test]
    async fn test_release_is_acknowledged() {
        let pool = granting_pool();
        let mut options = Options::new();
        options.add(DhcpOption::new(OPT_CLIENT_ID, client_duid()));
        options.add(DhcpOption::new(OPT_SERVER_ID, SERVER_DUID.to_vec()));
        options.add(DhcpOption::new(OPT_IA_NA, vec![0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]));
        let request = Packet::new(MessageType::Release, [4, 5, 6], options).marshal();

        let reply = handler(pool.clone())
            .handle_datagram(&request)
            .await
            .expect("reply");
        let reply = Packet::unmarshal(&reply).unwrap();
        assert!(matches!(reply.msg_type, MessageType::Reply));
        assert_eq!(reply.options.len(), 3);
        assert_eq!(pool.released().len(), 1);
    }

    #[tokio::test]
    async fn test_server_answers_over_udp() {
        // skip where the host has no IPv6 loopback
        let Ok(socket) = UdpSocket::bind("[::1]:0").await else {
            return;
        };
        let Ok(client) = UdpSocket::bind("[::1]:0").await else {
            return;
        };

        let server = Arc::new(PxeServer::with_dhcp(Dhcpv6Server::from_socket(
            socket,
            handler(granting_pool()),
        )));
        let server_addr = server.dhcp().local_addr().unwrap();
        let running = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.start().await }
        });

        client.send_to(&solicit(true), server_addr).await.unwrap();
        let mut buf = vec![0u8; 1500];
        let (len, from) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .expect("reply before timeout")
            .unwrap();
        assert_eq!(from, server_addr);
        let reply = Packet::unmarshal(&buf[..len]).unwrap();
        assert!(matches!(reply.msg_type, MessageType::Advertise));
        assert_eq!(reply.transaction_id, [7, 8, 9]);

        server.shutdown();
        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("server stops")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_debug_output_shows_identity() {
        let rendered = format!("{:?}", handler(granting_pool()));
        assert!(rendered.starts_with("Dhcpv6Handler"), "{}", rendered);
        assert!(rendered.contains("preferred_lifetime: 550"), "{}", rendered);
        assert!(rendered.contains(&format!("{:?}", SERVER_DUID.to_vec())), "{}", rendered);

        let Ok(socket) = UdpSocket::bind("[::1]:0").await else {
            return;
        };
        let server = PxeServer::with_dhcp(Dhcpv6Server::from_socket(
            socket,
            handler(granting_pool()),
        ));
        let rendered = format!("{:?}", server);
        assert!(rendered.contains("Dhcpv6Server"), "{}", rendered);
        assert!(rendered.contains("Dhcpv6Handler"), "{}", rendered);
    }

    #[tokio::test]
    async fn test_build_handler_from_config() {
        let config = ServerConfig {
            listen_addr: Ipv6Addr::UNSPECIFIED,
            interface_index: 0,
            server_mac: MAC.to_vec(),
            boot: BootSource::Static {
                http_boot_url: BOOT_URL.to_string(),
                ipxe_boot_url: "http://[2001:db8::1]/boot.ipxe".to_string(),
            },
            preference: None,
            dns_servers: Vec::new(),
            pool_start: "2001:db8::100".parse().unwrap(),
            pool_size: 50,
            preferred_lifetime: 550,
            valid_lifetime: 600,
        };
        let handler = build_handler(&config).await.unwrap();
        let duid = handler.server_duid();
        assert_eq!(duid.len(), 14);
        assert_eq!(&duid[0..4], &[0, 1, 0, 1]);
        assert_eq!(&duid[8..], &MAC);

        let config = ServerConfig {
            boot: BootSource::Api {
                url: "not a url".to_string(),
                timeout: Duration::from_secs(1),
            },
            ..config.clone()
        };
        assert!(build_handler(&config).await.is_err());

        let config = ServerConfig {
            boot: BootSource::File {
                path: "/nonexistent/boot-table".into(),
            },
            ..config
        };
        assert!(build_handler(&config).await.is_err());
    }
}
