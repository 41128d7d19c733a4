//! Implicit-TLS connections to mail servers via rustls.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use rustls_pki_types::ServerName;
use tracing::debug;

use crate::config::MailConfig;
use crate::error::MailError;
use crate::mail::{Connector, MailStream};

/// Connects over TCP with explicit timeouts, then wraps the socket in TLS.
pub struct TlsConnector {
    tls_config: Arc<ClientConfig>,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl TlsConnector {
    pub fn new(config: &MailConfig) -> Result<Self, MailError> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let tls_config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| MailError::Tls(e.to_string()))?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self {
            tls_config: Arc::new(tls_config),
            connect_timeout: config.connect_timeout,
            read_timeout: config.read_timeout,
        })
    }

    fn connect_tcp(&self, host: &str, port: u16) -> Result<TcpStream, MailError> {
        let connect_err = |reason: String| MailError::Connect {
            host: host.to_string(),
            port,
            reason,
        };

        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(tcp) => {
                    tcp.set_read_timeout(Some(self.read_timeout))?;
                    tcp.set_write_timeout(Some(self.read_timeout))?;
                    return Ok(tcp);
                }
                Err(e) => {
                    debug!(%addr, "TCP connect failed: {e}");
                    last_err = Some(e);
                }
            }
        }

        Err(connect_err(last_err.map_or_else(
            || "host resolved to no addresses".to_string(),
            |e| e.to_string(),
        )))
    }
}

impl Connector for TlsConnector {
    fn connect(&self, host: &str, port: u16) -> Result<Box<dyn MailStream>, MailError> {
        let tcp = self.connect_tcp(host, port)?;
        let server_name =
            ServerName::try_from(host.to_string()).map_err(|e| MailError::Tls(e.to_string()))?;
        let conn = ClientConnection::new(Arc::clone(&self.tls_config), server_name)
            .map_err(|e| MailError::Tls(e.to_string()))?;
        debug!(host, port, "TLS session established");
        Ok(Box::new(StreamOwned::new(conn, tcp)))
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use secrecy::SecretString;

    use super::*;

    fn mail_config() -> MailConfig {
        MailConfig {
            imap_host: "imap.test.com".into(),
            imap_port: 993,
            pop_host: "pop.test.com".into(),
            pop_port: 995,
            username: "user".into(),
            password: SecretString::from("pass"),
            protocol: "imap".into(),
            decode_sender: false,
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn builds_with_bundled_roots() {
        assert!(TlsConnector::new(&mail_config()).is_ok());
    }

    #[test]
    fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = TlsConnector::new(&mail_config()).unwrap();
        let err = connector.connect("127.0.0.1", port).err().unwrap();
        assert!(matches!(err, MailError::Connect { port: p, .. } if p == port));
    }

    #[test]
    fn invalid_host_name_is_connect_error() {
        let connector = TlsConnector::new(&mail_config()).unwrap();
        let err = connector.connect("not a host name", 993).err().unwrap();
        assert!(matches!(err, MailError::Connect { .. }));
    }
}
