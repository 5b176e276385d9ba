//! Scripted Bolt server for connection tests.

use std::collections::HashMap;

use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_util::codec::Framed;

use std::sync::Arc;

use super::connection::{BoltConnection, ConnectionConfig};
use crate::driver::auth::StaticSupplier;
use crate::driver::driver::{Driver, DriverConfig, StreamConnector};
use crate::bolt::codec::{write_chunked, BoltCodec, DEFAULT_MAX_CHUNK_SIZE};
use crate::bolt::handshake::BOLT_MAGIC;
use crate::bolt::message::{tag, AuthToken};
use crate::bolt::packstream::{decode, PackStreamStructure, PackStreamValue};
use crate::bolt::BoltVersion;

/// Route `tracing` output to the test harness; `RUST_LOG` selects the level.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) struct StubServer {
    framed: Framed<DuplexStream, BoltCodec>,
}

impl StubServer {
    /// Read the client handshake and agree on `version`.
    pub async fn accept(mut stream: DuplexStream, version: BoltVersion) -> Self {
        let mut proposal = [0u8; 20];
        stream.read_exact(&mut proposal).await.unwrap();
        assert_eq!(&proposal[..4], &BOLT_MAGIC);
        stream.write_all(&version.to_raw().to_be_bytes()).await.unwrap();
        Self {
            framed: Framed::new(stream, BoltCodec::new()),
        }
    }

    /// Accept HELLO and LOGON, adding `extra` to the HELLO metadata.
    pub async fn authenticate(&mut self, extra: Vec<(&str, PackStreamValue)>) {
        self.expect(tag::HELLO).await;
        self.expect(tag::LOGON).await;
        let mut hello = vec![("server", "Neo4j/5.13.0".into()), ("connection_id", "bolt-1".into())];
        hello.extend(extra);
        self.success(hello).await;
        self.success(vec![]).await;
    }

    /// Next request; panics unless its signature is `signature`.
    pub async fn expect(&mut self, signature: u8) -> Vec<PackStreamValue> {
        let message = self.framed.next().await.expect("client hung up").unwrap();
        match decode(&message).unwrap() {
            PackStreamValue::Structure(s) => {
                assert_eq!(
                    s.signature, signature,
                    "expected request 0x{:02X}, got 0x{:02X}",
                    signature, s.signature
                );
                s.fields
            }
            other => panic!("request is not a structure: {:?}", other),
        }
    }

    /// Whether the client closed its side.
    pub async fn at_eof(&mut self) -> bool {
        self.framed.next().await.is_none()
    }

    /// Swallow requests until the client hangs up.
    pub async fn drain(&mut self) {
        while let Some(Ok(_)) = self.framed.next().await {}
    }

    pub async fn success(&mut self, metadata: Vec<(&str, PackStreamValue)>) {
        let map = metadata.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        self.reply(tag::SUCCESS, vec![PackStreamValue::Map(map)]).await;
    }

    pub async fn record(&mut self, fields: Vec<PackStreamValue>) {
        self.reply(tag::RECORD, vec![PackStreamValue::List(fields)]).await;
    }

    pub async fn failure(&mut self, code: &str, message: &str) {
        self.reply(
            tag::FAILURE,
            vec![PackStreamValue::Map(HashMap::from([
                ("code".to_string(), PackStreamValue::from(code)),
                ("message".to_string(), PackStreamValue::from(message)),
            ]))],
        )
        .await;
    }

    pub async fn ignored(&mut self) {
        self.reply(tag::IGNORED, vec![]).await;
    }

    async fn reply(&mut self, signature: u8, fields: Vec<PackStreamValue>) {
        let mut buf = BytesMut::new();
        let structure = PackStreamStructure { signature, fields };
        write_chunked(&mut buf, DEFAULT_MAX_CHUNK_SIZE, |enc| enc.encode_structure(&structure)).unwrap();
        self.framed.get_mut().write_all(&buf).await.unwrap();
    }
}

/// Open a connection against a stub that accepts HELLO and LOGON.
pub(crate) async fn connect() -> (BoltConnection, StubServer) {
    connect_with_hello(vec![]).await
}

/// Like [`connect`], adding `extra` to the HELLO metadata.
pub(crate) async fn connect_with_hello(extra: Vec<(&'static str, PackStreamValue)>) -> (BoltConnection, StubServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let server = tokio::spawn(async move {
        let mut server = StubServer::accept(server, BoltVersion::V5_4).await;
        server.authenticate(extra).await;
        server
    });

    let connection = BoltConnection::open(client, &ConnectionConfig::default(), AuthToken::basic("neo4j", "secret"))
        .await
        .unwrap();
    (connection, server.await.unwrap())
}

/// Handshake on `stream`, then accept HELLO and LOGON.
pub(crate) async fn accept_authenticated(stream: DuplexStream) -> StubServer {
    let mut server = StubServer::accept(stream, BoltVersion::V5_4).await;
    server.authenticate(vec![]).await;
    server
}

/// Driver whose connections run over in-memory streams; the server ends are
/// returned in the order connections will be opened.
pub(crate) fn stub_driver(connections: usize) -> (Driver, Vec<DuplexStream>) {
    let config = DriverConfig::new("bolt://localhost:7687", AuthToken::basic("neo4j", "secret")).unwrap();
    stub_driver_with(config, connections)
}

pub(crate) fn stub_driver_with(config: DriverConfig, connections: usize) -> (Driver, Vec<DuplexStream>) {
    let supplier = Arc::new(StaticSupplier::new(config.auth.clone()));
    let connector = Arc::new(StreamConnector::new());
    let servers = (0..connections)
        .map(|_| {
            let (client, server) = tokio::io::duplex(64 * 1024);
            connector.push(client);
            server
        })
        .collect();
    (Driver::with_connector(config, supplier, connector).unwrap(), servers)
}
