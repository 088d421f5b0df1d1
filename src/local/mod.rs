//! Local end: SOCKS5 listener, server pool, and per-client sessions.
//!
//! Each accepted client runs the SOCKS5 handshake, hands the raw address to
//! the pool, and relays bytes between the client and the chosen tunnel. The
//! pool rotates across the configured remotes and fails over on dial errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::config::{has_port, Config};
use crate::crypto::EncryptTable;
use crate::error::{Error, Result};
use crate::protocol::stream::CipherStream;
use crate::protocol::{relay, socks5};

/// One dialable remote and the table for its password.
pub struct ServerEntry {
    /// host:port to dial.
    pub addr: String,
    /// Table shared by every entry with the same password.
    pub table: Arc<EncryptTable>,
}

/// Ordered, non-empty list of remotes with a rotation counter.
pub struct ServerPool {
    entries: Vec<ServerEntry>,
    /// Rotation hint. Plain relaxed increments; a racing duplicate pick
    /// costs nothing, a lock here would sit on every session's hot path.
    next: AtomicU8,
}

impl ServerPool {
    /// Build a pool from explicit entries.
    pub fn new(entries: Vec<ServerEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::config("no servers configured"));
        }
        Ok(Self {
            entries,
            next: AtomicU8::new(0),
        })
    }

    /// Materialize the pool from configuration.
    ///
    /// Single-password shape: every host shares one table, hosts without an
    /// embedded port get `server_port`. Map shape: every key must embed its
    /// port, and tables are deduplicated by password.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut entries = Vec::new();

        match &cfg.server_password {
            Some(map) if !map.is_empty() => {
                let mut tables: HashMap<&str, Arc<EncryptTable>> = HashMap::new();
                for (addr, password) in map {
                    if !has_port(addr) {
                        return Err(Error::config(format!(
                            "no port for server {addr}, specify it as {addr}:port"
                        )));
                    }
                    let table = tables
                        .entry(password.as_str())
                        .or_insert_with(|| Arc::new(EncryptTable::new(password)));
                    entries.push(ServerEntry {
                        addr: addr.clone(),
                        table: Arc::clone(table),
                    });
                }
            }
            _ => {
                let password = match cfg.password.as_deref() {
                    Some(p) if !p.is_empty() => p,
                    _ => return Err(Error::config("must specify password")),
                };
                let table = Arc::new(EncryptTable::new(password));
                for host in cfg.server.as_ref().map(|s| s.to_vec()).unwrap_or_default() {
                    let addr = if has_port(&host) {
                        if cfg.server_port.is_some() {
                            tracing::info!("ignoring server_port option for server {}", host);
                        }
                        host
                    } else {
                        let port = cfg
                            .server_port
                            .ok_or_else(|| Error::config("must specify server_port"))?;
                        format!("{host}:{port}")
                    };
                    entries.push(ServerEntry {
                        addr,
                        table: Arc::clone(&table),
                    });
                }
            }
        }

        let pool = Self::new(entries)?;
        for entry in &pool.entries {
            tracing::info!("available remote server {}", entry.addr);
        }
        Ok(pool)
    }

    /// Number of configured remotes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// A pool is never empty; this exists for the conventional pairing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Open a tunnel for `raw_addr` on some healthy remote.
    ///
    /// A single-entry pool dials it and returns the outcome verbatim. A
    /// larger pool starts at the rotation counter and tries each entry once
    /// in order, settling for the first successful dial.
    pub async fn select(&self, raw_addr: &[u8]) -> Result<CipherStream<TcpStream>> {
        let n = self.entries.len();
        if n == 1 {
            let entry = &self.entries[0];
            return CipherStream::dial(raw_addr, &entry.addr, Arc::clone(&entry.table)).await;
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed) as usize;
        for i in 0..n {
            let entry = &self.entries[(start + i) % n];
            match CipherStream::dial(raw_addr, &entry.addr, Arc::clone(&entry.table)).await {
                Ok(conn) => {
                    tracing::debug!("connected via {}", entry.addr);
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::warn!("error connecting to server {}: {}", entry.addr, e);
                }
            }
        }
        Err(Error::AllServersFailed)
    }
}

/// Serve one SOCKS5 client.
///
/// The success reply goes out before the tunnel dial so the common case
/// saves a round trip; a client whose dial then fails sees a reset on its
/// first write. Every exit path drops (closes) the client transport.
pub async fn handle_client<S>(mut client: S, pool: Arc<ServerPool>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    socks5::handshake(&mut client).await?;
    let raw_addr = socks5::read_request(&mut client).await?;
    client.write_all(&socks5::CONNECT_REPLY).await?;

    let remote = match pool.select(&raw_addr).await {
        Ok(remote) => remote,
        Err(e) => {
            if pool.len() > 1 {
                tracing::warn!("failed to connect to every available server");
            }
            return Err(e);
        }
    };

    relay::relay(client, remote).await;
    Ok(())
}

/// Bind the loopback SOCKS5 listener and serve clients until shutdown.
pub async fn run(cfg: &Config) -> Result<()> {
    let pool = Arc::new(ServerPool::from_config(cfg)?);
    let port = cfg
        .local_port
        .ok_or_else(|| Error::config("must specify local_port"))?;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    tracing::info!("socks5 listening on 127.0.0.1:{}", port);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, pool).await {
                        tracing::debug!("session from {} ended: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("accept error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn table() -> Arc<EncryptTable> {
        Arc::new(EncryptTable::new("foobar!"))
    }

    fn entry(addr: String) -> ServerEntry {
        ServerEntry {
            addr,
            table: table(),
        }
    }

    /// Bind-then-drop yields a loopback port that refuses connections.
    async fn dead_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    /// A listener that counts accepted connections and keeps them open.
    async fn counting_listener() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (conn, _) = match listener.accept().await {
                    Ok(a) => a,
                    Err(_) => break,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(conn);
            }
        });
        (addr, count)
    }

    const RAW_ADDR: [u8; 7] = [0x01, 127, 0, 0, 1, 0x00, 0x50];

    #[test]
    fn test_empty_pool_refused() {
        assert!(matches!(
            ServerPool::new(Vec::new()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_from_config_shares_table_across_hosts() {
        let cfg: Config = serde_json::from_str(
            r#"{"server": ["a.example", "b.example"],
                "server_port": 8388, "password": "pw", "local_port": 1080}"#,
        )
        .unwrap();
        let pool = ServerPool::from_config(&cfg).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(Arc::ptr_eq(&pool.entries[0].table, &pool.entries[1].table));
        assert!(pool.entries.iter().all(|e| e.addr.ends_with(":8388")));
    }

    #[test]
    fn test_from_config_dedupes_tables_by_password() {
        let cfg: Config = serde_json::from_str(
            r#"{"local_port": 1080, "server_password": {
                    "a.example:1": "same", "b.example:2": "same",
                    "c.example:3": "different"}}"#,
        )
        .unwrap();
        let pool = ServerPool::from_config(&cfg).unwrap();
        assert_eq!(pool.len(), 3);

        let same: Vec<_> = pool
            .entries
            .iter()
            .filter(|e| !e.addr.starts_with("c."))
            .collect();
        assert!(Arc::ptr_eq(&same[0].table, &same[1].table));

        let different = pool.entries.iter().find(|e| e.addr.starts_with("c.")).unwrap();
        assert!(!Arc::ptr_eq(&same[0].table, &different.table));
    }

    /// Wait until `count` reaches `expected`; accepts lag the dial slightly.
    async fn wait_for_count(count: &std::sync::atomic::AtomicUsize, expected: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while count.load(Ordering::SeqCst) < expected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener never saw the expected connections");
    }

    #[tokio::test]
    async fn test_failover_skips_dead_server() {
        let dead = dead_addr().await;
        let (alive, count) = counting_listener().await;

        let pool = ServerPool::new(vec![entry(dead), entry(alive)]).unwrap();
        pool.select(&RAW_ADDR).await.unwrap();
        wait_for_count(&count, 1).await;
    }

    #[tokio::test]
    async fn test_all_dead_pool_exhausts() {
        let pool = ServerPool::new(vec![
            entry(dead_addr().await),
            entry(dead_addr().await),
            entry(dead_addr().await),
        ])
        .unwrap();

        let err = pool.select(&RAW_ADDR).await.unwrap_err();
        assert!(matches!(err, Error::AllServersFailed));
    }

    #[tokio::test]
    async fn test_round_robin_spreads_load() {
        let (a, count_a) = counting_listener().await;
        let (b, count_b) = counting_listener().await;

        let pool = ServerPool::new(vec![entry(a), entry(b)]).unwrap();
        let mut conns = Vec::new();
        for _ in 0..6 {
            conns.push(pool.select(&RAW_ADDR).await.unwrap());
        }
        wait_for_count(&count_a, 3).await;
        wait_for_count(&count_b, 3).await;
        assert_eq!(count_a.load(Ordering::SeqCst), 3);
        assert_eq!(count_b.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_single_entry_dial_error_verbatim() {
        let pool = ServerPool::new(vec![entry(dead_addr().await)]).unwrap();
        let err = pool.select(&RAW_ADDR).await.unwrap_err();
        assert!(matches!(err, Error::Dial { .. }));
    }

    #[tokio::test]
    async fn test_handle_client_happy_path() {
        // Tunnel listener standing in for the remote end; it records the
        // encrypted preamble the session sends.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server_addr = listener.local_addr().unwrap().to_string();
        let preamble = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 7];
            conn.read_exact(&mut buf).await.unwrap();
            buf
        });

        let pool = Arc::new(ServerPool::new(vec![entry(server_addr)]).unwrap());
        let (mut client, server_side) = tokio::io::duplex(1024);
        let session = tokio::spawn(handle_client(server_side, pool));

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x00]);

        client
            .write_all(&[0x05, 0x01, 0x00, 0x01, 93, 184, 216, 34, 0x01, 0xBB])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, socks5::CONNECT_REPLY);

        let wire = preamble.await.unwrap();
        let t = table();
        let expected: Vec<u8> = [0x01, 93, 184, 216, 34, 0x01, 0xBB]
            .iter()
            .map(|&b| t.encode_byte(b))
            .collect();
        assert_eq!(wire.to_vec(), expected);

        drop(client);
        let _ = session.await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_client_rejects_bind_silently() {
        let pool = Arc::new(ServerPool::new(vec![entry("127.0.0.1:1".into())]).unwrap());
        let (mut client, server_side) = tokio::io::duplex(1024);
        let session = tokio::spawn(handle_client(server_side, pool));

        client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).await.unwrap();

        // BIND request: the session ends without a request reply.
        client
            .write_all(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1, 0x00, 0x50])
            .await
            .unwrap();
        let err = session.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::UnsupportedCommand));

        let mut buf = [0u8; 1];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }
}
