//! Remote end: one listener per password, tunneled sessions, live reload.
//!
//! Every listening port is bound to exactly one password and its table. A
//! session takes an `Arc` snapshot of its port's table at accept time, so a
//! reload can retire or replace a listener without touching sessions already
//! in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::crypto::{EncryptTable, TableCache};
use crate::error::{Error, Result};
use crate::protocol::stream::CipherStream;
use crate::protocol::{relay, Address};

/// A listening port tied to one password.
struct PortBinding {
    password: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Multi-tenant dispatcher: port -> password, one listener each.
pub struct Dispatcher {
    bindings: Mutex<HashMap<u16, PortBinding>>,
    cache: Option<Mutex<TableCache>>,
    idle: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher with an optional idle deadline and table cache.
    pub fn new(idle: Option<Duration>, cache: Option<TableCache>) -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
            cache: cache.map(Mutex::new),
            idle,
        }
    }

    /// Bind and serve every configured port. Bind failures here are fatal.
    pub async fn start(&self, ports: &HashMap<u16, String>) -> Result<()> {
        for (&port, password) in ports {
            self.start_listener(port, password).await?;
        }
        Ok(())
    }

    /// The ports currently being served.
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.bindings.lock().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    fn table_for(&self, password: &str) -> Arc<EncryptTable> {
        match &self.cache {
            Some(cache) => {
                let mut cache = cache.lock();
                let table = cache.get_or_insert(password);
                if let Err(e) = cache.flush() {
                    tracing::warn!("failed to persist table cache: {}", e);
                }
                table
            }
            None => Arc::new(EncryptTable::new(password)),
        }
    }

    async fn start_listener(&self, port: u16, password: &str) -> Result<()> {
        let table = self.table_for(password);
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        tracing::info!("server listening on port {}", port);

        let (shutdown, mut stopped) = watch::channel(false);
        let idle = self.idle;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            let table = Arc::clone(&table);
                            tokio::spawn(async move {
                                if let Err(e) = handle_tunnel(stream, table, idle).await {
                                    tracing::debug!("tunnel session from {} ended: {}", peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::warn!("accept error on port {}: {}", port, e);
                        }
                    }
                }
            }
        });

        self.bindings.lock().insert(
            port,
            PortBinding {
                password: password.to_string(),
                shutdown,
                task,
            },
        );
        Ok(())
    }

    /// Stop accepting on `port` and wait for the listener socket to close.
    ///
    /// Sessions already accepted keep running on their table snapshots.
    async fn stop_listener(&self, port: u16) {
        let binding = self.bindings.lock().remove(&port);
        if let Some(binding) = binding {
            tracing::info!("closing port {}", port);
            let _ = binding.shutdown.send(true);
            let _ = binding.task.await;
        }
    }

    /// Apply a new port -> password map.
    ///
    /// Removed ports stop listening, new ports start, and a changed password
    /// replaces its listener wholesale — the old socket is fully closed
    /// before the new one binds. No in-flight session is terminated.
    pub async fn reload(&self, new_ports: &HashMap<u16, String>) {
        let current: HashMap<u16, String> = self
            .bindings
            .lock()
            .iter()
            .map(|(&port, binding)| (port, binding.password.clone()))
            .collect();
        let (stop, start) = diff_ports(&current, new_ports);

        for port in stop {
            self.stop_listener(port).await;
        }
        for port in start {
            if let Err(e) = self.start_listener(port, &new_ports[&port]).await {
                tracing::error!("failed to listen on port {}: {}", port, e);
            }
        }
    }
}

/// Compute which ports must stop and which must start, sorted.
///
/// A port whose password changed appears in both lists.
fn diff_ports(
    old: &HashMap<u16, String>,
    new: &HashMap<u16, String>,
) -> (Vec<u16>, Vec<u16>) {
    let mut stop = Vec::new();
    let mut start = Vec::new();

    for (port, password) in old {
        match new.get(port) {
            Some(new_password) if new_password == password => {}
            Some(_) => {
                stop.push(*port);
                start.push(*port);
            }
            None => stop.push(*port),
        }
    }
    for port in new.keys() {
        if !old.contains_key(port) {
            start.push(*port);
        }
    }

    stop.sort_unstable();
    start.sort_unstable();
    (stop, start)
}

/// Serve one tunneled session: decode the address, dial, relay.
///
/// No reply is owed to the peer on failure; both ends close on any exit.
/// The idle deadline covers the header read as well as the relay, and in
/// both places it restarts on every successful read.
async fn handle_tunnel(
    stream: TcpStream,
    table: Arc<EncryptTable>,
    idle: Option<Duration>,
) -> Result<()> {
    let mut tunnel = CipherStream::new(stream, table);

    let addr = Address::read_from_with_timeout(&mut tunnel, idle).await?;
    tracing::debug!("connecting to {}", addr);

    let target = TcpStream::connect(addr.to_string())
        .await
        .map_err(|e| Error::dial(addr.to_string(), e))?;

    match idle {
        Some(deadline) => relay::relay_with_timeout(tunnel, target, deadline).await,
        None => relay::relay(tunnel, target).await,
    }
    Ok(())
}
