//! Starts both servers over one shared registry and stops them together

use crate::config::ServerConfig;
use crate::control::ControlServer;
use crate::error::ServerError;
use crate::registry::SessionRegistry;
use crate::sync::SyncServer;
use crate::world::WorldMap;
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Resolves once shutdown is signalled or every sender is gone
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Handle to a running session server
pub struct Server {
    registry: Arc<SessionRegistry>,
    world: Arc<WorldMap>,
    control_addr: SocketAddr,
    data_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    control: JoinHandle<Result<(), ServerError>>,
    sync: JoinHandle<Result<(), ServerError>>,
}

impl Server {
    /// Binds both listeners and spawns them; nothing is spawned if either bind fails
    pub async fn start(config: &ServerConfig, world: WorldMap) -> Result<Self, ServerError> {
        let registry = Arc::new(SessionRegistry::with_id_space(
            1..config.auth_id_space,
            config.seed,
        ));
        let world = Arc::new(world);

        let control = ControlServer::bind(
            &config.control_addr(),
            Arc::clone(&registry),
            Arc::clone(&world),
        )
        .await?;
        let sync = SyncServer::bind(
            &config.data_addr(),
            Arc::clone(&registry),
            config.sync_workers,
            config.sync_queue_depth,
        )
        .await?;

        let control_addr = control.local_addr()?;
        let data_addr = sync.local_addr()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let control = tokio::spawn(control.run(shutdown_rx.clone()));
        let sync = tokio::spawn(sync.run(shutdown_rx));

        info!(
            "Session server running: control {}, sync {}, map {}x{}",
            control_addr,
            data_addr,
            world.rows(),
            world.columns()
        );

        Ok(Self {
            registry,
            world,
            control_addr,
            data_addr,
            shutdown,
            control,
            sync,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn world(&self) -> &WorldMap {
        &self.world
    }

    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    pub fn data_addr(&self) -> SocketAddr {
        self.data_addr
    }

    /// Joins refused so far because every session slot was taken
    pub fn rejected_joins(&self) -> u64 {
        self.registry.rejected_joins()
    }

    /// True once either server task has exited on its own
    pub fn is_finished(&self) -> bool {
        self.control.is_finished() || self.sync.is_finished()
    }

    /// Signals shutdown and waits until both servers have stopped and every
    /// session has been evicted
    pub async fn stop(self) -> Result<(), ServerError> {
        info!("Stopping session server");
        // Both servers may already be gone, in which case nobody is listening
        let _ = self.shutdown.send(true);

        let control = flatten(self.control.await);
        let sync = flatten(self.sync.await);

        let evicted = self.registry.deactivate_all();
        if evicted > 0 {
            info!("Evicted {} remaining sessions", evicted);
        }

        for result in [&control, &sync] {
            if let Err(e) = result {
                error!("Server component failed: {}", e);
            }
        }
        info!("Session server stopped");
        control.and(sync)
    }
}

fn flatten(
    joined: Result<Result<(), ServerError>, tokio::task::JoinError>,
) -> Result<(), ServerError> {
    joined?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_shutdown_requested_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { shutdown_requested(&mut rx).await });
        tx.send(true).unwrap();
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_requested_when_sender_dropped() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        timeout(Duration::from_secs(1), shutdown_requested(&mut rx))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_start_on_ephemeral_ports_then_stop() {
        let server = Server::start(&ServerConfig::ephemeral(), WorldMap::default())
            .await
            .unwrap();
        assert_ne!(server.control_addr().port(), 0);
        assert_ne!(server.data_addr().port(), 0);
        assert!(!server.is_finished());
        assert_eq!(server.world().tiles().len(), 576);
        assert_eq!(server.rejected_joins(), 0);

        assert_ok!(timeout(Duration::from_secs(2), server.stop())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let first = Server::start(&ServerConfig::ephemeral(), WorldMap::default())
            .await
            .unwrap();
        let config = ServerConfig {
            control_port: first.control_addr().port(),
            ..ServerConfig::ephemeral()
        };

        assert!(matches!(
            Server::start(&config, WorldMap::default()).await,
            Err(ServerError::Bind { .. })
        ));
        first.stop().await.unwrap();
    }
}
