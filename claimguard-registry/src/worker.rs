//! Background work that must not block the mutation thread.
//!
//! Tasks never touch claim state. Their results come back as
//! [`RegistryMessage`]s, drained by the manager on the mutation thread.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use claimguard_model::{PlayerId, PlayerOptions};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::sync::Semaphore;

use crate::hooks::OptionResolver;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryMessage {
    OptionsUpdated {
        player: PlayerId,
        options: PlayerOptions,
    },
}

pub struct BackgroundPool {
    rt: Runtime,
    limiter: Arc<Semaphore>,
    tx: UnboundedSender<RegistryMessage>,
    rx: UnboundedReceiver<RegistryMessage>,
}

impl BackgroundPool {
    pub fn new(worker_threads: usize, max_tasks: usize) -> Result<Self> {
        let rt = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("claimguard-worker")
            .enable_time()
            .build()
            .context("Failed to start background runtime")?;
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Self {
            rt,
            // Limit concurrent resolver calls
            limiter: Arc::new(Semaphore::new(max_tasks.max(1))),
            tx,
            rx,
        })
    }

    /// Resolve a player's options in the background and post the result.
    pub fn refresh_options(&self, player: PlayerId, resolver: Arc<dyn OptionResolver>) {
        let limiter = self.limiter.clone();
        let tx = self.tx.clone();
        self.rt.spawn(async move {
            let _permit = match limiter.acquire().await {
                Ok(p) => p,
                Err(_) => return,
            };
            let resolved = tokio::task::spawn_blocking(move || resolver.resolve(player)).await;
            match resolved {
                Ok(options) => {
                    // The receiver only goes away with the pool itself.
                    let _ = tx.send(RegistryMessage::OptionsUpdated { player, options });
                }
                Err(e) => log::error!("Worker: Option refresh for {} failed: {}", player, e),
            }
        });
    }

    /// Everything posted so far, without waiting.
    pub fn drain(&mut self) -> Vec<RegistryMessage> {
        let mut messages = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        messages
    }

    /// Wait up to `timeout` for the next message.
    pub fn wait_for_message(&mut self, timeout: Duration) -> Option<RegistryMessage> {
        let rx = &mut self.rx;
        self.rt
            .block_on(async { tokio::time::timeout(timeout, rx.recv()).await.ok().flatten() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(i64);

    impl OptionResolver for Fixed {
        fn resolve(&self, _: PlayerId) -> PlayerOptions {
            PlayerOptions {
                initial_blocks: Some(self.0),
                max_accrued_blocks: None,
            }
        }
    }

    #[test]
    fn test_refresh_posts_message() {
        let mut pool = BackgroundPool::new(1, 1).unwrap();
        let player = PlayerId::from_u128(1);
        pool.refresh_options(player, Arc::new(Fixed(500)));

        let message = pool.wait_for_message(Duration::from_secs(5)).expect("message");
        assert_eq!(
            message,
            RegistryMessage::OptionsUpdated {
                player,
                options: PlayerOptions {
                    initial_blocks: Some(500),
                    max_accrued_blocks: None,
                },
            }
        );
        assert!(pool.drain().is_empty());
    }
}
