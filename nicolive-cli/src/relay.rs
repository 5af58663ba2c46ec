//! Per-channel relay loops.
//!
//! Each channel subscribes through its session manager, prints every comment
//! and re-subscribes with backoff once the live session ends.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use nicolive::{ReconnectConfig, SessionManager, SessionRegistry};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::output::OutputManager;

pub struct Relay {
    registry: Arc<SessionRegistry>,
    reconnect: ReconnectConfig,
    output: Arc<OutputManager>,
    stats_interval: Option<Duration>,
}

impl Relay {
    pub fn new(
        registry: Arc<SessionRegistry>,
        reconnect: ReconnectConfig,
        output: OutputManager,
        stats_interval: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            reconnect,
            output: Arc::new(output),
            stats_interval,
        }
    }

    /// Relay every channel of the registry until each loop gives up or the
    /// registry shuts down.
    pub async fn run(&self) {
        let handles: Vec<_> = self
            .registry
            .channel_ids()
            .into_iter()
            .filter_map(|id| self.registry.get(id))
            .map(|session| {
                let channel = ChannelRelay {
                    session,
                    reconnect: self.reconnect,
                    output: self.output.clone(),
                    stats_interval: self.stats_interval,
                };
                let token = self.registry.tasks().child_token();
                self.registry.tasks().spawn(async move {
                    let id = channel.session.channel().id.clone();
                    tokio::select! {
                        _ = token.cancelled() => {}
                        result = channel.run() => {
                            if let Err(e) = result {
                                error!(channel = %id, error = %e, "Relay stopped");
                            }
                        }
                    }
                })
            })
            .collect();

        join_all(handles).await;
    }
}

struct ChannelRelay {
    session: Arc<SessionManager>,
    reconnect: ReconnectConfig,
    output: Arc<OutputManager>,
    stats_interval: Option<Duration>,
}

impl ChannelRelay {
    async fn run(&self) -> Result<()> {
        let id = &self.session.channel().id;
        let mut attempt = 0;

        loop {
            match self.session.subscribe().await {
                Some(mut subscription) => {
                    attempt = 0;
                    info!(channel = %id, url = %subscription.socket().url(), "Relaying comments");

                    let mut ticker = self.stats_interval.map(|period| {
                        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        ticker
                    });

                    loop {
                        tokio::select! {
                            comment = subscription.comments().recv() => match comment {
                                Some(comment) => self.emit(&self.output.format_comment(&comment)?)?,
                                None => break,
                            },
                            _ = tick(&mut ticker) => {
                                let stats = subscription.socket().statistics();
                                self.emit(&self.output.format_statistics(id, &stats)?)?;
                            }
                        }
                    }
                    info!(channel = %id, "Live session ended");
                }
                None => info!(channel = %id, "Channel is not on air"),
            }

            attempt += 1;
            let Some(delay) = self.reconnect.delay(attempt) else {
                warn!(channel = %id, attempts = attempt - 1, "Giving up on channel");
                return Ok(());
            };
            info!(channel = %id, attempt, delay_ms = delay.as_millis() as u64, "Retrying");
            tokio::time::sleep(delay).await;
        }
    }

    fn emit(&self, line: &str) -> Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        Ok(())
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
