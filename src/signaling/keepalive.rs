use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Keepalive {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Beat {
    /// Time to send a ping
    Ping,
    /// The last ping was never answered
    Expired,
}

/// Ping schedule and pong deadline for one connection.
pub(crate) struct Heartbeat {
    interval: Interval,
    pong_timeout: Duration,
    pong_deadline: Option<Instant>,
}

impl Heartbeat {
    pub fn new(keepalive: Keepalive) -> Self {
        let mut interval = tokio::time::interval(keepalive.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            pong_timeout: keepalive.pong_timeout,
            pong_deadline: None,
        }
    }

    /// Resolves at the next ping or when the pong deadline passes.
    /// Cancel safe: state only changes once a beat is returned.
    pub async fn next(&mut self) -> Beat {
        let deadline = self.pong_deadline;
        let pong_timeout = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        let ticked = tokio::select! {
            _ = self.interval.tick() => true,
            _ = pong_timeout => false,
        };

        // a tick while still waiting counts as a missed pong
        if !ticked || self.pong_deadline.is_some() {
            return Beat::Expired;
        }
        self.pong_deadline = Some(Instant::now() + self.pong_timeout);
        Beat::Ping
    }

    pub fn pong_received(&mut self) {
        self.pong_deadline = None;
    }
}
