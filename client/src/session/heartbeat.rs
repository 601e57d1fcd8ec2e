use tokio::time::Instant;

/// Tracks outstanding liveness pings.
///
/// A ping counts as missed when the next ping is due and no pong arrived
/// in between.
#[derive(Debug, Default)]
pub struct Heartbeat {
    missed: u32,
    outstanding: bool,
    sent: u64,
    last_ping: Option<Instant>,
    last_ack: Option<Instant>,
}

impl Heartbeat {
    /// Record a new ping and return the consecutive miss count.
    pub fn ping(&mut self, now: Instant) -> u32 {
        if self.outstanding {
            self.missed += 1;
        }
        self.outstanding = true;
        self.sent += 1;
        self.last_ping = Some(now);
        self.missed
    }

    pub fn acknowledge(&mut self, now: Instant) {
        self.outstanding = false;
        self.missed = 0;
        self.last_ack = Some(now);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Round trip of the last acknowledged ping.
    pub fn round_trip(&self) -> Option<std::time::Duration> {
        match (self.last_ping, self.last_ack) {
            (Some(ping), Some(ack)) if ack >= ping => Some(ack - ping),
            _ => None,
        }
    }
}
