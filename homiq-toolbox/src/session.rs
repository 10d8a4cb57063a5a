//! Session loops: one link, one reassembler, one aggregator, driven from a
//! single thread. The link is closed when the session is dropped, on every
//! exit path.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use homiq_core::{
    make_ack, validate, CommandEngine, Diagnostics, Effect, Event, Frame, Outcome, Reassembler,
    RetryPolicy, Top,
};
use tracing::{debug, trace};

use crate::transport::{Transport, TransportError, READ_CHUNK};

/// Granularity at which waits notice a stop request.
const STOP_POLL: Duration = Duration::from_millis(50);

/// Result of one `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    Acked { attempts: u32, ack: Frame },
    Exhausted { attempts: u32 },
    Interrupted { attempts: u32 },
}

/// Options for passive monitoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonitorOptions {
    /// Acknowledge every solicit frame seen.
    pub auto_ack: bool,
    /// Skip checksum validation (every frame counts as valid).
    pub skip_crc: bool,
    /// Stop after this long; `None` runs until interrupted.
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorEnd {
    pub elapsed: Duration,
    pub interrupted: bool,
}

pub struct Session<T: Transport> {
    link: T,
    reassembler: Reassembler,
    diagnostics: Diagnostics,
    stop: Arc<AtomicBool>,
}

impl<T: Transport> Session<T> {
    pub fn new(link: T, reassembler: Reassembler, stop: Arc<AtomicBool>) -> Self {
        Self {
            link,
            reassembler,
            diagnostics: Diagnostics::new(),
            stop,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Bytes the reassembler discarded to stay under its cap.
    pub fn overflowed_bytes(&self) -> u64 {
        self.reassembler.overflowed_bytes()
    }

    /// Sleep for `d` unless a stop request arrives. Returns false if stopped.
    /// A pause too long to represent lasts until the stop request.
    fn pause(&self, d: Duration) -> bool {
        let until = Instant::now().checked_add(d);
        loop {
            if self.stopped() {
                return false;
            }
            let left = match until {
                Some(until) => until.saturating_duration_since(Instant::now()),
                None => STOP_POLL,
            };
            if left.is_zero() {
                return true;
            }
            std::thread::sleep(left.min(STOP_POLL));
        }
    }

    /// Send `frame` and wait for its acknowledgement, retrying per `policy`.
    pub fn send(
        &mut self,
        frame: Frame,
        policy: RetryPolicy,
    ) -> Result<SendResult, TransportError> {
        let mut engine = CommandEngine::new(frame, policy);
        let mut queue: VecDeque<Effect> = engine.handle(Event::Start { at: Instant::now() }).into();
        let mut attempts = 0u32;
        loop {
            while let Some(effect) = queue.pop_front() {
                match effect {
                    Effect::SendCommand(bytes) => {
                        self.link.write(&bytes)?;
                        attempts += 1;
                        debug!(attempt = attempts, "command sent");
                        queue.extend(engine.handle(Event::Transmitted { at: Instant::now() }));
                    }
                    Effect::SendAck(bytes) => self.link.write(&bytes)?,
                    Effect::Wait(d) => {
                        if !self.pause(d) {
                            return Ok(SendResult::Interrupted { attempts });
                        }
                    }
                    Effect::Finished(Outcome::Acked { attempts, ack }) => {
                        return Ok(SendResult::Acked { attempts, ack });
                    }
                    Effect::Finished(Outcome::Exhausted { attempts }) => {
                        return Ok(SendResult::Exhausted { attempts });
                    }
                }
            }
            if self.stopped() {
                return Ok(SendResult::Interrupted { attempts });
            }
            let chunk = self.link.read(READ_CHUNK)?;
            for frame in self.reassembler.push(&chunk) {
                trace!(?frame, "rx");
                queue.extend(engine.handle(Event::Received(frame)));
            }
            queue.extend(engine.handle(Event::Tick { at: Instant::now() }));
        }
    }

    /// Observe the bus, recording every frame and handing it to `on_frame`
    /// together with its checksum verdict.
    pub fn monitor(
        &mut self,
        opts: MonitorOptions,
        mut on_frame: impl FnMut(&Frame, bool),
    ) -> Result<MonitorEnd, TransportError> {
        let started = Instant::now();
        loop {
            if self.stopped() {
                return Ok(MonitorEnd {
                    elapsed: started.elapsed(),
                    interrupted: true,
                });
            }
            if opts.duration.is_some_and(|d| started.elapsed() >= d) {
                return Ok(MonitorEnd {
                    elapsed: started.elapsed(),
                    interrupted: false,
                });
            }
            let chunk = self.link.read(READ_CHUNK)?;
            if chunk.is_empty() {
                continue;
            }
            for frame in self.reassembler.push(&chunk) {
                let crc_ok = opts.skip_crc || validate(&frame);
                self.diagnostics.record(&frame, crc_ok);
                if opts.auto_ack && frame.top == Top::Solicit {
                    self.link.write(make_ack(&frame).encode().as_bytes())?;
                }
                on_frame(&frame, crc_ok);
            }
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.link.close();
    }
}
