//! Host-driven command engine: send a solicit frame, wait for its ack, retry.
//!
//! The engine does no I/O and reads no clock. The host feeds [`Event`]s
//! (carrying the current instant where time matters) and executes the
//! returned [`Effect`]s in order.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::protocol::{Frame, Top};
use crate::wire;

/// Default number of attempts.
pub const DEFAULT_RETRIES: u32 = 5;

/// Default wait for an ack per attempt.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Default pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(300);

/// Retry behaviour for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub retries: u32,
    pub ack_timeout: Duration,
    pub retry_delay: Duration,
    /// Acknowledge solicit frames from other modules while waiting.
    pub auto_ack: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            auto_ack: false,
        }
    }
}

/// Where the command is in its send/ack cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandState {
    Idle,
    /// Command handed to the host for writing; waiting for `Transmitted`.
    Sent { attempt: u32 },
    /// `deadline` is `None` when the ack timeout does not fit in an
    /// `Instant`; such an attempt never times out.
    WaitingAck { attempt: u32, deadline: Option<Instant> },
    Acked { attempts: u32, ack: Frame },
    Exhausted { attempts: u32 },
}

impl CommandState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandState::Acked { .. } | CommandState::Exhausted { .. })
    }
}

/// Input from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Begin the first attempt.
    Start { at: Instant },
    /// The host finished writing the command bytes.
    Transmitted { at: Instant },
    /// A frame was decoded from the link.
    Received(Frame),
    /// Periodic clock check, fed after every read.
    Tick { at: Instant },
}

/// Final result of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Acked { attempts: u32, ack: Frame },
    Exhausted { attempts: u32 },
}

/// Action for the host to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Write the command; reply with [`Event::Transmitted`] once done.
    SendCommand(Vec<u8>),
    /// Write an acknowledgement for another module's frame.
    SendAck(Vec<u8>),
    /// Pause before the next action.
    Wait(Duration),
    Finished(Outcome),
}

/// The outgoing frame with its encoded bytes and retry policy.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    frame: Frame,
    wire: Vec<u8>,
    policy: RetryPolicy,
}

impl PendingCommand {
    pub fn new(frame: Frame, policy: RetryPolicy) -> Self {
        let wire = frame.encode().into_bytes();
        Self {
            frame,
            wire,
            policy,
        }
    }

    /// Pure transition: next state and the effects it requires.
    pub fn transition(&self, state: &CommandState, event: &Event) -> (CommandState, Vec<Effect>) {
        match (state, event) {
            (CommandState::Idle, Event::Start { .. }) => {
                if self.policy.retries == 0 {
                    let outcome = Outcome::Exhausted { attempts: 0 };
                    return (
                        CommandState::Exhausted { attempts: 0 },
                        vec![Effect::Finished(outcome)],
                    );
                }
                (
                    CommandState::Sent { attempt: 1 },
                    vec![Effect::SendCommand(self.wire.clone())],
                )
            }
            (CommandState::Sent { attempt }, Event::Transmitted { at }) => (
                CommandState::WaitingAck {
                    attempt: *attempt,
                    deadline: at.checked_add(self.policy.ack_timeout),
                },
                vec![],
            ),
            (CommandState::WaitingAck { attempt, .. }, Event::Received(frame)) => {
                let mut effects = Vec::new();
                if self.policy.auto_ack && frame.top == Top::Solicit {
                    effects.push(Effect::SendAck(wire::make_ack(frame).encode().into_bytes()));
                }
                if frame.acknowledges(&self.frame) {
                    let outcome = Outcome::Acked {
                        attempts: *attempt,
                        ack: frame.clone(),
                    };
                    effects.push(Effect::Finished(outcome));
                    let next = CommandState::Acked {
                        attempts: *attempt,
                        ack: frame.clone(),
                    };
                    return (next, effects);
                }
                (state.clone(), effects)
            }
            (
                CommandState::WaitingAck {
                    attempt,
                    deadline: Some(deadline),
                },
                Event::Tick { at },
            ) if at >= deadline => {
                if *attempt < self.policy.retries {
                    (
                        CommandState::Sent { attempt: attempt + 1 },
                        vec![
                            Effect::Wait(self.policy.retry_delay),
                            Effect::SendCommand(self.wire.clone()),
                        ],
                    )
                } else {
                    let outcome = Outcome::Exhausted { attempts: *attempt };
                    (
                        CommandState::Exhausted { attempts: *attempt },
                        vec![Effect::Finished(outcome)],
                    )
                }
            }
            _ => (state.clone(), vec![]),
        }
    }
}

/// A [`PendingCommand`] together with its current state.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    command: PendingCommand,
    state: CommandState,
}

impl CommandEngine {
    pub fn new(frame: Frame, policy: RetryPolicy) -> Self {
        Self {
            command: PendingCommand::new(frame, policy),
            state: CommandState::Idle,
        }
    }

    pub fn state(&self) -> &CommandState {
        &self.state
    }

    /// Apply one event and return the effects for the host.
    pub fn handle(&mut self, event: Event) -> Vec<Effect> {
        let (next, effects) = self.command.transition(&self.state, &event);
        match (&self.state, &next) {
            (CommandState::WaitingAck { attempt, .. }, CommandState::Sent { .. }) => {
                debug!(attempt, cmd = %self.command.frame.cmd, "no ack before deadline, retrying");
            }
            (_, CommandState::Exhausted { attempts }) if !self.state.is_terminal() => {
                debug!(attempts, cmd = %self.command.frame.cmd, "retry budget exhausted");
            }
            (_, CommandState::Acked { attempts, .. }) if !self.state.is_terminal() => {
                debug!(attempts, cmd = %self.command.frame.cmd, "command acknowledged");
            }
            _ => {}
        }
        self.state = next;
        effects
    }
}
