//! A simulated controller board for session tests.
//!
//! Answers discovery with a fixed inventory, keeps per-channel PWM period and
//! compare, shared clock dividers and pin levels, and records whether any
//! write ever left compare above period.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use socbridge_frame::{Command, ProtocolRevision, STATUS_ACCEPTED, STATUS_BAD_PARAMETER};
use socbridge_session::{ControllerSession, RecordingSink, SessionConfig};
use socbridge_transport::mock::{MockController, MockReply};
use socbridge_transport::{Connection, ReconnectPolicy, DEFAULT_RESPONSE_TIMEOUT};

/// Four PWM channels: 0 and 1 on PLL clock 1 (16-bit), 2 on ILO clock 2
/// (8-bit), 3 on clock 3 whose source code the host does not know.
pub const CLOCK_RECORDS: [u32; 3] = [
    (1 << 19) | (4 << 16) | 1,
    (2 << 19) | (3 << 16) | 1,
    (3 << 19) | (6 << 16) | 1,
];

pub const PWM_TABLE: u32 = 0x11 | (0x11 << 5) | (0x02 << 10) | (0x13 << 15);

/// Port 2 pins 0..3, port 12 pin 1.
pub const GPIO_A: u32 = 0x0F << 8;
pub const GPIO_C: u32 = 0x02;

#[derive(Debug, Default)]
pub struct BoardState {
    pub counters: BTreeMap<u8, (u32, u32)>,
    pub dividers: BTreeMap<u8, u32>,
    pub levels: BTreeMap<(u8, u8), bool>,
    pub invariant_broken: bool,
    pub resets: usize,
}

/// How the board answers a clock divider write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DividerReply {
    /// Apply the requested divider.
    Echo,
    /// Answer bad-parameter and keep the old divider.
    Reject,
    /// Apply this divider whatever was asked.
    Force(u32),
}

#[derive(Clone)]
pub struct SimBoard {
    state: Arc<Mutex<BoardState>>,
    divider_reply: DividerReply,
}

impl SimBoard {
    pub fn new() -> Self {
        let mut state = BoardState::default();
        state.counters.insert(0, (1_000, 500));
        state.counters.insert(1, (1_000, 800));
        state.counters.insert(2, (200, 100));
        state.counters.insert(3, (100, 10));
        state.dividers.insert(1, 1);
        state.dividers.insert(2, 1);
        state.dividers.insert(3, 1);
        Self {
            state: Arc::new(Mutex::new(state)),
            divider_reply: DividerReply::Echo,
        }
    }

    pub fn with_divider_reply(mut self, reply: DividerReply) -> Self {
        self.divider_reply = reply;
        self
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, BoardState> {
        self.state.lock().expect("board state lock")
    }

    pub fn controller(&self) -> MockController {
        let board = self.clone();
        MockController::new(move |cmd| board.respond(cmd))
    }

    fn clock_of(channel: u8) -> u8 {
        match channel {
            0 | 1 => 1,
            2 => 2,
            _ => 3,
        }
    }

    fn respond(&self, cmd: Command) -> MockReply {
        let mut state = self.state();
        let word = match cmd.register {
            0xFE => match cmd.opcode {
                0x00 => 0x01 | (6 << 8) | (2 << 14),
                0x01 => (4 << 4) | 3,
                0x02 => GPIO_A,
                0x03 => 0,
                0x04 => GPIO_C,
                0x07 => CLOCK_RECORDS
                    .get(usize::from(cmd.payload))
                    .copied()
                    .unwrap_or(STATUS_BAD_PARAMETER),
                0x08 if cmd.payload == 0 => PWM_TABLE,
                0x09 => 0x0103,
                _ => STATUS_BAD_PARAMETER,
            },
            0xFF => {
                state.resets += 1;
                return MockReply::Silence;
            }
            0x09..=0x0C => {
                let channel = cmd.register - 0x09;
                let (period, compare) = state.counters.get(&channel).copied().unwrap_or_default();
                match cmd.opcode {
                    0x00 | 0x01 | 0x18 | 0x19 | 0x1A => STATUS_ACCEPTED,
                    0x0C => {
                        state.counters.insert(channel, (u32::from(cmd.payload), compare));
                        state.invariant_broken |= compare > u32::from(cmd.payload);
                        STATUS_ACCEPTED
                    }
                    0x0D => period,
                    0x0E => {
                        state.counters.insert(channel, (period, u32::from(cmd.payload)));
                        state.invariant_broken |= u32::from(cmd.payload) > period;
                        STATUS_ACCEPTED
                    }
                    0x0F => compare,
                    0xFF => {
                        let divider = match self.divider_reply {
                            DividerReply::Echo => u32::from(cmd.payload).max(1),
                            DividerReply::Reject => return MockReply::Word(STATUS_BAD_PARAMETER),
                            DividerReply::Force(divider) => divider,
                        };
                        state.dividers.insert(Self::clock_of(channel), divider);
                        divider - 1
                    }
                    _ => STATUS_BAD_PARAMETER,
                }
            }
            0x16 => {
                let port = ((cmd.payload >> 4) & 0x0F) as u8;
                let pin = ((cmd.payload >> 1) & 0x07) as u8;
                match cmd.opcode {
                    0x00 => u32::from(state.levels.get(&(port, pin)).copied().unwrap_or(false)),
                    0x01 => {
                        state.levels.insert((port, pin), cmd.payload & 1 == 1);
                        STATUS_ACCEPTED
                    }
                    0x02 => {
                        let level = state.levels.entry((port, pin)).or_insert(false);
                        *level = !*level;
                        STATUS_ACCEPTED
                    }
                    0x03 => STATUS_ACCEPTED,
                    0x04 => {
                        // Bitmap order: P2[0..3], P12[1].
                        let order = [(2, 0), (2, 1), (2, 2), (2, 3), (12, 1)];
                        order.iter().enumerate().fold(0u32, |acc, (bit, key)| {
                            if state.levels.get(key).copied().unwrap_or(false) {
                                acc | (1 << bit)
                            } else {
                                acc
                            }
                        })
                    }
                    0x05 => (0..8u8).fold(0u32, |acc, pin| {
                        if state.levels.get(&(port, pin)).copied().unwrap_or(false) {
                            acc | (1 << pin)
                        } else {
                            acc
                        }
                    }),
                    _ => STATUS_BAD_PARAMETER,
                }
            }
            _ => STATUS_BAD_PARAMETER,
        };
        MockReply::Word(word)
    }
}

pub fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts: 3,
        initial_backoff_ms: 1,
        multiplier: 2,
        max_backoff_ms: 4,
    }
}

/// Connect a session to a fresh simulated board and run discovery.
pub fn connect(board: &SimBoard) -> (MockController, ControllerSession, Arc<RecordingSink>) {
    let controller = board.controller();
    let sink = Arc::new(RecordingSink::new());
    let conn = Connection::establish(
        controller.connector(),
        ProtocolRevision::default(),
        DEFAULT_RESPONSE_TIMEOUT,
    )
    .expect("simulated board should connect");
    let config = SessionConfig {
        reconnect: fast_reconnect(),
        ..SessionConfig::default()
    };
    let session = ControllerSession::from_connection(conn, config, sink.clone())
        .expect("discovery against simulated board should succeed");
    controller.clear_frames();
    (controller, session, sink)
}
