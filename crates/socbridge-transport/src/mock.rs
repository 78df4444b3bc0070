//! In-memory controller for tests.
//!
//! A [`MockController`] answers each command through a responder closure and
//! records every frame it sees. Its [`MockConnector`] can be handed to a
//! `Connection` in place of a real transport.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use socbridge_frame::{decode_command, Command, RawFrame, STATUS_ACCEPTED};

use crate::error::{LinkError, Result};
use crate::traits::{Connector, Link, PortHandle};

/// What the simulated controller does with one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockReply {
    /// Answer with this raw word.
    Word(u32),
    /// Never answer; reads time out immediately.
    Silence,
    /// Flag the frame as bad.
    Reject,
    /// Fail as if the device was unplugged.
    Lost,
}

type Responder = Box<dyn FnMut(Command) -> MockReply + Send>;

struct MockState {
    responder: Responder,
    frames: Vec<RawFrame>,
    pending: Option<MockReply>,
    present: bool,
    discovers: usize,
    opens: usize,
}

/// Shared handle to a simulated controller.
#[derive(Clone)]
pub struct MockController {
    inner: Arc<Mutex<MockState>>,
}

impl MockController {
    pub fn new(responder: impl FnMut(Command) -> MockReply + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState {
                responder: Box::new(responder),
                frames: Vec::new(),
                pending: None,
                present: true,
                discovers: 0,
                opens: 0,
            })),
        }
    }

    /// A controller that accepts everything.
    pub fn accepting() -> Self {
        Self::new(|_| MockReply::Word(STATUS_ACCEPTED))
    }

    pub fn connector(&self) -> MockConnector {
        MockConnector {
            controller: self.clone(),
        }
    }

    /// Swap the responder, keeping recorded frames.
    pub fn set_responder(&self, responder: impl FnMut(Command) -> MockReply + Send + 'static) {
        self.state().responder = Box::new(responder);
    }

    /// Plug or unplug the device.
    pub fn set_present(&self, present: bool) {
        self.state().present = present;
    }

    /// Every frame written so far.
    pub fn frames(&self) -> Vec<RawFrame> {
        self.state().frames.clone()
    }

    /// Every command written so far.
    pub fn commands(&self) -> Vec<Command> {
        self.state()
            .frames
            .iter()
            .filter_map(|frame| decode_command(frame).ok())
            .collect()
    }

    pub fn clear_frames(&self) {
        self.state().frames.clear();
    }

    pub fn discover_count(&self) -> usize {
        self.state().discovers
    }

    pub fn open_count(&self) -> usize {
        self.state().opens
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not poison the other assertions.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Connector that finds the mock controller while it is present.
#[derive(Clone)]
pub struct MockConnector {
    controller: MockController,
}

impl Connector for MockConnector {
    fn discover(&self) -> Option<PortHandle> {
        let mut state = self.controller.state();
        state.discovers += 1;
        state
            .present
            .then(|| PortHandle::new("mock://controller").with_description("simulated controller"))
    }

    fn open(&self, handle: &PortHandle) -> Result<Box<dyn Link>> {
        let mut state = self.controller.state();
        if !state.present {
            return Err(LinkError::Open {
                path: handle.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "device unplugged"),
            });
        }
        state.opens += 1;
        Ok(Box::new(MockLink {
            controller: self.controller.clone(),
        }))
    }
}

/// Link end of a [`MockController`].
pub struct MockLink {
    controller: MockController,
}

impl Link for MockLink {
    fn write_frame(&mut self, frame: &RawFrame) -> Result<()> {
        let mut state = self.controller.state();
        if !state.present {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            )));
        }
        state.frames.push(*frame);
        let command = decode_command(frame).map_err(|err| LinkError::Lost(err.to_string()))?;
        let reply = (state.responder)(command);
        state.pending = Some(reply);
        Ok(())
    }

    fn read_response(&mut self, timeout: Duration) -> Result<RawFrame> {
        match self.controller.state().pending.take() {
            Some(MockReply::Word(word)) => Ok(word.to_le_bytes()),
            Some(MockReply::Reject) => Err(LinkError::Rejected),
            Some(MockReply::Lost) => Err(LinkError::Lost("simulated unplug".to_string())),
            Some(MockReply::Silence) | None => Err(LinkError::Timeout(timeout)),
        }
    }

    fn discard_input(&mut self) -> Result<()> {
        self.controller.state().pending = None;
        Ok(())
    }

    fn transport_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_frames_and_answers() {
        let controller = MockController::new(|cmd| MockReply::Word(u32::from(cmd.payload) * 2));
        let connector = controller.connector();
        let handle = connector.discover().expect("mock should be present");
        let mut link = connector.open(&handle).expect("mock should open");

        link.write_frame(&[0x16, 0x00, 0x15, 0x00]).unwrap();
        assert_eq!(
            link.read_response(Duration::from_millis(1)).unwrap(),
            42u32.to_le_bytes()
        );
        assert_eq!(controller.commands()[0].payload, 0x15);
        assert!(link.read_response(Duration::from_millis(1)).unwrap_err().is_timeout());
    }

    #[test]
    fn unplugged_controller_is_not_found() {
        let controller = MockController::accepting();
        controller.set_present(false);
        assert!(controller.connector().discover().is_none());
        assert_eq!(controller.discover_count(), 1);
    }
}
