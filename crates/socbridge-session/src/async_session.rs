//! Async front end for a [`ControllerSession`].
//!
//! Transactions block until the controller answers, so every call runs on
//! tokio's blocking pool. The session's transaction lock still serializes
//! them; awaiting two calls at once queues the second behind the first.
//!
//! ```ignore
//! let session = AsyncSession::connect(SessionConfig::default()).await?;
//! let plan = session.set_pwm_frequency(0, 50.0).await?;
//! ```

use std::sync::Arc;

use socbridge_frame::Command;
use socbridge_transport::LinkState;
use tokio::task;

use crate::config::SessionConfig;
use crate::engine::Delivery;
use crate::error::{Result, SessionError};
use crate::pwm::Pwm;
use crate::session::ControllerSession;
use crate::synthesis::FrequencyPlan;
use crate::topology::Topology;

/// Cloneable async handle to one controller session.
#[derive(Debug, Clone)]
pub struct AsyncSession {
    inner: Arc<ControllerSession>,
}

impl AsyncSession {
    pub fn new(session: ControllerSession) -> Self {
        Self {
            inner: Arc::new(session),
        }
    }

    pub async fn connect(config: SessionConfig) -> Result<Self> {
        let session = task::spawn_blocking(move || ControllerSession::connect(config))
            .await
            .map_err(|err| SessionError::Worker(err.to_string()))??;
        Ok(Self::new(session))
    }

    /// The blocking session underneath.
    pub fn blocking(&self) -> &Arc<ControllerSession> {
        &self.inner
    }

    pub fn link_state(&self) -> LinkState {
        self.inner.link_state()
    }

    /// Run `f` against the session on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&ControllerSession) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.inner);
        task::spawn_blocking(move || f(&session))
            .await
            .map_err(|err| SessionError::Worker(err.to_string()))?
    }

    pub async fn send(&self, command: Command) -> Result<Delivery> {
        self.run(move |s| s.send(&command)).await
    }

    pub async fn query(&self, command: Command) -> Result<i64> {
        self.run(move |s| s.query(&command)).await
    }

    pub async fn topology(&self) -> Result<Topology> {
        self.inner.topology()
    }

    pub async fn rediscover(&self) -> Result<Topology> {
        self.run(ControllerSession::rediscover).await
    }

    pub async fn reconnect(&self) -> Result<()> {
        self.run(ControllerSession::reconnect).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.run(ControllerSession::disconnect).await
    }

    pub async fn set_pwm_frequency(&self, channel: u8, hz: f64) -> Result<FrequencyPlan> {
        self.run(move |s| Pwm::open(s, channel)?.set_frequency(hz))
            .await
    }
}

#[cfg(test)]
mod tests {
    use socbridge_frame::{ProtocolRevision, STATUS_ACCEPTED};
    use socbridge_transport::mock::{MockController, MockReply};
    use socbridge_transport::{Connection, DEFAULT_RESPONSE_TIMEOUT};

    use super::*;
    use crate::diagnostics::RecordingSink;

    fn session(controller: &MockController) -> AsyncSession {
        let conn = Connection::establish(
            controller.connector(),
            ProtocolRevision::default(),
            DEFAULT_RESPONSE_TIMEOUT,
        )
        .unwrap();
        let config = SessionConfig {
            discover_on_connect: false,
            ..SessionConfig::default()
        };
        AsyncSession::new(
            ControllerSession::from_connection(conn, config, Arc::new(RecordingSink::new()))
                .unwrap(),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_async_calls_are_serialized() {
        let controller = MockController::new(|cmd| match cmd.opcode {
            0x0D => MockReply::Word(u32::from(cmd.register)),
            _ => MockReply::Word(STATUS_ACCEPTED),
        });
        let session = session(&controller);

        let reads: Vec<_> = (0x09u8..0x0D)
            .map(|register| {
                let session = session.clone();
                tokio::spawn(async move { session.query(Command::new(register, 0x0D)).await })
            })
            .collect();
        for (register, handle) in (0x09i64..).zip(reads) {
            assert_eq!(handle.await.unwrap().unwrap(), register);
        }
        assert!(session.send(Command::new(0x09, 0x00)).await.unwrap().is_accepted());
        assert_eq!(controller.frames().len(), 5);
    }

    #[tokio::test]
    async fn topology_requires_discovery() {
        let controller = MockController::accepting();
        let session = session(&controller);
        assert!(session.topology().await.is_err());
        session.disconnect().await.unwrap();
        assert_eq!(session.link_state(), LinkState::Disconnected);
    }
}
