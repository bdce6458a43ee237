//! Scripted in-memory device for testing drivers without hardware.
//!
//! It provides:
//! - A log of every command written, in order
//! - Queued responses handed out FIFO by `receive_output`
//! - Controllable failure injection
//!
//! Clones share state, so a test can keep one handle while the driver owns
//! the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::common::DeviceInterface;
use crate::error::{InstrumentError, InstrumentResult};

/// Mock transport
///
/// # Example
///
/// ```
/// use instrumentrs::common::{DeviceInterface, MockDevice};
///
/// # tokio_test::block_on(async {
/// let mock = MockDevice::new().with_response("1\n");
/// let mut device = mock.clone();
/// device.send_command(b"OP1?\n").await.unwrap();
/// assert_eq!(device.receive_output(1).await.unwrap(), b"1\n");
/// assert_eq!(mock.sent_commands(), vec!["OP1?\n"]);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    sent: Vec<Vec<u8>>,
    responses: VecDeque<Vec<u8>>,
    fail_next: bool,
}

impl MockDevice {
    /// Empty log, no queued responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response (builder form).
    pub fn with_response(self, response: impl Into<Vec<u8>>) -> Self {
        self.push_response(response);
        self
    }

    /// Queue a response for a later `receive_output`.
    pub fn push_response(&self, response: impl Into<Vec<u8>>) {
        self.lock().responses.push_back(response.into());
    }

    /// Make the next send or receive fail with an I/O error.
    pub fn inject_next_failure(&self) {
        self.lock().fail_next = true;
    }

    /// Every command written so far, decoded lossily.
    pub fn sent_commands(&self) -> Vec<String> {
        self.lock()
            .sent
            .iter()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .collect()
    }

    /// Every command written so far, as raw bytes.
    pub fn sent_bytes(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Most recent command, decoded lossily.
    pub fn last_command(&self) -> Option<String> {
        self.lock()
            .sent
            .last()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Queued responses not handed out yet.
    pub fn pending_responses(&self) -> usize {
        self.lock().responses.len()
    }

    /// Forget the commands written so far.
    pub fn clear_log(&self) {
        self.lock().sent.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_failure(&self) -> InstrumentResult<()> {
        let mut state = self.lock();
        if std::mem::take(&mut state.fail_next) {
            return Err(InstrumentError::Io(std::io::Error::other("Injected failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceInterface for MockDevice {
    async fn send_command(&mut self, data: &[u8]) -> InstrumentResult<usize> {
        self.check_failure()?;
        self.lock().sent.push(data.to_vec());
        Ok(data.len())
    }

    async fn receive_output(&mut self, _length: usize) -> InstrumentResult<Vec<u8>> {
        self.check_failure()?;
        self.lock()
            .responses
            .pop_front()
            .ok_or(InstrumentError::Timeout(Duration::ZERO))
    }
}
