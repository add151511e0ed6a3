//! Test and helper mocks for runrilla_core

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use runrilla_traits::{Bus, BusError};

/// Shared record of every frame written to a [`MockBus`].
#[derive(Debug, Clone, Default)]
pub struct WriteLog(Arc<Mutex<Vec<Vec<u8>>>>);

impl WriteLog {
    pub fn entries(&self) -> Vec<Vec<u8>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Written frames as lossy strings, CR stripped.
    pub fn lines(&self) -> Vec<String> {
        self.entries()
            .iter()
            .map(|e| String::from_utf8_lossy(e).trim_end_matches('\r').to_string())
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&str) -> bool) -> usize {
        self.lines().iter().filter(|l| pred(l)).count()
    }

    fn push(&self, bytes: &[u8]) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(bytes.to_vec());
    }
}

type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// A bus whose replies come from a closure over the written frame.
///
/// Reads never wait: whatever the responder produced is returned, then
/// silence (`Ok(0)`).
pub struct MockBus {
    responder: Responder,
    rx: VecDeque<u8>,
    log: WriteLog,
}

impl MockBus {
    pub fn new(responder: impl FnMut(&[u8]) -> Vec<u8> + Send + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            rx: VecDeque::new(),
            log: WriteLog::default(),
        }
    }

    /// A bus on which nothing ever answers.
    pub fn silent() -> Self {
        Self::new(|_| Vec::new())
    }

    pub fn log(&self) -> WriteLog {
        self.log.clone()
    }
}

impl Bus for MockBus {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        self.log.push(bytes);
        let reply = (self.responder)(bytes);
        self.rx.extend(reply);
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, BusError> {
        let n = buf.len().min(self.rx.len());
        for (dst, src) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> Result<(), BusError> {
        self.rx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}
