//! Internal signal channel: process events reduced to single bytes on a
//! Unix socket pair that the reactor polls like any other socket.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use mio::net::UnixStream;
use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};

/// Events delivered to the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Run a timer sweep after the current batch.
    Tick,
    /// Stop the event loop.
    Shutdown,
}

impl Signal {
    fn to_byte(self) -> u8 {
        match self {
            Self::Tick => b't',
            Self::Shutdown => b'q',
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b't' => Some(Self::Tick),
            b'q' => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// Creates a connected sender and receiver.
pub fn channel() -> io::Result<(SignalSender, SignalChannel)> {
    let (sender, receiver) = StdUnixStream::pair()?;
    sender.set_nonblocking(true)?;
    receiver.set_nonblocking(true)?;
    Ok((
        SignalSender {
            stream: Arc::new(sender),
        },
        SignalChannel {
            receiver: UnixStream::from_std(receiver),
        },
    ))
}

/// Writing end of the signal channel. Cheap to clone and safe to use from
/// any thread.
#[derive(Debug, Clone)]
pub struct SignalSender {
    stream: Arc<StdUnixStream>,
}

impl SignalSender {
    /// Queues `signal` for the reactor without blocking.
    pub fn send(&self, signal: Signal) -> io::Result<()> {
        let written = (&*self.stream).write(&[signal.to_byte()])?;
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        Ok(())
    }
}

/// Reading end of the signal channel, registered with the reactor's poll.
#[derive(Debug)]
pub struct SignalChannel {
    receiver: UnixStream,
}

impl SignalChannel {
    pub fn source(&mut self) -> &mut UnixStream {
        &mut self.receiver
    }

    /// Reads every queued signal.
    pub fn drain(&mut self) -> io::Result<Vec<Signal>> {
        let mut signals = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            match self.receiver.read(&mut buf) {
                Ok(0) => return Ok(signals),
                Ok(n) => {
                    for &byte in &buf[..n] {
                        match Signal::from_byte(byte) {
                            Some(signal) => signals.push(signal),
                            None => warn!(byte, "unknown signal byte"),
                        }
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(signals),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

/// Handle for stopping a running server from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    sender: SignalSender,
}

impl ShutdownHandle {
    pub(crate) fn new(sender: SignalSender) -> Self {
        Self { sender }
    }

    /// Asks the event loop to stop after its current batch.
    pub fn shutdown(&self) {
        if let Err(e) = self.sender.send(Signal::Shutdown) {
            warn!(error = %e, "failed to deliver shutdown signal");
        }
    }
}

/// Thread that sends [`Signal::Tick`] at a fixed interval until stopped.
#[derive(Debug)]
pub struct Ticker {
    stop: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl Ticker {
    pub fn spawn(interval: Duration, sender: SignalSender) -> ServerResult<Self> {
        let (stop, stopped) = mpsc::channel::<()>();
        let name = "ember-ticker".to_string();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                // Any message or a dropped sender ends the loop.
                while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                    if let Err(e) = sender.send(Signal::Tick) {
                        debug!(error = %e, "tick dropped");
                    }
                }
            })
            .map_err(|source| ServerError::ThreadSpawn { name, source })?;
        Ok(Self { stop, handle })
    }

    pub fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            warn!("ticker thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn signals_arrive_in_order() {
        let (sender, mut channel) = channel().unwrap();
        sender.send(Signal::Tick).unwrap();
        sender.clone().send(Signal::Shutdown).unwrap();
        sender.send(Signal::Tick).unwrap();

        assert_eq!(
            channel.drain().unwrap(),
            vec![Signal::Tick, Signal::Shutdown, Signal::Tick]
        );
        assert!(channel.drain().unwrap().is_empty());
    }

    #[test]
    fn shutdown_handle_sends_shutdown() {
        let (sender, mut channel) = channel().unwrap();
        ShutdownHandle::new(sender).shutdown();
        assert_eq!(channel.drain().unwrap(), vec![Signal::Shutdown]);
    }

    #[test]
    fn ticker_ticks_until_stopped() {
        let (sender, mut channel) = channel().unwrap();
        let ticker = Ticker::spawn(Duration::from_millis(5), sender).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut ticks = 0;
        while ticks < 2 && Instant::now() < deadline {
            ticks += channel.drain().unwrap().len();
            std::thread::sleep(Duration::from_millis(5));
        }
        ticker.stop();
        assert!(ticks >= 2);
    }
}
