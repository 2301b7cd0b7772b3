//! Per-call stream state.
//!
//! A [`StreamSession`] exists for every non-unary call. It is owned by exactly
//! one task (the handler's loop, or the inbound loop of a duplex call) and is
//! never shared: the accumulator has a single writer, and duplex calls hand
//! values to their outbound loop by message passing.

use quartet_core::{Error, Result};

/// State of one direction of a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectionState {
    /// Messages may still flow.
    Open,
    /// The sending side announced it is done; no further messages.
    HalfClosed,
    /// The call reached a terminal status.
    Closed,
}

/// Accumulator of a client-streaming call: absorbs every inbound value and is
/// turned into the single response once the caller half-closes.
pub trait Fold: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// # Errors
    ///
    /// Domain rejection of `input`; terminates the call.
    fn absorb(&mut self, input: Self::Input) -> Result<()>;

    /// # Errors
    ///
    /// The accumulated state has no defined result.
    fn finish(self) -> Result<Self::Output>;
}

/// Accumulator of a duplex call: updated by every inbound value, optionally
/// yielding a value for the outbound direction.
pub trait Scan: Send + 'static {
    type Input: Send + 'static;
    type Emit: Send + 'static;

    /// # Errors
    ///
    /// Domain rejection of `input`; terminates the call.
    fn absorb(&mut self, input: Self::Input) -> Result<Option<Self::Emit>>;
}

#[derive(Debug)]
pub struct StreamSession<A> {
    recv: DirectionState,
    send: DirectionState,
    received: u64,
    emitted: u64,
    accumulator: A,
}

impl<A> StreamSession<A> {
    pub const fn new(accumulator: A) -> Self {
        Self {
            recv: DirectionState::Open,
            send: DirectionState::Open,
            received: 0,
            emitted: 0,
            accumulator,
        }
    }

    pub const fn recv_state(&self) -> DirectionState {
        self.recv
    }

    pub const fn send_state(&self) -> DirectionState {
        self.send
    }

    pub const fn received(&self) -> u64 {
        self.received
    }

    pub const fn emitted(&self) -> u64 {
        self.emitted
    }

    pub const fn accumulator(&self) -> &A {
        &self.accumulator
    }

    /// The caller will send nothing more.
    pub fn half_close_recv(&mut self) {
        if self.recv == DirectionState::Open {
            self.recv = DirectionState::HalfClosed;
        }
    }

    /// This side will send nothing more.
    pub fn half_close_send(&mut self) {
        if self.send == DirectionState::Open {
            self.send = DirectionState::HalfClosed;
        }
    }

    /// Records one message handed to the outbound direction.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] if the send direction is no longer open.
    pub fn record_emitted(&mut self) -> Result<()> {
        if self.send != DirectionState::Open {
            return Err(Error::internal(format!(
                "Emit on a {:?} send direction",
                self.send
            )));
        }
        self.emitted += 1;
        Ok(())
    }

    /// Terminal status produced; both directions are done.
    pub fn close(&mut self) {
        self.recv = DirectionState::Closed;
        self.send = DirectionState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.recv == DirectionState::Closed && self.send == DirectionState::Closed
    }

    fn record_received(&mut self) -> Result<()> {
        if self.recv != DirectionState::Open {
            return Err(Error::internal(format!(
                "Message received on a {:?} receive direction",
                self.recv
            )));
        }
        self.received += 1;
        Ok(())
    }
}

impl<A: Fold> StreamSession<A> {
    /// Feeds one inbound value into the accumulator.
    ///
    /// # Errors
    ///
    /// The receive direction is not open, or the accumulator rejected the
    /// value.
    pub fn absorb(&mut self, input: A::Input) -> Result<()> {
        self.record_received()?;
        self.accumulator.absorb(input)
    }

    /// Finalizes the accumulator into the call's single response.
    ///
    /// # Errors
    ///
    /// The caller has not half-closed yet, or the accumulator has no defined
    /// result.
    pub fn finish(mut self) -> Result<A::Output> {
        if self.recv != DirectionState::HalfClosed {
            return Err(Error::internal("Finalized before the caller half-closed"));
        }
        self.close();
        self.accumulator.finish()
    }
}

impl<A: Scan> StreamSession<A> {
    /// Feeds one inbound value into the accumulator and returns what, if
    /// anything, must be sent in response.
    ///
    /// # Errors
    ///
    /// The receive direction is not open, or the accumulator rejected the
    /// value.
    pub fn step(&mut self, input: A::Input) -> Result<Option<A::Emit>> {
        self.record_received()?;
        let emit = self.accumulator.absorb(input)?;
        if emit.is_some() {
            self.record_emitted()?;
        }
        Ok(emit)
    }
}
