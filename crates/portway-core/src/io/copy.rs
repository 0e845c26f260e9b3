//! Bidirectional byte pump with per-leg fault attribution.
//!
//! Both directions (front→back and back→front) run as independent
//! poll-based state machines inside a single future, so back-pressure on
//! one direction never stalls the other. When a leg faults, the pump stops
//! immediately and reports which leg and which operation failed; the caller
//! owns teardown of the surviving leg.
//!
//! Read-EOF on one leg is a half-close: the peer's write side is shut down
//! once buffered data has been written, while the opposite direction keeps
//! flowing until it also ends.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

/// One side of a relayed connection pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// The inbound (accepted) connection.
    Front,
    /// The outbound (dialed) connection.
    Back,
}

/// The I/O operation that failed on a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOp {
    Read,
    Write,
}

/// A fault on one leg of the pair.
#[derive(Debug)]
pub struct LegFault {
    pub leg: Leg,
    pub op: IoOp,
    pub error: io::Error,
}

/// Why the pump stopped.
#[derive(Debug)]
pub enum CopyEnd {
    /// Both directions reached read-EOF and were shut down.
    Eof,
    /// Neither direction transferred data within the idle timeout.
    Idle,
    /// A leg faulted; the surviving leg must be torn down by the caller.
    Fault(LegFault),
}

/// Result of running the pump to completion.
#[derive(Debug)]
pub struct CopyOutcome {
    /// Bytes moved front→back.
    pub front_to_back: u64,
    /// Bytes moved back→front.
    pub back_to_front: u64,
    pub end: CopyEnd,
}

/// Per-direction copy state: read → write → flush, shutdown on read-EOF.
enum CopyState {
    Reading,
    Writing { pos: usize, len: usize },
    Flushing { len: usize },
    ShuttingDown,
    Done,
}

/// Progress made by one poll of a direction.
enum Progress {
    /// A chunk was written and flushed; carries its byte count.
    Flushed(usize),
    /// The direction finished (read-EOF, peer write side shut down).
    Finished,
}

/// Drive one direction as far as it will go without blocking.
///
/// Errors are attributed to the operation that raised them; shutdown
/// errors are ignored because the peer may already have closed, and a
/// double-close must stay a no-op.
fn poll_direction<R, W>(
    cx: &mut Context<'_>,
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    state: &mut CopyState,
) -> Poll<Result<Progress, (IoOp, io::Error)>>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        match state {
            CopyState::Reading => {
                let mut read_buf = ReadBuf::new(buf);
                match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            *state = CopyState::ShuttingDown;
                        } else {
                            *state = CopyState::Writing { pos: 0, len: n };
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err((IoOp::Read, e))),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Writing { pos, len } => {
                match Pin::new(&mut *writer).poll_write(cx, &buf[*pos..*len]) {
                    Poll::Ready(Ok(n)) => {
                        *pos += n;
                        if *pos >= *len {
                            *state = CopyState::Flushing { len: *len };
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err((IoOp::Write, e))),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::Flushing { len } => {
                let len = *len;
                match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        *state = CopyState::Reading;
                        return Poll::Ready(Ok(Progress::Flushed(len)));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err((IoOp::Write, e))),
                    Poll::Pending => return Poll::Pending,
                }
            }
            CopyState::ShuttingDown => match Pin::new(&mut *writer).poll_shutdown(cx) {
                Poll::Ready(_) => {
                    *state = CopyState::Done;
                    return Poll::Ready(Ok(Progress::Finished));
                }
                Poll::Pending => return Poll::Pending,
            },
            CopyState::Done => return Poll::Ready(Ok(Progress::Finished)),
        }
    }
}

/// Attribute a direction's fault to a leg: reads fault the source leg,
/// writes fault the destination leg.
fn attribute(source: Leg, dest: Leg, op: IoOp, error: io::Error) -> LegFault {
    let leg = match op {
        IoOp::Read => source,
        IoOp::Write => dest,
    };
    LegFault { leg, op, error }
}

/// Copy bytes between `front` and `back` in both directions until both
/// reach read-EOF, a leg faults, or (when set) the idle timeout elapses
/// with no data moving in either direction.
///
/// The pump never writes to a direction whose destination has ended: a
/// direction that saw read-EOF stops reading entirely, so no stray write
/// can race a closed peer. Within each direction, bytes are written in
/// the order they were read.
pub async fn copy_bidirectional<F, B>(
    front: F,
    back: B,
    idle_timeout: Option<Duration>,
    buffer_size: usize,
) -> CopyOutcome
where
    F: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut front_r, mut front_w) = tokio::io::split(front);
    let (mut back_r, mut back_w) = tokio::io::split(back);

    let mut fwd_buf = vec![0u8; buffer_size];
    let mut rev_buf = vec![0u8; buffer_size];
    let mut fwd_state = CopyState::Reading;
    let mut rev_state = CopyState::Reading;

    let mut front_to_back = 0u64;
    let mut back_to_front = 0u64;

    let mut fwd_done = false;
    let mut rev_done = false;

    let idle_sleep = tokio::time::sleep(idle_timeout.unwrap_or_default());
    tokio::pin!(idle_sleep);

    loop {
        if fwd_done && rev_done {
            return CopyOutcome {
                front_to_back,
                back_to_front,
                end: CopyEnd::Eof,
            };
        }

        // Poll both directions under one waker; each registers its own
        // interest, so a blocked write on one side cannot stall the other.
        let both = std::future::poll_fn(|cx| {
            let mut any_ready = false;
            let mut activity = false;
            let mut fault: Option<LegFault> = None;

            if !fwd_done {
                match poll_direction(cx, &mut front_r, &mut back_w, &mut fwd_buf, &mut fwd_state) {
                    Poll::Ready(Ok(Progress::Flushed(n))) => {
                        front_to_back += n as u64;
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(Progress::Finished)) => {
                        fwd_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err((op, e))) => {
                        fault = Some(attribute(Leg::Front, Leg::Back, op, e));
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if !rev_done && fault.is_none() {
                match poll_direction(cx, &mut back_r, &mut front_w, &mut rev_buf, &mut rev_state) {
                    Poll::Ready(Ok(Progress::Flushed(n))) => {
                        back_to_front += n as u64;
                        activity = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(Progress::Finished)) => {
                        rev_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err((op, e))) => {
                        fault = Some(attribute(Leg::Back, Leg::Front, op, e));
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if let Some(f) = fault {
                return Poll::Ready(Err(f));
            }
            if any_ready {
                Poll::Ready(Ok(activity))
            } else {
                Poll::Pending
            }
        });

        tokio::select! {
            result = both => match result {
                Ok(activity) => {
                    if activity {
                        if let Some(t) = idle_timeout {
                            idle_sleep.as_mut().reset(Instant::now() + t);
                        }
                    }
                }
                Err(fault) => {
                    return CopyOutcome {
                        front_to_back,
                        back_to_front,
                        end: CopyEnd::Fault(fault),
                    };
                }
            },
            _ = &mut idle_sleep, if idle_timeout.is_some() => {
                return CopyOutcome {
                    front_to_back,
                    back_to_front,
                    end: CopyEnd::Idle,
                };
            }
        }
    }
}
