//! Forward-only cursors over timestamp ordered sensor streams.
//!
//! Every sensor stream of the rig (IMU poses, surveyed poses, LiDAR points, video frames) is read
//! through the same [`StreamCursor`]. Format specific readers in [`crate::io`] only have to turn
//! their records into something [`Timestamped`].

use std::iter::Peekable;

use crate::Error;

/// Anything carrying an acquisition time.
pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

/// A payload tagged with the time it was acquired.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub timestamp: f64,
    pub payload: T,
}

impl<T> Stamped<T> {
    pub fn new(timestamp: f64, payload: T) -> Self {
        Stamped { timestamp, payload }
    }
}

impl<T> Timestamped for Stamped<T> {
    fn timestamp(&self) -> f64 {
        self.timestamp
    }
}

/// Read-once cursor over a stream whose timestamps must never decrease.
///
/// The cursor never seeks backwards. Elements are checked for ordering when they are consumed: an
/// element older than its predecessor is consumed and reported as [`Error::UnorderedStream`], so a
/// single bad record does not wedge the cursor.
pub struct StreamCursor<I: Iterator> {
    inner: Peekable<I>,
    last: Option<f64>,
    consumed: usize,
}

/// Cursor over an in-memory stream.
pub type VecCursor<T> = StreamCursor<std::vec::IntoIter<T>>;

impl<I> StreamCursor<I>
where
    I: Iterator,
    I::Item: Timestamped,
{
    pub fn new<S>(stream: S) -> Self
    where
        S: IntoIterator<IntoIter = I, Item = I::Item>,
    {
        StreamCursor {
            inner: stream.into_iter().peekable(),
            last: None,
            consumed: 0,
        }
    }

    /// Next unread element, without consuming it.
    pub fn peek(&mut self) -> Option<&I::Item> {
        self.inner.peek()
    }

    pub fn peek_timestamp(&mut self) -> Option<f64> {
        self.inner.peek().map(|x| x.timestamp())
    }

    /// Consume the next element.
    pub fn advance(&mut self) -> Result<I::Item, Error> {
        let item = self.inner.next().ok_or(Error::Exhausted)?;
        let t = item.timestamp();
        self.consumed += 1;
        if !t.is_finite() {
            return Err(Error::DegenerateInput(format!(
                "non-finite timestamp at stream position {}",
                self.consumed - 1
            )));
        }
        if let Some(previous) = self.last {
            if t < previous {
                return Err(Error::UnorderedStream { previous, next: t });
            }
        }
        self.last = Some(t);
        Ok(item)
    }

    /// Consume every element strictly older than `t`.
    pub fn advance_until(&mut self, t: f64) -> Result<Vec<I::Item>, Error> {
        let mut out = Vec::new();
        loop {
            match self.peek_timestamp() {
                // non-finite timestamps are consumed so advance can report them
                Some(ts) if !ts.is_finite() || ts < t => out.push(self.advance()?),
                _ => break,
            }
        }
        Ok(out)
    }

    pub fn is_exhausted(&mut self) -> bool {
        self.inner.peek().is_none()
    }

    /// Number of elements consumed so far, including rejected ones.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Timestamp of the most recently accepted element.
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last
    }
}
