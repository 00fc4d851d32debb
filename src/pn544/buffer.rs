/// Circular buffer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BufferError {
  /// The buffer holds no byte at all.
  Empty,
  /// The read index caught up with the write index.
  Full,
  /// Not enough free room for the whole fill.
  NoSpace,
  /// Fewer bytes buffered than the drain asked for.
  NoData,
}

/// Byte ring with all-or-nothing fills and drains.
///
/// The empty state is encoded as an absent read index rather than a
/// sacrificed slot, so the full capacity is usable and `read == write`
/// unambiguously means full.
#[derive(Debug)]
pub struct CircularBuffer<const N: usize> {
  buf: [u8; N],
  read: Option<usize>,
  write: usize,
}

impl<const N: usize> Default for CircularBuffer<N> {
  fn default() -> Self {
    Self::new()
  }
}

impl<const N: usize> CircularBuffer<N> {
  pub const fn new() -> Self {
    Self { buf: [0; N], read: None, write: 0 }
  }

  pub fn flush(&mut self) {
    self.read = None;
    self.write = 0;
  }

  pub const fn is_empty(&self) -> bool {
    self.read.is_none()
  }

  pub fn is_full(&self) -> bool {
    self.read == Some(self.write)
  }

  /// Buffered byte count.
  pub fn len(&self) -> usize {
    match self.read {
      None => 0,
      Some(read) if read == self.write => N,
      Some(read) if read > self.write => self.write + N - read,
      Some(read) => self.write - read,
    }
  }

  /// Appends `data` whole, or not at all.
  pub fn fill(&mut self, data: &[u8]) -> Result<usize, BufferError> {
    if self.is_full() {
      return Err(BufferError::Full);
    }
    // a zero-length fill of an empty ring must not alias the full marker
    if data.is_empty() {
      return Ok(0);
    }
    match self.read {
      None => {
        if data.len() > N {
          return Err(BufferError::NoSpace);
        }
        self.buf[..data.len()].copy_from_slice(data);
        self.read = Some(0);
        self.write = if data.len() == N { 0 } else { data.len() };
      }
      Some(read) => {
        let (free, wrap) = if read > self.write {
          (read - self.write, 0)
        } else {
          (read + N - self.write, N - self.write)
        };
        if data.len() > free {
          return Err(BufferError::NoSpace);
        }
        if wrap > 0 && wrap <= data.len() {
          let (head, tail) = data.split_at(wrap);
          self.buf[self.write..].copy_from_slice(head);
          self.buf[..tail.len()].copy_from_slice(tail);
          self.write = tail.len();
        } else {
          self.buf[self.write..self.write + data.len()].copy_from_slice(data);
          self.write += data.len();
        }
      }
    }
    Ok(data.len())
  }

  /// Removes exactly `out.len()` bytes, or nothing.
  pub fn drain(&mut self, out: &mut [u8]) -> Result<usize, BufferError> {
    let Some(read) = self.read else {
      return Err(BufferError::Empty);
    };
    if out.is_empty() {
      return Ok(0);
    }
    let (filled, wrap) = if read == self.write {
      (N, N - read)
    } else if read > self.write {
      (self.write + N - read, N - read)
    } else {
      (self.write - read, 0)
    };
    let n = out.len();
    if n > filled {
      return Err(BufferError::NoData);
    }
    if wrap == 0 || wrap >= n {
      out.copy_from_slice(&self.buf[read..read + n]);
      self.read = Some(if wrap == n { 0 } else { read + n });
    } else {
      out[..wrap].copy_from_slice(&self.buf[read..]);
      out[wrap..].copy_from_slice(&self.buf[..n - wrap]);
      self.read = Some(n - wrap);
    }
    if filled == n {
      // drained dry, reset to the canonical empty state
      self.read = None;
      self.write = 0;
    }
    Ok(n)
  }
}
