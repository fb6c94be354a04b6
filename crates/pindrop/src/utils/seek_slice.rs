use std::io;
use std::io::{Read, Seek, SeekFrom};

/// Exposes the byte range `[start, end)` of an underlying reader as if it were a complete
/// file. Used to read the body of an on-disk HTTP cache entry, which sits behind a
/// serialized cache-policy header in the same file.
pub struct SeekSlice<T> {
    inner: T,
    start: u64,
    end: u64,
    current: u64,
}

impl<T: Seek> SeekSlice<T> {
    /// Wraps `inner`, restricting it to the given range. Seeks to the start of the range.
    pub fn new(mut inner: T, start: u64, end: u64) -> io::Result<SeekSlice<T>> {
        assert!(end >= start);
        let current = inner.seek(SeekFrom::Start(start))?;
        Ok(SeekSlice {
            inner,
            start,
            end,
            current,
        })
    }
}

impl<T: Seek> Seek for SeekSlice<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let maybe_goal_idx = match pos {
            SeekFrom::Start(amount) => self.start.checked_add(amount),
            SeekFrom::End(amount) => self.end.checked_add_signed(amount),
            SeekFrom::Current(amount) => self.current.checked_add_signed(amount),
        };
        match maybe_goal_idx {
            Some(goal_idx) => {
                if goal_idx < self.start || goal_idx > self.end {
                    Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "seek out of range",
                    ))
                } else {
                    self.current = self.inner.seek(SeekFrom::Start(goal_idx))?;
                    Ok(self.current - self.start)
                }
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )),
        }
    }

    fn stream_position(&mut self) -> io::Result<u64> {
        Ok(self.current - self.start)
    }
}

impl<T: Read + Seek> Read for SeekSlice<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // also handles end < current, saturating to a zero-sized read
        let remaining = self.end.saturating_sub(self.current) as usize;
        let max_read = remaining.min(buf.len());
        let amount = self.inner.read(&mut buf[..max_read])?;
        self.current += amount as u64;
        Ok(amount)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_only_the_slice() {
        let data = Cursor::new(b"0123456789".to_vec());
        let mut slice = SeekSlice::new(data, 2, 7).unwrap();
        let mut out = String::new();
        slice.read_to_string(&mut out).unwrap();
        assert_eq!(out, "23456");
    }

    #[test]
    fn test_seeking_is_relative_to_the_slice() {
        let data = Cursor::new(b"0123456789".to_vec());
        let mut slice = SeekSlice::new(data, 2, 7).unwrap();

        slice.seek(SeekFrom::Start(1)).unwrap();
        let mut byte = [0u8; 1];
        slice.read_exact(&mut byte).unwrap();
        assert_eq!(&byte, b"3");

        slice.seek(SeekFrom::End(-1)).unwrap();
        slice.read_exact(&mut byte).unwrap();
        assert_eq!(&byte, b"6");

        assert!(slice.seek(SeekFrom::Start(100)).is_err());
    }
}
