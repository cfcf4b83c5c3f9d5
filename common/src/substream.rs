use std::io::Read;

/// Wraps a reader and stops after a fixed number of bytes.
pub struct SubstreamReader<R: Read> {
    remaining_len: usize,
    reader: R,
}

impl<R: Read> SubstreamReader<R> {
    pub fn new(reader: R, len: usize) -> Self {
        Self {
            remaining_len: len,
            reader,
        }
    }

    pub fn reached_end(&self) -> bool {
        self.remaining_len == 0
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Read for SubstreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remaining_len == 0 {
            return Ok(0);
        }

        let to_read = std::cmp::min(self.remaining_len, buf.len());
        let read = self.reader.read(&mut buf[..to_read])?;
        self.remaining_len -= read;
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stops_at_length() {
        let data = [1u8, 2, 3, 4, 5];
        let mut source = &data[..];

        let mut sub = SubstreamReader::new(&mut source, 3);
        let mut buf = Vec::new();
        sub.read_to_end(&mut buf).unwrap();

        assert!(sub.reached_end());
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(source, [4, 5]);
    }

    #[test]
    fn test_short_source() {
        let data = [1u8, 2];
        let mut sub = SubstreamReader::new(&data[..], 3);
        let mut buf = Vec::new();
        sub.read_to_end(&mut buf).unwrap();

        assert!(!sub.reached_end());
        assert_eq!(sub.into_inner().len(), 0);
    }
}
