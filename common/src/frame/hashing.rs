use std::hash::Hasher;

use twox_hash::XxHash64;

/// Passes writes through while hashing what was actually written.
pub struct HashedWriter<W: std::io::Write> {
    writer: W,
    hasher: XxHash64,
}

impl<W: std::io::Write> HashedWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            hasher: XxHash64::with_seed(0),
        }
    }

    pub fn result(self) -> u64 {
        self.hasher.finish()
    }
}

impl<W: std::io::Write> std::io::Write for HashedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.writer.write(buf)?;
        self.hasher.write(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// Passes reads through while hashing what was read.
pub struct HashedReader<R: std::io::Read> {
    reader: R,
    hasher: XxHash64,
}

impl<R: std::io::Read> HashedReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            hasher: XxHash64::with_seed(0),
        }
    }

    pub fn result(self) -> u64 {
        self.hasher.finish()
    }
}

impl<R: std::io::Read> std::io::Read for HashedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.reader.read(buf)?;
        self.hasher.write(&buf[..read]);
        Ok(read)
    }
}
