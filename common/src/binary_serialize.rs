use std::io;

/// A value with a fixed little-endian wire layout.
pub trait BinarySerialize {
    fn serialize_to_stream(&self, writer: &mut impl std::io::Write) -> io::Result<()>;
    fn length_when_serialized(&self) -> u32;
    fn deserialize_from_stream(reader: &mut impl std::io::Read) -> io::Result<Self>
    where
        Self: Sized;

    fn serialize_to_vec(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.length_when_serialized() as usize);
        self.serialize_to_stream(&mut buf)?;
        Ok(buf)
    }
}

pub fn read_array<const N: usize>(reader: &mut impl io::Read) -> io::Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_u8(reader: &mut impl io::Read) -> io::Result<u8> {
    Ok(read_array::<1>(reader)?[0])
}

pub fn read_u32_le(reader: &mut impl io::Read) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

pub fn read_u64_le(reader: &mut impl io::Read) -> io::Result<u64> {
    Ok(u64::from_le_bytes(read_array(reader)?))
}
