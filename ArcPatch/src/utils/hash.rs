//! Resource checksums

use std::fmt::{self, Write as _};
use std::io::Read;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// SHA-256 digest over a resource's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Checksum of an in-memory buffer
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Checksum of a whole stream (streamed, for large resources)
    pub fn of_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self(hasher.finalize().into()))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lower-case hex representation (64 chars)
    #[must_use]
    pub fn to_hex(&self) -> String {
        let mut hex = String::with_capacity(64);
        for b in self.0 {
            let _ = write!(hex, "{b:02x}");
        }
        hex
    }

    /// Parse a 64 character hex string
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(Error::InvalidChecksum(hex.to_string()));
        }

        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| Error::InvalidChecksum(hex.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

/// Reader adapter that hashes everything read through it
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Checksum and length of everything read so far
    #[must_use]
    pub fn finish(self) -> (Checksum, u64) {
        (Checksum(self.hasher.finalize().into()), self.bytes)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        self.bytes += read as u64;
        Ok(read)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({})", self.to_hex())
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Checksum::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // SHA-256("abc")
        assert_eq!(
            Checksum::of_bytes(b"abc").to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_reader_matches_bytes() {
        let data = vec![7u8; 20_000];
        let streamed = Checksum::of_reader(&mut data.as_slice()).unwrap();
        assert_eq!(streamed, Checksum::of_bytes(&data));
    }

    #[test]
    fn test_hashing_reader() {
        let mut reader = HashingReader::new(&b"level1 bytes"[..]);
        let mut sink = Vec::new();
        std::io::copy(&mut reader, &mut sink).unwrap();
        let (sum, len) = reader.finish();
        assert_eq!(sum, Checksum::of_bytes(b"level1 bytes"));
        assert_eq!(len, 12);
    }

    #[test]
    fn test_hex_parse() {
        let sum = Checksum::of_bytes(b"level1");
        assert_eq!(Checksum::from_hex(&sum.to_hex()).unwrap(), sum);
        assert!(Checksum::from_hex("zz").is_err());
    }
}
