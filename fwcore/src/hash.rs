use std::fmt;
use std::hash::{Hash as StdHash, Hasher as StdHasher};

use bytes::Bytes;
use sha2::{Digest as _, Sha256};

// Encapsulates the hash engine so the rest of the tree only ever sees `Digest`
#[derive(PartialEq, Eq, Clone, Copy, StdHash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

pub fn hash(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    Digest(hasher.finalize().into())
}

pub fn to_hex(digest: &Digest) -> String {
    hex::encode(digest.0)
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Digest(bytes)
    }
}

impl Digest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&to_hex(self))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 16 hex digits are plenty to tell files apart in logs
        write!(f, "Digest({})", &to_hex(self)[..16])
    }
}

/// A firmware file identified by the digest of its content.
///
/// The digest is computed once in [`ContentFile::new`]. Two files compare
/// equal when their digests match, whatever their names are.
#[derive(Clone)]
pub struct ContentFile {
    name: String,
    data: Bytes,
    digest: Digest,
}

impl ContentFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let digest = hash(&data);

        ContentFile {
            name: name.into(),
            data,
            digest,
        }
    }

    /// Name the collector found this content under, not its output name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }
}

impl PartialEq for ContentFile {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for ContentFile {}

impl StdHash for ContentFile {
    fn hash<H: StdHasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl fmt::Debug for ContentFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentFile({:?}, {:?})", self.name, self.digest)
    }
}
