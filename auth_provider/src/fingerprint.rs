//! Change detection for freshly authenticated records.
//!
//! Records are hashed over an explicit canonical encoding: every field is
//! written in a fixed order, behind a one byte tag, with a length prefix on
//! anything variable sized. Collections are ordered (`BTreeMap`/`BTreeSet`),
//! so two records with the same attributes always encode to the same bytes.

use std::{fmt, io};

use blake2::{Blake2s256, Digest};
use tracing::warn;

use crate::store::models::{IdentityRecord, TeamRecord};

const ENCODING_VERSION: u8 = 2;

/// Types with a stable, field-ordered byte encoding.
pub trait Canonical {
    fn write_canonical(&self, out: &mut CanonicalWriter<'_>) -> io::Result<()>;
}

/// Digest of a record's complete attribute state.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of<T: Canonical + ?Sized>(value: &T) -> io::Result<Self> {
        let mut hasher = Blake2s256::new();
        {
            let mut sink = DigestWriter(&mut hasher);
            let mut out = CanonicalWriter { out: &mut sink };
            out.u8(ENCODING_VERSION)?;
            value.write_canonical(&mut out)?;
        }

        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hasher.finalize());
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

pub struct ChangeDetector;

impl ChangeDetector {
    /// Whether `candidate` has to be written over `stored`.
    ///
    /// A missing stored record never matches, and a failed fingerprint is
    /// treated as a change so fresh data is not dropped.
    pub fn needs_write<T: Canonical>(candidate: &T, stored: Option<&T>) -> bool {
        let Some(stored) = stored else {
            return true;
        };

        match (Fingerprint::of(candidate), Fingerprint::of(stored)) {
            (Ok(candidate), Ok(stored)) => candidate != stored,
            (Err(error), _) | (_, Err(error)) => {
                warn!(?error, "failed to fingerprint record, writing it anyway");
                true
            }
        }
    }
}

/// Helper for [`Canonical`] implementations.
pub struct CanonicalWriter<'a> {
    out: &'a mut dyn io::Write,
}

impl CanonicalWriter<'_> {
    pub fn u8(&mut self, value: u8) -> io::Result<()> {
        self.out.write_all(&[value])
    }

    pub fn length(&mut self, len: usize) -> io::Result<()> {
        let len = u64::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "length does not fit in u64"))?;
        self.out.write_all(&len.to_le_bytes())
    }

    pub fn bytes(&mut self, value: &[u8]) -> io::Result<()> {
        self.length(value.len())?;
        self.out.write_all(value)
    }

    pub fn string(&mut self, value: &str) -> io::Result<()> {
        self.bytes(value.as_bytes())
    }

    pub fn field(&mut self, tag: u8, value: &str) -> io::Result<()> {
        self.u8(tag)?;
        self.string(value)
    }

    /// Absent and empty values encode differently.
    pub fn optional_field(&mut self, tag: u8, value: Option<&str>) -> io::Result<()> {
        self.u8(tag)?;
        match value {
            None => self.u8(0),
            Some(value) => {
                self.u8(1)?;
                self.string(value)
            }
        }
    }

    pub fn pairs<'v>(
        &mut self,
        tag: u8,
        pairs: impl ExactSizeIterator<Item = (&'v str, &'v str)>,
    ) -> io::Result<()> {
        self.u8(tag)?;
        self.length(pairs.len())?;
        for (key, value) in pairs {
            self.string(key)?;
            self.string(value)?;
        }
        Ok(())
    }
}

struct DigestWriter<'a, D>(&'a mut D);

impl<D: Digest> io::Write for DigestWriter<'_, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Digest::update(self.0, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Canonical for TeamRecord {
    fn write_canonical(&self, out: &mut CanonicalWriter<'_>) -> io::Result<()> {
        out.u8(b'T')?;
        out.field(1, self.name.as_str())?;
        out.field(2, self.account_type.as_str())?;

        out.u8(3)?;
        out.length(self.members.len())?;
        for member in &self.members {
            out.string(member.as_str())?;
        }

        out.pairs(
            4,
            self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
    }
}

impl Canonical for IdentityRecord {
    fn write_canonical(&self, out: &mut CanonicalWriter<'_>) -> io::Result<()> {
        out.u8(b'I')?;
        out.field(1, self.name.as_str())?;
        out.optional_field(2, self.cookie.as_ref().map(|cookie| cookie.get()))?;
        out.optional_field(3, self.display_name.as_deref())?;
        out.optional_field(4, self.email.as_deref())?;
        out.field(5, self.account_type.as_str())?;
        out.pairs(
            6,
            self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )?;

        out.u8(7)?;
        out.length(self.teams.len())?;
        for (key, team) in &self.teams {
            out.string(key.as_str())?;
            team.write_canonical(out)?;
        }
        Ok(())
    }
}
