//! Root configuration file.
//!
//! `config.txt` is line oriented, one `key value` pair per line:
//!
//! ```text
//! chunk_size        32M
//! wal_max_entries   128
//! write_throttle_ns 100000000
//! ```
//!
//! `chunk_size` is a power-of-two byte count with an optional `K`/`M`/`G`/`T`
//! suffix.  Unknown keys are a hard error: a root written by a newer version
//! is refused rather than half-understood.

use tidestore_core::{Error, Result};

/// Parsed root configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    /// Chunk file size in bytes; `CHUNK_NPOINTS = chunk_size / 8`.
    pub chunk_size: u64,
    /// Maximum visible WAL entries after a write returns.
    pub wal_max_entries: usize,
    /// Minimum nanoseconds between writes a frontend should enforce.
    pub write_throttle_ns: u64,
}

impl Default for Configuration {
    fn default() -> Configuration {
        Configuration {
            chunk_size: 32 * 1024 * 1024,
            wal_max_entries: 128,
            write_throttle_ns: 0,
        }
    }
}

impl Configuration {
    /// Points per chunk.
    pub fn chunk_npoints(&self) -> usize {
        (self.chunk_size / 8) as usize
    }

    /// Size in bytes of every bitmap file.
    pub fn bitmap_file_size(&self) -> usize {
        self.chunk_npoints() / 8
    }

    /// Check the invariants the rest of the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if !self.chunk_size.is_power_of_two() || self.chunk_size < 64 {
            return Err(Error::InvalidChunkSize {
                size: self.chunk_size,
            });
        }
        if self.wal_max_entries == 0 {
            return Err(Error::InvalidConfigFile {
                reason: "wal_max_entries must be positive".into(),
            });
        }
        Ok(())
    }

    /// Parse the contents of `config.txt`.
    pub fn parse(text: &str) -> Result<Configuration> {
        let mut config = Configuration::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let key = parts.next().unwrap_or("");
            let value = parts.next().ok_or_else(|| Error::InvalidConfigFile {
                reason: format!("line {}: missing value for {key}", lineno + 1),
            })?;
            if parts.next().is_some() {
                return Err(Error::InvalidConfigFile {
                    reason: format!("line {}: trailing tokens", lineno + 1),
                });
            }
            match key {
                "chunk_size" => config.chunk_size = parse_pow2_size(value)?,
                "wal_max_entries" => {
                    config.wal_max_entries =
                        value.parse().map_err(|_| Error::InvalidConfigFile {
                            reason: format!("bad wal_max_entries: {value}"),
                        })?
                }
                "write_throttle_ns" => {
                    config.write_throttle_ns =
                        value.parse().map_err(|_| Error::InvalidConfigFile {
                            reason: format!("bad write_throttle_ns: {value}"),
                        })?
                }
                other => {
                    return Err(Error::InvalidConfigFile {
                        reason: format!("unknown key: {other}"),
                    })
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Render in the on-disk column format.
    pub fn encode(&self) -> String {
        format!(
            "chunk_size        {}\nwal_max_entries   {}\nwrite_throttle_ns {}\n",
            encode_pow2_size(self.chunk_size),
            self.wal_max_entries,
            self.write_throttle_ns
        )
    }
}

/// Parse a power-of-two byte count with an optional K/M/G/T suffix.
fn parse_pow2_size(s: &str) -> Result<u64> {
    let (digits, mult) = match s.as_bytes().last() {
        Some(b'K') => (&s[..s.len() - 1], 1u64 << 10),
        Some(b'M') => (&s[..s.len() - 1], 1u64 << 20),
        Some(b'G') => (&s[..s.len() - 1], 1u64 << 30),
        Some(b'T') => (&s[..s.len() - 1], 1u64 << 40),
        _ => (s, 1),
    };
    let base: u64 = digits.parse().map_err(|_| Error::InvalidConfigFile {
        reason: format!("bad size: {s}"),
    })?;
    let size = base.checked_mul(mult).ok_or(Error::InvalidChunkSize { size: u64::MAX })?;
    if !size.is_power_of_two() {
        return Err(Error::InvalidChunkSize { size });
    }
    Ok(size)
}

/// Render a byte count with the largest suffix that divides it exactly.
fn encode_pow2_size(size: u64) -> String {
    const UNITS: [(u64, &str); 4] = [
        (1 << 40, "T"),
        (1 << 30, "G"),
        (1 << 20, "M"),
        (1 << 10, "K"),
    ];
    for (mult, suffix) in UNITS {
        if size >= mult && size % mult == 0 {
            return format!("{}{}", size / mult, suffix);
        }
    }
    size.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        let c = Configuration {
            chunk_size: 32 * 1024 * 1024,
            wal_max_entries: 128,
            write_throttle_ns: 100,
        };
        let parsed = Configuration::parse(&c.encode()).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn test_parse_suffixes() {
        let c = Configuration::parse("chunk_size 4K\nwal_max_entries 16\n").unwrap();
        assert_eq!(c.chunk_size, 4096);
        assert_eq!(c.chunk_npoints(), 512);
        assert_eq!(c.bitmap_file_size(), 64);
        let c = Configuration::parse("chunk_size 1G\n").unwrap();
        assert_eq!(c.chunk_size, 1 << 30);
    }

    #[test]
    fn test_parse_plain_bytes() {
        let c = Configuration::parse("chunk_size 128\nwal_max_entries 16\n").unwrap();
        assert_eq!(c.chunk_size, 128);
        assert_eq!(c.chunk_npoints(), 16);
    }

    #[test]
    fn test_unknown_key_is_hard_error() {
        assert!(matches!(
            Configuration::parse("frobnicate 1\n"),
            Err(Error::InvalidConfigFile { .. })
        ));
    }

    #[test]
    fn test_non_pow2_chunk_size_rejected() {
        assert!(matches!(
            Configuration::parse("chunk_size 100\n"),
            Err(Error::InvalidChunkSize { .. })
        ));
        assert!(matches!(
            Configuration::parse("chunk_size 3K\n"),
            Err(Error::InvalidChunkSize { .. })
        ));
    }

    #[test]
    fn test_zero_wal_bound_rejected() {
        assert!(matches!(
            Configuration::parse("wal_max_entries 0\n"),
            Err(Error::InvalidConfigFile { .. })
        ));
    }

    #[test]
    fn test_missing_value_rejected() {
        assert!(matches!(
            Configuration::parse("chunk_size\n"),
            Err(Error::InvalidConfigFile { .. })
        ));
    }
}
