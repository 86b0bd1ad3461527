//! Resource limits and configuration

use crate::error::{JfeError, Result};

/// Resource limits guarding against oversized or forged input
#[derive(Debug, Clone)]
pub struct Limits {
    /// Largest read buffer a single token may force (default: 8 MiB)
    pub max_buffer_bytes: usize,
    /// Minimum growth step when the read buffer is enlarged (default: 4 KiB)
    pub buffer_growth_min_increment: usize,
    /// Largest decompressed payload a `_cp` entry may claim (default: 32 MiB)
    pub max_decompressed_bytes: usize,
    /// Largest decrypted container re-emitted verbatim (default: 8 MiB)
    pub max_container_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_buffer_bytes: 8 * 1024 * 1024,
            buffer_growth_min_increment: 4 * 1024,
            max_decompressed_bytes: 32 * 1024 * 1024,
            max_container_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Limits {
    /// Hard ceilings no configuration may exceed.
    pub fn hard_maximums() -> Self {
        Self {
            max_buffer_bytes: 256 * 1024 * 1024,
            buffer_growth_min_increment: 1024 * 1024,
            max_decompressed_bytes: 256 * 1024 * 1024,
            max_container_bytes: 256 * 1024 * 1024,
        }
    }

    /// Validate against [`Limits::hard_maximums`].
    pub fn validate(&self) -> Result<()> {
        let hard = Self::hard_maximums();
        check("max_buffer_bytes", self.max_buffer_bytes, hard.max_buffer_bytes)?;
        check(
            "buffer_growth_min_increment",
            self.buffer_growth_min_increment,
            hard.buffer_growth_min_increment,
        )?;
        check(
            "max_decompressed_bytes",
            self.max_decompressed_bytes,
            hard.max_decompressed_bytes,
        )?;
        check(
            "max_container_bytes",
            self.max_container_bytes,
            hard.max_container_bytes,
        )?;
        Ok(())
    }
}

fn check(name: &str, value: usize, hard: usize) -> Result<()> {
    if value == 0 {
        return Err(JfeError::InvalidConfiguration(format!(
            "{} must be greater than zero",
            name
        )));
    }
    if value > hard {
        return Err(JfeError::InvalidConfiguration(format!(
            "{} ({}) exceeds hard maximum {}",
            name, value, hard
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Limits::default().validate().unwrap();
        Limits::hard_maximums().validate().unwrap();
    }

    #[test]
    fn zero_and_oversized_rejected() {
        let mut limits = Limits::default();
        limits.max_buffer_bytes = 0;
        assert!(limits.validate().is_err());

        let mut limits = Limits::default();
        limits.max_decompressed_bytes = usize::MAX;
        let err = limits.validate().unwrap_err();
        assert!(err.to_string().contains("max_decompressed_bytes"));
    }
}
