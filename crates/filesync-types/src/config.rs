//! Configuration types for filesync
//!
//! Validated value types shared by the configuration crate and the engine.

/// Number of change records applied concurrently within one wave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "usize", into = "usize"))]
pub struct ApplyConcurrency(usize);

impl ApplyConcurrency {
    /// Minimum concurrency (sequential apply)
    pub const MIN: usize = 1;
    /// Maximum concurrency
    pub const MAX: usize = 256;

    /// Create a new concurrency value with validation
    pub fn new(count: usize) -> Result<Self, String> {
        if count < Self::MIN {
            Err(format!(
                "Apply concurrency {} is below minimum {}",
                count,
                Self::MIN
            ))
        } else if count > Self::MAX {
            Err(format!(
                "Apply concurrency {} exceeds maximum {}",
                count,
                Self::MAX
            ))
        } else {
            Ok(Self(count))
        }
    }

    /// Get the concurrency value
    pub fn get(self) -> usize {
        self.0
    }

    /// One worker per available CPU
    pub fn optimal() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self(cpu_count.min(Self::MAX))
    }
}

impl Default for ApplyConcurrency {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl TryFrom<usize> for ApplyConcurrency {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ApplyConcurrency> for usize {
    fn from(value: ApplyConcurrency) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_concurrency_bounds() {
        assert!(ApplyConcurrency::new(0).is_err());
        assert!(ApplyConcurrency::new(257).is_err());
        assert_eq!(ApplyConcurrency::new(8).unwrap().get(), 8);
        assert_eq!(ApplyConcurrency::default().get(), 1);
        assert!(ApplyConcurrency::optimal().get() >= 1);
    }
}
