//! Shared value types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Currency amount in minor units (cents).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(pub u32);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Scale a raw config price by the money scale factor.
    ///
    /// Config files store prices in "display" units multiplied by `scale` to get
    /// minor units. Saturates instead of overflowing.
    pub fn scaled(raw: u32, scale: u32) -> Self {
        Amount(raw.saturating_mul(scale))
    }

    pub fn minor(self) -> u32 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl From<u32> for Amount {
    fn from(v: u32) -> Self {
        Amount(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_display() {
        assert_eq!(Amount(0).to_string(), "0.00");
        assert_eq!(Amount(5).to_string(), "0.05");
        assert_eq!(Amount(1250).to_string(), "12.50");
    }

    #[test]
    fn test_amount_scaled() {
        assert_eq!(Amount::scaled(35, 100), Amount(3500));
        assert_eq!(Amount::scaled(u32::MAX, 2), Amount(u32::MAX));
        assert!(Amount::scaled(0, 100).is_zero());
    }

    #[test]
    fn test_amount_serde_transparent() {
        let json = serde_json::to_string(&Amount(150)).unwrap();
        assert_eq!(json, "150");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back.minor(), 150);
    }
}
