//! Follower order sizing.

use serde::{Deserialize, Serialize};

/// How follower quantity is derived from the leader fill.
///
/// Only 1:1 mirroring exists. Proportional sizing across accounts of
/// different size or leverage is a separate extension and slots in here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMethod {
    #[default]
    Mirror,
}

impl SizingMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mirror" | "1:1" => Some(Self::Mirror),
            _ => None,
        }
    }
}

/// Calculates follower quantities.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionSizer {
    method: SizingMethod,
}

impl PositionSizer {
    pub fn new(method: SizingMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> SizingMethod {
        self.method
    }

    /// Contracts to send to a follower for a leader fill of `leader_quantity`.
    pub fn follower_quantity(&self, leader_quantity: u32) -> u32 {
        match self.method {
            SizingMethod::Mirror => leader_quantity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_sizing() {
        assert_eq!(SizingMethod::parse("proportional"), None);

        let sizer = PositionSizer::new(SizingMethod::parse("Mirror").unwrap());
        assert_eq!(sizer.follower_quantity(2), 2);
        assert_eq!(sizer.follower_quantity(0), 0);
        assert_eq!(sizer.method(), SizingMethod::Mirror);
    }
}
