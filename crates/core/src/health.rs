use serde::{Deserialize, Serialize};

/// Container health grade, best (`A`) to worst (`F`).
///
/// The derived `Ord` follows declaration order, so a *greater* grade is a
/// *worse* one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthGrade {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl HealthGrade {
    pub const ALL: [Self; 6] = [Self::A, Self::B, Self::C, Self::D, Self::E, Self::F];

    /// Parse a grade letter. Empty or unrecognized input yields `None`.
    #[must_use]
    pub fn parse(grade: &str) -> Option<Self> {
        match grade.trim() {
            "A" | "a" => Some(Self::A),
            "B" | "b" => Some(Self::B),
            "C" | "c" => Some(Self::C),
            "D" | "d" => Some(Self::D),
            "E" | "e" => Some(Self::E),
            "F" | "f" => Some(Self::F),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
        }
    }
}

impl std::fmt::Display for HealthGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether moving from `previous` to `current` is a strict downgrade.
///
/// Transitions involving an empty or unrecognized grade are never flagged.
#[must_use]
pub fn is_health_degraded(previous: &str, current: &str) -> bool {
    match (HealthGrade::parse(previous), HealthGrade::parse(current)) {
        (Some(prev), Some(curr)) => curr > prev,
        _ => false,
    }
}
