use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Burst,
    Minute,
    Hour,
    Day,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Burst => "burst",
            WindowKind::Minute => "minute",
            WindowKind::Hour => "hour",
            WindowKind::Day => "day",
        }
    }

    pub fn window_ms(&self) -> i64 {
        match self {
            WindowKind::Burst => 10_000,
            WindowKind::Minute => 60_000,
            WindowKind::Hour => 3_600_000,
            WindowKind::Day => 86_400_000,
        }
    }

    pub fn all() -> [WindowKind; 4] {
        [
            WindowKind::Burst,
            WindowKind::Minute,
            WindowKind::Hour,
            WindowKind::Day,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub window: WindowKind,
    pub reset_at: DateTime<Utc>,
    pub limit: u32,
    pub degraded: bool,
}
