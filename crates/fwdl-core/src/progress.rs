//! Progress snapshots for callers (CLI, UI).

use crate::task::TaskState;

/// Point-in-time view of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub id: String,
    pub state: TaskState,
    pub downloaded_bytes: u64,
    /// 0 while unknown.
    pub total_bytes: u64,
    pub retry_count: u32,
}

impl Progress {
    pub fn percentage(&self) -> u8 {
        percentage(self.downloaded_bytes, self.total_bytes)
    }

    /// Bytes still to fetch (None while the size is unknown).
    pub fn remaining_bytes(&self) -> Option<u64> {
        (self.total_bytes > 0).then(|| self.total_bytes.saturating_sub(self.downloaded_bytes))
    }
}

/// Whole percent in [0, 100]; 0 while `total` is unknown.
pub fn percentage(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((downloaded.min(total) as u128 * 100) / total as u128) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_bounds() {
        assert_eq!(percentage(0, 0), 0);
        assert_eq!(percentage(10, 0), 0);
        assert_eq!(percentage(0, 1000), 0);
        assert_eq!(percentage(999, 1000), 99);
        assert_eq!(percentage(1000, 1000), 100);
        assert_eq!(percentage(5000, 1000), 100);
        assert_eq!(percentage(u64::MAX / 2, u64::MAX), 49);
    }

    #[test]
    fn remaining() {
        let p = Progress {
            id: "x".into(),
            state: TaskState::Downloading,
            downloaded_bytes: 300,
            total_bytes: 1000,
            retry_count: 0,
        };
        assert_eq!(p.remaining_bytes(), Some(700));
        assert_eq!(p.percentage(), 30);
        let unknown = Progress { total_bytes: 0, ..p };
        assert_eq!(unknown.remaining_bytes(), None);
    }
}
