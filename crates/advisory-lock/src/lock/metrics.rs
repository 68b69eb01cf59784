//! 锁指标上报

use std::time::Instant;

use advisory_lock_shared::observability::metrics::{
    record_advisory_lock_count, record_advisory_lock_duration,
};

use super::key::LockClass;

/// 锁操作结果标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Ok,
    LockError,
    UnlockError,
}

impl LockOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::LockError => "lock error",
            Self::UnlockError => "unlock error",
        }
    }
}

/// 加锁失败：只记计数，锁从未持有所以没有时长
pub fn record_lock_failure(lock_class: LockClass) {
    record_advisory_lock_count(lock_class.as_str(), LockOutcome::LockError.as_str());
}

/// 释放：计数与持有时长
pub fn record_release(lock_class: LockClass, outcome: LockOutcome, acquired_at: Instant) {
    record_advisory_lock_count(lock_class.as_str(), outcome.as_str());
    record_advisory_lock_duration(lock_class.as_str(), outcome.as_str(), acquired_at.elapsed());
}
