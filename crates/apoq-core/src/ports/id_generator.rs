//! IdGenerator port - ID 生成の抽象化
//!
//! TaskId はストアが採番します（bigserial）。ここで生成するのは
//! プロセス内で使う WorkerId と、claim ごとの ClaimId です。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース

use crate::domain::ids::{ClaimId, WorkerId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散環境で衝突しない ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数ワーカーから使える）
pub trait IdGenerator: Send + Sync {
    /// Worker ID を生成
    fn generate_worker_id(&self) -> WorkerId;

    /// Claim ID を生成（claim 1 回ごとに新しい値）
    fn generate_claim_id(&self) -> ClaimId;
}

/// UlidGenerator は Clock の時刻をタイムスタンプ部に使う
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_worker_id(&self) -> WorkerId {
        WorkerId::from(self.next_ulid())
    }

    fn generate_claim_id(&self) -> ClaimId {
        ClaimId::from(self.next_ulid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);

        let id1 = id_gen.generate_claim_id();
        let id2 = id_gen.generate_claim_id();
        let id3 = id_gen.generate_claim_id();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_shares_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_claim_id();
        let id2 = id_gen.generate_claim_id();

        // FixedClock でもランダム部分があるので ID は異なる
        assert_ne!(id1, id2);
        assert_eq!(id1.as_ulid().timestamp_ms(), id2.as_ulid().timestamp_ms());
        assert_eq!(
            id1.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }

    #[test]
    fn worker_and_claim_ids_have_distinct_prefixes() {
        let id_gen = UlidGenerator::new(SystemClock);

        assert!(id_gen.generate_worker_id().to_string().starts_with("worker-"));
        assert!(id_gen.generate_claim_id().to_string().starts_with("claim-"));
    }
}
