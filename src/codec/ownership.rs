use crate::core::PlayerError;
use log::warn;
use std::collections::BTreeMap;
use thiserror::Error;

/// 输出槽位的归属状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Free,
    Owned,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OwnershipError {
    #[error("输出槽位 {0} 重复获取（上一次借出尚未归还）")]
    DoubleAcquire(usize),
}

impl From<OwnershipError> for PlayerError {
    fn from(e: OwnershipError) -> Self {
        PlayerError::ProtocolViolation(e.to_string())
    }
}

/// 输出帧归属表：记录每个输出槽位当前是借给消费者还是空闲
///
/// 同一槽位任何时刻至多一个未归还的持有者。
#[derive(Debug, Default)]
pub struct OutputFrameOwnership {
    slots: BTreeMap<usize, SlotStatus>,
}

impl OutputFrameOwnership {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记槽位被借出；已被借出时返回 `DoubleAcquire`
    pub fn acquire(&mut self, slot: usize) -> Result<(), OwnershipError> {
        match self.slots.get(&slot) {
            Some(SlotStatus::Owned) => Err(OwnershipError::DoubleAcquire(slot)),
            _ => {
                self.slots.insert(slot, SlotStatus::Owned);
                Ok(())
            }
        }
    }

    /// 归还槽位；对空闲槽位调用只记录警告，返回 false
    pub fn release(&mut self, slot: usize) -> bool {
        match self.slots.get_mut(&slot) {
            Some(status) if *status == SlotStatus::Owned => {
                *status = SlotStatus::Free;
                true
            }
            _ => {
                warn!("⚠️ 输出槽位 {} 已是空闲状态，忽略重复释放", slot);
                false
            }
        }
    }

    pub fn status(&self, slot: usize) -> SlotStatus {
        self.slots.get(&slot).copied().unwrap_or(SlotStatus::Free)
    }

    pub fn is_owned(&self, slot: usize) -> bool {
        self.status(slot) == SlotStatus::Owned
    }

    pub fn owned_count(&self) -> usize {
        self.slots.values().filter(|s| **s == SlotStatus::Owned).count()
    }

    /// 收回所有借出的槽位（flush / release 时使用），返回被收回的下标
    pub fn reclaim_all(&mut self) -> Vec<usize> {
        let owned: Vec<usize> = self
            .slots
            .iter()
            .filter(|(_, s)| **s == SlotStatus::Owned)
            .map(|(slot, _)| *slot)
            .collect();
        self.slots.clear();
        owned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_acquire() {
        let mut table = OutputFrameOwnership::new();
        table.acquire(3).unwrap();
        assert_eq!(table.acquire(3), Err(OwnershipError::DoubleAcquire(3)));
        assert!(table.release(3));
        table.acquire(3).unwrap();
    }

    #[test]
    fn test_release_free_slot_is_noop() {
        let mut table = OutputFrameOwnership::new();
        assert!(!table.release(7));
        table.acquire(7).unwrap();
        assert!(table.release(7));
        assert!(!table.release(7));
        assert_eq!(table.status(7), SlotStatus::Free);
    }

    #[test]
    fn test_reclaim_all() {
        let mut table = OutputFrameOwnership::new();
        table.acquire(2).unwrap();
        table.acquire(0).unwrap();
        table.acquire(5).unwrap();
        table.release(5);
        assert_eq!(table.reclaim_all(), vec![0, 2]);
        assert_eq!(table.owned_count(), 0);
    }

    #[test]
    fn test_no_slot_ever_has_two_owners() {
        // 伪随机的获取/释放序列，对照一个朴素模型检查
        let mut table = OutputFrameOwnership::new();
        let mut model = [false; 8];
        let mut seed: u32 = 0x9e37_79b9;
        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let slot = (seed % 8) as usize;
            if seed & 0x100 == 0 {
                let result = table.acquire(slot);
                assert_eq!(result.is_ok(), !model[slot]);
                model[slot] = true;
            } else {
                assert_eq!(table.release(slot), model[slot]);
                model[slot] = false;
            }
            assert_eq!(table.owned_count(), model.iter().filter(|o| **o).count());
        }
    }
}
