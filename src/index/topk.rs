use std::collections::BinaryHeap;

use super::Neighbor;

/// 保留距离最小的 k 个邻居
///
/// 内部是一个大顶堆，堆顶为当前保留的最远邻居。
pub struct TopKNeighbors {
    heap: BinaryHeap<Neighbor>,
    k: usize,
}

impl TopKNeighbors {
    pub fn new(k: usize) -> Self {
        Self { heap: BinaryHeap::with_capacity(k + 1), k }
    }

    pub fn push(&mut self, neighbor: Neighbor) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(neighbor);
        } else if let Some(mut top) = self.heap.peek_mut() {
            if neighbor < *top {
                *top = neighbor;
            }
        }
    }

    pub fn extend(&mut self, neighbors: impl IntoIterator<Item = Neighbor>) {
        for neighbor in neighbors {
            self.push(neighbor);
        }
    }

    /// 合并另一组结果，用于并行扫描后的归约
    pub fn merge(mut self, other: Self) -> Self {
        self.extend(other.heap);
        self
    }

    /// 按距离升序返回，距离相同时按 ID 升序
    pub fn into_sorted_vec(self) -> Vec<Neighbor> {
        self.heap.into_sorted_vec()
    }
}
