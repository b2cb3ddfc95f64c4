//! 近似最近邻索引：随机超平面 LSH（余弦距离）
//!
//! 每个 Agent 一个分区，互不干扰。分区规模不超过 `exact_scan_limit` 时直接精确扫描；
//! 否则在 L 张哈希表中取同桶候选，不足 k 个时再探测各表汉明距离为 1 的邻桶，
//! 最后对候选做精确余弦重排。超平面由固定种子生成，同一配置下结果可复现。

use std::collections::{HashMap, HashSet};

use crate::config::MemorySection;

/// 余弦距离 = 1 - cos；任一向量为零向量时视为最远（1.0）
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        1.0
    } else {
        1.0 - dot / (norm_a * norm_b)
    }
}

/// 检索命中：记录 id 与余弦距离
#[derive(Debug, Clone, PartialEq)]
pub struct AnnHit {
    pub id: i64,
    pub distance: f32,
}

struct Entry {
    vector: Vec<f32>,
    /// 写入时间（毫秒），距离相同时更早者优先
    timestamp_ms: i64,
}

#[derive(Default)]
struct Partition {
    entries: HashMap<i64, Entry>,
    /// 每张表：签名 -> 记录 id
    buckets: Vec<HashMap<u64, Vec<i64>>>,
}

pub struct AnnIndex {
    dimension: usize,
    exact_scan_limit: usize,
    bits: usize,
    /// planes[table][bit] 为一条 D 维法向量
    planes: Vec<Vec<Vec<f32>>>,
    partitions: HashMap<String, Partition>,
}

impl AnnIndex {
    pub fn new(dimension: usize, cfg: &MemorySection) -> Self {
        let tables = cfg.lsh_tables.max(1);
        let bits = cfg.lsh_bits.clamp(1, 64);
        let mut rng = fastrand::Rng::with_seed(cfg.seed);
        let planes = (0..tables)
            .map(|_| {
                (0..bits)
                    .map(|_| (0..dimension).map(|_| gaussian(&mut rng)).collect())
                    .collect()
            })
            .collect();
        Self {
            dimension,
            exact_scan_limit: cfg.exact_scan_limit,
            bits,
            planes,
            partitions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.partitions.values().map(|p| p.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn partition_len(&self, agent: &str) -> usize {
        self.partitions
            .get(agent)
            .map(|p| p.entries.len())
            .unwrap_or(0)
    }

    fn signature(&self, table: usize, v: &[f32]) -> u64 {
        let mut sig = 0u64;
        for (bit, plane) in self.planes[table].iter().enumerate() {
            let dot: f32 = plane.iter().zip(v.iter()).map(|(p, x)| p * x).sum();
            if dot >= 0.0 {
                sig |= 1u64 << bit;
            }
        }
        sig
    }

    /// 插入一条向量；维度不符的向量会被忽略（由存储层在写入前拒绝）
    pub fn insert(&mut self, agent: &str, id: i64, vector: Vec<f32>, timestamp_ms: i64) {
        if vector.len() != self.dimension {
            tracing::warn!(
                "ann: skip id {} with dimension {} (expected {})",
                id,
                vector.len(),
                self.dimension
            );
            return;
        }
        let sigs: Vec<u64> = (0..self.planes.len())
            .map(|t| self.signature(t, &vector))
            .collect();
        let tables = self.planes.len();
        let partition = self.partitions.entry(agent.to_string()).or_default();
        if partition.buckets.len() < tables {
            partition.buckets.resize_with(tables, HashMap::new);
        }
        for (t, sig) in sigs.into_iter().enumerate() {
            partition.buckets[t].entry(sig).or_default().push(id);
        }
        partition.entries.insert(
            id,
            Entry {
                vector,
                timestamp_ms,
            },
        );
    }

    fn candidates(&self, partition: &Partition, query: &[f32], k: usize) -> HashSet<i64> {
        if partition.entries.len() <= self.exact_scan_limit {
            return partition.entries.keys().copied().collect();
        }
        let sigs: Vec<u64> = (0..self.planes.len())
            .map(|t| self.signature(t, query))
            .collect();
        let mut out = HashSet::new();
        for (t, sig) in sigs.iter().enumerate() {
            if let Some(ids) = partition.buckets[t].get(sig) {
                out.extend(ids.iter().copied());
            }
        }
        if out.len() >= k {
            return out;
        }
        // 多探测：翻转一位
        for (t, sig) in sigs.iter().enumerate() {
            for bit in 0..self.bits {
                if let Some(ids) = partition.buckets[t].get(&(sig ^ (1u64 << bit))) {
                    out.extend(ids.iter().copied());
                }
            }
        }
        out
    }

    /// 返回该 Agent 分区内至多 k 条结果，按距离升序，距离相同按时间升序
    pub fn search(&self, agent: &str, query: &[f32], k: usize) -> Vec<AnnHit> {
        if k == 0 || query.len() != self.dimension {
            return Vec::new();
        }
        let Some(partition) = self.partitions.get(agent) else {
            return Vec::new();
        };
        let mut scored: Vec<(f32, i64, i64)> = self
            .candidates(partition, query, k)
            .into_iter()
            .filter_map(|id| {
                partition
                    .entries
                    .get(&id)
                    .map(|e| (cosine_distance(query, &e.vector), e.timestamp_ms, id))
            })
            .collect();
        scored.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });
        scored
            .into_iter()
            .take(k)
            .map(|(distance, _, id)| AnnHit { id, distance })
            .collect()
    }

    pub fn clear(&mut self) {
        self.partitions.clear();
    }
}

/// Box-Muller 标准正态采样
fn gaussian(rng: &mut fastrand::Rng) -> f32 {
    let u1 = rng.f32().max(f32::MIN_POSITIVE);
    let u2 = rng.f32();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(exact_scan_limit: usize) -> MemorySection {
        MemorySection {
            exact_scan_limit,
            lsh_tables: 6,
            lsh_bits: 8,
            seed: 7,
        }
    }

    fn random_unit(rng: &mut fastrand::Rng, dim: usize) -> Vec<f32> {
        let v: Vec<f32> = (0..dim).map(|_| gaussian(rng)).collect();
        let n = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.into_iter().map(|x| x / n).collect()
    }

    #[test]
    fn test_cosine_distance_basics() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_search_is_partitioned_by_agent() {
        let mut index = AnnIndex::new(2, &cfg(512));
        index.insert("Id", 1, vec![1.0, 0.0], 10);
        index.insert("Ego", 2, vec![1.0, 0.0], 5);
        let hits = index.search("Id", &[1.0, 0.0], 5);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
        assert!(index.search("Superego", &[1.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_ties_break_by_earliest_timestamp() {
        let mut index = AnnIndex::new(2, &cfg(512));
        index.insert("Ego", 1, vec![0.0, 1.0], 300);
        index.insert("Ego", 2, vec![0.0, 1.0], 100);
        index.insert("Ego", 3, vec![0.0, 1.0], 200);
        let ids: Vec<i64> = index
            .search("Ego", &[0.0, 1.0], 3)
            .into_iter()
            .map(|h| h.id)
            .collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_lsh_path_finds_exact_match_and_orders_by_distance() {
        let dim = 32;
        let mut rng = fastrand::Rng::with_seed(42);
        // exact_scan_limit = 0 强制走 LSH 路径
        let mut index = AnnIndex::new(dim, &cfg(0));
        let mut vectors = Vec::new();
        for id in 0..400 {
            let v = random_unit(&mut rng, dim);
            index.insert("Id", id, v.clone(), id);
            vectors.push(v);
        }
        let target = vectors[123].clone();
        let hits = index.search("Id", &target, 3);
        assert!(!hits.is_empty() && hits.len() <= 3);
        assert_eq!(hits[0].id, 123);
        assert!(hits[0].distance < 1e-5);
        for w in hits.windows(2) {
            assert!(w[0].distance <= w[1].distance);
        }
    }

    #[test]
    fn test_clear_and_dimension_guard() {
        let mut index = AnnIndex::new(3, &cfg(512));
        index.insert("Id", 1, vec![1.0, 0.0], 0);
        assert!(index.is_empty());
        index.insert("Id", 2, vec![1.0, 0.0, 0.0], 0);
        assert_eq!(index.partition_len("Id"), 1);
        assert!(index.search("Id", &[1.0, 0.0], 1).is_empty());
        index.clear();
        assert!(index.search("Id", &[1.0, 0.0, 0.0], 1).is_empty());
    }
}
