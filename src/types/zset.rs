// src/types/zset.rs

//! ZSet 类型
//!
//! 每个成员存两份，在同一个事务里一起更新：
//! - `D:{id}:{member}` → 分数（可排序编码的 f64）
//! - `S:{id}:{sortable score}:{member}` → 空值，按分数有序
//!
//! 按排名或分数的范围查询都扫第二个索引。

use std::ops::Bound;

use crate::codec;
use crate::error::{Error, Result};
use crate::txn::Transaction;
use crate::types::object::{Object, ObjectType};
use crate::types::Table;

pub struct ZSet<'a> {
    t: Table<'a>,
}

fn check_score(score: f64) -> Result<f64> {
    if score.is_nan() {
        return Err(Error::InvalidArgument("score is not a number".into()));
    }
    Ok(score)
}

/// 解析分数索引 key 去掉前缀后的部分：`{score:8}:{member}`
fn split_score_entry(rest: &[u8]) -> Result<(f64, Vec<u8>)> {
    if rest.len() < 9 || rest[8] != b':' {
        return Err(Error::InvalidEncoding("malformed zset score index key".into()));
    }
    Ok((codec::decode_f64(&rest[..8])?, rest[9..].to_vec()))
}

impl<'a> ZSet<'a> {
    pub(crate) fn open(txn: &'a Transaction, key: &[u8]) -> Result<Self> {
        Ok(ZSet { t: Table::open(txn, key, ObjectType::ZSet)? })
    }

    pub fn exists(&self) -> bool {
        self.t.exists
    }

    pub fn object(&self) -> &Object {
        &self.t.obj
    }

    /// ZCARD
    pub fn card(&self) -> i64 {
        self.t.len
    }

    fn score_key(&self, score: f64, member: &[u8]) -> Vec<u8> {
        self.t.txn.keys().score_key(&self.t.obj.id, score, member)
    }

    /// 写入一个成员的分数，返回是否是新成员
    fn put(&self, member: &[u8], score: f64) -> Result<bool> {
        let kv = self.t.txn.kv();
        let data_key = self.t.data_key(member);
        let old = match kv.get(&data_key)? {
            Some(raw) => Some(codec::decode_f64(&raw)?),
            None => None,
        };
        if let Some(old) = old {
            if old == score {
                return Ok(false);
            }
            kv.delete(&self.score_key(old, member));
        }
        kv.set(&data_key, &codec::encode_f64(score));
        kv.set(&self.score_key(score, member), &[]);
        Ok(old.is_none())
    }

    /// ZADD，返回新加入的成员数量；已有成员只更新分数
    pub fn add<M: AsRef<[u8]>>(&mut self, pairs: &[(f64, M)]) -> Result<i64> {
        for (score, _) in pairs {
            check_score(*score)?;
        }
        let mut added = 0;
        for (score, member) in pairs {
            if self.put(member.as_ref(), *score)? {
                added += 1;
            }
        }
        if !pairs.is_empty() {
            self.t.adjust(added);
        }
        Ok(added)
    }

    /// ZINCRBY，返回新分数
    pub fn incr_by(&mut self, member: &[u8], delta: f64) -> Result<f64> {
        check_score(delta)?;
        let new = check_score(self.score(member)?.unwrap_or(0.0) + delta)?;
        let added = self.put(member, new)?;
        self.t.adjust(added as i64);
        Ok(new)
    }

    /// ZREM，返回真正移除的成员数量
    pub fn remove<M: AsRef<[u8]>>(&mut self, members: &[M]) -> Result<i64> {
        if !self.t.exists {
            return Ok(0);
        }
        let kv = self.t.txn.kv();
        let mut removed = 0;
        for m in members {
            let data_key = self.t.data_key(m.as_ref());
            if let Some(raw) = kv.get(&data_key)? {
                let score = codec::decode_f64(&raw)?;
                kv.delete(&data_key);
                kv.delete(&self.score_key(score, m.as_ref()));
                removed += 1;
            }
        }
        if removed > 0 {
            self.t.adjust(-removed);
        }
        Ok(removed)
    }

    /// ZSCORE
    pub fn score(&self, member: &[u8]) -> Result<Option<f64>> {
        if !self.t.exists {
            return Ok(None);
        }
        match self.t.txn.kv().get(&self.t.data_key(member))? {
            Some(raw) => Ok(Some(codec::decode_f64(&raw)?)),
            None => Ok(None),
        }
    }

    /// 按分数顺序遍历 `[min, max]` 内的成员
    fn scan_scores(&self, min: f64, max: f64, rev: bool) -> impl Iterator<Item = Result<(f64, Vec<u8>)>> + '_ {
        let prefix = self.t.txn.keys().score_prefix(&self.t.obj.id);
        let mut lo = prefix.clone();
        lo.extend_from_slice(&codec::encode_f64(min));
        let mut hi = prefix.clone();
        hi.extend_from_slice(&codec::encode_f64(max));
        // ':' 之后的下一个字节，覆盖分数等于 max 的所有成员
        hi.push(b':' + 1);
        let plen = prefix.len();
        self.t
            .txn
            .kv()
            .range(Bound::Included(lo), Bound::Excluded(hi), rev)
            .map(move |r| r.and_then(|(k, _)| split_score_entry(&k[plen..])))
    }

    fn scan_all(&self, rev: bool) -> impl Iterator<Item = Result<(f64, Vec<u8>)>> + '_ {
        self.scan_scores(f64::NEG_INFINITY, f64::INFINITY, rev)
    }

    /// ZRANGE / ZREVRANGE，下标语义与 LRANGE 相同
    pub fn range(&self, start: i64, stop: i64, rev: bool) -> Result<Vec<(Vec<u8>, f64)>> {
        let Some((start, stop)) = super::list::normalize_range(start, stop, self.t.len) else {
            return Ok(Vec::new());
        };
        self.scan_all(rev)
            .skip(start)
            .take(stop - start + 1)
            .map(|r| r.map(|(s, m)| (m, s)))
            .collect()
    }

    /// ZRANGEBYSCORE / ZREVRANGEBYSCORE：闭区间，`rev` 时从 `max` 往 `min` 走
    pub fn range_by_score(
        &self,
        min: f64,
        max: f64,
        rev: bool,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        check_score(min)?;
        check_score(max)?;
        if !self.t.exists || min > max {
            return Ok(Vec::new());
        }
        self.scan_scores(min, max, rev)
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(|r| r.map(|(s, m)| (m, s)))
            .collect()
    }

    /// ZRANK / ZREVRANK
    pub fn rank(&self, member: &[u8], rev: bool) -> Result<Option<i64>> {
        if self.score(member)?.is_none() {
            return Ok(None);
        }
        for (i, item) in self.scan_all(rev).enumerate() {
            let (_, m) = item?;
            if m == member {
                return Ok(Some(i as i64));
            }
        }
        Ok(None)
    }

    /// ZCOUNT，闭区间
    pub fn count(&self, min: f64, max: f64) -> Result<i64> {
        check_score(min)?;
        check_score(max)?;
        if !self.t.exists || min > max {
            return Ok(0);
        }
        let mut n = 0;
        for item in self.scan_scores(min, max, false) {
            item?;
            n += 1;
        }
        Ok(n)
    }

    /// 删除整个 zset，两个索引都交给 GC
    pub fn destroy(&mut self) {
        self.t.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::test_support::*;

    fn members(v: Vec<(Vec<u8>, f64)>) -> Vec<String> {
        v.into_iter().map(|(m, _)| String::from_utf8(m).unwrap()).collect()
    }

    #[test]
    fn test_add_updates_both_indexes() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        let mut z = txn.zset(b"z")?;
        assert_eq!(z.add(&[(1.0, "a"), (2.0, "b")])?, 2);
        assert_eq!(z.add(&[(3.0, "a"), (0.5, "c")])?, 1);
        assert_eq!(z.card(), 3);
        assert_eq!(z.score(b"a")?, Some(3.0));
        let id = z.object().id;
        txn.commit()?;

        let txn = begin(&st);
        // 两份索引的条目数都等于成员数
        assert_eq!(count_prefix(&txn, &txn.keys().data_prefix(&id)), 3);
        assert_eq!(count_prefix(&txn, &txn.keys().score_prefix(&id)), 3);
        let z = txn.zset(b"z")?;
        assert_eq!(members(z.range(0, -1, false)?), vec!["c", "b", "a"]);
        Ok(())
    }

    #[test]
    fn test_nan_rejected() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        let mut z = txn.zset(b"z")?;
        assert!(matches!(z.add(&[(1.0, "ok"), (f64::NAN, "bad")]), Err(Error::InvalidArgument(_))));
        assert!(!z.exists());
        z.add(&[(f64::INFINITY, "top")])?;
        assert!(matches!(z.incr_by(b"top", f64::NEG_INFINITY), Err(Error::InvalidArgument(_))));
        Ok(())
    }

    #[test]
    fn test_negative_scores_order() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        let mut z = txn.zset(b"z")?;
        z.add(&[(-1.5, "n"), (0.0, "zero"), (-0.0, "negzero"), (2.0, "p"), (-100.0, "min")])?;
        let all = z.range(0, -1, false)?;
        assert_eq!(members(all.clone()), vec!["min", "n", "negzero", "zero", "p"]);
        assert_eq!(members(z.range(0, 1, true)?), vec!["p", "zero"]);
        assert_eq!(members(z.range(-2, -1, false)?), vec!["zero", "p"]);
        Ok(())
    }

    #[test]
    fn test_range_by_score_and_count() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        let mut z = txn.zset(b"z")?;
        z.add(&[(1.0, "a"), (2.0, "b"), (2.0, "bb"), (3.0, "c"), (4.0, "d")])?;
        assert_eq!(members(z.range_by_score(2.0, 3.0, false, 0, None)?), vec!["b", "bb", "c"]);
        assert_eq!(members(z.range_by_score(2.0, 3.0, true, 0, None)?), vec!["c", "bb", "b"]);
        assert_eq!(members(z.range_by_score(1.0, 4.0, false, 1, Some(2))?), vec!["b", "bb"]);
        assert!(z.range_by_score(5.0, 1.0, false, 0, None)?.is_empty());
        assert_eq!(z.count(2.0, 2.0)?, 2);
        assert_eq!(z.count(f64::NEG_INFINITY, f64::INFINITY)?, 5);
        Ok(())
    }

    #[test]
    fn test_rank_incr_remove() -> Result<()> {
        let st = make_storage();
        let txn = begin(&st);
        let mut z = txn.zset(b"z")?;
        z.add(&[(1.0, "a"), (2.0, "b"), (3.0, "c")])?;
        assert_eq!(z.rank(b"a", false)?, Some(0));
        assert_eq!(z.rank(b"a", true)?, Some(2));
        assert_eq!(z.rank(b"x", false)?, None);

        assert_eq!(z.incr_by(b"a", 10.0)?, 11.0);
        assert_eq!(z.rank(b"a", false)?, Some(2));
        assert_eq!(z.incr_by(b"new", 1.5)?, 1.5);
        assert_eq!(z.card(), 4);

        let id = z.object().id;
        assert_eq!(z.remove(&["a", "b", "missing"])?, 2);
        assert_eq!(z.card(), 2);
        assert_eq!(count_prefix(&txn, &txn.keys().score_prefix(&id)), 2);
        assert_eq!(z.remove(&["c", "new"])?, 2);
        assert!(!z.exists());
        assert_eq!(count_prefix(&txn, &txn.keys().score_prefix(&id)), 0);
        Ok(())
    }
}
