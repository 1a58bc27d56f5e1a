// src/types/list/distributed.rs

//! Distributed list: one data key per element.
//!
//! The selector of each data key is the sortable encoding of an `f64` position, so a
//! prefix scan yields the elements in list order. The meta tail tracks
//! `len:i64 | lindex:f64 | rindex:f64`, the positions of the current head and tail.
//!
//! Positions are never rebalanced: once the midpoint between two neighbours can no
//! longer be represented, `insert` fails with `PrecisionExhausted`.

use crate::codec;
use crate::engine::kv::KvTxn;
use crate::error::{Error, Result};
use crate::keys::DbKeys;
use crate::txn::Transaction;
use crate::types::object::{decode_len, Encoding, Object, ObjectType};

use super::{normalize_index, normalize_range};

const TAIL_LEN: usize = 24;

pub struct DistributedList<'a> {
    txn: &'a Transaction,
    meta_key: Vec<u8>,
    obj: Object,
    len: i64,
    lindex: f64,
    rindex: f64,
    exists: bool,
}

/// (position, data key, value)
type Slot = (f64, Vec<u8>, Vec<u8>);

fn read_f64(b: &[u8]) -> Result<f64> {
    let raw: [u8; 8] = b
        .try_into()
        .map_err(|_| Error::InvalidEncoding("truncated list index".into()))?;
    Ok(f64::from_bits(u64::from_be_bytes(raw)))
}

fn encode_tail(len: i64, lindex: f64, rindex: f64) -> Vec<u8> {
    let mut tail = Vec::with_capacity(TAIL_LEN);
    tail.extend_from_slice(&len.to_be_bytes());
    tail.extend_from_slice(&lindex.to_bits().to_be_bytes());
    tail.extend_from_slice(&rindex.to_bits().to_be_bytes());
    tail
}

/// Write `items` at positions `0.0, 1.0, ...` plus the meta value, keeping `obj` as is
/// (id, timestamps and expiry survive the conversion).
pub(crate) fn write_layout(kv: &KvTxn, keys: &DbKeys, meta_key: &[u8], obj: &Object, items: &[Vec<u8>]) {
    for (i, item) in items.iter().enumerate() {
        kv.set(&keys.data_key(&obj.id, &codec::encode_f64(i as f64)), item);
    }
    let rindex = items.len().saturating_sub(1) as f64;
    let mut val = obj.encode();
    val.extend_from_slice(&encode_tail(items.len() as i64, 0.0, rindex));
    kv.set(meta_key, &val);
}

fn midpoint(lo: f64, hi: f64) -> Result<f64> {
    let mid = lo + (hi - lo) / 2.0;
    if mid <= lo || mid >= hi {
        return Err(Error::PrecisionExhausted);
    }
    Ok(mid)
}

impl<'a> DistributedList<'a> {
    pub(crate) fn empty(txn: &'a Transaction, meta_key: Vec<u8>) -> Self {
        DistributedList {
            txn,
            meta_key,
            obj: Object::new(ObjectType::List, Encoding::Distributed, txn.now()),
            len: 0,
            lindex: 0.0,
            rindex: 0.0,
            exists: false,
        }
    }

    pub(crate) fn load(txn: &'a Transaction, meta_key: Vec<u8>, obj: Object, tail: &[u8]) -> Result<Self> {
        if tail.len() < TAIL_LEN {
            return Err(Error::InvalidEncoding(format!(
                "distributed list tail needs {} bytes, got {}",
                TAIL_LEN,
                tail.len()
            )));
        }
        Ok(DistributedList {
            txn,
            meta_key,
            obj,
            len: decode_len(tail)?,
            lindex: read_f64(&tail[8..16])?,
            rindex: read_f64(&tail[16..24])?,
            exists: true,
        })
    }

    pub(crate) fn build(txn: &'a Transaction, meta_key: Vec<u8>, obj: Object, items: &[Vec<u8>]) -> Self {
        write_layout(txn.kv(), txn.keys(), &meta_key, &obj, items);
        DistributedList {
            txn,
            meta_key,
            obj,
            len: items.len() as i64,
            lindex: 0.0,
            rindex: items.len().saturating_sub(1) as f64,
            exists: true,
        }
    }

    pub fn object(&self) -> &Object {
        &self.obj
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn len(&self) -> i64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn slot_key(&self, pos: f64) -> Vec<u8> {
        self.txn.keys().data_key(&self.obj.id, &codec::encode_f64(pos))
    }

    fn scan(&self, rev: bool) -> impl Iterator<Item = Result<Slot>> + '_ {
        let prefix = self.txn.keys().data_prefix(&self.obj.id);
        let plen = prefix.len();
        let iter = if rev {
            self.txn.kv().scan_prefix_reverse(&prefix)
        } else {
            self.txn.kv().scan_prefix(&prefix)
        };
        iter.map(move |r| r.and_then(|(k, v)| Ok((codec::decode_f64(&k[plen..])?, k, v))))
    }

    /// The i-th element, scanning from whichever end is closer.
    fn nth(&self, i: usize) -> Result<Option<Slot>> {
        let len = self.len as usize;
        if i >= len {
            return Ok(None);
        }
        if i <= len / 2 {
            self.scan(false).nth(i).transpose()
        } else {
            self.scan(true).nth(len - 1 - i).transpose()
        }
    }

    fn save(&mut self) {
        if self.len <= 0 {
            if self.exists {
                self.txn.drop_empty(&self.meta_key, &self.obj);
            }
            self.obj = Object::new(ObjectType::List, Encoding::Distributed, self.txn.now());
            self.len = 0;
            self.lindex = 0.0;
            self.rindex = 0.0;
            self.exists = false;
            return;
        }
        let tail = encode_tail(self.len, self.lindex, self.rindex);
        self.obj.touch(self.txn.now());
        self.txn.save_meta(&self.meta_key, &self.obj, &tail);
        self.exists = true;
    }

    /// Re-read the head and tail positions after elements were removed from arbitrary places.
    fn refresh_bounds(&mut self) -> Result<()> {
        if self.len <= 0 {
            return Ok(());
        }
        let first = self.scan(false).next().transpose()?;
        if let Some((pos, _, _)) = first {
            self.lindex = pos;
        }
        let last = self.scan(true).next().transpose()?;
        if let Some((pos, _, _)) = last {
            self.rindex = pos;
        }
        Ok(())
    }

    pub fn lpush<V: AsRef<[u8]>>(&mut self, values: &[V]) -> Result<i64> {
        for v in values {
            if self.len == 0 {
                self.lindex = 0.0;
                self.rindex = 0.0;
            } else {
                self.lindex -= 1.0;
            }
            self.txn.kv().set(&self.slot_key(self.lindex), v.as_ref());
            self.len += 1;
        }
        self.save();
        Ok(self.len)
    }

    pub fn rpush<V: AsRef<[u8]>>(&mut self, values: &[V]) -> Result<i64> {
        for v in values {
            if self.len == 0 {
                self.lindex = 0.0;
                self.rindex = 0.0;
            } else {
                self.rindex += 1.0;
            }
            self.txn.kv().set(&self.slot_key(self.rindex), v.as_ref());
            self.len += 1;
        }
        self.save();
        Ok(self.len)
    }

    fn pop(&mut self, rev: bool) -> Result<Option<Vec<u8>>> {
        if self.len == 0 {
            return Ok(None);
        }
        let key = self.slot_key(if rev { self.rindex } else { self.lindex });
        let value = self
            .txn
            .kv()
            .get(&key)?
            .ok_or_else(|| Error::InvalidEncoding("list boundary points at a missing element".into()))?;
        self.txn.kv().delete(&key);
        self.len -= 1;
        if self.len > 0 {
            // 边界删掉之后，同方向扫到的第一个元素就是新的边界
            let (pos, _, _) = self
                .scan(rev)
                .next()
                .transpose()?
                .ok_or_else(|| Error::InvalidEncoding("list length exceeds stored elements".into()))?;
            if rev {
                self.rindex = pos;
            } else {
                self.lindex = pos;
            }
        }
        self.save();
        Ok(Some(value))
    }

    pub fn lpop(&mut self) -> Result<Option<Vec<u8>>> {
        self.pop(false)
    }

    pub fn rpop(&mut self) -> Result<Option<Vec<u8>>> {
        self.pop(true)
    }

    pub fn index(&self, index: i64) -> Result<Option<Vec<u8>>> {
        let Some(i) = normalize_index(index, self.len) else {
            return Ok(None);
        };
        Ok(self.nth(i)?.map(|(_, _, v)| v))
    }

    pub fn set(&mut self, index: i64, value: &[u8]) -> Result<()> {
        let i = normalize_index(index, self.len).ok_or(Error::OutOfRange)?;
        let (_, key, _) = self.nth(i)?.ok_or(Error::OutOfRange)?;
        self.txn.kv().set(&key, value);
        self.save();
        Ok(())
    }

    pub fn insert(&mut self, pivot: &[u8], value: &[u8], before: bool) -> Result<Option<i64>> {
        let mut iter = self.scan(false);
        let mut prev = None;
        let mut found = None;
        for item in iter.by_ref() {
            let (pos, _, v) = item?;
            if v == pivot {
                found = Some(pos);
                break;
            }
            prev = Some(pos);
        }
        let Some(at) = found else {
            return Ok(None);
        };
        let pos = if before {
            match prev {
                Some(lo) => midpoint(lo, at)?,
                None => at - 1.0,
            }
        } else {
            match iter.next().transpose()? {
                Some((hi, _, _)) => midpoint(at, hi)?,
                None => at + 1.0,
            }
        };
        drop(iter);
        self.lindex = self.lindex.min(pos);
        self.rindex = self.rindex.max(pos);
        self.txn.kv().set(&self.slot_key(pos), value);
        self.len += 1;
        self.save();
        Ok(Some(self.len))
    }

    pub fn range(&self, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let Some((s, e)) = normalize_range(start, stop, self.len) else {
            return Ok(Vec::new());
        };
        self.scan(false)
            .skip(s)
            .take(e - s + 1)
            .map(|r| r.map(|(_, _, v)| v))
            .collect()
    }

    pub fn trim(&mut self, start: i64, stop: i64) -> Result<()> {
        let keep = normalize_range(start, stop, self.len);
        let slots: Vec<Slot> = self.scan(false).collect::<Result<_>>()?;
        for (i, (_, key, _)) in slots.iter().enumerate() {
            if !keep.is_some_and(|(s, e)| (s..=e).contains(&i)) {
                self.txn.kv().delete(key);
            }
        }
        match keep {
            Some((s, e)) => {
                self.lindex = slots[s].0;
                self.rindex = slots[e].0;
                self.len = (e - s + 1) as i64;
            }
            None => self.len = 0,
        }
        self.save();
        Ok(())
    }

    pub fn remove(&mut self, count: i64, value: &[u8]) -> Result<i64> {
        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let mut hits = Vec::new();
        for item in self.scan(count < 0) {
            let (_, key, v) = item?;
            if v == value {
                hits.push(key);
                if hits.len() >= limit {
                    break;
                }
            }
        }
        if hits.is_empty() {
            return Ok(0);
        }
        for key in &hits {
            self.txn.kv().delete(key);
        }
        self.len -= hits.len() as i64;
        self.refresh_bounds()?;
        self.save();
        Ok(hits.len() as i64)
    }

    /// Delete the list; its data keys are handed to the GC.
    pub fn destroy(&mut self) {
        if self.exists {
            self.txn.destroy(&self.meta_key, &self.obj);
        }
        self.obj = Object::new(ObjectType::List, Encoding::Distributed, self.txn.now());
        self.len = 0;
        self.lindex = 0.0;
        self.rindex = 0.0;
        self.exists = false;
    }
}
