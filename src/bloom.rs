//! Per-store bloom filter wrapper (§4.3). Only the membership contract
//! matters to the rest of the engine — `might_contain` must never produce a
//! false negative — so the three kinds share one thin enum the store
//! consults before opening a reader on a candidate file.

use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use bloomfilter::Bloom;

const FALSE_POSITIVE_RATE: f64 = 0.01;

/// A closed set of bloom filter kinds a store may own (§4.3, §9).
pub enum BloomFilter {
    /// Standard filter: insert-only, never shrinks.
    Plain(Bloom<[u8]>),
    /// Counting filter: a small counter per bit lets entries be removed,
    /// which compaction uses when it drops a key's last surviving copy.
    Counting(CountingBloom),
    /// A plain filter that has been "retouched" — selectively cleared bits
    /// to reduce its false-positive rate after keys are known to be gone.
    Retouched(Bloom<[u8]>),
}

impl BloomFilter {
    pub fn new_plain(expected_items: usize) -> Self {
        BloomFilter::Plain(Bloom::new_for_fp_rate(expected_items.max(1), FALSE_POSITIVE_RATE))
    }

    pub fn new_counting(expected_items: usize) -> Self {
        BloomFilter::Counting(CountingBloom::new(expected_items.max(1), FALSE_POSITIVE_RATE))
    }

    pub fn new_retouched(expected_items: usize) -> Self {
        BloomFilter::Retouched(Bloom::new_for_fp_rate(expected_items.max(1), FALSE_POSITIVE_RATE))
    }

    pub fn insert(&mut self, key: &[u8]) {
        match self {
            BloomFilter::Plain(b) => b.set(key),
            BloomFilter::Counting(c) => c.insert(key),
            BloomFilter::Retouched(b) => b.set(key),
        }
    }

    /// False means "definitely absent"; true means "maybe present".
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match self {
            BloomFilter::Plain(b) => b.check(key),
            BloomFilter::Counting(c) => c.might_contain(key),
            BloomFilter::Retouched(b) => b.check(key),
        }
    }

    /// Remove a key's contribution. A no-op for [`BloomFilter::Plain`],
    /// which cannot shrink.
    pub fn remove(&mut self, key: &[u8]) {
        if let BloomFilter::Counting(c) = self {
            c.remove(key);
        }
    }

    /// Persist to the store's `filter/filter` sidecar (§6).
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let bytes = match self {
            BloomFilter::Plain(b) => encode(0, &encode_plain(b)),
            BloomFilter::Counting(c) => encode(1, &c.to_bytes()),
            BloomFilter::Retouched(b) => encode(2, &encode_plain(b)),
        };
        let mut f = File::create(path)?;
        f.write_all(&bytes)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut f = File::open(path)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        let (tag, rest) = decode(&buf)?;
        match tag {
            0 => Ok(BloomFilter::Plain(decode_plain(rest)?)),
            1 => Ok(BloomFilter::Counting(CountingBloom::from_bytes(rest)?)),
            2 => Ok(BloomFilter::Retouched(decode_plain(rest)?)),
            _ => Err(invalid_data("unknown bloom filter kind tag")),
        }
    }
}

/// `Bloom` has no built-in serialization in this version of the crate; encode
/// its reconstruction parameters (bit count, hash count, sip keys) followed
/// by the raw bitmap so `from_existing` can rebuild it byte-for-byte.
fn encode_plain(b: &Bloom<[u8]>) -> Vec<u8> {
    let keys = b.sip_keys();
    let mut out = Vec::new();
    out.extend_from_slice(&b.number_of_bits().to_be_bytes());
    out.extend_from_slice(&b.number_of_hash_functions().to_be_bytes());
    for (k0, k1) in keys {
        out.extend_from_slice(&k0.to_be_bytes());
        out.extend_from_slice(&k1.to_be_bytes());
    }
    out.extend_from_slice(&b.bitmap());
    out
}

fn decode_plain(buf: &[u8]) -> std::io::Result<Bloom<[u8]>> {
    if buf.len() < 44 {
        return Err(invalid_data("truncated bloom filter"));
    }
    let bitmap_bits = u64::from_be_bytes(buf[0..8].try_into().unwrap());
    let k_num = u32::from_be_bytes(buf[8..12].try_into().unwrap());
    let sip_keys = [
        (
            u64::from_be_bytes(buf[12..20].try_into().unwrap()),
            u64::from_be_bytes(buf[20..28].try_into().unwrap()),
        ),
        (
            u64::from_be_bytes(buf[28..36].try_into().unwrap()),
            u64::from_be_bytes(buf[36..44].try_into().unwrap()),
        ),
    ];
    Ok(Bloom::from_existing(&buf[44..], bitmap_bits, k_num, sip_keys))
}

fn encode(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(tag);
    out.extend_from_slice(body);
    out
}

fn decode(buf: &[u8]) -> std::io::Result<(u8, &[u8])> {
    if buf.is_empty() {
        return Err(invalid_data("empty bloom filter file"));
    }
    Ok((buf[0], &buf[1..]))
}

fn invalid_data(msg: impl ToString) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

/// Hand-rolled counting variant: one small counter per bit position,
/// double-hashed the way the pack's standalone bloom implementations do
/// (`h(i) = h1 + i * h2`, both halves from a splitting of a 64-bit hash).
pub struct CountingBloom {
    counters: Vec<u8>,
    num_bits: u64,
    num_hashes: u32,
}

impl CountingBloom {
    fn new(expected_items: usize, fp_rate: f64) -> Self {
        let n = expected_items as f64;
        let m = (-n * fp_rate.ln() / std::f64::consts::LN_2.powi(2)).ceil() as u64;
        let m = m.max(8);
        let k = ((m as f64 / n) * std::f64::consts::LN_2).ceil() as u32;
        let k = k.max(1);
        CountingBloom {
            counters: vec![0u8; m as usize],
            num_bits: m,
            num_hashes: k,
        }
    }

    fn positions(&self, key: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let (h1, h2) = split_hash(key);
        (0..self.num_hashes).map(move |i| {
            let combined = h1.wrapping_add((i as u64).wrapping_mul(h2));
            (combined % self.num_bits) as usize
        })
    }

    fn insert(&mut self, key: &[u8]) {
        for pos in self.positions(key).collect::<Vec<_>>() {
            self.counters[pos] = self.counters[pos].saturating_add(1);
        }
    }

    fn remove(&mut self, key: &[u8]) {
        for pos in self.positions(key).collect::<Vec<_>>() {
            self.counters[pos] = self.counters[pos].saturating_sub(1);
        }
    }

    fn might_contain(&self, key: &[u8]) -> bool {
        self.positions(key).all(|pos| self.counters[pos] > 0)
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.counters.len());
        out.extend_from_slice(&self.num_bits.to_be_bytes());
        out.extend_from_slice(&self.num_hashes.to_be_bytes());
        out.extend_from_slice(&self.counters);
        out
    }

    fn from_bytes(buf: &[u8]) -> std::io::Result<Self> {
        if buf.len() < 12 {
            return Err(invalid_data("truncated counting bloom filter"));
        }
        let num_bits = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let num_hashes = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let counters = buf[12..].to_vec();
        Ok(CountingBloom {
            counters,
            num_bits,
            num_hashes,
        })
    }
}

fn split_hash(key: &[u8]) -> (u64, u64) {
    use std::hash::{Hash, Hasher};
    let mut h1 = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut h1);
    let first = h1.finish();
    let mut h2 = std::collections::hash_map::DefaultHasher::new();
    (key, 0x9e3779b97f4a7c15u64).hash(&mut h2);
    let second = h2.finish() | 1;
    (first, second)
}
