//! Compressed color sets.
//!
//! A color set records which input files (colors) contain the k-mers of one
//! unitig. Small sets stay inline in a fixed-capacity vector; on overflow
//! they are promoted to a roaring bitmap. `optimize` renormalizes a set
//! after a burst of insertions.

use std::io::{Read, Write};

use anyhow::{bail, Context, Result};
use roaring::RoaringBitmap;
use smallvec::SmallVec;

/// Inline capacity before promotion to a bitmap.
const INLINE_MAX: usize = 8;

const TAG_SMALL: u8 = 0;
const TAG_BITMAP: u8 = 1;

/// A set of color identifiers.
#[derive(Debug, Clone)]
pub enum ColorSet {
    Small(SmallVec<[u32; INLINE_MAX]>),
    Bitmap(RoaringBitmap),
}

impl Default for ColorSet {
    fn default() -> Self {
        ColorSet::Small(SmallVec::new())
    }
}

impl ColorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `color`, promoting to a bitmap when the inline vector is full.
    pub fn add(&mut self, color: u32) {
        match self {
            ColorSet::Small(v) => {
                if v.contains(&color) {
                    return;
                }
                if v.len() < INLINE_MAX {
                    v.push(color);
                } else {
                    let mut bm = RoaringBitmap::new();
                    for &c in v.iter() {
                        bm.insert(c);
                    }
                    bm.insert(color);
                    *self = ColorSet::Bitmap(bm);
                }
            }
            ColorSet::Bitmap(bm) => {
                bm.insert(color);
            }
        }
    }

    pub fn contains(&self, color: u32) -> bool {
        match self {
            ColorSet::Small(v) => v.contains(&color),
            ColorSet::Bitmap(bm) => bm.contains(color),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColorSet::Small(v) => v.len(),
            ColorSet::Bitmap(bm) => bm.len() as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The colors in ascending order.
    pub fn to_vec(&self) -> Vec<u32> {
        let mut out: Vec<u32> = match self {
            ColorSet::Small(v) => v.to_vec(),
            ColorSet::Bitmap(bm) => bm.iter().collect(),
        };
        out.sort_unstable();
        out
    }

    /// Renormalize: order the inline form, demote a bitmap that shrank back
    /// under the inline capacity.
    pub fn optimize(&mut self) {
        match self {
            ColorSet::Small(v) => {
                v.sort_unstable();
                v.dedup();
            }
            ColorSet::Bitmap(bm) => {
                if bm.len() <= INLINE_MAX as u64 {
                    let v: SmallVec<[u32; INLINE_MAX]> = bm.iter().collect();
                    *self = ColorSet::Small(v);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Serialization
    // -----------------------------------------------------------------------

    /// Format: `[tag: u8]`, then either `[count: u32 LE][colors: u32 LE...]`
    /// or `[byte_len: u64 LE][roaring bitmap bytes]`.
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        match self {
            ColorSet::Small(v) => {
                w.write_all(&[TAG_SMALL])?;
                w.write_all(&(v.len() as u32).to_le_bytes())?;
                let mut sorted = v.to_vec();
                sorted.sort_unstable();
                for c in sorted {
                    w.write_all(&c.to_le_bytes())?;
                }
            }
            ColorSet::Bitmap(bm) => {
                w.write_all(&[TAG_BITMAP])?;
                w.write_all(&(bm.serialized_size() as u64).to_le_bytes())?;
                bm.serialize_into(&mut *w)
                    .context("failed to serialize color bitmap")?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut tag = [0u8; 1];
        r.read_exact(&mut tag)
            .context("failed to read color set tag")?;
        match tag[0] {
            TAG_SMALL => {
                let mut buf = [0u8; 4];
                r.read_exact(&mut buf)?;
                let count = u32::from_le_bytes(buf) as usize;
                let mut v = SmallVec::new();
                for _ in 0..count {
                    r.read_exact(&mut buf)?;
                    v.push(u32::from_le_bytes(buf));
                }
                Ok(ColorSet::Small(v))
            }
            TAG_BITMAP => {
                let mut buf = [0u8; 8];
                r.read_exact(&mut buf)?;
                let len = u64::from_le_bytes(buf) as usize;
                let mut bytes = vec![0u8; len];
                r.read_exact(&mut bytes)?;
                let bm = RoaringBitmap::deserialize_from(&bytes[..])
                    .context("failed to deserialize color bitmap")?;
                Ok(ColorSet::Bitmap(bm))
            }
            other => bail!("invalid color set tag {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_contains() {
        let mut cs = ColorSet::new();
        assert!(cs.is_empty());
        cs.add(3);
        cs.add(1);
        cs.add(3);
        assert_eq!(cs.len(), 2);
        assert!(cs.contains(1));
        assert!(cs.contains(3));
        assert!(!cs.contains(2));
    }

    #[test]
    fn test_promotion_to_bitmap() {
        let mut cs = ColorSet::new();
        for c in 0..20 {
            cs.add(c);
        }
        assert!(matches!(cs, ColorSet::Bitmap(_)));
        assert_eq!(cs.len(), 20);
        for c in 0..20 {
            assert!(cs.contains(c));
        }
        assert_eq!(cs.to_vec(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_optimize_orders_small() {
        let mut cs = ColorSet::new();
        cs.add(5);
        cs.add(1);
        cs.add(3);
        cs.optimize();
        assert_eq!(cs.to_vec(), vec![1, 3, 5]);
    }

    #[test]
    fn test_roundtrip_small() {
        let mut cs = ColorSet::new();
        cs.add(7);
        cs.add(2);
        let mut buf = Vec::new();
        cs.write_to(&mut buf).unwrap();
        let back = ColorSet::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.to_vec(), vec![2, 7]);
    }

    #[test]
    fn test_roundtrip_bitmap() {
        let mut cs = ColorSet::new();
        for c in 0..100 {
            cs.add(c * 3);
        }
        let mut buf = Vec::new();
        cs.write_to(&mut buf).unwrap();
        let back = ColorSet::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.to_vec(), cs.to_vec());
        assert!(matches!(back, ColorSet::Bitmap(_)));
    }

    #[test]
    fn test_invalid_tag_rejected() {
        let buf = [9u8, 0, 0, 0, 0];
        assert!(ColorSet::read_from(&mut &buf[..]).is_err());
    }
}
