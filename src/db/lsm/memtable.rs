use std::collections::BTreeMap;

/// Sorted in-memory write buffer. `bytes` is the sum of key and value lengths.
#[derive(Default)]
pub struct MemTable {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    bytes: usize,
}

impl MemTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        match self.map.get_mut(key) {
            Some(old) => {
                self.bytes = self.bytes - old.len() + value.len();
                *old = value.to_vec();
            }
            None => {
                self.bytes += key.len() + value.len();
                self.map.insert(key.to_vec(), value.to_vec());
            }
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(|v| v.as_slice())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.map.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_bytes_across_overwrites() {
        let mut m = MemTable::new();
        m.insert(b"ab", b"1234");
        assert_eq!(m.bytes(), 6);
        m.insert(b"ab", b"1");
        assert_eq!(m.bytes(), 3);
        m.insert(b"c", b"");
        assert_eq!(m.bytes(), 4);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(b"ab"), Some(&b"1"[..]));
        m.clear();
        assert!(m.is_empty());
        assert_eq!(m.bytes(), 0);
    }

    #[test]
    fn iterates_in_key_order() {
        let mut m = MemTable::new();
        for k in ["b", "a", "c"] {
            m.insert(k.as_bytes(), b"v");
        }
        let keys: Vec<&[u8]> = m.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }
}
