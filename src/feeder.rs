use std::sync::Arc;

/// Copies a looping source into the playback buffer
///
/// The whole destination is rewritten on every call, continuing from where the previous call
/// left off in the source.
#[derive(Debug, Clone)]
pub struct Feeder {
    source: Arc<[u8]>,
    /// Byte offset of the next copy, `< source.len()`
    cursor: usize,
}

impl Feeder {
    /// Construct a feeder reading `source` from the start
    ///
    /// `source` must not be empty.
    pub fn new(source: Arc<[u8]>) -> Self {
        debug_assert!(!source.is_empty(), "feeder source must not be empty");
        Self { source, cursor: 0 }
    }

    /// Fill `dst` from the source, wrapping around its end as often as needed
    pub fn feed(&mut self, dst: &mut [u8]) {
        let len = self.source.len();
        let mut written = 0;
        while written < dst.len() {
            let n = (len - self.cursor).min(dst.len() - written);
            dst[written..written + n].copy_from_slice(&self.source[self.cursor..self.cursor + n]);
            written += n;
            self.cursor += n;
            if self.cursor == len {
                self.cursor = 0;
            }
        }
    }

    /// Byte offset into the source of the next copy
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Restart from the beginning of the source
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(len: u8) -> Arc<[u8]> {
        (0..len).collect::<Vec<_>>().into()
    }

    #[test]
    fn fill() {
        let mut f = Feeder::new(source(8));
        let mut buf = [0; 3];

        f.feed(&mut buf);
        assert_eq!(buf, [0, 1, 2]);
        assert_eq!(f.cursor(), 3);

        f.feed(&mut buf);
        assert_eq!(buf, [3, 4, 5]);
        assert_eq!(f.cursor(), 6);
    }

    #[test]
    fn wrap() {
        let mut f = Feeder::new(source(4));
        let mut buf = [0; 3];

        f.feed(&mut buf);
        assert_eq!(buf, [0, 1, 2]);

        f.feed(&mut buf);
        assert_eq!(buf, [3, 0, 1]);
        assert_eq!(f.cursor(), 2);
    }

    #[test]
    fn destination_longer_than_source() {
        let mut f = Feeder::new(source(3));
        let mut buf = [0xff; 8];
        f.feed(&mut buf);
        assert_eq!(buf, [0, 1, 2, 0, 1, 2, 0, 1]);
        assert_eq!(f.cursor(), 2);
    }

    #[test]
    fn cursor_after_many_feeds() {
        const L: usize = 251;
        const K: usize = 64;
        let src = source(L as u8);
        let mut f = Feeder::new(src.clone());
        let mut buf = [0; K];
        for m in 1..=40 {
            let start = f.cursor();
            f.feed(&mut buf);
            assert_eq!(f.cursor(), (m * K) % L);
            for (i, &b) in buf.iter().enumerate() {
                assert_eq!(b, src[(start + i) % L]);
            }
        }
    }

    #[test]
    fn rewind() {
        let mut f = Feeder::new(source(5));
        f.feed(&mut [0; 2]);
        f.rewind();
        let mut buf = [0; 2];
        f.feed(&mut buf);
        assert_eq!(buf, [0, 1]);
    }
}
