//! Source-position table codec.
//!
//! The loader stores line information as a sequence of byte pairs
//! `(offset delta, line delta)` relative to the routine's first line. A
//! delta wider than one byte is split across saturating pairs: offset
//! overflow repeats `(255, 0)`, line overflow carries the real offset delta
//! on the first pair and repeats `(0, 255)` after it. A pair of two zeros
//! never appears.

/// Iterate over the raw (offset delta, line delta) pairs of a table.
///
/// A trailing odd byte is ignored.
pub fn pairs(table: &[u8]) -> impl Iterator<Item = (u8, u8)> + '_ {
    table.chunks_exact(2).map(|pair| (pair[0], pair[1]))
}

/// Expand a table into a per-offset line lookup for a stream of `code_len`
/// bytes. Entry `i` is the source line (relative to the routine's first
/// line) active at byte offset `i`: the line changes at each accumulated
/// offset, not before it.
pub fn line_map(table: &[u8], code_len: usize) -> Vec<u32> {
    let mut map = vec![0u32; code_len];
    let mut addr = 0usize;
    let mut line = 0u32;

    for (addr_delta, line_delta) in pairs(table) {
        let next_addr = addr + addr_delta as usize;
        for offset in addr..next_addr.min(code_len) {
            map[offset] = line;
        }
        addr = next_addr;
        line += line_delta as u32;
    }
    for offset in addr.min(code_len)..code_len {
        map[offset] = line;
    }
    map
}

/// Collapse redundant entries for comparison purposes: zero-line pairs merge
/// into their predecessor when the combined offset delta still fits a byte,
/// and a lone zero-line pair disappears entirely. The reference loader
/// emits such entries for single-line bodies; two tables that agree after
/// collapsing describe the same lines for every instruction.
pub fn simplified(table: &[u8]) -> Vec<(u32, u32)> {
    let raw: Vec<(u32, u32)> = pairs(table)
        .map(|(addr, line)| (addr as u32, line as u32))
        .collect();
    if raw.len() == 1 && raw[0].1 == 0 {
        return Vec::new();
    }

    let mut out: Vec<(u32, u32)> = Vec::new();
    for (addr, line) in raw {
        match out.last_mut() {
            Some(prev) if line == 0 && prev.0 + addr < 256 => prev.0 += addr,
            _ => out.push((addr, line)),
        }
    }
    out
}

/// Builds a position table from (instruction offset, line) events.
///
/// Offsets must be fed in increasing order. Events that do not change the
/// line emit nothing; a line that moves backwards cannot be expressed in
/// the delta format, so the builder resynchronizes silently and later
/// increases are encoded relative to the new position.
#[derive(Debug, Default)]
pub struct LineTableBuilder {
    bytes: Vec<u8>,
    prev_addr: u32,
    prev_line: u32,
}

impl LineTableBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the instruction at `offset` is on `line`
    pub fn record(&mut self, offset: u32, line: u32) {
        if line == self.prev_line {
            return;
        }
        if line < self.prev_line {
            self.prev_addr = offset;
            self.prev_line = line;
            return;
        }

        let mut addr_delta = offset.saturating_sub(self.prev_addr);
        let mut line_delta = line - self.prev_line;
        while addr_delta > 255 {
            self.bytes.extend_from_slice(&[255, 0]);
            addr_delta -= 255;
        }
        while line_delta > 255 {
            self.bytes.extend_from_slice(&[addr_delta as u8, 255]);
            addr_delta = 0;
            line_delta -= 255;
        }
        if addr_delta > 0 || line_delta > 0 {
            self.bytes.extend_from_slice(&[addr_delta as u8, line_delta as u8]);
        }

        self.prev_addr = offset;
        self.prev_line = line;
    }

    /// Whether nothing has been emitted yet
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Finish and return the table bytes
    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_line_map_fills_with_previous_line() {
        // line becomes 1 at offset 4, 3 at offset 6
        let table = [4, 1, 2, 2];
        assert_eq!(line_map(&table, 8), vec![0, 0, 0, 0, 1, 1, 3, 3]);
    }

    #[test]
    fn test_line_map_empty_table() {
        assert_eq!(line_map(&[], 3), vec![0, 0, 0]);
    }

    #[test]
    fn test_builder_emits_only_on_change() {
        let mut builder = LineTableBuilder::new();
        builder.record(0, 0);
        builder.record(3, 1);
        builder.record(6, 1);
        builder.record(9, 2);
        assert_eq!(builder.finish(), vec![3, 1, 6, 1]);
    }

    #[test]
    fn test_builder_splits_wide_offset_delta() {
        let mut builder = LineTableBuilder::new();
        builder.record(300, 1);
        // 300 = 255 + 45
        assert_eq!(builder.finish(), vec![255, 0, 45, 1]);
    }

    #[test]
    fn test_builder_splits_wide_line_delta() {
        let mut builder = LineTableBuilder::new();
        builder.record(10, 600);
        // 600 = 255 + 255 + 90; the real offset delta rides the first pair
        assert_eq!(builder.finish(), vec![10, 255, 0, 255, 0, 90]);
    }

    #[test]
    fn test_builder_never_emits_double_zero() {
        let mut builder = LineTableBuilder::new();
        builder.record(0, 510);
        let table = builder.finish();
        assert_eq!(table, vec![0, 255, 0, 255]);
        assert!(pairs(&table).all(|pair| pair != (0, 0)));
    }

    #[test]
    fn test_builder_resyncs_on_backward_line() {
        let mut builder = LineTableBuilder::new();
        builder.record(0, 5);
        builder.record(4, 2);
        builder.record(8, 3);
        let table = builder.finish();
        // the decrease emits nothing; the later increase is relative to it
        assert_eq!(table, vec![0, 5, 4, 1]);
    }

    #[test]
    fn test_simplified_drops_lone_zero_pair() {
        assert_eq!(simplified(&[6, 0]), Vec::<(u32, u32)>::new());
    }

    #[test]
    fn test_simplified_merges_zero_line_pairs() {
        assert_eq!(simplified(&[3, 1, 4, 0]), vec![(7, 1)]);
        // does not merge when the combined delta would overflow a byte
        assert_eq!(simplified(&[200, 1, 100, 0]), vec![(200, 1), (100, 0)]);
    }

    // Re-encoding a decoded table must describe the same line for every
    // offset, even when the input used suboptimal saturating splits.
    #[test]
    fn test_reencode_preserves_line_map_with_suboptimal_splits() {
        // (0,100),(0,100) is a split the builder would fuse into (0,200)
        let table = [0, 100, 0, 100, 5, 1];
        let code_len = 8;
        let map = line_map(&table, code_len);

        let mut builder = LineTableBuilder::new();
        for (offset, line) in map.iter().enumerate() {
            builder.record(offset as u32, *line);
        }
        let reencoded = builder.finish();
        assert_eq!(line_map(&reencoded, code_len), map);
        assert_eq!(reencoded, vec![0, 200, 5, 1]);
    }

    proptest! {
        #[test]
        fn prop_reencode_is_idempotent_on_line_maps(
            table in proptest::collection::vec(any::<u8>(), 0..64),
            slack in 0usize..16,
        ) {
            let span: usize = pairs(&table).map(|(addr, _)| addr as usize).sum();
            let code_len = span + slack + 1;
            let map = line_map(&table, code_len);

            let mut builder = LineTableBuilder::new();
            for (offset, line) in map.iter().enumerate() {
                builder.record(offset as u32, *line);
            }
            let reencoded = builder.finish();
            prop_assert_eq!(line_map(&reencoded, code_len), map);
        }
    }
}
