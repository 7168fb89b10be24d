// SPDX-License-Identifier: GPL-2.0-or-later

use common::Subsample;

/// Accumulates clear/protected spans in byte-offset order and emits
/// [`Subsample`] entries, applying the CENC 16-byte alignment rule: a
/// protected span shorter than one block, or the trailing remainder of one
/// that isn't a multiple of 16 bytes, folds back into the clear run that
/// precedes it rather than becoming its own undersized cipher span.
///
/// Non-pattern schemes (`cenc`/`cens`/`cbc1`) require this folding; `cbcs`
/// does not (`align: false` turns every `add_protected` call into its own
/// subsample with no rounding).
pub struct SubsampleBuilder {
    pending_clear: u64,
    out: Vec<Subsample>,
    align: bool,
}

impl SubsampleBuilder {
    #[must_use]
    pub fn new(align: bool) -> Self {
        Self {
            pending_clear: 0,
            out: Vec::new(),
            align,
        }
    }

    pub fn add_clear(&mut self, n: u64) {
        self.pending_clear += n;
    }

    pub fn add_protected(&mut self, n: u64) {
        if n == 0 {
            return;
        }
        if !self.align {
            self.push(self.pending_clear, n);
            self.pending_clear = 0;
            return;
        }
        let residue = n % 16;
        let cipher = n - residue;
        self.pending_clear += residue;
        if cipher > 0 {
            self.push(self.pending_clear, cipher);
            self.pending_clear = 0;
        }
    }

    fn push(&mut self, mut clear: u64, cipher: u64) {
        while clear > u64::from(u16::MAX) {
            self.out.push(Subsample {
                clear_bytes: u16::MAX,
                cipher_bytes: 0,
            });
            clear -= u64::from(u16::MAX);
        }
        #[allow(clippy::as_conversions)]
        self.out.push(Subsample {
            clear_bytes: clear as u16,
            cipher_bytes: cipher as u32,
        });
    }

    #[must_use]
    pub fn finish(mut self) -> Vec<Subsample> {
        if self.pending_clear > 0 || self.out.is_empty() {
            self.push(self.pending_clear, 0);
        }
        self.out
    }
}
