use std::hint::black_box;

use super::{Step, Workload};
use crate::error::Error;

/// Fixed-cost integer hash. Every step feeds the previous result back in, and
/// both ends pass through `black_box`, so the loop body cannot be folded away.
pub struct CpuLoop {
    state: u32,
}

impl CpuLoop {
    pub fn new(slot: usize) -> Self {
        Self {
            state: (slot as u32).wrapping_mul(0x9E37_79B9) | 1,
        }
    }
}

fn mix(x: u32, seed: u32) -> u32 {
    let mut v = (seed << 13) ^ seed;
    v = x
        .wrapping_mul(v.wrapping_mul(v).wrapping_mul(15731).wrapping_add(789_221))
        .wrapping_add(1_376_312_589);
    v / 152
}

impl Workload for CpuLoop {
    #[inline]
    fn step(&mut self) -> Result<Step, Error> {
        let x = black_box(self.state);
        self.state = black_box(mix(x, x.rotate_left(7)));
        Ok(Step::Counted)
    }
}
