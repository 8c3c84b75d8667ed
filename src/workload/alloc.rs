use std::alloc::{self, Layout};

use super::{Step, Workload};
use crate::error::Error;

/// Request sizes cycled through each round.
pub const ALLOCATION_SIZES: [usize; 12] = [3, 31, 16, 128, 1, 2015, 30, 290, 100, 2, 496, 1531];

/// Allocates and immediately frees every size in [`ALLOCATION_SIZES`], for a
/// fixed number of rounds. Counts one step per allocate/free pair.
pub struct AllocChurn {
    rounds: u32,
    round: u32,
    index: usize,
}

impl AllocChurn {
    pub fn new(rounds: u32) -> Self {
        Self {
            rounds,
            round: 0,
            index: 0,
        }
    }
}

impl Workload for AllocChurn {
    fn step(&mut self) -> Result<Step, Error> {
        if self.round >= self.rounds {
            return Ok(Step::Done);
        }

        let size = ALLOCATION_SIZES[self.index];
        let layout = Layout::from_size_align(size, 1)
            .map_err(|e| Error::Exhausted(format!("bad layout for {} bytes: {}", size, e)))?;

        // SAFETY: every size in the table is non-zero.
        let ptr = unsafe { alloc::alloc(layout) };
        if ptr.is_null() {
            return Err(Error::Exhausted(format!("allocation of {} bytes failed", size)));
        }
        // SAFETY: `ptr` was just returned by `alloc` with this layout.
        unsafe { alloc::dealloc(ptr, layout) };

        self.index += 1;
        if self.index == ALLOCATION_SIZES.len() {
            self.index = 0;
            self.round += 1;
        }
        Ok(Step::Counted)
    }
}
