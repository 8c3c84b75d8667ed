use super::{Step, Workload};
use crate::error::Error;

/// Does nothing but count. Its final counter measures how much CPU time the
/// scheduler granted the thread.
pub struct IdleCounter;

impl Workload for IdleCounter {
    #[inline(always)]
    fn step(&mut self) -> Result<Step, Error> {
        Ok(Step::Counted)
    }
}
