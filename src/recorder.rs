//! Recorder glue (Component H, interface only, §6). The real implementation — building
//! secondary command buffers from a scene/material layer — is out of scope; this fixes the
//! call shape the frame executor drives during a pass's record phase.

use anyhow::Result;

use crate::vulkan::command::CommandBuffer;

/// Appends secondary command buffers in submission order for one subpass/compute pass.
pub trait Recorder {
    /// Called once per frame before any `record` call on this recorder.
    fn reset(&mut self) -> Result<()>;

    /// Records into `primary_cmd` (or an internally managed secondary spliced in via
    /// `CommandBuffer::execute_secondary`) for the given subpass/order index.
    fn record(&mut self, order: u32, primary_cmd: &CommandBuffer) -> Result<()>;
}

#[cfg(test)]
pub(crate) struct NullRecorder {
    pub(crate) reset_calls: u32,
    pub(crate) record_calls: Vec<u32>,
}

#[cfg(test)]
impl NullRecorder {
    pub(crate) fn new() -> Self {
        Self {
            reset_calls: 0,
            record_calls: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Recorder for NullRecorder {
    fn reset(&mut self) -> Result<()> {
        self.reset_calls += 1;
        Ok(())
    }

    fn record(&mut self, order: u32, _primary_cmd: &CommandBuffer) -> Result<()> {
        self.record_calls.push(order);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_recorder_tracks_calls() {
        let mut recorder = NullRecorder::new();
        recorder.reset().unwrap();
        assert_eq!(recorder.reset_calls, 1);
    }
}
