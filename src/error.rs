//! Concrete realization of the fatal/skip/warn taxonomy described in the design
//! (see the crate's design ledger, §7/§10.2). `transient recreate` is carried as data
//! (`RecreateFlags`, in `swapchain.rs`), never as a variant here.

use thiserror::Error;

/// Structured error used internally where a caller needs to distinguish taxonomy classes
/// programmatically, e.g. the executor deciding whether a failed pass build should be
/// silently skipped or propagated as fatal. Fallible constructors and the top-level
/// `Renderer`/`FrameExecutor` entry points still return `anyhow::Result` at the public
/// surface; this type is what gets wrapped when that distinction matters.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A Vulkan allocation, submission, or fence operation failed. The frame has been
    /// finalized through the abort path; the renderer is only usable again after a
    /// `sync_all_frames` + teardown.
    #[error("fatal Vulkan error in pass {pass_index:?}: {source}")]
    Fatal {
        pass_index: Option<usize>,
        #[source]
        source: ash::vk::Result,
    },

    /// A pass could not be built this frame (zero/mismatched framebuffer dimensions,
    /// missing framebuffer, unbuilt render pass). Logged at debug level by the caller and
    /// silently skipped; its injections are still finalized.
    #[error("skipping pass {pass_index}: {reason}")]
    Skip { pass_index: usize, reason: String },

    /// A validation-only mismatch (an injection wait on a resource the pass doesn't
    /// reference, a cleared aspect absent from the format, ...). Ignored at runtime beyond
    /// the warning.
    #[error("warning at pass {pass_index:?}, attachment {attachment_index:?}: {message}")]
    Warn {
        pass_index: Option<usize>,
        attachment_index: Option<usize>,
        message: String,
    },
}

impl RenderError {
    pub fn fatal(pass_index: Option<usize>, source: ash::vk::Result) -> Self {
        Self::Fatal { pass_index, source }
    }

    pub fn skip(pass_index: usize, reason: impl Into<String>) -> Self {
        Self::Skip {
            pass_index,
            reason: reason.into(),
        }
    }

    pub fn warn(
        pass_index: Option<usize>,
        attachment_index: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self::Warn {
            pass_index,
            attachment_index,
            message: message.into(),
        }
    }

    /// Logs `self` at the severity its taxonomy class calls for (§10.1) and, for `Skip`
    /// and `Warn`, consumes it — only `Fatal` is meant to propagate further.
    pub fn log(&self) {
        match self {
            RenderError::Fatal { pass_index, source } => {
                log::error!("fatal render error in pass {pass_index:?}: {source}")
            }
            RenderError::Skip { pass_index, reason } => {
                log::debug!("skipping pass {pass_index}: {reason}")
            }
            RenderError::Warn {
                pass_index,
                attachment_index,
                message,
            } => {
                log::warn!("pass {pass_index:?} attachment {attachment_index:?}: {message}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_and_warn_do_not_need_a_vulkan_result() {
        let skip = RenderError::skip(3, "zero-dimension framebuffer");
        assert!(matches!(skip, RenderError::Skip { pass_index: 3, .. }));

        let warn = RenderError::warn(Some(1), None, "cleared aspect absent for format");
        assert!(matches!(warn, RenderError::Warn { pass_index: Some(1), .. }));
    }
}
