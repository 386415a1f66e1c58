//! Controller configuration and the canonical demo topology.

use std::cmp::Ordering;

use tracing::warn;

use capsflip_types::{FormatDescriptor, Fraction, ReconfigureStrategy};

/// A live test source capped at 15 fps through `src_caps_filter`, converted to
/// device memory and hardware encoded into a sink that stops after 150 buffers.
pub const DEFAULT_TOPOLOGY: &str = "videotestsrc pattern=ball is-live=TRUE \
    ! capsfilter name=src_caps_filter caps=video/x-raw,format=RGBA,width=1280,height=720,framerate=15/1 \
    ! nvvidconv \
    ! video/x-raw(memory:NVMM),format=I420 \
    ! nvv4l2h264enc \
    ! fakesink num-buffers=150";

/// The stage whose format is replaced.
pub const DEFAULT_STAGE: &str = "src_caps_filter";

/// Frame rate the stage is switched to.
pub const DEFAULT_TARGET_FRAMERATE: Fraction = Fraction { numer: 30, denom: 1 };

/// RGBA 1280x720 at [`DEFAULT_TARGET_FRAMERATE`].
pub fn default_target() -> FormatDescriptor {
    FormatDescriptor::new("video/x-raw", "RGBA", 1280, 720, DEFAULT_TARGET_FRAMERATE)
}

/// Everything one controller run needs.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub topology: String,
    pub stage_name: String,
    pub target: FormatDescriptor,
    pub strategy: ReconfigureStrategy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            topology: DEFAULT_TOPOLOGY.to_string(),
            stage_name: DEFAULT_STAGE.to_string(),
            target: default_target(),
            strategy: ReconfigureStrategy::Live,
        }
    }
}

impl ControllerConfig {
    pub fn with_strategy(mut self, strategy: ReconfigureStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Build a config whose target keeps the stage's initial format and only
    /// changes the frame rate.
    ///
    /// When the topology cannot be parsed, or the stage carries no fixed
    /// caps, the default target with `framerate` is used instead.
    pub fn for_topology(
        topology: impl Into<String>,
        stage_name: impl Into<String>,
        framerate: Fraction,
        strategy: ReconfigureStrategy,
    ) -> Self {
        let topology = topology.into();
        let stage_name = stage_name.into();
        let target = resolve_target(&topology, &stage_name, framerate);
        Self {
            topology,
            stage_name,
            target,
            strategy,
        }
    }
}

/// Derive the replacement format from the stage's initial caps.
pub fn resolve_target(topology: &str, stage_name: &str, framerate: Fraction) -> FormatDescriptor {
    let initial = capsflip_launch::parse(topology)
        .map_err(|e| e.to_string())
        .and_then(|t| {
            t.caps_of(stage_name)
                .ok_or_else(|| format!("stage '{stage_name}' has no caps"))
                .and_then(|caps| caps.to_format().map_err(|e| e.to_string()))
        });

    match initial {
        Ok(initial) => {
            if framerate.cmp_rate(&initial.framerate) != Ordering::Greater {
                warn!(
                    "Target frame rate {} is not higher than the initial {}",
                    framerate, initial.framerate
                );
            }
            initial.with_framerate(framerate)
        }
        Err(reason) => {
            warn!("Using the default target format: {reason}");
            default_target().with_framerate(framerate)
        }
    }
}
