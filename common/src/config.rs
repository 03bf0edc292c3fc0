//! Configuration types for runtime and logging settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress all log output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
}

impl OutputConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    #[must_use]
    pub fn level_directive(&self) -> &'static str {
        if self.quiet {
            return "off";
        }
        match self.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Where log events go
#[derive(Debug)]
pub struct TracingConfig {
    /// Forward events to a worker client instead of (or in addition to) printing them
    pub remote_layer: Option<crate::remote_tracing::RemoteTracingLayer>,
    /// Print events to stdout
    pub stdout: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            remote_layer: None,
            stdout: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        let level = |verbose| OutputConfig {
            quiet: false,
            verbose,
        }
        .level_directive();
        assert_eq!(level(0), "error");
        assert_eq!(level(1), "info");
        assert_eq!(level(2), "debug");
        assert_eq!(level(3), "trace");
        assert_eq!(level(7), "trace");
    }

    #[test]
    fn quiet_wins_over_verbose() {
        let output = OutputConfig {
            quiet: true,
            verbose: 3,
        };
        assert_eq!(output.level_directive(), "off");
    }
}
