use std::path::PathBuf;
use std::time::Duration;

/// Names of the external scheduler commands.
///
/// Defaults to the LSF tools found on `PATH`. Sites that wrap them in
/// scripts (or tests that fake them) can point these at other executables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerCommands {
    /// Submit command (e.g. `bsub`)
    pub submit: String,
    /// Status query command (e.g. `bjobs`)
    pub status: String,
    /// Cancel command (e.g. `bkill`)
    pub cancel: String,
}

impl Default for SchedulerCommands {
    fn default() -> Self {
        Self {
            submit: "bsub".to_string(),
            status: "bjobs".to_string(),
            cancel: "bkill".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Root of the `input/`, `output/`, `funct/` and `log/` directories.
    /// Must be on a filesystem shared with the cluster nodes.
    pub root: PathBuf,
    /// Queue used when the caller does not name one
    pub default_queue: String,
    /// Interval between scans of all pending jobs
    pub poll_interval: Duration,
    /// Interval used by a single job while waiting for a terminal status
    pub job_poll_interval: Duration,
    /// Consecutive unreadable or not-found status responses before a job is
    /// reported as stalled (unreadable) or lost (not found)
    pub stall_threshold: u32,
    /// Deadline for the whole batch. `None` waits forever.
    pub timeout: Option<Duration>,
    pub commands: SchedulerCommands,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("lsf"),
            default_queue: "vshort".to_string(),
            poll_interval: Duration::from_millis(200),
            job_poll_interval: Duration::from_millis(100),
            stall_threshold: 50,
            timeout: None,
            commands: SchedulerCommands::default(),
        }
    }
}

impl BatchConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_poll_interval(mut self, interval: Duration) -> Self {
        self.job_poll_interval = interval;
        self
    }

    pub fn with_stall_threshold(mut self, polls: u32) -> Self {
        self.stall_threshold = polls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_commands(mut self, commands: SchedulerCommands) -> Self {
        self.commands = commands;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_commands_default() {
        let cmds = SchedulerCommands::default();
        assert_eq!(cmds.submit, "bsub");
        assert_eq!(cmds.status, "bjobs");
        assert_eq!(cmds.cancel, "bkill");
    }

    #[test]
    fn batch_config_default() {
        let cfg = BatchConfig::default();
        assert_eq!(cfg.root, PathBuf::from("lsf"));
        assert_eq!(cfg.default_queue, "vshort");
        assert_eq!(cfg.poll_interval, Duration::from_millis(200));
        assert_eq!(cfg.job_poll_interval, Duration::from_millis(100));
        assert_eq!(cfg.stall_threshold, 50);
        assert!(cfg.timeout.is_none());
    }

    #[test]
    fn batch_config_new_keeps_defaults() {
        let cfg = BatchConfig::new("/shared/batch");
        assert_eq!(cfg.root, PathBuf::from("/shared/batch"));
        assert_eq!(cfg.default_queue, "vshort");
        assert_eq!(cfg.commands, SchedulerCommands::default());
    }

    #[test]
    fn batch_config_builders() {
        let cfg = BatchConfig::new("/tmp/x")
            .with_queue("long")
            .with_poll_interval(Duration::from_millis(5))
            .with_job_poll_interval(Duration::from_millis(1))
            .with_stall_threshold(3)
            .with_timeout(Duration::from_secs(60))
            .with_commands(SchedulerCommands {
                submit: "/opt/lsf/bin/bsub".to_string(),
                ..Default::default()
            });
        assert_eq!(cfg.default_queue, "long");
        assert_eq!(cfg.poll_interval, Duration::from_millis(5));
        assert_eq!(cfg.job_poll_interval, Duration::from_millis(1));
        assert_eq!(cfg.stall_threshold, 3);
        assert_eq!(cfg.timeout, Some(Duration::from_secs(60)));
        assert_eq!(cfg.commands.submit, "/opt/lsf/bin/bsub");
        assert_eq!(cfg.commands.status, "bjobs");
    }
}
