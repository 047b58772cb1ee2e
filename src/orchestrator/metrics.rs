use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Timing of a whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchMetrics {
    /// Elapsed time of the batch call
    pub wall_time: Duration,
    /// CPU time summed over all jobs whose usage report could be read
    pub cpu_time: Duration,
    /// `cpu_time / wall_time`, 0 when no wall time elapsed
    pub speed_up: f64,
}

impl BatchMetrics {
    pub fn new(wall_time: Duration, cpu_time: Duration) -> Self {
        let wall = wall_time.as_secs_f64();
        let speed_up = if wall > 0.0 {
            cpu_time.as_secs_f64() / wall
        } else {
            0.0
        };
        Self {
            wall_time,
            cpu_time,
            speed_up,
        }
    }
}

impl fmt::Display for BatchMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Wall Time: {:.2}s, CPU time: {:.2}s, speed-up: {:.2}X",
            self.wall_time.as_secs_f64(),
            self.cpu_time.as_secs_f64(),
            self.speed_up
        )
    }
}
