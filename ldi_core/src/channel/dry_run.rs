use super::{ChannelError, ChannelStatus, ScanLineSender};
use crate::protocol::SCANLINE_DATA_SIZE;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Stand-in for the PRU that only counts lines.
///
/// Each line takes one mirror period, so exposure timing and progress output
/// look like the real thing.
#[derive(Debug)]
pub struct DryRunSender {
    line_period: Duration,
    lines_sent: u64,
    status: ChannelStatus,
}

impl DryRunSender {
    pub fn new(line_frequency_hz: f64) -> Self {
        info!("🧪 Dry-run, including rough timing simulation");
        let line_period = if line_frequency_hz > 0.0 {
            Duration::from_secs_f64(1.0 / line_frequency_hz)
        } else {
            Duration::ZERO
        };
        Self::with_line_period(line_period)
    }

    pub fn with_line_period(line_period: Duration) -> Self {
        Self {
            line_period,
            lines_sent: 0,
            status: ChannelStatus::Running,
        }
    }
}

impl ScanLineSender for DryRunSender {
    fn enqueue(&mut self, line: &[u8], _advance_sled: bool) -> Result<(), ChannelError> {
        if self.status != ChannelStatus::Running {
            return Err(ChannelError::NotRunning);
        }
        if line.len() != SCANLINE_DATA_SIZE {
            return Err(ChannelError::LineSize {
                expected: SCANLINE_DATA_SIZE,
                actual: line.len(),
            });
        }
        self.lines_sent += 1;
        if !self.line_period.is_zero() {
            thread::sleep(self.line_period);
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), ChannelError> {
        if self.status == ChannelStatus::Running {
            info!("🧪 Dry-run: total {} lines sent", self.lines_sent);
            self.status = ChannelStatus::Shutdown;
        }
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status
    }

    fn lines_sent(&self) -> u64 {
        self.lines_sent
    }

    fn is_hardware(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_lines_and_shuts_down_cleanly() {
        let mut sender = DryRunSender::with_line_period(Duration::ZERO);
        let line = [0u8; SCANLINE_DATA_SIZE];
        for i in 0..1000 {
            sender.enqueue(&line, i % 2 == 0).unwrap();
        }
        sender.shutdown().unwrap();
        assert_eq!(sender.lines_sent(), 1000);
        assert_eq!(sender.status(), ChannelStatus::Shutdown);
        assert!(!sender.is_hardware());
        sender.shutdown().unwrap();
    }

    #[test]
    fn test_line_period_from_frequency() {
        let sender = DryRunSender::new(250.0);
        assert_eq!(sender.line_period, Duration::from_millis(4));
        assert_eq!(DryRunSender::new(0.0).line_period, Duration::ZERO);
    }

    #[test]
    fn test_rejects_short_line() {
        let mut sender = DryRunSender::with_line_period(Duration::ZERO);
        let err = sender.enqueue(&[0u8; 100], true).unwrap_err();
        assert!(matches!(err, ChannelError::LineSize { expected: 512, actual: 100 }));
        assert_eq!(sender.lines_sent(), 0);
        assert_eq!(sender.status(), ChannelStatus::Running);
    }

    #[test]
    fn test_enqueue_after_shutdown_fails() {
        let mut sender = DryRunSender::with_line_period(Duration::ZERO);
        sender.shutdown().unwrap();
        assert!(matches!(
            sender.enqueue(&[0u8; SCANLINE_DATA_SIZE], true),
            Err(ChannelError::NotRunning)
        ));
    }
}
