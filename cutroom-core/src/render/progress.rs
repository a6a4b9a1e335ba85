//! Parser for `-progress pipe:1` output.
//!
//! ffmpeg writes blocks of `key=value` lines, each block terminated by
//! `progress=continue` or `progress=end`.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub out_time_ms: i64,
    pub finished: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressParser {
    total_ms: i64,
    out_time_ms: i64,
}

impl ProgressParser {
    pub fn new(total_ms: i64) -> Self {
        Self {
            total_ms: total_ms.max(1),
            out_time_ms: 0,
        }
    }

    /// Consumes one line, returning an update at the end of each block.
    pub fn feed(&mut self, line: &str) -> Option<ProgressUpdate> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key {
            // Both keys carry microseconds despite the name of the second.
            "out_time_us" | "out_time_ms" => {
                if let Ok(micros) = value.parse::<i64>()
                    && micros >= 0
                {
                    self.out_time_ms = micros / 1000;
                }
                None
            }
            "out_time" => {
                if let Some(ms) = parse_ffmpeg_time(value) {
                    self.out_time_ms = ms;
                }
                None
            }
            "progress" => {
                let finished = value == "end";
                if finished {
                    self.out_time_ms = self.out_time_ms.max(self.total_ms);
                }
                Some(ProgressUpdate {
                    percent: self.percent(),
                    out_time_ms: self.out_time_ms.min(self.total_ms),
                    finished,
                })
            }
            _ => None,
        }
    }

    fn percent(&self) -> f64 {
        (self.out_time_ms as f64 / self.total_ms as f64 * 100.0).clamp(0.0, 100.0)
    }
}

/// Parses `HH:MM:SS.fraction` into milliseconds.
pub fn parse_ffmpeg_time(value: &str) -> Option<i64> {
    let mut parts = value.split(':');
    let hours: i64 = parts.next()?.parse().ok()?;
    let minutes: i64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0 || minutes < 0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3_600_000 + minutes * 60_000 + (seconds * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ffmpeg_time() {
        assert_eq!(parse_ffmpeg_time("00:00:05.120000"), Some(5120));
        assert_eq!(parse_ffmpeg_time("01:02:03.5"), Some(3_723_500));
        assert_eq!(parse_ffmpeg_time("N/A"), None);
        assert_eq!(parse_ffmpeg_time("-00:00:00.04"), None);
    }

    #[test]
    fn test_block_produces_update() {
        let mut parser = ProgressParser::new(10_000);
        let block = [
            "frame=120",
            "fps=30.00",
            "out_time_us=2500000",
            "out_time_ms=2500000",
            "out_time=00:00:02.500000",
            "speed=1.5x",
        ];
        for line in block {
            assert!(parser.feed(line).is_none());
        }

        let update = parser.feed("progress=continue").unwrap();
        assert_eq!(update.out_time_ms, 2500);
        assert!((update.percent - 25.0).abs() < f64::EPSILON);
        assert!(!update.finished);
    }

    #[test]
    fn test_end_reports_full_progress() {
        let mut parser = ProgressParser::new(4000);
        parser.feed("out_time=00:00:03.960000");
        let update = parser.feed("progress=end").unwrap();
        assert!(update.finished);
        assert_eq!(update.percent, 100.0);
    }

    #[test]
    fn test_ignores_unavailable_values() {
        let mut parser = ProgressParser::new(4000);
        parser.feed("out_time_us=1000000");
        parser.feed("out_time_us=N/A");
        parser.feed("garbage line");
        let update = parser.feed("progress=continue").unwrap();
        assert_eq!(update.out_time_ms, 1000);
    }
}
