use std::io::{self, Write};

/// Simple progress displayer for batch counts
pub struct SimpleProgress {
    total: usize,
    current: usize,
}

impl SimpleProgress {
    /// Create a new simple progress displayer
    pub fn new(total: usize) -> Self {
        Self { total, current: 0 }
    }

    /// Update progress (refresh on each call)
    pub fn update(&mut self, current: usize) -> io::Result<()> {
        self.current = current;
        let percentage = if self.total > 0 {
            (self.current * 100) / self.total
        } else {
            0
        };
        print!(
            "\r[Progressing] {}/{} ({}%)",
            self.current, self.total, percentage
        );
        io::stdout().flush()?;
        Ok(())
    }

    /// Finish progress display
    pub fn finish(&mut self) -> io::Result<()> {
        self.current = self.total;
        println!("\r[Progressing] {}/{} (100%)", self.total, self.total);
        io::stdout().flush()?;
        Ok(())
    }
}

/// Format time as "xx h xx m xx.xxx s" format
pub fn format_time_used(elapsed: std::time::Duration) -> String {
    let total_secs = elapsed.as_secs_f64();
    let hours = (total_secs / 3600.0) as u64;
    let minutes = ((total_secs % 3600.0) / 60.0) as u64;
    let seconds = total_secs % 60.0;

    if hours > 0 {
        format!("[Time used] {:02} h {:02} m {:05.3} s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("[Time used] {:02} m {:05.3} s", minutes, seconds)
    } else {
        format!("[Time used] {:05.3} s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_time_used_seconds() {
        let s = format_time_used(std::time::Duration::from_millis(1500));
        assert_eq!(s, "[Time used] 1.500 s");
    }

    #[test]
    fn test_format_time_used_minutes() {
        let s = format_time_used(std::time::Duration::from_secs(125));
        assert_eq!(s, "[Time used] 02 m 5.000 s");
    }

    #[test]
    fn test_format_time_used_hours() {
        let s = format_time_used(std::time::Duration::from_secs(3600 + 60 + 1));
        assert_eq!(s, "[Time used] 01 h 01 m 1.000 s");
    }
}
