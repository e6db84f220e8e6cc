/// Formats a second count as a mm:ss countdown clock, e.g. 1180 -> "19:40".
/// Minutes are not capped, so durations above an hour render as "75:03".
pub fn format_clock(total_seconds: u32) -> String {
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;
    format!("{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_zero_padded() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(5), "00:05");
        assert_eq!(format_clock(65), "01:05");
        assert_eq!(format_clock(1200), "20:00");
    }

    #[test]
    fn formats_over_an_hour() {
        assert_eq!(format_clock(4503), "75:03");
    }
}
