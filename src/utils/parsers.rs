use anyhow::{anyhow, Context, Result};
use range_parser::parse;
use std::time::Duration;

/// Parse a wall-clock allowance into a Duration.
///
/// Supported formats:
/// - `"HH:MM:SS"`: hours:minutes:seconds
/// - `"MM:SS"`: minutes:seconds
/// - `"MM"`: minutes
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use corun::utils::parsers::parse_time_limit;
///
/// assert_eq!(parse_time_limit("30").unwrap(), Duration::from_secs(1800));
/// assert_eq!(parse_time_limit("30:45").unwrap(), Duration::from_secs(1845));
/// assert_eq!(parse_time_limit("2:30:45").unwrap(), Duration::from_secs(9045));
/// ```
pub fn parse_time_limit(time_str: &str) -> Result<Duration> {
    let parts: Vec<&str> = time_str.trim().split(':').collect();

    let number = |s: &str, what: &str| -> Result<u64> {
        s.parse::<u64>()
            .with_context(|| format!("Invalid {what} in time limit: {time_str}"))
    };

    // (field, seconds per unit), most significant first
    let fields: &[(&str, u64)] = match parts.len() {
        1 => &[("minutes", 60)],
        2 => &[("minutes", 60), ("seconds", 1)],
        3 => &[("hours", 3600), ("minutes", 60), ("seconds", 1)],
        _ => {
            return Err(anyhow!(
                "Invalid time format. Expected formats: HH:MM:SS, MM:SS, or MM"
            ))
        }
    };

    let mut secs: u64 = 0;
    for (part, &(what, scale)) in parts.iter().copied().zip(fields) {
        secs = number(part, what)?
            .checked_mul(scale)
            .and_then(|s| s.checked_add(secs))
            .ok_or_else(|| anyhow!("Time limit too large: {time_str}"))?;
    }
    Ok(Duration::from_secs(secs))
}

/// Parse a memory amount into bytes.
///
/// Supported formats: `"100G"`, `"1024M"`, `"64K"` (binary units, case
/// insensitive) or a bare number of bytes.
///
/// # Examples
///
/// ```
/// use corun::utils::parsers::parse_memory;
///
/// assert_eq!(parse_memory("512").unwrap(), 512);
/// assert_eq!(parse_memory("2K").unwrap(), 2048);
/// assert_eq!(parse_memory("1G").unwrap(), 1 << 30);
/// ```
pub fn parse_memory(memory_str: &str) -> Result<u64> {
    let memory_str = memory_str.trim();
    if memory_str.is_empty() {
        return Err(anyhow!("Memory amount cannot be empty"));
    }

    let (digits, shift) = match memory_str.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&memory_str[..memory_str.len() - 1], 10),
        Some('M') => (&memory_str[..memory_str.len() - 1], 20),
        Some('G') => (&memory_str[..memory_str.len() - 1], 30),
        Some('T') => (&memory_str[..memory_str.len() - 1], 40),
        _ => (memory_str, 0),
    };

    let value = digits
        .trim()
        .parse::<u64>()
        .with_context(|| format!("Invalid memory amount: {memory_str}"))?;
    value
        .checked_mul(1u64 << shift)
        .ok_or_else(|| anyhow!("Memory amount too large: {memory_str}"))
}

/// Parse GPU indices from string inputs, supporting ranges like "0-2" or
/// comma-separated "0,1,2", the way `CUDA_VISIBLE_DEVICES` lists them.
///
/// # Examples
///
/// ```
/// use corun::utils::parsers::parse_gpu_indices;
///
/// assert_eq!(parse_gpu_indices("0").unwrap(), vec![0]);
/// assert_eq!(parse_gpu_indices("0,2,4").unwrap(), vec![0, 2, 4]);
/// assert_eq!(parse_gpu_indices("0-2").unwrap(), vec![0, 1, 2]);
/// assert_eq!(parse_gpu_indices("0-1,3").unwrap(), vec![0, 1, 3]);
/// ```
pub fn parse_gpu_indices(gpu_string: &str) -> Result<Vec<u32>> {
    let mut parsed: Vec<u32> = parse::<u32>(gpu_string.trim())
        .with_context(|| format!("Invalid GPU index or range: {gpu_string}"))?;

    parsed.sort_unstable();
    parsed.dedup();

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_limit() {
        assert_eq!(parse_time_limit("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_time_limit("90").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_time_limit("01:00:00").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_time_limit(" 10:00 ").unwrap(), Duration::from_secs(600));
        assert!(parse_time_limit("").is_err());
        assert!(parse_time_limit("1:2:3:4").is_err());
        assert!(parse_time_limit("1h").is_err());
    }

    #[test]
    fn test_parse_time_limit_overflow() {
        assert!(parse_time_limit("6000000000000000000:00:00").is_err());
        assert!(parse_time_limit("18446744073709551615").is_err());
        assert!(parse_time_limit("5124095576030431:00:00").is_ok());
    }

    #[test]
    fn test_parse_memory() {
        assert_eq!(parse_memory("1024M").unwrap(), 1 << 30);
        assert_eq!(parse_memory("3g").unwrap(), 3 << 30);
        assert_eq!(parse_memory("1T").unwrap(), 1 << 40);
        assert!(parse_memory("").is_err());
        assert!(parse_memory("G").is_err());
        assert!(parse_memory("lots").is_err());
        assert!(parse_memory("99999999999T").is_err());
    }

    #[test]
    fn test_parse_gpu_indices_single() {
        assert_eq!(parse_gpu_indices("0").unwrap(), vec![0]);
        assert_eq!(parse_gpu_indices("10").unwrap(), vec![10]);
    }

    #[test]
    fn test_parse_gpu_indices_comma_separated() {
        assert_eq!(parse_gpu_indices("1,3,5,7").unwrap(), vec![1, 3, 5, 7]);
        // unsorted input gets sorted
        assert_eq!(parse_gpu_indices("3,1,2").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_gpu_indices_mixed_and_duplicates() {
        assert_eq!(parse_gpu_indices("0-1,3,5-6").unwrap(), vec![0, 1, 3, 5, 6]);
        assert_eq!(parse_gpu_indices("0-2,1-3").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(parse_gpu_indices(" 0,2,4 ").unwrap(), vec![0, 2, 4]);
    }

    #[test]
    fn test_parse_gpu_indices_invalid() {
        assert!(parse_gpu_indices("").is_err());
        assert!(parse_gpu_indices("abc").is_err());
        assert!(parse_gpu_indices("gpu0").is_err());
        assert!(parse_gpu_indices("-1").is_err());
    }
}
