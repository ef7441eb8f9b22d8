use serde::{Deserialize, Deserializer};

/// Converts an iterator of `%` field specifiers to an `-o` argument, e.g. `-o%q,%C`
pub fn format_string<'a, I, S>(iter: I) -> String
where
    I: Iterator<Item = &'a S>,
    S: ?Sized + AsRef<str> + 'a,
{
    let fields = iter.map(|v| v.as_ref()).collect::<Vec<_>>().join(",");

    format!("-o{}", fields)
}

/// Returns a header-less reader for delimited Slurm output. Records of any length are
/// accepted so that callers can skip lines with an unexpected number of fields
pub fn reader(text: &str, delimiter: u8, trim: bool) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .delimiter(delimiter)
        .trim(if trim { csv::Trim::All } else { csv::Trim::None })
        .from_reader(text.as_bytes())
}

/// Parses a number, returning zero for empty or otherwise invalid values
pub fn lenient_number(value: &str) -> f64 {
    value.trim().parse::<f64>().unwrap_or(0.0)
}

/// Deserializes a number via [`lenient_number`]
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: &str = Deserialize::deserialize(deserializer)?;

    Ok(lenient_number(value))
}

/// Iterates over the non-empty lines of single-column output
pub fn names(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter(|line| !line.is_empty())
}
