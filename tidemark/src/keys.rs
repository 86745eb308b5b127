/// Sort key of the single "current" watermark row of a dataset.
pub const CURRENT_SORT_KEY: &str = "migration";

/// Sort key prefix shared by every history row.
pub const HISTORY_SORT_KEY_PREFIX: &str = "migration#run#";

const RADIX32_DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";
const TIMESTAMP_WIDTH: usize = 15;
const SEQUENCE_WIDTH: usize = 10;

/// Common key-construction helpers for storage backends.
#[derive(Debug, Clone)]
pub struct KeyContext<'a> {
    pub prefix: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn new(prefix: &'a str) -> Self {
        Self { prefix }
    }

    /// Key of the container holding every row of one partition.
    pub fn partition(&self, table: &str, pk: &str) -> String {
        format!("{}:{}:{}", self.prefix, table, pk)
    }
}

/// Sort key of a history row.
///
/// The timestamp is rendered in base 32 and left padded so that rows sort
/// lexicographically in application order; the sequence suffix keeps two
/// applications within the same millisecond apart.
pub fn history_sort_key(epoch_millis: u64, sequence: u64) -> String {
    format!(
        "{HISTORY_SORT_KEY_PREFIX}{:0>width$}#{sequence:0seq_width$}",
        to_radix32(epoch_millis),
        width = TIMESTAMP_WIDTH,
        seq_width = SEQUENCE_WIDTH,
    )
}

fn to_radix32(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(RADIX32_DIGITS[(value % 32) as usize]);
        value /= 32;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
