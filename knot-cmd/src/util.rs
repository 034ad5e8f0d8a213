use crate::error::CommandError;

pub fn parse_i64(bytes: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| CommandError::Syntax("value is not an integer or out of range".to_string()))
}

pub fn parse_f64(bytes: &[u8]) -> Result<f64, CommandError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .ok_or_else(|| CommandError::Syntax("value is not a valid float".to_string()))
}

pub fn parse_usize(bytes: &[u8]) -> Result<usize, CommandError> {
    let n = parse_i64(bytes)?;
    usize::try_from(n).map_err(|_| CommandError::OutOfRange("value is out of range".to_string()))
}

pub fn uppercase(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).to_ascii_uppercase()
}

pub fn arity_error(name: &str) -> CommandError {
    CommandError::Syntax(format!("wrong number of arguments for '{name}' command"))
}
